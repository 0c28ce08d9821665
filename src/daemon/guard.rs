use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::storage::entities::TimerId;

/// How much longer than the suppression window an entry may linger before
/// pruning removes it.
const RETENTION_WINDOWS: i32 = 10;

/// Hard cap on tracked ids. Reaching it forces a prune, so the guard can't
/// grow without bound no matter how the clock behaves.
const MAX_ENTRIES: usize = 1024;

/// Idempotency cache for expiry signals.
///
/// The same expiry can arrive from the periodic sweep and from each surface
/// whose local countdown hit zero. The first signal per timer id wins; any
/// further signal inside the suppression window is dropped, which keeps the
/// "one stat record, one notification" outcome under at-least-once delivery.
pub struct ExpiryGuard {
    window: Duration,
    handled: HashMap<TimerId, DateTime<Utc>>,
}

impl ExpiryGuard {
    pub fn from_seconds(window_s: i64) -> Self {
        Self {
            window: Duration::seconds(window_s),
            handled: HashMap::new(),
        }
    }

    /// Records an expiry signal. Returns false when the signal is a duplicate
    /// of one already handled inside the window.
    pub fn first_signal(&mut self, id: TimerId, now: DateTime<Utc>) -> bool {
        if self.handled.len() >= MAX_ENTRIES {
            self.prune(now);
        }
        match self.handled.get(&id) {
            Some(&handled_at) if now - handled_at < self.window => {
                debug!("Suppressing duplicate expiry for timer {id}");
                false
            }
            _ => {
                self.handled.insert(id, now);
                true
            }
        }
    }

    /// Restarting a timer makes its next expiry a new event.
    pub fn clear(&mut self, id: TimerId) {
        self.handled.remove(&id);
    }

    /// Drops entries old enough to be irrelevant. Called periodically so the
    /// map size stays proportional to recently expired timers.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let retention = self.window * RETENTION_WINDOWS;
        self.handled.retain(|_, &mut handled_at| now - handled_at < retention);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{ExpiryGuard, MAX_ENTRIES};

    #[test]
    fn test_duplicate_within_window_suppressed() {
        let mut guard = ExpiryGuard::from_seconds(3);
        let now = Utc.timestamp_millis_opt(1_000_000).unwrap();

        assert!(guard.first_signal(1, now));
        assert!(!guard.first_signal(1, now + Duration::seconds(1)));
        assert!(!guard.first_signal(1, now + Duration::seconds(2)));
        // A different timer is unaffected.
        assert!(guard.first_signal(2, now));
    }

    #[test]
    fn test_signal_after_window_is_new() {
        let mut guard = ExpiryGuard::from_seconds(3);
        let now = Utc.timestamp_millis_opt(1_000_000).unwrap();

        assert!(guard.first_signal(1, now));
        assert!(guard.first_signal(1, now + Duration::seconds(3)));
    }

    #[test]
    fn test_clear_resets_suppression() {
        let mut guard = ExpiryGuard::from_seconds(3);
        let now = Utc.timestamp_millis_opt(1_000_000).unwrap();

        assert!(guard.first_signal(1, now));
        guard.clear(1);
        assert!(guard.first_signal(1, now + Duration::seconds(1)));
    }

    #[test]
    fn test_prune_drops_old_entries() {
        let mut guard = ExpiryGuard::from_seconds(3);
        let now = Utc.timestamp_millis_opt(1_000_000).unwrap();

        guard.first_signal(1, now);
        guard.first_signal(2, now + Duration::seconds(29));
        guard.prune(now + Duration::seconds(31));

        assert_eq!(guard.handled.len(), 1);
        assert!(guard.handled.contains_key(&2));
    }

    #[test]
    fn test_size_stays_bounded() {
        let mut guard = ExpiryGuard::from_seconds(3);
        let start = Utc.timestamp_millis_opt(0).unwrap();

        for id in 0..(MAX_ENTRIES as u64 * 2) {
            let now = start + Duration::seconds(id as i64);
            guard.first_signal(id, now);
        }
        assert!(guard.handled.len() <= MAX_ENTRIES);
    }
}
