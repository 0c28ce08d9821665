use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::Push;

use super::storage::entities::{Settings, Timer};

pub type SessionId = u64;

/// Fan-out of timer state to attached widget surfaces.
///
/// Exactly one surface is "active" at a time and receives the visible timer
/// list; every other surface receives an empty list so it clears its widgets.
/// Delivery is best effort: a session whose channel is gone or full is
/// dropped, never retried.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    sessions: HashMap<SessionId, mpsc::Sender<Push>>,
    active: Option<SessionId>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                sessions: HashMap::new(),
                active: None,
            })),
        }
    }

    pub fn register(&self, id: SessionId, sender: mpsc::Sender<Push>) {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.insert(id, sender);
        // The first surface to show up becomes the active one.
        if inner.active.is_none() {
            inner.active = Some(id);
        }
    }

    pub fn unregister(&self, id: SessionId) {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.remove(&id);
        if inner.active == Some(id) {
            inner.active = None;
        }
    }

    pub fn set_active(&self, id: SessionId) {
        let mut inner = self.inner.lock().unwrap();
        if inner.sessions.contains_key(&id) {
            inner.active = Some(id);
        }
    }

    /// Recomputes the visible subset and pushes it to every session.
    pub fn broadcast(&self, timers: &[Timer], settings: &Settings) {
        let visible: Vec<Timer> = if settings.show_floating {
            timers.iter().filter(|t| t.running).cloned().collect()
        } else {
            vec![]
        };

        let mut inner = self.inner.lock().unwrap();
        let active = inner.active;
        inner.sessions.retain(|&id, sender| {
            let timers = if active == Some(id) {
                visible.clone()
            } else {
                vec![]
            };
            match sender.try_send(Push::Timers { timers }) {
                Ok(()) => true,
                Err(e) => {
                    debug!("Dropping surface session {id}: {e}");
                    false
                }
            }
        });
    }

    /// Sound is only played where the user is looking.
    pub fn play_sound(&self, volume: f64) {
        let mut inner = self.inner.lock().unwrap();
        let Some(active) = inner.active else {
            return;
        };
        let failed = match inner.sessions.get(&active) {
            Some(sender) => sender.try_send(Push::PlaySound { volume }).is_err(),
            None => false,
        };
        if failed {
            debug!("Dropping surface session {active}: sound push failed");
            inner.sessions.remove(&active);
            inner.active = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use crate::{
        daemon::storage::entities::{Settings, Timer},
        protocol::Push,
    };

    use super::Broadcaster;

    fn test_timer(id: u64, running: bool) -> Timer {
        Timer {
            id,
            label: format!("timer {id}"),
            kind: "업무".into(),
            duration: 25,
            running,
            color: "#2ecc71".into(),
            end_time: None,
            x: None,
            y: None,
        }
    }

    #[tokio::test]
    async fn test_active_surface_gets_running_timers() {
        let broadcaster = Broadcaster::new();
        let (tx_a, mut rx_a) = mpsc::channel(16);
        let (tx_b, mut rx_b) = mpsc::channel(16);
        broadcaster.register(1, tx_a);
        broadcaster.register(2, tx_b);
        broadcaster.set_active(2);

        let timers = vec![test_timer(1, true), test_timer(2, false)];
        broadcaster.broadcast(&timers, &Settings::default());

        assert_eq!(rx_a.recv().await, Some(Push::Timers { timers: vec![] }));
        match rx_b.recv().await {
            Some(Push::Timers { timers }) => {
                assert_eq!(timers.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1]);
            }
            other => panic!("Expected timer push, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_show_floating_off_clears_everywhere() {
        let broadcaster = Broadcaster::new();
        let (tx, mut rx) = mpsc::channel(16);
        broadcaster.register(1, tx);

        let settings = Settings {
            show_floating: false,
            ..Settings::default()
        };
        broadcaster.broadcast(&[test_timer(1, true)], &settings);

        assert_eq!(rx.recv().await, Some(Push::Timers { timers: vec![] }));
    }

    #[tokio::test]
    async fn test_dead_session_dropped_silently() {
        let broadcaster = Broadcaster::new();
        let (tx, rx) = mpsc::channel(16);
        broadcaster.register(1, tx);
        drop(rx);

        // Must not error, and the session must be gone afterwards.
        broadcaster.broadcast(&[], &Settings::default());
        assert!(broadcaster.inner.lock().unwrap().sessions.is_empty());
    }

    #[tokio::test]
    async fn test_sound_goes_to_active_only() {
        let broadcaster = Broadcaster::new();
        let (tx_a, mut rx_a) = mpsc::channel(16);
        let (tx_b, mut rx_b) = mpsc::channel(16);
        broadcaster.register(1, tx_a);
        broadcaster.register(2, tx_b);
        broadcaster.set_active(1);

        broadcaster.play_sound(0.5);

        assert_eq!(rx_a.recv().await, Some(Push::PlaySound { volume: 0.5 }));
        assert!(rx_b.try_recv().is_err());
    }
}
