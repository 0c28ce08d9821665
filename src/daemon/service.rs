use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::{
    protocol::{Request, Response},
    utils::clock::Clock,
};

use super::{
    broadcast::{Broadcaster, SessionId},
    guard::ExpiryGuard,
    storage::{
        entities::{LabelTypeMap, Settings, StatRecord, Timer, TimerId},
        state::StateStorage,
    },
};

/// Window inside which a second expiry signal for the same timer is dropped.
pub const EXPIRY_SUPPRESSION_S: i64 = 3;

/// Secondary guard: two stat records for the same label closer than this are
/// considered the same session.
const STAT_DEDUP_WINDOW: Duration = Duration::seconds(2);

const GUARD_PRUNE_INTERVAL: Duration = Duration::seconds(60);

/// Recent records kept in memory for the secondary dedup.
const RECENT_STATS_KEPT: usize = 32;

pub enum ServiceMessage {
    Request {
        request: Request,
        session: SessionId,
        respond: oneshot::Sender<Response>,
    },
    /// Periodic expiry sweep, sent by the tick monitor.
    Tick,
}

/// Expiry notifications shown to the user. Behind a trait so tests can count
/// them.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, summary: &str, body: &str) -> Result<()>;
}

pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, summary: &str, body: &str) -> Result<()> {
        notify_rust::Notification::new()
            .summary(summary)
            .body(body)
            .appname("flowdeck")
            .icon("alarm-clock")
            .show()?;
        Ok(())
    }
}

/// The single owner of timers and settings.
///
/// Every mutation, no matter which client it comes from, arrives through one
/// mpsc receiver and is applied in receipt order, so the in-memory list never
/// sees partial updates. Persistence happens after the mutation and its
/// failures are logged, not propagated: the response reflects the in-memory
/// state either way.
pub struct TimerService {
    receiver: mpsc::Receiver<ServiceMessage>,
    storage: StateStorage,
    broadcaster: Broadcaster,
    notifier: Box<dyn Notifier>,
    clock: Box<dyn Clock>,
    timers: Vec<Timer>,
    settings: Settings,
    label_types: LabelTypeMap,
    recent_stats: Vec<StatRecord>,
    guard: ExpiryGuard,
    last_prune: DateTime<Utc>,
}

impl TimerService {
    pub async fn new(
        receiver: mpsc::Receiver<ServiceMessage>,
        storage: StateStorage,
        broadcaster: Broadcaster,
        notifier: Box<dyn Notifier>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let timers = storage.load_timers().await;
        let settings = storage.load_settings().await;
        let label_types = storage.load_label_types().await;
        info!(
            "Loaded {} timers, {} known labels",
            timers.len(),
            label_types.len()
        );
        let last_prune = clock.time();
        Self {
            receiver,
            storage,
            broadcaster,
            notifier,
            clock,
            timers,
            settings,
            label_types,
            recent_stats: vec![],
            guard: ExpiryGuard::from_seconds(EXPIRY_SUPPRESSION_S),
            last_prune,
        }
    }

    /// Executes the service event loop. Ends when every request sender is
    /// dropped.
    pub async fn run(mut self) -> Result<()> {
        while let Some(message) = self.receiver.recv().await {
            match message {
                ServiceMessage::Request {
                    request,
                    session,
                    respond,
                } => {
                    let response = self.handle_request(request, session).await;
                    // The requester may have hung up. Its problem, not ours.
                    let _ = respond.send(response);
                }
                ServiceMessage::Tick => self.sweep().await,
            }
        }
        Ok(())
    }

    async fn handle_request(&mut self, request: Request, session: SessionId) -> Response {
        debug!("Handling {request:?} from session {session}");
        match request {
            Request::GetTimers => self.timer_response(),
            Request::AddTimer { timer } => {
                // Label uniqueness is the caller's concern.
                self.timers.push(timer);
                self.persist_timers().await;
                self.broadcast();
                self.timer_response()
            }
            Request::StartTimer { id } => {
                let now = self.clock.time();
                if let Some(timer) = self.timer_mut(id) {
                    timer.start(now);
                }
                // A restarted timer expiring again is a new event.
                self.guard.clear(id);
                self.persist_timers().await;
                self.broadcast();
                self.timer_response()
            }
            Request::StopTimer { id } => {
                if let Some(timer) = self.timer_mut(id) {
                    timer.stop();
                }
                self.persist_timers().await;
                self.broadcast();
                self.timer_response()
            }
            Request::RemoveTimer { id } => {
                self.timers.retain(|t| t.id != id);
                self.persist_timers().await;
                self.broadcast();
                self.timer_response()
            }
            Request::MoveTimer { id, x, y } => {
                if let Some(timer) = self.timer_mut(id) {
                    timer.x = Some(x);
                    timer.y = Some(y);
                }
                self.persist_timers().await;
                self.broadcast();
                self.timer_response()
            }
            Request::TimerEnded { id, .. } => {
                let now = self.clock.time();
                self.handle_expiry(id, now).await;
                self.timer_response()
            }
            Request::GetSettings => Response::Settings(self.settings.clone()),
            Request::UpdateSettings { updates } => {
                self.settings.apply(updates);
                if let Err(e) = self.storage.save_settings(&self.settings).await {
                    error!("Failed to persist settings: {e:?}");
                }
                // Floating visibility may have changed.
                self.broadcast();
                Response::Settings(self.settings.clone())
            }
            Request::AttachSurface => {
                // Registration already happened in the server; resend state so
                // the new surface is in sync.
                self.broadcast();
                Response::ok()
            }
            Request::SurfaceFocused => {
                self.broadcaster.set_active(session);
                self.broadcast();
                Response::ok()
            }
            Request::SetTimer { .. } | Request::ShowTimer { .. } | Request::HideTimer => {
                self.broadcast();
                Response::ok()
            }
        }
    }

    /// Detects timers whose end time has passed. Runs once a second.
    async fn sweep(&mut self) {
        let now = self.clock.time();
        let due: Vec<TimerId> = self
            .timers
            .iter()
            .filter(|t| t.running && t.end_time.is_some_and(|end| end <= now))
            .map(|t| t.id)
            .collect();
        for id in due {
            self.handle_expiry(id, now).await;
        }

        if now - self.last_prune >= GUARD_PRUNE_INTERVAL {
            self.guard.prune(now);
            self.last_prune = now;
        }
    }

    /// One genuine expiry: stop, persist, broadcast, record, notify. Signals
    /// can arrive from the sweep and from any surface; the guard collapses
    /// them into one handling.
    async fn handle_expiry(&mut self, id: TimerId, now: DateTime<Utc>) {
        if !self.guard.first_signal(id, now) {
            return;
        }
        let Some(timer) = self.timer_mut(id) else {
            return;
        };
        timer.stop();
        let finished = timer.clone();
        info!("Timer {} ({}) finished", finished.id, finished.label);

        self.persist_timers().await;
        self.broadcast();
        self.record_stat(&finished, now).await;

        if self.settings.enable_notifications {
            let body = format!(
                "{} is done after {} minutes.",
                finished.label, finished.duration
            );
            if let Err(e) = self.notifier.notify("Timer finished", &body) {
                error!("Failed to show notification: {e:?}");
            }
        }
        if self.settings.enable_sound {
            self.broadcaster.play_sound(self.settings.volume);
        }
    }

    async fn record_stat(&mut self, finished: &Timer, now: DateTime<Utc>) {
        let duplicate = self
            .recent_stats
            .iter()
            .any(|r| r.label == finished.label && (now - r.timestamp).abs() < STAT_DEDUP_WINDOW);
        if duplicate {
            debug!("Suppressing duplicate stat record for {}", finished.label);
            return;
        }

        let record = StatRecord {
            label: finished.label.clone(),
            duration: finished.duration,
            timestamp: now,
            kind: Some(finished.kind.clone()),
        };
        self.recent_stats.push(record.clone());
        if self.recent_stats.len() > RECENT_STATS_KEPT {
            self.recent_stats.remove(0);
        }
        if let Err(e) = self.storage.append_stats(&[record]).await {
            error!("Failed to append stat record: {e:?}");
        }

        self.label_types
            .insert(finished.label.clone(), finished.kind.clone());
        if let Err(e) = self.storage.save_label_types(&self.label_types).await {
            error!("Failed to persist label types: {e:?}");
        }
    }

    fn timer_mut(&mut self, id: TimerId) -> Option<&mut Timer> {
        self.timers.iter_mut().find(|t| t.id == id)
    }

    fn timer_response(&self) -> Response {
        Response::Timers {
            timer_data: self.timers.clone(),
        }
    }

    fn broadcast(&self) {
        self.broadcaster.broadcast(&self.timers, &self.settings);
    }

    async fn persist_timers(&self) {
        if let Err(e) = self.storage.save_timers(&self.timers).await {
            error!("Failed to persist timers: {e:?}");
        }
    }
}
