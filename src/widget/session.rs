use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    daemon::storage::entities::{Timer, TimerId},
    protocol::Request,
    utils::{clock::Clock, time::format_clock},
};

use super::{
    snap::{snap_position, Rect},
    surface::{SurfaceEvent, WidgetSurface, WidgetView},
};

pub const WIDGET_SIZE: i32 = 100;
const WIDGET_SPACING: i32 = 110;
const WIDGET_MARGIN: i32 = 10;

struct WidgetModel {
    timer: Timer,
    rect: Rect,
    /// The local countdown reports zero at most once per start.
    ended_sent: bool,
}

/// Per-surface widget state machine.
///
/// Mirrors the daemon's broadcasts onto a [WidgetSurface]: widgets appear
/// when their timer shows up in the visible list, redraw from `end_time` on a
/// local one-second tick, and disappear when their timer drops out. Drag ends
/// run the snap pass and persist the final position through `moveTimer`.
pub struct WidgetSession<S: WidgetSurface> {
    surface: S,
    widgets: Vec<WidgetModel>,
    outbound: mpsc::Sender<Request>,
    clock: Box<dyn Clock>,
}

impl<S: WidgetSurface> WidgetSession<S> {
    pub fn new(surface: S, outbound: mpsc::Sender<Request>, clock: Box<dyn Clock>) -> Self {
        Self {
            surface,
            widgets: vec![],
            outbound,
            clock,
        }
    }

    /// Applies a broadcast list: tears down widgets whose timer disappeared,
    /// creates or updates the rest.
    pub fn apply_timers(&mut self, timers: Vec<Timer>) -> Result<()> {
        let mut removed = vec![];
        self.widgets.retain(|model| {
            if timers.iter().any(|t| t.id == model.timer.id) {
                true
            } else {
                removed.push(model.timer.id);
                false
            }
        });
        for id in removed {
            self.surface.remove(id)?;
        }

        let now = self.clock.time();
        let viewport = self.surface.viewport();
        for (index, timer) in timers.into_iter().enumerate() {
            let rect = match (timer.x, timer.y) {
                // A stored position always wins, it's what the user chose.
                (Some(x), Some(y)) => Rect::new(x, y, WIDGET_SIZE, WIDGET_SIZE),
                _ => match self.widget(timer.id) {
                    Some(existing) => existing.rect,
                    None => default_position(viewport, index),
                },
            };
            match self.widget_mut(timer.id) {
                Some(model) => {
                    model.rect = rect;
                    // A fresh start resets the local zero detection.
                    if timer.end_time != model.timer.end_time {
                        model.ended_sent = false;
                    }
                    model.timer = timer;
                }
                None => self.widgets.push(WidgetModel {
                    timer,
                    rect,
                    ended_sent: false,
                }),
            }
        }

        self.draw_all(now)
    }

    /// One-second redraw, independent of the daemon's own tick. Reports
    /// expiry the moment the local countdown hits zero, without waiting for
    /// the daemon to notice.
    pub async fn redraw(&mut self) -> Result<()> {
        let now = self.clock.time();
        self.draw_all(now)?;

        let mut ended = vec![];
        for model in &mut self.widgets {
            if model.timer.running && !model.ended_sent && model.timer.remaining(now).is_zero() {
                model.ended_sent = true;
                ended.push(Request::TimerEnded {
                    id: model.timer.id,
                    label: model.timer.label.clone(),
                });
            }
        }
        for request in ended {
            // The daemon will also notice by itself, losing this is fine.
            if self.outbound.send(request).await.is_err() {
                debug!("Daemon is gone, expiry report dropped");
            }
        }
        Ok(())
    }

    pub async fn handle_event(&mut self, event: SurfaceEvent) -> Result<()> {
        match event {
            SurfaceEvent::DragEnd { id, x, y } => self.drag_end(id, x, y).await,
        }
    }

    async fn drag_end(&mut self, id: TimerId, x: i32, y: i32) -> Result<()> {
        let dropped = Rect::new(x, y, WIDGET_SIZE, WIDGET_SIZE);
        let others: Vec<(TimerId, Rect)> = self
            .widgets
            .iter()
            .filter(|model| model.timer.id != id)
            .map(|model| (model.timer.id, model.rect))
            .collect();
        let viewport = self.surface.viewport();
        let (x, y) = snap_position(dropped, viewport, &others);

        let now = self.clock.time();
        // A drag of a widget that was torn down mid-flight has nothing to
        // land on.
        let Some(model) = self.widget_mut(id) else {
            return Ok(());
        };
        model.rect.x = x;
        model.rect.y = y;
        model.timer.x = Some(x);
        model.timer.y = Some(y);
        let view = view_of(model, now);
        self.surface.upsert(&view)?;

        // Survives reloads through the store.
        if self
            .outbound
            .send(Request::MoveTimer { id, x, y })
            .await
            .is_err()
        {
            debug!("Daemon is gone, move not persisted");
        }
        Ok(())
    }

    pub fn bell(&mut self, volume: f64) {
        self.surface.bell(volume);
    }

    /// Clears the screen of widgets when the session ends.
    pub fn shutdown(&mut self) -> Result<()> {
        for model in std::mem::take(&mut self.widgets) {
            self.surface.remove(model.timer.id)?;
        }
        Ok(())
    }

    fn draw_all(&mut self, now: DateTime<Utc>) -> Result<()> {
        for model in &self.widgets {
            let view = view_of(model, now);
            self.surface.upsert(&view)?;
        }
        Ok(())
    }

    fn widget(&self, id: TimerId) -> Option<&WidgetModel> {
        self.widgets.iter().find(|model| model.timer.id == id)
    }

    fn widget_mut(&mut self, id: TimerId) -> Option<&mut WidgetModel> {
        self.widgets.iter_mut().find(|model| model.timer.id == id)
    }
}

/// Widgets without a stored position line up from the top-right corner.
fn default_position(viewport: Rect, index: usize) -> Rect {
    let x = viewport.right() - WIDGET_MARGIN - WIDGET_SIZE - WIDGET_SPACING * index as i32;
    Rect::new(x, viewport.y + WIDGET_MARGIN, WIDGET_SIZE, WIDGET_SIZE)
}

fn view_of(model: &WidgetModel, now: DateTime<Utc>) -> WidgetView {
    let timer = &model.timer;
    let remaining = timer.remaining(now);
    let total = timer.total();
    let progress = if total.is_zero() {
        1.
    } else {
        1. - remaining.num_milliseconds() as f64 / total.num_milliseconds() as f64
    };
    WidgetView {
        id: timer.id,
        label: timer.label.clone(),
        color: timer.color.clone(),
        rect: model.rect,
        progress: progress.clamp(0., 1.),
        clock: format_clock(remaining),
    }
}
