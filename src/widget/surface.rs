use anyhow::Result;

use crate::daemon::storage::entities::TimerId;

use super::snap::Rect;

/// Everything a surface needs to draw one widget.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetView {
    pub id: TimerId,
    pub label: String,
    /// Display color of the timer's category, as `#rrggbb`.
    pub color: String,
    pub rect: Rect,
    /// Elapsed fraction of the countdown, in [0, 1]. Drives the progress
    /// ring.
    pub progress: f64,
    /// Remaining time as `M:SS`.
    pub clock: String,
}

/// User interaction reported by a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// A widget was dropped after a drag, at raw (unsnapped) coordinates.
    DragEnd { id: TimerId, x: i32, y: i32 },
}

/// The rendering seam. The session drives any implementation of this the
/// same way; the geometry never leaks rendering details back in.
#[cfg_attr(test, mockall::automock)]
pub trait WidgetSurface: Send {
    fn viewport(&self) -> Rect;

    /// Creates or redraws the widget for a timer.
    fn upsert(&mut self, view: &WidgetView) -> Result<()>;

    /// Tears down the widget of a timer that is no longer visible.
    fn remove(&mut self, id: TimerId) -> Result<()>;

    /// Audible ping, volume in [0, 1].
    fn bell(&mut self, volume: f64);
}
