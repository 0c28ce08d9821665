use std::{
    collections::HashMap,
    io::{self, Write},
};

use ansi_term::Colour;
use anyhow::Result;

use crate::daemon::storage::entities::TimerId;

use super::{
    snap::Rect,
    surface::{WidgetSurface, WidgetView},
};

// A terminal cell stands for this many pixels, which makes a 100 px widget
// a 10x5 cell box.
const PX_PER_COL: i32 = 10;
const PX_PER_ROW: i32 = 20;

const BOX_COLS: usize = 10;
const BOX_ROWS: i32 = 5;
const BAR_CELLS: usize = 8;

/// Draws floating widgets as small colored boxes on an ANSI terminal.
///
/// Positions are the same pixel coordinates the store persists, scaled down
/// to cells, so widgets land where a drag on any other surface left them.
pub struct TermSurface<W> {
    out: W,
    viewport: Rect,
    drawn: HashMap<TimerId, Rect>,
}

impl TermSurface<io::Stdout> {
    pub fn stdout() -> Self {
        let cols = dimension_from_env("COLUMNS", 80);
        let rows = dimension_from_env("LINES", 24);
        Self::new(
            io::stdout(),
            Rect::new(0, 0, cols * PX_PER_COL, rows * PX_PER_ROW),
        )
    }
}

fn dimension_from_env(name: &str, default: i32) -> i32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl<W: Write> TermSurface<W> {
    pub fn new(out: W, viewport: Rect) -> Self {
        Self {
            out,
            viewport,
            drawn: HashMap::new(),
        }
    }

    fn move_to(&mut self, x_px: i32, y_px: i32, row_offset: i32) -> Result<()> {
        let col = (x_px / PX_PER_COL).max(0) + 1;
        let row = (y_px / PX_PER_ROW).max(0) + 1 + row_offset;
        write!(self.out, "\x1b[{row};{col}H")?;
        Ok(())
    }

    fn clear_box(&mut self, rect: Rect) -> Result<()> {
        for row in 0..BOX_ROWS {
            self.move_to(rect.x, rect.y, row)?;
            write!(self.out, "{}", " ".repeat(BOX_COLS))?;
        }
        Ok(())
    }
}

/// `#rrggbb` to its channels. Anything else renders uncolored. Also used by
/// the stats chart, which paints bars in the timer type's color.
pub fn parse_color(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

fn paint(color: &str, text: &str) -> String {
    match parse_color(color) {
        Some((r, g, b)) => Colour::RGB(r, g, b).paint(text).to_string(),
        None => text.to_string(),
    }
}

/// The progress ring, flattened to a bar: filled cells grow with elapsed
/// time.
fn progress_bar(progress: f64, color: &str) -> String {
    let filled = (progress.clamp(0., 1.) * BAR_CELLS as f64).round() as usize;
    let mut bar = paint(color, &"█".repeat(filled));
    bar.push_str(&"░".repeat(BAR_CELLS - filled));
    bar
}

fn fit(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

impl<W: Write + Send> WidgetSurface for TermSurface<W> {
    fn viewport(&self) -> Rect {
        self.viewport
    }

    fn upsert(&mut self, view: &WidgetView) -> Result<()> {
        if let Some(&previous) = self.drawn.get(&view.id) {
            if previous != view.rect {
                self.clear_box(previous)?;
            }
        }
        self.drawn.insert(view.id, view.rect);

        let rect = view.rect;
        self.move_to(rect.x, rect.y, 0)?;
        write!(self.out, "┌{}┐", "─".repeat(BOX_COLS - 2))?;
        self.move_to(rect.x, rect.y, 1)?;
        write!(
            self.out,
            "│{:<width$}│",
            fit(&view.label, BOX_COLS - 2),
            width = BOX_COLS - 2
        )?;
        self.move_to(rect.x, rect.y, 2)?;
        write!(self.out, "│{}│", progress_bar(view.progress, &view.color))?;
        self.move_to(rect.x, rect.y, 3)?;
        write!(
            self.out,
            "│{:^width$}│",
            fit(&view.clock, BOX_COLS - 2),
            width = BOX_COLS - 2
        )?;
        self.move_to(rect.x, rect.y, 4)?;
        write!(self.out, "└{}┘", "─".repeat(BOX_COLS - 2))?;
        self.out.flush()?;
        Ok(())
    }

    fn remove(&mut self, id: TimerId) -> Result<()> {
        if let Some(rect) = self.drawn.remove(&id) {
            self.clear_box(rect)?;
            self.out.flush()?;
        }
        Ok(())
    }

    fn bell(&mut self, volume: f64) {
        if volume > 0. {
            let _ = write!(self.out, "\x07");
            let _ = self.out.flush();
        }
    }
}
