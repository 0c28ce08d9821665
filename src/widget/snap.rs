//! Drag-and-snap geometry for floating widgets. Pure, so it can be tested
//! without any surface behind it.

use crate::daemon::storage::entities::TimerId;

/// Pixel distance within which a dragged widget attracts to an edge.
pub const SNAP_BUFFER: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    fn vertical_overlap(&self, other: &Rect) -> i32 {
        self.bottom().min(other.bottom()) - self.y.max(other.y)
    }

    fn horizontal_overlap(&self, other: &Rect) -> i32 {
        self.right().min(other.right()) - self.x.max(other.x)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapCandidate {
    pub distance: i32,
    pub x: i32,
    pub y: i32,
    /// The widget snapped against, if the winner was a neighbor edge rather
    /// than a viewport edge.
    pub target: Option<TimerId>,
}

/// Finds where a dropped widget should settle.
///
/// Candidates are the four viewport edges and the edges of every other widget
/// whose projection overlaps on the perpendicular axis, all within
/// [SNAP_BUFFER]. The closest one wins; no candidate means the widget stays
/// where it was dropped.
///
/// Viewport distances keep their sign so a widget dragged past an edge still
/// snaps back onto it, and sorts ahead of in-bounds candidates.
pub fn compute_snap(
    rect: Rect,
    viewport: Rect,
    others: &[(TimerId, Rect)],
) -> Option<SnapCandidate> {
    let mut candidates = vec![];

    let left = rect.x - viewport.x;
    if left <= SNAP_BUFFER {
        candidates.push(SnapCandidate {
            distance: left,
            x: viewport.x,
            y: rect.y,
            target: None,
        });
    }
    let right = viewport.right() - rect.right();
    if right <= SNAP_BUFFER {
        candidates.push(SnapCandidate {
            distance: right,
            x: viewport.right() - rect.width,
            y: rect.y,
            target: None,
        });
    }
    let top = rect.y - viewport.y;
    if top <= SNAP_BUFFER {
        candidates.push(SnapCandidate {
            distance: top,
            x: rect.x,
            y: viewport.y,
            target: None,
        });
    }
    let bottom = viewport.bottom() - rect.bottom();
    if bottom <= SNAP_BUFFER {
        candidates.push(SnapCandidate {
            distance: bottom,
            x: rect.x,
            y: viewport.bottom() - rect.height,
            target: None,
        });
    }

    for &(id, other) in others {
        let vertical = rect.vertical_overlap(&other);
        let horizontal = rect.horizontal_overlap(&other);

        let left = (rect.x - other.right()).abs();
        if left <= SNAP_BUFFER && vertical > 0 {
            candidates.push(SnapCandidate {
                distance: left,
                x: other.right(),
                y: other.y,
                target: Some(id),
            });
        }
        let right = (rect.right() - other.x).abs();
        if right <= SNAP_BUFFER && vertical > 0 {
            candidates.push(SnapCandidate {
                distance: right,
                x: other.x - rect.width,
                y: other.y,
                target: Some(id),
            });
        }
        let top = (rect.y - other.bottom()).abs();
        if top <= SNAP_BUFFER && horizontal > 0 {
            candidates.push(SnapCandidate {
                distance: top,
                x: other.x,
                y: other.bottom(),
                target: Some(id),
            });
        }
        let bottom = (rect.bottom() - other.y).abs();
        if bottom <= SNAP_BUFFER && horizontal > 0 {
            candidates.push(SnapCandidate {
                distance: bottom,
                x: other.x,
                y: other.y - rect.height,
                target: Some(id),
            });
        }
    }

    candidates.into_iter().min_by_key(|c| c.distance)
}

/// The final drop position: the winning candidate, or the raw coordinates.
pub fn snap_position(rect: Rect, viewport: Rect, others: &[(TimerId, Rect)]) -> (i32, i32) {
    compute_snap(rect, viewport, others)
        .map(|c| (c.x, c.y))
        .unwrap_or((rect.x, rect.y))
}

#[cfg(test)]
mod tests {
    use super::{compute_snap, snap_position, Rect};

    const VIEWPORT: Rect = Rect {
        x: 0,
        y: 0,
        width: 1280,
        height: 720,
    };

    fn widget(x: i32, y: i32) -> Rect {
        Rect::new(x, y, 100, 100)
    }

    #[test]
    fn test_snaps_to_left_edge_within_buffer() {
        let snapped = compute_snap(widget(6, 300), VIEWPORT, &[]).unwrap();
        assert_eq!((snapped.x, snapped.y), (0, 300));
        assert_eq!(snapped.target, None);
    }

    #[test]
    fn test_snaps_back_from_past_the_edge() {
        // Dragged partially off screen: negative distance still wins.
        let snapped = compute_snap(widget(-30, 300), VIEWPORT, &[]).unwrap();
        assert_eq!((snapped.x, snapped.y), (0, 300));
    }

    #[test]
    fn test_far_from_everything_stays_put() {
        assert_eq!(compute_snap(widget(600, 300), VIEWPORT, &[]), None);
        assert_eq!(snap_position(widget(600, 300), VIEWPORT, &[]), (600, 300));
    }

    #[test]
    fn test_snaps_flush_to_neighbor_right_edge() {
        let neighbor = (7, widget(200, 280));
        let snapped = compute_snap(widget(305, 300), VIEWPORT, &[neighbor]).unwrap();
        // Flush against the neighbor, aligned to its top.
        assert_eq!((snapped.x, snapped.y), (300, 280));
        assert_eq!(snapped.target, Some(7));
    }

    #[test]
    fn test_neighbor_without_perpendicular_overlap_ignored() {
        // Horizontally adjacent but vertically disjoint.
        let neighbor = (7, widget(200, 100));
        assert_eq!(compute_snap(widget(305, 300), VIEWPORT, &[neighbor]), None);
    }

    #[test]
    fn test_nearest_candidate_wins() {
        // 4 px to the top edge, 8 px to the left edge.
        let snapped = compute_snap(widget(8, 4), VIEWPORT, &[]).unwrap();
        assert_eq!((snapped.x, snapped.y), (8, 0));
    }

    #[test]
    fn test_neighbor_top_edge_stacks_below() {
        let neighbor = (7, widget(400, 100));
        let snapped = compute_snap(widget(420, 205), VIEWPORT, &[neighbor]).unwrap();
        assert_eq!((snapped.x, snapped.y), (400, 200));
    }

    #[test]
    fn test_viewport_right_and_bottom_edges() {
        let snapped = compute_snap(widget(1175, 300), VIEWPORT, &[]).unwrap();
        assert_eq!((snapped.x, snapped.y), (1180, 300));

        let snapped = compute_snap(widget(600, 615), VIEWPORT, &[]).unwrap();
        assert_eq!((snapped.x, snapped.y), (600, 620));
    }
}
