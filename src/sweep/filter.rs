//! Completion filtering of the enumerated grid.

use crate::sweep::grid::GridPoint;
use crate::sweep::layout::RunLayout;

/// Result of partitioning the grid into done and pending points.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    /// Points still to acquire, in enumeration order
    pub pending: Vec<GridPoint>,
    /// Points whose artifacts are all present
    pub skipped: usize,
    /// Size of the full grid
    pub total: usize,
}

impl CompletionReport {
    /// Nothing left to acquire.
    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Keep the points that are not complete on disk, preserving order.
pub fn filter(points: &[GridPoint], layout: &RunLayout) -> CompletionReport {
    let pending: Vec<GridPoint> = points
        .iter()
        .copied()
        .filter(|point| !layout.is_complete(*point))
        .collect();

    CompletionReport {
        skipped: points.len() - pending.len(),
        total: points.len(),
        pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::layout::{LaserState, TraceHeader};
    use tempfile::TempDir;

    fn complete(layout: &RunLayout, point: GridPoint) {
        let record = layout.record(point);
        record.ensure_dir().unwrap();
        record.write_header().unwrap();
        record.write_laser_state(&LaserState::new()).unwrap();
        for n in 0..layout.repetitions() {
            record.write_trace(n, &TraceHeader::new(), &[0.0]).unwrap();
        }
    }

    #[test]
    fn test_fresh_run_everything_pending() {
        let dir = TempDir::new().unwrap();
        let layout = RunLayout::new(dir.path(), 2);
        let points = vec![GridPoint::new(1e-3, 0.0), GridPoint::new(1e-3, 35.0)];

        let report = filter(&points, &layout);
        assert_eq!(report.pending, points);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.total, 2);
        assert!(!report.is_done());
    }

    #[test]
    fn test_complete_points_skipped_order_kept() {
        let dir = TempDir::new().unwrap();
        let layout = RunLayout::new(dir.path(), 2);
        let points = vec![
            GridPoint::new(1e-3, 0.0),
            GridPoint::new(1e-3, 35.0),
            GridPoint::new(2e-3, 0.0),
            GridPoint::new(2e-3, 35.0),
        ];
        complete(&layout, points[0]);
        complete(&layout, points[2]);

        let report = filter(&points, &layout);
        assert_eq!(report.pending, vec![points[1], points[3]]);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn test_partial_point_is_pending() {
        let dir = TempDir::new().unwrap();
        let layout = RunLayout::new(dir.path(), 3);
        let point = GridPoint::new(1e-3, 0.0);
        let record = layout.record(point);
        record.ensure_dir().unwrap();
        record.write_header().unwrap();
        record.write_laser_state(&LaserState::new()).unwrap();
        record.write_trace(0, &TraceHeader::new(), &[0.0]).unwrap();

        let report = filter(&[point], &layout);
        assert_eq!(report.pending, vec![point]);
    }

    #[test]
    fn test_all_complete_is_done() {
        let dir = TempDir::new().unwrap();
        let layout = RunLayout::new(dir.path(), 1);
        let point = GridPoint::new(1e-3, 0.0);
        complete(&layout, point);

        let report = filter(&[point], &layout);
        assert!(report.is_done());
        assert_eq!(report.skipped, 1);
    }
}
