use crate::models::{CleanedSeries, MetricPoint};
use serde::Serialize;

/// About two years of sessions.
pub const DEFAULT_DISPLAY_POINTS: usize = 500;

/// Tail of a cleaned series for charting, plus the full history length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayWindow<'a> {
    pub points: &'a [MetricPoint],
    pub total_count: usize,
}

/// Presentation slice only; never feed it back into percentile computation.
pub fn display_window(series: &CleanedSeries, display_points: usize) -> DisplayWindow<'_> {
    let points = series.points();
    let start = points.len().saturating_sub(display_points);
    DisplayWindow {
        points: &points[start..],
        total_count: points.len(),
    }
}

/// History length against what a full percentile window needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryCoverage {
    pub total: usize,
    pub required: usize,
}

impl HistoryCoverage {
    pub fn new(total: usize, required: usize) -> Self {
        Self { total, required }
    }

    pub fn is_sufficient(&self) -> bool {
        self.total >= self.required
    }

    pub fn missing(&self) -> usize {
        self.required.saturating_sub(self.total)
    }
}
