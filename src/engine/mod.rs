//! Percentile-signal engine.
//!
//! Pure and synchronous: every call takes an owned-or-borrowed series snapshot
//! and returns fresh derived values. Nothing here caches or touches storage;
//! [`cache::TimedMemo`] is layered on top by callers that want it.
//!
//! ```text
//! MetricSeries ─▶ cleaner::clean ─▶ CleanedSeries ─┬▶ percentile::SortedWindow ─▶ thresholds
//!                                                  │                          └▶ signal::classify
//!                                                  └▶ window::display_window (presentation only)
//! ```

pub mod cache;
pub mod cleaner;
pub mod health;
pub mod percentile;
pub mod signal;
pub mod window;

use crate::models::{CleanedSeries, MetricKind, MetricPoint, MetricSeries};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

pub use cleaner::{clean, clean_with, CleanerParams};
pub use percentile::{percentile_history, thresholds, PercentileParams, PercentileThresholds, SortedWindow, TradingWindow};
pub use signal::{classify, Signal, SignalReading};
pub use window::{display_window, DisplayWindow, HistoryCoverage};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("{symbol}: duplicate trade date {date}")]
    DuplicateDate { symbol: String, date: NaiveDate },

    #[error("{symbol}: trade date {next} follows {previous}")]
    OutOfOrder {
        symbol: String,
        previous: NaiveDate,
        next: NaiveDate,
    },

    #[error("percentile {0} outside 0..=100")]
    PercentileOutOfRange(Decimal),

    #[error("low percentile {low} above high percentile {high}")]
    InvertedBands { low: Decimal, high: Decimal },

    #[error("trailing window must hold at least one point")]
    EmptyWindow,

    #[error("unknown metric '{0}' (expected dividend-yield, pe-ttm or pb)")]
    UnknownMetric(String),
}

// ── Parameters ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct EngineParams {
    pub cleaner: CleanerParams,
    pub percentile: PercentileParams,
    pub display_points: usize,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            cleaner: CleanerParams::default(),
            percentile: PercentileParams::default(),
            display_points: window::DEFAULT_DISPLAY_POINTS,
        }
    }
}

// ── Analysis ──────────────────────────────────────────────────────────────────

/// Everything the presentation layer needs for one (symbol, metric).
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub symbol: String,
    pub metric: MetricKind,
    #[serde(skip)]
    pub cleaned: CleanedSeries,
    pub latest: Option<MetricPoint>,
    pub thresholds: PercentileThresholds,
    pub reading: SignalReading,
    pub coverage: HistoryCoverage,
    #[serde(skip)]
    display_points: usize,
    #[serde(skip)]
    percentile: PercentileParams,
}

impl Analysis {
    /// Chart slice. Statistics above were computed on the full window.
    pub fn display(&self) -> DisplayWindow<'_> {
        display_window(&self.cleaned, self.display_points)
    }

    /// Per-day rank over the cleaned series, same window and value range as
    /// `reading`.
    pub fn percentile_history(&self) -> Vec<(NaiveDate, Option<Decimal>)> {
        percentile_history(&self.cleaned, &self.percentile, self.metric)
    }
}

/// Clean, rank and classify one metric series.
pub fn analyze(series: &MetricSeries, metric: MetricKind, params: &EngineParams) -> Analysis {
    let cleaned = clean_with(series, &params.cleaner);
    let sorted = SortedWindow::trailing_where(&cleaned, params.percentile.window, |v| metric.accepts(v));
    let thresholds = sorted.thresholds(&params.percentile);

    let latest = cleaned.last().copied();
    let reading = classify(
        latest.and_then(|p| p.value).filter(|v| metric.accepts(*v)),
        &sorted,
        &params.percentile,
        metric.polarity(),
    );
    let coverage = HistoryCoverage::new(cleaned.len(), params.percentile.window.points());

    tracing::debug!(
        symbol = series.symbol(),
        %metric,
        samples = thresholds.sample_size,
        signal = ?reading.signal,
        no_data = reading.no_data,
        "analysis computed"
    );

    Analysis {
        symbol: series.symbol().to_string(),
        metric,
        cleaned,
        latest,
        thresholds,
        reading,
        coverage,
        display_points: params.display_points,
        percentile: params.percentile.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn series(values: &[Option<Decimal>]) -> MetricSeries {
        let start = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| MetricPoint::new(start + chrono::Days::new(i as u64), *v))
            .collect();
        MetricSeries::new("601088", points).unwrap()
    }

    #[test]
    fn test_analyze_high_yield_is_opportunity() {
        let mut values: Vec<Option<Decimal>> = (1..=99).map(|i| Some(Decimal::from(i))).collect();
        values.push(Some(dec!(120)));
        let a = analyze(&series(&values), MetricKind::DividendYield, &EngineParams::default());

        assert_eq!(a.reading.signal, Signal::Opportunity);
        assert!(!a.reading.no_data);
        assert_eq!(a.thresholds.sample_size, 100);
        assert!(!a.coverage.is_sufficient());
        assert_eq!(a.latest.and_then(|p| p.value), Some(dec!(120)));
    }

    #[test]
    fn test_analyze_high_pe_is_risk() {
        let mut values: Vec<Option<Decimal>> = (1..=99).map(|i| Some(Decimal::from(i))).collect();
        values.push(Some(dec!(120)));
        let a = analyze(&series(&values), MetricKind::PeTtm, &EngineParams::default());
        assert_eq!(a.reading.signal, Signal::Risk);
    }

    #[test]
    fn test_analyze_empty_series_is_no_data() {
        let a = analyze(&series(&[]), MetricKind::DividendYield, &EngineParams::default());
        assert!(a.reading.no_data);
        assert_eq!(a.reading.signal, Signal::Hold);
        assert!(a.thresholds.high.is_none() && a.thresholds.low.is_none());
        assert_eq!(a.display().total_count, 0);
    }

    #[test]
    fn test_negative_latest_pe_is_no_data() {
        let mut values: Vec<Option<Decimal>> =
            (0..100).map(|i| Some(Decimal::from(10 + i % 5))).collect();
        values.push(Some(dec!(-35)));
        let a = analyze(&series(&values), MetricKind::PeTtm, &EngineParams::default());

        assert!(a.reading.no_data);
        assert_eq!(a.reading.percentile_rank, None);
        assert_eq!(a.reading.signal, Signal::Hold);
        // thresholds still describe the profitable history
        assert_eq!(a.thresholds.sample_size, 100);
        assert!(a.thresholds.low.is_some_and(|v| v >= dec!(10)));
    }

    #[test]
    fn test_out_of_range_values_leave_the_window() {
        let mut values: Vec<Option<Decimal>> = vec![Some(dec!(-4)), Some(dec!(2500)), Some(dec!(0.5))];
        values.extend((1..=9).map(|i| Some(Decimal::from(10 + i))));
        let a = analyze(&series(&values), MetricKind::PeTtm, &EngineParams::default());

        assert_eq!(a.thresholds.sample_size, 10);
        assert_eq!(a.latest.and_then(|p| p.value), Some(dec!(19)));
        assert_eq!(a.reading.percentile_rank, Some(dec!(100)));
        assert_eq!(a.reading.signal, Signal::Risk);
    }

    #[test]
    fn test_history_ends_at_the_reading() {
        let values: Vec<Option<Decimal>> =
            (0..1400).map(|i| Some(Decimal::from(i % 113 + 1) / Decimal::TEN)).collect();
        let a = analyze(&series(&values), MetricKind::DividendYield, &EngineParams::default());
        let history = a.percentile_history();

        assert_eq!(history.len(), 1400);
        assert_eq!(history.last().map(|(_, r)| *r), Some(a.reading.percentile_rank));
        assert_eq!(history.last().map(|(d, _)| *d), a.latest.map(|p| p.trade_date));
    }

    #[test]
    fn test_display_slice_does_not_change_statistics() {
        let values: Vec<Option<Decimal>> = (0..1500).map(|i| Some(Decimal::from(i % 97 + 1))).collect();
        let s = series(&values);

        let narrow = EngineParams { display_points: 500, ..EngineParams::default() };
        let wide = EngineParams { display_points: 1500, ..EngineParams::default() };
        let a = analyze(&s, MetricKind::DividendYield, &narrow);
        let b = analyze(&s, MetricKind::DividendYield, &wide);

        assert_eq!(a.thresholds, b.thresholds);
        assert_eq!(a.reading, b.reading);
        assert_eq!(a.thresholds.sample_size, 1250);
        assert_eq!(a.display().points.len(), 500);
        assert_eq!(b.display().points.len(), 1500);
        assert_eq!(a.display().total_count, 1500);
    }
}
