//! Order-statistic percentiles over a trailing window of trading days.
//!
//! Thresholds and ranks are both read from one [`SortedWindow`], so a value's
//! rank and the band edges can never come from different reference sets.

use super::EngineError;
use crate::models::{MetricKind, MetricSeries};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

/// Roughly 250 sessions per year on the exchanges we track.
pub const TRADING_DAYS_PER_YEAR: usize = 250;

/// Trailing window size, counted in observations rather than calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TradingWindow(usize);

impl TradingWindow {
    pub fn points(self) -> usize {
        self.0
    }

    pub fn of_points(points: usize) -> Result<Self, EngineError> {
        if points == 0 {
            return Err(EngineError::EmptyWindow);
        }
        Ok(Self(points))
    }

    pub fn years(years: usize) -> Result<Self, EngineError> {
        Self::of_points(years * TRADING_DAYS_PER_YEAR)
    }
}

impl Default for TradingWindow {
    fn default() -> Self {
        Self(5 * TRADING_DAYS_PER_YEAR)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PercentileParams {
    pub window: TradingWindow,
    pub high_pct: Decimal,
    pub low_pct: Decimal,
}

impl PercentileParams {
    pub fn new(window: TradingWindow, high_pct: Decimal, low_pct: Decimal) -> Result<Self, EngineError> {
        for pct in [high_pct, low_pct] {
            if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
                return Err(EngineError::PercentileOutOfRange(pct));
            }
        }
        if low_pct > high_pct {
            return Err(EngineError::InvertedBands { low: low_pct, high: high_pct });
        }
        Ok(Self { window, high_pct, low_pct })
    }
}

impl Default for PercentileParams {
    fn default() -> Self {
        Self {
            window: TradingWindow::default(),
            high_pct: Decimal::from(80),
            low_pct: Decimal::from(20),
        }
    }
}

/// Band edges in value space. Both are `None` when the window had no valid data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PercentileThresholds {
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub sample_size: usize,
}

impl PercentileThresholds {
    pub fn is_empty(&self) -> bool {
        self.sample_size == 0
    }
}

/// Valid values of the trailing window, ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedWindow {
    values: Vec<Decimal>,
}

impl SortedWindow {
    /// Takes the last `window` points of `series` and drops absent values.
    pub fn trailing(series: &MetricSeries, window: TradingWindow) -> Self {
        Self::trailing_where(series, window, |_| true)
    }

    /// Like [`trailing`](Self::trailing), also dropping values `keep` rejects.
    /// The window still spans the last `window` points, kept or not.
    pub fn trailing_where(
        series: &MetricSeries,
        window: TradingWindow,
        keep: impl Fn(Decimal) -> bool,
    ) -> Self {
        let points = series.points();
        let start = points.len().saturating_sub(window.points());
        Self::from_values(points[start..].iter().filter_map(|p| p.value.filter(|v| keep(*v))))
    }

    pub fn from_values(values: impl IntoIterator<Item = Decimal>) -> Self {
        let mut values: Vec<Decimal> = values.into_iter().collect();
        values.sort_unstable();
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[Decimal] {
        &self.values
    }

    /// Value at index `floor(len * pct / 100)`, clamped into the window.
    pub fn value_at(&self, pct: Decimal) -> Option<Decimal> {
        let last = self.values.len().checked_sub(1)?;
        let raw = (Decimal::from(self.values.len()) * pct / Decimal::ONE_HUNDRED).floor();
        let idx = if raw.is_sign_negative() {
            0
        } else {
            raw.to_usize().unwrap_or(last).min(last)
        };
        Some(self.values[idx])
    }

    /// Share of window values `<= value`, scaled to 0..=100.
    pub fn rank_of(&self, value: Decimal) -> Option<Decimal> {
        rank_in(&self.values, value)
    }

    pub fn thresholds(&self, params: &PercentileParams) -> PercentileThresholds {
        PercentileThresholds {
            high: self.value_at(params.high_pct),
            low: self.value_at(params.low_pct),
            sample_size: self.values.len(),
        }
    }
}

/// Thresholds over the trailing window of `series`.
pub fn thresholds(series: &MetricSeries, params: &PercentileParams) -> PercentileThresholds {
    SortedWindow::trailing(series, params.window).thresholds(params)
}

fn rank_in(sorted: &[Decimal], value: Decimal) -> Option<Decimal> {
    if sorted.is_empty() {
        return None;
    }
    let at_or_below = sorted.partition_point(|v| *v <= value);
    Some(Decimal::from(at_or_below) * Decimal::ONE_HUNDRED / Decimal::from(sorted.len()))
}

/// Rank of every point within the trailing window that ends at it.
///
/// Values outside `metric`'s valid range are neither ranked nor counted in
/// later windows. The last entry equals the rank `classify` sees for the
/// latest point.
pub fn percentile_history(
    series: &MetricSeries,
    params: &PercentileParams,
    metric: MetricKind,
) -> Vec<(NaiveDate, Option<Decimal>)> {
    let points = series.points();
    let size = params.window.points();
    let usable = |i: usize| points[i].value.filter(|v| metric.accepts(*v));
    let mut sorted: Vec<Decimal> = Vec::with_capacity(size.min(points.len()));

    (0..points.len())
        .map(|i| {
            if let Some(v) = usable(i) {
                let at = sorted.partition_point(|x| *x < v);
                sorted.insert(at, v);
            }
            if let Some(old) = i.checked_sub(size).and_then(usable) {
                if let Ok(at) = sorted.binary_search(&old) {
                    sorted.remove(at);
                }
            }
            (points[i].trade_date, usable(i).and_then(|v| rank_in(&sorted, v)))
        })
        .collect()
}
