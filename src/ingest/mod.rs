pub mod parsers;
pub mod tushare;

use crate::models::{DailyMetrics, QuarterlyFinancials};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

pub use self::tushare::TushareSource;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable data source abstraction.
///
/// Rows come back in any order and may repeat a date; callers dedup before
/// storing. Missing values stay `None`, zero stays zero.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn fetch_daily_metrics(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyMetrics>>;

    async fn fetch_quarterly_financials(&self, symbol: &str) -> Result<Vec<QuarterlyFinancials>>;
}
