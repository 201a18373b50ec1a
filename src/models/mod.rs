use crate::engine::EngineError;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

// ── Tracked stock ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockMeta {
    pub symbol: String,
    pub name: String,
    pub sector: Option<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

// ── Daily valuation row ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyMetrics {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub close_price: Option<Decimal>,
    pub market_cap: Option<Decimal>,   // 100M CNY units
    pub pe_ttm: Option<Decimal>,
    pub pb_ttm: Option<Decimal>,
    pub dividend_yield_ttm: Option<Decimal>,  // percent, 4.5 == 4.5%
    pub fetched_at: NaiveDateTime,
}

impl DailyMetrics {
    pub fn value_of(&self, kind: MetricKind) -> Option<Decimal> {
        match kind {
            MetricKind::DividendYield => self.dividend_yield_ttm,
            MetricKind::PeTtm => self.pe_ttm,
            MetricKind::PbTtm => self.pb_ttm,
        }
    }
}

// ── Quarterly financials ──────────────────────────────────────────────────────

/// Ratios are fractions (0.12 == 12%), cash flow in CNY.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QuarterlyFinancials {
    pub symbol: String,
    pub report_period: String,  // "2024Q1"
    pub publish_date: Option<NaiveDate>,
    pub free_cash_flow: Option<Decimal>,
    pub debt_to_asset_ratio: Option<Decimal>,
    pub dividend_payout_ratio: Option<Decimal>,
    pub roe_ttm: Option<Decimal>,
    pub gross_margin: Option<Decimal>,
    pub revenue_growth_yoy: Option<Decimal>,
    pub net_profit_growth_yoy: Option<Decimal>,
}

// ── Metric selection ──────────────────────────────────────────────────────────

/// Which way a metric reads as "cheap".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Polarity {
    /// Dividend yield: a historically high reading is attractive.
    HigherIsCheaper,
    /// PE / PB: a historically low reading is attractive.
    LowerIsCheaper,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MetricKind {
    #[default]
    DividendYield,
    PeTtm,
    #[serde(rename = "pb")]
    PbTtm,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [Self::DividendYield, Self::PeTtm, Self::PbTtm];

    pub fn polarity(self) -> Polarity {
        match self {
            Self::DividendYield => Polarity::HigherIsCheaper,
            Self::PeTtm | Self::PbTtm => Polarity::LowerIsCheaper,
        }
    }

    /// Whether `v` is a usable reading: yield in (0, 100), PE in (0, 1000),
    /// PB above zero. Losses, zeros and feed glitches fall outside.
    pub fn accepts(self, v: Decimal) -> bool {
        if !v.is_sign_positive() || v.is_zero() {
            return false;
        }
        match self {
            Self::DividendYield => v < Decimal::ONE_HUNDRED,
            Self::PeTtm => v < Decimal::ONE_THOUSAND,
            Self::PbTtm => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DividendYield => "dividend-yield",
            Self::PeTtm => "pe-ttm",
            Self::PbTtm => "pb",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dividend-yield" | "yield" | "dv_ttm" => Ok(Self::DividendYield),
            "pe-ttm" | "pe" | "pe_ttm" => Ok(Self::PeTtm),
            "pb" | "pb-ttm" | "pb_ttm" => Ok(Self::PbTtm),
            other => Err(EngineError::UnknownMetric(other.to_string())),
        }
    }
}

// ── Metric series ─────────────────────────────────────────────────────────────

/// One trading day's observation. `None` and exact zero both mean "not reported".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricPoint {
    pub trade_date: NaiveDate,
    pub value: Option<Decimal>,
}

impl MetricPoint {
    pub fn new(trade_date: NaiveDate, value: Option<Decimal>) -> Self {
        Self { trade_date, value }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.value, Some(v) if !v.is_zero())
    }
}

/// Chronological, date-unique observations for a single symbol.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricSeries {
    symbol: String,
    points: Vec<MetricPoint>,
}

impl MetricSeries {
    /// Rejects duplicate or non-chronological dates.
    pub fn new(symbol: impl Into<String>, points: Vec<MetricPoint>) -> Result<Self, EngineError> {
        let symbol = symbol.into();
        for pair in points.windows(2) {
            let (prev, next) = (pair[0].trade_date, pair[1].trade_date);
            if next == prev {
                return Err(EngineError::DuplicateDate { symbol, date: next });
            }
            if next < prev {
                return Err(EngineError::OutOfOrder { symbol, previous: prev, next });
            }
        }
        Ok(Self { symbol, points })
    }

    /// Builds a series for one metric column from stored rows (any order).
    pub fn from_daily(
        symbol: impl Into<String>,
        rows: &[DailyMetrics],
        kind: MetricKind,
    ) -> Result<Self, EngineError> {
        let mut points: Vec<MetricPoint> = rows
            .iter()
            .map(|r| MetricPoint::new(r.trade_date, r.value_of(kind)))
            .collect();
        points.sort_by_key(|p| p.trade_date);
        Self::new(symbol, points)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn points(&self) -> &[MetricPoint] {
        &self.points
    }

    pub fn values(&self) -> impl Iterator<Item = Option<Decimal>> + '_ {
        self.points.iter().map(|p| p.value)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&MetricPoint> {
        self.points.last()
    }
}

/// Output of the series cleaner: same dates as its source, values repaired.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CleanedSeries(MetricSeries);

impl CleanedSeries {
    pub(crate) fn from_repaired(symbol: String, points: Vec<MetricPoint>) -> Self {
        Self(MetricSeries { symbol, points })
    }

    pub fn into_inner(self) -> MetricSeries {
        self.0
    }
}

impl Deref for CleanedSeries {
    type Target = MetricSeries;

    fn deref(&self) -> &MetricSeries {
        &self.0
    }
}

// ── Raw CSV rows ──────────────────────────────────────────────────────────────

/// Tushare `daily_basic` export: trade_date, close, pe_ttm, pb, dv_ttm, total_mv
#[derive(Debug, Clone, Default)]
pub struct RawMetricCsvRow {
    pub trade_date: Option<String>,
    pub close: Option<String>,
    pub pe_ttm: Option<String>,
    pub pb: Option<String>,
    pub dv_ttm: Option<String>,
    pub total_mv: Option<String>,   // 10k CNY units
}
