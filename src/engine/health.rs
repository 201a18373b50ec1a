//! Dividend sustainability flags from the latest quarterly report.
//!
//! Shown next to the valuation signal; it never changes the signal itself.

use crate::models::{DailyMetrics, QuarterlyFinancials};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct HealthParams {
    pub max_debt_to_asset: Decimal,
    pub max_payout_ratio: Decimal,
}

impl Default for HealthParams {
    fn default() -> Self {
        Self {
            max_debt_to_asset: Decimal::new(70, 2),
            max_payout_ratio: Decimal::ONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthFlag {
    NegativeFreeCashFlow,
    HighLeverage,
    PayoutAboveEarnings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Sustainable,
    AtRisk,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub report_period: Option<String>,
    pub payout_ratio: Option<Decimal>,
    pub flags: Vec<HealthFlag>,
}

/// Dividend per share over EPS, recovered from `yield% * PE / 100`.
pub fn implied_payout_ratio(daily: &DailyMetrics) -> Option<Decimal> {
    let dv = daily.dividend_yield_ttm.filter(|v| !v.is_zero())?;
    let pe = daily.pe_ttm.filter(|v| v.is_sign_positive() && !v.is_zero())?;
    Some(dv * pe / Decimal::ONE_HUNDRED)
}

pub fn assess_health(
    financials: Option<&QuarterlyFinancials>,
    implied_payout: Option<Decimal>,
    params: &HealthParams,
) -> HealthReport {
    let Some(f) = financials else {
        return HealthReport {
            status: HealthStatus::Unknown,
            report_period: None,
            payout_ratio: implied_payout,
            flags: Vec::new(),
        };
    };

    let payout = f.dividend_payout_ratio.or(implied_payout);
    let mut flags = Vec::new();

    if f.free_cash_flow.is_some_and(|fcf| fcf.is_sign_negative() && !fcf.is_zero()) {
        flags.push(HealthFlag::NegativeFreeCashFlow);
    }
    if f.debt_to_asset_ratio.is_some_and(|d| d > params.max_debt_to_asset) {
        flags.push(HealthFlag::HighLeverage);
    }
    if payout.is_some_and(|p| p > params.max_payout_ratio) {
        flags.push(HealthFlag::PayoutAboveEarnings);
    }

    HealthReport {
        status: if flags.is_empty() { HealthStatus::Sustainable } else { HealthStatus::AtRisk },
        report_period: Some(f.report_period.clone()),
        payout_ratio: payout,
        flags,
    }
}
