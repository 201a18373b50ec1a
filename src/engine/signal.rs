use super::percentile::{PercentileParams, SortedWindow};
use crate::models::Polarity;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Signal {
    Opportunity,
    Hold,
    Risk,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Opportunity => "opportunity",
            Self::Hold => "hold",
            Self::Risk => "risk",
        })
    }
}

/// Classifier output. `no_data` separates "nothing to rank" from a mid-range `Hold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignalReading {
    pub signal: Signal,
    pub percentile_rank: Option<Decimal>,
    pub no_data: bool,
}

impl SignalReading {
    pub fn no_data() -> Self {
        Self { signal: Signal::Hold, percentile_rank: None, no_data: true }
    }

    pub fn label(&self) -> &'static str {
        if self.no_data {
            return "no data";
        }
        match self.signal {
            Signal::Opportunity => "opportunity",
            Signal::Hold => "hold",
            Signal::Risk => "risk",
        }
    }
}

/// Ranks `latest` inside `window` and maps the rank onto the bands.
///
/// Band edges are strict: a rank equal to `high_pct` or `low_pct` is `Hold`.
pub fn classify(
    latest: Option<Decimal>,
    window: &SortedWindow,
    params: &PercentileParams,
    polarity: Polarity,
) -> SignalReading {
    let Some(rank) = latest.and_then(|v| window.rank_of(v)) else {
        return SignalReading::no_data();
    };
    SignalReading {
        signal: signal_for_rank(rank, params, polarity),
        percentile_rank: Some(rank),
        no_data: false,
    }
}

pub fn signal_for_rank(rank: Decimal, params: &PercentileParams, polarity: Polarity) -> Signal {
    let above = rank > params.high_pct;
    let below = rank < params.low_pct;
    match (polarity, above, below) {
        (Polarity::HigherIsCheaper, true, _) | (Polarity::LowerIsCheaper, _, true) => Signal::Opportunity,
        (Polarity::HigherIsCheaper, _, true) | (Polarity::LowerIsCheaper, true, _) => Signal::Risk,
        _ => Signal::Hold,
    }
}
