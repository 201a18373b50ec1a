use rust_decimal::{Decimal, RoundingStrategy};
use std::time::{Duration, Instant};
use tracing::info;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.elapsed()
        );
    }
}

/// Format a large integer with thousands separators.
pub fn fmt_number(n: i64) -> String {
    let s = n.unsigned_abs().to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    if n < 0 {
        result.push('-');
    }
    result.chars().rev().collect()
}

/// Fixed decimal places, half away from zero; "—" when missing.
pub fn fmt_decimal(v: Option<Decimal>, dp: u32) -> String {
    match v {
        Some(d) => {
            let mut r = d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
            r.rescale(dp);
            r.to_string()
        }
        None => "—".to_string(),
    }
}

/// Ratio → "62.5%".
pub fn fmt_ratio_pct(v: Option<Decimal>) -> String {
    match v {
        Some(r) => format!("{}%", fmt_decimal(Some(r * Decimal::ONE_HUNDRED), 1)),
        None => "—".to_string(),
    }
}
