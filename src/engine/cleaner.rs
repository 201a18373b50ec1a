//! Series cleaner: forward-fill of unreported values, then single-pass
//! smoothing of short spikes that revert to their pre-spike level.

use crate::models::{CleanedSeries, MetricPoint, MetricSeries};
use rust_decimal::Decimal;
use tracing::trace;

/// Tunables for spike detection.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanerParams {
    /// Relative jump from the previous value that opens a spike candidate (strictly greater).
    pub spike_threshold: Decimal,
    /// Relative distance to the pre-spike value that counts as a reversion (strictly less).
    pub reversion_tolerance: Decimal,
    /// How many points after the onset to look for a reversion.
    pub max_spike_len: usize,
}

impl Default for CleanerParams {
    fn default() -> Self {
        Self {
            spike_threshold: Decimal::new(5, 1),
            reversion_tolerance: Decimal::new(2, 1),
            max_spike_len: 2,
        }
    }
}

impl CleanerParams {
    /// Builds params from whole-percent settings (50 → 0.5).
    pub fn from_percents(spike_pct: u32, reversion_pct: u32, max_spike_len: usize) -> Self {
        Self {
            spike_threshold: Decimal::from(spike_pct) / Decimal::ONE_HUNDRED,
            reversion_tolerance: Decimal::from(reversion_pct) / Decimal::ONE_HUNDRED,
            max_spike_len,
        }
    }
}

/// Clean with default parameters.
pub fn clean(series: &MetricSeries) -> CleanedSeries {
    clean_with(series, &CleanerParams::default())
}

/// Returns a new series; `series` is left untouched.
pub fn clean_with(series: &MetricSeries, params: &CleanerParams) -> CleanedSeries {
    let mut values = forward_fill(series.values());
    let smoothed = smooth_spikes(&mut values, params);
    if smoothed > 0 {
        trace!(symbol = series.symbol(), smoothed, "spike points smoothed");
    }

    let points = series
        .points()
        .iter()
        .zip(values)
        .map(|(p, value)| MetricPoint::new(p.trade_date, value))
        .collect();
    CleanedSeries::from_repaired(series.symbol().to_string(), points)
}

/// Zero and absent take the last valid value; leading gaps stay absent.
pub fn forward_fill(values: impl Iterator<Item = Option<Decimal>>) -> Vec<Option<Decimal>> {
    let mut last_valid: Option<Decimal> = None;
    values
        .map(|v| match v {
            Some(x) if !x.is_zero() => {
                last_valid = Some(x);
                Some(x)
            }
            _ => last_valid,
        })
        .collect()
}

/// Smooths in place and returns how many points were replaced.
pub fn smooth_spikes(values: &mut [Option<Decimal>], params: &CleanerParams) -> usize {
    let n = values.len();
    if n < 3 {
        return 0;
    }

    let mut replaced = 0;
    let mut i = 1;
    while i < n - 1 {
        let (Some(prev), Some(cur), Some(_)) = (values[i - 1], values[i], values[i + 1]) else {
            i += 1;
            continue;
        };
        // an unrepresentable ratio is neither an onset nor a reversion
        if relative_change(cur, prev).is_none_or(|r| r <= params.spike_threshold) {
            i += 1;
            continue;
        }

        let last = (i + params.max_spike_len).min(n - 1);
        let reversion = (i + 1..=last).find_map(|j| {
            let back = values[j]?;
            if !relative_change(back, prev).is_some_and(|r| r < params.reversion_tolerance) {
                return None;
            }
            let level = prev.checked_add(back)? / Decimal::TWO;
            Some((j, level))
        });

        match reversion {
            Some((j, level)) => {
                for slot in &mut values[i..j] {
                    *slot = Some(level);
                }
                replaced += j - i;
                i = j;
            }
            // sustained move, not noise
            None => i += 1,
        }
    }
    replaced
}

/// `|value - base| / base`; `None` for a zero base or on overflow.
fn relative_change(value: Decimal, base: Decimal) -> Option<Decimal> {
    value.checked_sub(base)?.abs().checked_div(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn series(values: &[Option<Decimal>]) -> MetricSeries {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| MetricPoint::new(start + chrono::Days::new(i as u64), *v))
            .collect();
        MetricSeries::new("600036", points).unwrap()
    }

    fn some(values: &[Decimal]) -> Vec<Option<Decimal>> {
        values.iter().copied().map(Some).collect()
    }

    fn cleaned_values(values: &[Option<Decimal>]) -> Vec<Option<Decimal>> {
        clean(&series(values)).values().collect()
    }

    #[test]
    fn test_forward_fill_zeros() {
        let out = cleaned_values(&some(&[dec!(5), dec!(0), dec!(0), dec!(7)]));
        assert_eq!(out, some(&[dec!(5), dec!(5), dec!(5), dec!(7)]));
    }

    #[test]
    fn test_forward_fill_leading_gap_stays_absent() {
        let out = cleaned_values(&[None, Some(dec!(0)), Some(dec!(4)), None]);
        assert_eq!(out, vec![None, None, Some(dec!(4)), Some(dec!(4))]);
    }

    #[test]
    fn test_single_day_spike_smoothed() {
        let out = cleaned_values(&some(&[dec!(10), dec!(10), dec!(16), dec!(10.2), dec!(10)]));
        assert_eq!(out, some(&[dec!(10), dec!(10), dec!(10.1), dec!(10.2), dec!(10)]));
    }

    #[test]
    fn test_two_day_spike_smoothed() {
        let out = cleaned_values(&some(&[dec!(10), dec!(20), dec!(21), dec!(11), dec!(11)]));
        assert_eq!(out, some(&[dec!(10), dec!(10.5), dec!(10.5), dec!(11), dec!(11)]));
    }

    #[test]
    fn test_downward_spike_smoothed() {
        let out = cleaned_values(&some(&[dec!(4), dec!(1.5), dec!(4.2), dec!(4.1)]));
        assert_eq!(out, some(&[dec!(4), dec!(4.1), dec!(4.2), dec!(4.1)]));
    }

    #[test]
    fn test_sustained_change_passes_through() {
        let input = some(&[dec!(10), dec!(16), dec!(17), dec!(18), dec!(19)]);
        assert_eq!(cleaned_values(&input), input);
    }

    #[test]
    fn test_reversion_beyond_window_is_not_a_spike() {
        let input = some(&[dec!(10), dec!(16), dec!(16), dec!(16), dec!(10)]);
        assert_eq!(cleaned_values(&input), input);
    }

    #[test]
    fn test_exactly_fifty_percent_is_not_a_spike() {
        let input = some(&[dec!(10), dec!(15), dec!(10), dec!(10)]);
        assert_eq!(cleaned_values(&input), input);
    }

    #[test]
    fn test_reversion_tolerance_is_strict() {
        // 12 is exactly 20% away from 10
        let input = some(&[dec!(10), dec!(16), dec!(12), dec!(12)]);
        assert_eq!(cleaned_values(&input), input);
    }

    #[test]
    fn test_spike_at_last_point_untouched() {
        let input = some(&[dec!(10), dec!(10), dec!(30)]);
        assert_eq!(cleaned_values(&input), input);
    }

    #[test]
    fn test_short_series_forward_fill_only() {
        assert_eq!(cleaned_values(&[Some(dec!(3)), Some(dec!(0))]), some(&[dec!(3), dec!(3)]));
        assert!(cleaned_values(&[]).is_empty());
    }

    #[test]
    fn test_all_invalid_stays_absent() {
        let out = cleaned_values(&[None, Some(dec!(0)), None, None]);
        assert_eq!(out, vec![None; 4]);
    }

    #[test]
    fn test_gap_after_spike_is_filled_then_smoothed() {
        // the zero inherits the spike, reversion arrives two days after onset
        let out = cleaned_values(&some(&[dec!(8), dec!(20), dec!(0), dec!(8.4)]));
        assert_eq!(out, some(&[dec!(8), dec!(8.2), dec!(8.2), dec!(8.4)]));
    }

    #[test]
    fn test_dates_preserved_and_input_untouched() {
        let raw = series(&some(&[dec!(10), dec!(10), dec!(16), dec!(10.2), dec!(10)]));
        let before = raw.clone();
        let out = clean(&raw);
        assert_eq!(raw, before);
        assert_eq!(out.len(), raw.len());
        for (a, b) in out.points().iter().zip(raw.points()) {
            assert_eq!(a.trade_date, b.trade_date);
        }
    }

    #[test]
    fn test_cleaning_is_idempotent_on_fixtures() {
        let fixtures = [
            some(&[dec!(5), dec!(0), dec!(0), dec!(7)]),
            some(&[dec!(10), dec!(10), dec!(16), dec!(10.2), dec!(10)]),
            some(&[dec!(10), dec!(16), dec!(17), dec!(18), dec!(19)]),
            some(&[dec!(10), dec!(20), dec!(21), dec!(11), dec!(11)]),
            vec![None, Some(dec!(0)), Some(dec!(3)), Some(dec!(9)), Some(dec!(3.1))],
        ];
        for f in fixtures {
            let once = clean(&series(&f));
            let twice = clean(&once);
            assert_eq!(twice, once);
        }
    }

    #[test]
    fn test_extreme_magnitudes_do_not_overflow() {
        let tiny = Decimal::from_scientific("1e-10").unwrap();
        let huge = Decimal::from_scientific("1e20").unwrap();
        let input = some(&[tiny, huge, tiny]);
        assert_eq!(cleaned_values(&input), input);

        let mut values = some(&[Decimal::MAX, Decimal::MIN, Decimal::MAX, Decimal::MAX]);
        smooth_spikes(&mut values, &CleanerParams::default());
        assert_eq!(values.len(), 4);
    }

    #[test]
    fn test_custom_params() {
        let params = CleanerParams::from_percents(30, 10, 1);
        let input = series(&some(&[dec!(10), dec!(14), dec!(10.5), dec!(10.5)]));
        let out: Vec<_> = clean_with(&input, &params).values().collect();
        assert_eq!(out, some(&[dec!(10), dec!(10.25), dec!(10.5), dec!(10.5)]));
    }
}
