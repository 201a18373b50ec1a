use crate::models::{DailyMetrics, RawMetricCsvRow};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::warn;

// ── Parsers ───────────────────────────────────────────────────────────────────

fn is_blank(s: &str) -> bool {
    matches!(
        s.to_ascii_lowercase().as_str(),
        "" | "n/a" | "-" | "--" | "—" | "nan" | "none" | "null"
    )
}

/// Parse a decimal, plain or scientific. "1,234.5" → 1234.5 | "1e-4" → 0.0001
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim().replace(',', "");
    if is_blank(&s) {
        return None;
    }
    Decimal::from_str(&s)
        .or_else(|_| Decimal::from_scientific(&s))
        .ok()
}

/// JSON numbers from API payloads; strings are accepted too.
pub fn json_decimal(v: &serde_json::Value) -> Option<Decimal> {
    match v {
        serde_json::Value::Number(n) => parse_decimal(&n.to_string()),
        serde_json::Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

/// Parse dates: "20240220" (Tushare) or ISO
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y%m%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y/%m/%d") {
        return Some(d);
    }

    None
}

/// "600036.SH" → "600036"
pub fn normalise_symbol(s: &str) -> String {
    let s = s.trim();
    s.split('.').next().unwrap_or(s).to_uppercase()
}

/// Exchange suffix for a mainland A-share code.
pub fn to_ts_code(symbol: &str) -> String {
    let symbol = normalise_symbol(symbol);
    if symbol.starts_with('0') || symbol.starts_with('3') {
        format!("{}.SZ", symbol)
    } else {
        format!("{}.SH", symbol)
    }
}

/// Report end date → "2024Q1"
pub fn report_period(end_date: NaiveDate) -> String {
    format!("{}Q{}", end_date.year(), end_date.month0() / 3 + 1)
}

/// Tushare reports ratios in percent.
pub fn percent_to_ratio(v: Option<Decimal>) -> Option<Decimal> {
    v.map(|x| x / Decimal::ONE_HUNDRED)
}

/// 10k CNY → 100M CNY
pub fn market_cap_from_total_mv(total_mv: Option<Decimal>) -> Option<Decimal> {
    total_mv.map(|mv| mv / Decimal::from(10_000))
}

// ── CSV row → DailyMetrics ────────────────────────────────────────────────────

pub fn csv_row_to_metrics(
    symbol: &str,
    row: &RawMetricCsvRow,
    now: NaiveDateTime,
) -> Option<DailyMetrics> {
    let date_str = row.trade_date.as_deref()?.trim();
    let Some(trade_date) = parse_date(date_str) else {
        warn!("Unparseable trade date '{}' for {}", date_str, symbol);
        return None;
    };

    let close_price = row.close.as_deref().and_then(parse_decimal);
    if close_price.is_some_and(|c| c.is_sign_negative() && !c.is_zero()) {
        warn!("Negative close for {} on {}", symbol, trade_date);
        return None;
    }

    Some(DailyMetrics {
        symbol: normalise_symbol(symbol),
        trade_date,
        close_price,
        market_cap: market_cap_from_total_mv(row.total_mv.as_deref().and_then(parse_decimal)),
        pe_ttm: row.pe_ttm.as_deref().and_then(parse_decimal),
        pb_ttm: row.pb.as_deref().and_then(parse_decimal),
        dividend_yield_ttm: row.dv_ttm.as_deref().and_then(parse_decimal),
        fetched_at: now,
    })
}

/// Sorts by date and keeps the last row seen for each date.
pub fn dedup_by_date(mut rows: Vec<DailyMetrics>) -> Vec<DailyMetrics> {
    rows.sort_by_key(|r| r.trade_date);
    let mut out: Vec<DailyMetrics> = Vec::with_capacity(rows.len());
    for row in rows {
        match out.last_mut() {
            Some(last) if last.trade_date == row.trade_date => *last = row,
            _ => out.push(row),
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(18, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("4.5123"), Some(dec!(4.5123)));
        assert_eq!(parse_decimal(" 1,234.5 "), Some(dec!(1234.5)));
        assert_eq!(parse_decimal("1e-4"), Some(dec!(0.0001)));
        assert_eq!(parse_decimal("--"), None);
        assert_eq!(parse_decimal("NaN"), None);
        assert_eq!(parse_decimal(""), None);
    }

    #[test]
    fn test_json_decimal() {
        assert_eq!(json_decimal(&serde_json::json!(6.12)), Some(dec!(6.12)));
        assert_eq!(json_decimal(&serde_json::json!("3.3")), Some(dec!(3.3)));
        assert_eq!(json_decimal(&serde_json::Value::Null), None);
    }

    #[test]
    fn test_parse_date() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 20).unwrap();
        assert_eq!(parse_date("20240220"), Some(d));
        assert_eq!(parse_date("2024-02-20"), Some(d));
        assert_eq!(parse_date("Feb 20"), None);
    }

    #[test]
    fn test_ts_code() {
        assert_eq!(to_ts_code("600036"), "600036.SH");
        assert_eq!(to_ts_code("000651"), "000651.SZ");
        assert_eq!(to_ts_code("300750"), "300750.SZ");
        assert_eq!(to_ts_code("601088.SH"), "601088.SH");
        assert_eq!(normalise_symbol(" 600900.sh"), "600900");
    }

    #[test]
    fn test_report_period() {
        assert_eq!(report_period(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()), "2024Q1");
        assert_eq!(report_period(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()), "2023Q4");
    }

    #[test]
    fn test_csv_row_to_metrics() {
        let row = RawMetricCsvRow {
            trade_date: Some("20240520".into()),
            close: Some("33.10".into()),
            pe_ttm: Some("6.02".into()),
            pb: Some("0.95".into()),
            dv_ttm: Some("0".into()),
            total_mv: Some("83480000".into()),
        };
        let m = csv_row_to_metrics("600036.SH", &row, now()).unwrap();
        assert_eq!(m.symbol, "600036");
        assert_eq!(m.market_cap, Some(dec!(8348)));
        // zero survives parsing; the cleaner treats it as "not reported"
        assert_eq!(m.dividend_yield_ttm, Some(dec!(0)));
    }

    #[test]
    fn test_csv_row_without_date_dropped() {
        let row = RawMetricCsvRow { close: Some("1".into()), ..Default::default() };
        assert!(csv_row_to_metrics("600036", &row, now()).is_none());
    }

    #[test]
    fn test_dedup_by_date_keeps_last() {
        let row = |d: u32, dv: Decimal| DailyMetrics {
            symbol: "600036".into(),
            trade_date: NaiveDate::from_ymd_opt(2024, 5, d).unwrap(),
            close_price: None,
            market_cap: None,
            pe_ttm: None,
            pb_ttm: None,
            dividend_yield_ttm: Some(dv),
            fetched_at: now(),
        };
        let out = dedup_by_date(vec![row(7, dec!(1)), row(6, dec!(2)), row(7, dec!(3))]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].dividend_yield_ttm, Some(dec!(3)));
    }
}
