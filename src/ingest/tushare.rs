//! Tushare Pro client: `daily_basic` for valuations, `fina_indicator` for
//! quarterly reports. One POST endpoint, table-shaped JSON responses.

use super::MetricSource;
use super::parsers::{
    json_decimal, market_cap_from_total_mv, normalise_symbol, parse_date, percent_to_ratio,
    report_period, to_ts_code,
};
use crate::config::SourceConfig;
use crate::models::{DailyMetrics, QuarterlyFinancials};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};
use url::Url;

const DAILY_FIELDS: &str = "ts_code,trade_date,close,pe_ttm,pb,dv_ttm,total_mv";
const FINA_FIELDS: &str =
    "ts_code,ann_date,end_date,roe,grossprofit_margin,debt_to_assets,or_yoy,netprofit_yoy,fcff";

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<ApiTable>,
}

impl ApiResponse {
    fn into_table(self, api_name: &str) -> Result<ApiTable> {
        if self.code != 0 {
            bail!(
                "{} returned code {}: {}",
                api_name,
                self.code,
                self.msg.unwrap_or_default()
            );
        }
        self.data.with_context(|| format!("{} returned no data block", api_name))
    }
}

/// Column names plus positional rows.
#[derive(Debug, Deserialize, Default)]
pub struct ApiTable {
    pub fields: Vec<String>,
    pub items: Vec<Vec<Value>>,
}

impl ApiTable {
    fn rows(&self) -> impl Iterator<Item = ApiRow<'_>> {
        self.items.iter().map(move |cells| ApiRow { fields: &self.fields, cells })
    }
}

struct ApiRow<'a> {
    fields: &'a [String],
    cells: &'a [Value],
}

impl ApiRow<'_> {
    fn get(&self, name: &str) -> Option<&Value> {
        let idx = self.fields.iter().position(|f| f == name)?;
        self.cells.get(idx)
    }

    fn decimal(&self, name: &str) -> Option<Decimal> {
        self.get(name).and_then(json_decimal)
    }

    fn date(&self, name: &str) -> Option<NaiveDate> {
        self.get(name).and_then(Value::as_str).and_then(parse_date)
    }
}

// ── Table → models ────────────────────────────────────────────────────────────

pub fn daily_rows_from_table(symbol: &str, table: &ApiTable, now: NaiveDateTime) -> Vec<DailyMetrics> {
    table
        .rows()
        .filter_map(|row| {
            let Some(trade_date) = row.date("trade_date") else {
                warn!("{}: daily_basic row without trade_date", symbol);
                return None;
            };
            Some(DailyMetrics {
                symbol: normalise_symbol(symbol),
                trade_date,
                close_price: row.decimal("close"),
                market_cap: market_cap_from_total_mv(row.decimal("total_mv")),
                pe_ttm: row.decimal("pe_ttm"),
                pb_ttm: row.decimal("pb"),
                dividend_yield_ttm: row.decimal("dv_ttm"),
                fetched_at: now,
            })
        })
        .collect()
}

/// One row per report period; a later announcement replaces an earlier one.
pub fn financials_from_table(symbol: &str, table: &ApiTable) -> Vec<QuarterlyFinancials> {
    let mut by_period: BTreeMap<String, QuarterlyFinancials> = BTreeMap::new();

    for row in table.rows() {
        let Some(end_date) = row.date("end_date") else {
            continue;
        };
        let period = report_period(end_date);
        let publish_date = row.date("ann_date");

        if let Some(existing) = by_period.get(&period) {
            if existing.publish_date >= publish_date {
                continue;
            }
        }

        by_period.insert(
            period.clone(),
            QuarterlyFinancials {
                symbol: normalise_symbol(symbol),
                report_period: period,
                publish_date,
                free_cash_flow: row.decimal("fcff"),
                debt_to_asset_ratio: percent_to_ratio(row.decimal("debt_to_assets")),
                dividend_payout_ratio: None,
                roe_ttm: percent_to_ratio(row.decimal("roe")),
                gross_margin: percent_to_ratio(row.decimal("grossprofit_margin")),
                revenue_growth_yoy: percent_to_ratio(row.decimal("or_yoy")),
                net_profit_growth_yoy: percent_to_ratio(row.decimal("netprofit_yoy")),
            },
        );
    }

    by_period.into_values().collect()
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct TushareSource {
    inner: reqwest::Client,
    endpoint: Url,
    token: String,
    config: SourceConfig,
}

impl TushareSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .context("Tushare token not configured (set DIVSIG__SOURCE__TOKEN)")?;
        let endpoint = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid source base_url '{}'", config.base_url))?;

        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { inner, endpoint, token, config: config.clone() })
    }

    /// Call one API with rate-limiting and retry.
    async fn query(&self, api_name: &str, params: Value, fields: &str) -> Result<ApiTable> {
        let body = json!({
            "api_name": api_name,
            "token": self.token,
            "params": params,
            "fields": fields,
        });
        let body = &body;

        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.config.request_delay_ms.max(1))
            .map(jitter)
            .take(self.config.max_retries as usize);

        Retry::spawn(strategy, move || async move {
            self.polite_delay().await;
            debug!("POST {} api={}", self.endpoint, api_name);
            let result = self.post_once(api_name, body).await;
            if let Err(e) = &result {
                warn!("{} failed: {:#}", api_name, e);
            }
            result
        })
        .await
        .with_context(|| format!("All retries exhausted for {}", api_name))
    }

    async fn post_once(&self, api_name: &str, body: &Value) -> Result<ApiTable> {
        let resp = self
            .inner
            .post(self.endpoint.clone())
            .json(body)
            .send()
            .await
            .context("Request error")?
            .error_for_status()
            .context("HTTP error")?;

        let parsed: ApiResponse = resp.json().await.context("Malformed response body")?;
        parsed.into_table(api_name)
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let spread = jitter(Duration::from_millis(self.config.jitter_ms));
        sleep(Duration::from_millis(self.config.request_delay_ms) + spread).await;
    }
}

#[async_trait]
impl MetricSource for TushareSource {
    async fn fetch_daily_metrics(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyMetrics>> {
        let ts_code = to_ts_code(symbol);
        let params = json!({
            "ts_code": ts_code,
            "start_date": start.format("%Y%m%d").to_string(),
            "end_date": end.format("%Y%m%d").to_string(),
        });
        let table = self
            .query("daily_basic", params, DAILY_FIELDS)
            .await
            .with_context(|| format!("daily_basic({})", ts_code))?;

        let rows = daily_rows_from_table(symbol, &table, Utc::now().naive_utc());
        info!("{}: {} daily rows {} → {}", symbol, rows.len(), start, end);
        Ok(rows)
    }

    async fn fetch_quarterly_financials(&self, symbol: &str) -> Result<Vec<QuarterlyFinancials>> {
        let ts_code = to_ts_code(symbol);
        let table = self
            .query("fina_indicator", json!({ "ts_code": ts_code }), FINA_FIELDS)
            .await
            .with_context(|| format!("fina_indicator({})", ts_code))?;

        let reports = financials_from_table(symbol, &table);
        debug!("{}: {} quarterly reports", symbol, reports.len());
        Ok(reports)
    }
}
