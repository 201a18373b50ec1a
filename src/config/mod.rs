use crate::engine::health::HealthParams;
use crate::engine::{CleanerParams, EngineParams, PercentileParams, TradingWindow};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub engine: EngineConfig,
    pub health: HealthConfig,
    pub cache: CacheConfig,
}

/// Tushare Pro connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Read from `DIVSIG__SOURCE__TOKEN`; never commit it to config files.
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Backfill configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_history_years")]
    pub history_years: u32,

    #[serde(default = "default_true")]
    pub skip_up_to_date: bool,

    #[serde(default = "default_true")]
    pub fetch_financials: bool,
}

/// Cleaning / percentile / display settings. Percentages are whole numbers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_window_points")]
    pub window_points: usize,

    #[serde(default = "default_display_points")]
    pub display_points: usize,

    #[serde(default = "default_high_pct")]
    pub high_pct: u32,

    #[serde(default = "default_low_pct")]
    pub low_pct: u32,

    #[serde(default = "default_spike_pct")]
    pub spike_threshold_pct: u32,

    #[serde(default = "default_reversion_pct")]
    pub reversion_tolerance_pct: u32,

    #[serde(default = "default_max_spike_len")]
    pub max_spike_len: usize,
}

/// Sustainability limits, in whole percent.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_max_debt_pct")]
    pub max_debt_to_asset_pct: u32,

    #[serde(default = "default_max_payout_pct")]
    pub max_payout_pct: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "http://api.tushare.pro".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    500
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_max_retries() -> u32 {
    3
}
fn default_user_agent() -> String {
    "dividend-signal/0.1 (personal watchlist)".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/dividend.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    3
}
fn default_history_years() -> u32 {
    5
}
fn default_window_points() -> usize {
    1250
}
fn default_display_points() -> usize {
    500
}
fn default_high_pct() -> u32 {
    80
}
fn default_low_pct() -> u32 {
    20
}
fn default_spike_pct() -> u32 {
    50
}
fn default_reversion_pct() -> u32 {
    20
}
fn default_max_spike_len() -> usize {
    2
}
fn default_max_debt_pct() -> u32 {
    70
}
fn default_max_payout_pct() -> u32 {
    100
}
fn default_ttl_secs() -> u64 {
    300
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { db_path: default_db_path(), run_migrations: true }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            history_years: default_history_years(),
            skip_up_to_date: true,
            fetch_financials: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_points: default_window_points(),
            display_points: default_display_points(),
            high_pct: default_high_pct(),
            low_pct: default_low_pct(),
            spike_threshold_pct: default_spike_pct(),
            reversion_tolerance_pct: default_reversion_pct(),
            max_spike_len: default_max_spike_len(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_debt_to_asset_pct: default_max_debt_pct(),
            max_payout_pct: default_max_payout_pct(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: default_ttl_secs() }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("DIVSIG").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().context("Invalid configuration")?;
        app_cfg.engine_params().context("Invalid [engine] section")?;
        Ok(app_cfg)
    }
}

impl EngineConfig {
    pub fn params(&self) -> Result<EngineParams> {
        let window = TradingWindow::of_points(self.window_points)?;
        let percentile = PercentileParams::new(
            window,
            Decimal::from(self.high_pct),
            Decimal::from(self.low_pct),
        )?;
        Ok(EngineParams {
            cleaner: CleanerParams::from_percents(
                self.spike_threshold_pct,
                self.reversion_tolerance_pct,
                self.max_spike_len,
            ),
            percentile,
            display_points: self.display_points,
        })
    }
}

impl HealthConfig {
    pub fn params(&self) -> HealthParams {
        HealthParams {
            max_debt_to_asset: Decimal::from(self.max_debt_to_asset_pct) / Decimal::ONE_HUNDRED,
            max_payout_ratio: Decimal::from(self.max_payout_pct) / Decimal::ONE_HUNDRED,
        }
    }
}

impl AppConfig {
    pub fn engine_params(&self) -> Result<EngineParams> {
        self.engine.params()
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache.ttl_secs.min(i64::MAX as u64) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine_params().unwrap(), EngineParams::default());
        assert_eq!(cfg.health.params(), HealthParams::default());
        assert_eq!(cfg.cache_ttl(), chrono::Duration::minutes(5));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[engine]\nwindow_points = 750\nhigh_pct = 90\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.engine.window_points, 750);
        assert_eq!(cfg.engine.low_pct, 20);
        assert_eq!(cfg.pipeline.concurrency, 3);
        let p = cfg.engine_params().unwrap();
        assert_eq!(p.percentile.high_pct, Decimal::from(90));
    }

    #[test]
    fn test_inverted_bands_rejected() {
        let mut cfg = AppConfig::default();
        cfg.engine.low_pct = 85;
        assert!(cfg.engine_params().is_err());
    }
}
