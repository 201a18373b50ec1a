//! Signal board: stored series → memoised analysis + health report.

use crate::engine::cache::TimedMemo;
use crate::engine::health::{HealthParams, HealthReport, assess_health, implied_payout_ratio};
use crate::engine::{Analysis, EngineParams, analyze};
use crate::models::MetricKind;
use crate::storage::Repository;
use anyhow::{Context, Result};
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct SignalCard {
    pub analysis: Arc<Analysis>,
    pub health: HealthReport,
}

pub struct SignalBoard<'a> {
    repo: &'a Repository,
    params: EngineParams,
    health: HealthParams,
    memo: TimedMemo<(String, MetricKind), Analysis>,
}

impl<'a> SignalBoard<'a> {
    pub fn new(repo: &'a Repository, params: EngineParams, health: HealthParams, ttl: Duration) -> Self {
        Self { repo, params, health, memo: TimedMemo::new(ttl) }
    }

    pub fn analyze(&self, symbol: &str, metric: MetricKind) -> Result<SignalCard> {
        let key = (symbol.to_string(), metric);
        let analysis = self.memo.get_or_try_insert_with(&key, || {
            let series = self
                .repo
                .load_metric_series(symbol, metric)
                .with_context(|| format!("load {} series for {}", metric, symbol))?;
            Ok::<_, anyhow::Error>(analyze(&series, metric, &self.params))
        })?;

        let health = self.health_for(symbol)?;
        Ok(SignalCard { analysis, health })
    }

    /// One card per actively tracked symbol; symbols that fail to load are
    /// logged and left out.
    pub fn overview(&self, metric: MetricKind) -> Result<Vec<SignalCard>> {
        let symbols = self.repo.list_symbols()?;
        let mut cards = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            match self.analyze(symbol, metric) {
                Ok(card) => cards.push(card),
                Err(e) => warn!("{}: {:#}", symbol, e),
            }
        }
        debug!("overview: {} of {} symbols", cards.len(), symbols.len());
        Ok(cards)
    }

    /// Every metric for one symbol, in `MetricKind::ALL` order.
    pub fn all_metrics(&self, symbol: &str) -> Result<Vec<SignalCard>> {
        MetricKind::ALL.iter().map(|m| self.analyze(symbol, *m)).collect()
    }

    /// Forget cached analyses for a symbol after new data lands.
    pub fn refresh(&self, symbol: &str) {
        self.memo.invalidate_where(|(s, _)| s == symbol);
    }

    pub fn cached(&self) -> usize {
        self.memo.len()
    }

    fn health_for(&self, symbol: &str) -> Result<HealthReport> {
        let financials = self.repo.latest_financials(symbol)?;
        let implied = self
            .repo
            .latest_daily_metrics(symbol)?
            .as_ref()
            .and_then(implied_payout_ratio);
        Ok(assess_health(financials.as_ref(), implied, &self.health))
    }
}
