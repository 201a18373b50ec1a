//! Backfill orchestrator: ties a [`MetricSource`] to storage.
//!
//! For each symbol the start date is the day after the latest stored row
//! (incremental mode) or `history_years` back on first load. Fetches run
//! concurrently under a semaphore; the DuckDB connection is not `Sync`, so
//! results come back to the calling task and are written serially.
//! Re-running the same day fetches nothing new (ON CONFLICT DO UPDATE makes a
//! forced re-fetch harmless too).

use crate::config::PipelineConfig;
use crate::ingest::MetricSource;
use crate::ingest::parsers::dedup_by_date;
use crate::models::{DailyMetrics, QuarterlyFinancials};
use crate::storage::Repository;
use anyhow::{Context, Result};
use chrono::{Months, NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

pub struct Pipeline {
    config: PipelineConfig,
    source: Arc<dyn MetricSource>,
}

struct Fetched {
    daily: Vec<DailyMetrics>,
    financials: Vec<QuarterlyFinancials>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, source: Arc<dyn MetricSource>) -> Self {
        Self { config, source }
    }

    /// First date to request, or `None` when storage is already current.
    pub fn start_date(&self, latest: Option<NaiveDate>, today: NaiveDate) -> Option<NaiveDate> {
        match latest {
            Some(last) if self.config.skip_up_to_date => last.succ_opt().filter(|d| *d <= today),
            _ => Some(
                today
                    .checked_sub_months(Months::new(12 * self.config.history_years))
                    .unwrap_or(NaiveDate::MIN),
            ),
        }
    }

    pub async fn backfill(&self, repo: &Repository, symbols: &[String]) -> Result<PipelineStats> {
        self.backfill_until(repo, symbols, Utc::now().date_naive()).await
    }

    pub async fn backfill_until(
        &self,
        repo: &Repository,
        symbols: &[String],
        today: NaiveDate,
    ) -> Result<PipelineStats> {
        let run_id = repo.begin_ingest_run().context("Failed to open ingest run")?;
        let mut stats = PipelineStats::default();

        // ── 1. Plan date ranges ───────────────────────────────────────────────
        let mut plan = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let latest = repo.latest_date_for_symbol(symbol)?;
            match self.start_date(latest, today) {
                Some(start) => plan.push((symbol.clone(), start)),
                None => {
                    debug!("{}: up to date ({:?})", symbol, latest);
                    stats.symbols_skipped += 1;
                }
            }
        }
        info!(
            "=== Backfill: {} to fetch, {} up to date ===",
            plan.len(),
            stats.symbols_skipped
        );

        // ── 2. Fetch concurrently ─────────────────────────────────────────────
        let sem = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::with_capacity(plan.len());

        for (symbol, start) in plan {
            let source = Arc::clone(&self.source);
            let sem = Arc::clone(&sem);
            let fetch_financials = self.config.fetch_financials;
            let task_symbol = symbol.clone();

            let handle = tokio::spawn(async move {
                let symbol = task_symbol;
                let _permit = sem.acquire().await?;

                let daily = source
                    .fetch_daily_metrics(&symbol, start, today)
                    .await
                    .with_context(|| format!("fetch_daily_metrics({})", symbol))?;

                let financials = if fetch_financials {
                    match source.fetch_quarterly_financials(&symbol).await {
                        Ok(f) => f,
                        Err(e) => {
                            warn!("{}: financials skipped: {:#}", symbol, e);
                            Vec::new()
                        }
                    }
                } else {
                    Vec::new()
                };

                Ok::<Fetched, anyhow::Error>(Fetched { daily, financials })
            });

            handles.push((symbol, handle));
        }

        // ── 3. Write serially ─────────────────────────────────────────────────
        for (symbol, handle) in handles {
            let fetched = match handle.await {
                Ok(Ok(f)) => f,
                Ok(Err(e)) => {
                    warn!("{}: {:#}", symbol, e);
                    stats.errors += 1;
                    continue;
                }
                Err(e) => {
                    error!("Task panic for {}: {}", symbol, e);
                    stats.errors += 1;
                    continue;
                }
            };

            match self.store(repo, &symbol, fetched) {
                Ok((rows, reports)) => {
                    stats.symbols_processed += 1;
                    stats.rows_upserted += rows;
                    stats.reports_upserted += reports;
                }
                Err(e) => {
                    warn!("{}: {:#}", symbol, e);
                    stats.errors += 1;
                }
            }
        }

        let error_msg = (stats.errors > 0).then(|| format!("{} errors", stats.errors));
        repo.finish_ingest_run(
            run_id,
            stats.symbols_processed,
            stats.rows_upserted,
            error_msg.as_deref(),
        )
        .ok();

        let (min_date, max_date) = repo.date_range().unwrap_or((None, None));
        info!(
            "=== Done: {} symbols | {} rows | {} reports | {} errors | DB range: {:?} → {:?} ===",
            stats.symbols_processed,
            stats.rows_upserted,
            stats.reports_upserted,
            stats.errors,
            min_date,
            max_date,
        );

        Ok(stats)
    }

    fn store(&self, repo: &Repository, symbol: &str, fetched: Fetched) -> Result<(usize, usize)> {
        let daily = dedup_by_date(fetched.daily);
        let latest = daily.last().map(|r| r.trade_date);

        let rows = repo
            .upsert_daily_metrics(&daily)
            .with_context(|| format!("upsert_daily_metrics({})", symbol))?;
        let reports = repo
            .upsert_quarterly_financials(&fetched.financials)
            .with_context(|| format!("upsert_quarterly_financials({})", symbol))?;

        info!("{}: {} rows, {} reports (latest: {:?})", symbol, rows, reports, latest);
        Ok((rows, reports))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    pub symbols_processed: usize,
    pub symbols_skipped: usize,
    pub rows_upserted: usize,
    pub reports_upserted: usize,
    pub errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StockMeta;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Three rows from `start` (the middle one repeated), one report.
    #[derive(Default)]
    struct FakeSource {
        failing: Vec<String>,
        requests: Mutex<Vec<(String, NaiveDate)>>,
    }

    #[async_trait]
    impl MetricSource for FakeSource {
        async fn fetch_daily_metrics(
            &self,
            symbol: &str,
            start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<DailyMetrics>> {
            self.requests.lock().unwrap().push((symbol.to_string(), start));
            if self.failing.iter().any(|s| s == symbol) {
                anyhow::bail!("upstream 500");
            }
            let row = |offset: u64, dv: i64| DailyMetrics {
                symbol: symbol.to_string(),
                trade_date: start + chrono::Days::new(offset),
                close_price: Some(Decimal::from(10)),
                market_cap: None,
                pe_ttm: Some(Decimal::from(8)),
                pb_ttm: None,
                dividend_yield_ttm: Some(Decimal::from(dv)),
                fetched_at: start.and_hms_opt(18, 0, 0).unwrap(),
            };
            Ok(vec![row(2, 5), row(1, 4), row(0, 4), row(1, 6)])
        }

        async fn fetch_quarterly_financials(&self, symbol: &str) -> Result<Vec<QuarterlyFinancials>> {
            Ok(vec![QuarterlyFinancials {
                symbol: symbol.to_string(),
                report_period: "2024Q1".into(),
                ..Default::default()
            }])
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            concurrency: 2,
            history_years: 5,
            skip_up_to_date: true,
            fetch_financials: true,
        }
    }

    fn repo_with(symbols: &[&str]) -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        for s in symbols {
            repo.track_stock(&StockMeta {
                symbol: s.to_string(),
                name: String::new(),
                sector: None,
                is_active: true,
                created_at: day(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap(),
            })
            .unwrap();
        }
        repo
    }

    #[test]
    fn test_start_date_modes() {
        let p = Pipeline::new(config(), Arc::new(FakeSource::default()));
        let today = day(2024, 6, 10);
        assert_eq!(p.start_date(None, today), Some(day(2019, 6, 10)));
        assert_eq!(p.start_date(Some(day(2024, 6, 7)), today), Some(day(2024, 6, 8)));
        assert_eq!(p.start_date(Some(today), today), None);

        let full = Pipeline::new(
            PipelineConfig { skip_up_to_date: false, ..config() },
            Arc::new(FakeSource::default()),
        );
        assert_eq!(full.start_date(Some(today), today), Some(day(2019, 6, 10)));
    }

    #[test]
    fn test_backfill_dedups_and_counts_failures() {
        let source = Arc::new(FakeSource {
            failing: vec!["000651".into()],
            ..Default::default()
        });
        let repo = repo_with(&["600036", "601088", "000651"]);
        let pipeline = Pipeline::new(config(), source.clone());
        let symbols = repo.list_symbols().unwrap();

        let stats = tokio_test::block_on(pipeline.backfill_until(&repo, &symbols, day(2024, 6, 10)))
            .unwrap();

        assert_eq!(stats.symbols_processed, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.rows_upserted, 6);
        assert_eq!(stats.reports_upserted, 2);
        assert_eq!(repo.metric_count_for("600036").unwrap(), 3);

        // the repeated date keeps the row fetched last
        let rows = repo.load_daily_metrics("601088").unwrap();
        assert_eq!(rows[1].dividend_yield_ttm, Some(Decimal::from(6)));
        assert!(repo.latest_financials("601088").unwrap().is_some());
        assert_eq!(source.requests.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_second_run_is_incremental() {
        let source = Arc::new(FakeSource::default());
        let repo = repo_with(&["600900"]);
        let pipeline = Pipeline::new(config(), source.clone());
        let symbols = vec!["600900".to_string()];

        let first_day = day(2019, 6, 10);
        tokio_test::block_on(pipeline.backfill_until(&repo, &symbols, day(2024, 6, 10))).unwrap();
        assert_eq!(repo.latest_date_for_symbol("600900").unwrap(), Some(day(2019, 6, 12)));

        let stats = tokio_test::block_on(pipeline.backfill_until(&repo, &symbols, day(2019, 6, 12)))
            .unwrap();
        assert_eq!(stats.symbols_skipped, 1);
        assert_eq!(stats.rows_upserted, 0);

        tokio_test::block_on(pipeline.backfill_until(&repo, &symbols, day(2019, 6, 20))).unwrap();
        let requests = source.requests.lock().unwrap();
        assert_eq!(requests[0].1, first_day);
        assert_eq!(requests.last().unwrap().1, day(2019, 6, 13));
        assert_eq!(repo.metric_count_for("600900").unwrap(), 6);
    }
}
