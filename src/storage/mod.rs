use crate::models::{DailyMetrics, MetricKind, MetricSeries, QuarterlyFinancials, StockMeta};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use duckdb::types::Type;
use duckdb::{Connection, OptionalExt, Row, params};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS stock_meta (
    symbol      VARCHAR PRIMARY KEY,
    name        VARCHAR NOT NULL DEFAULT '',
    sector      VARCHAR,
    is_active   BOOLEAN NOT NULL DEFAULT true,
    created_at  TIMESTAMP NOT NULL
);

-- Raw observations only; percentiles are recomputed on read.
CREATE TABLE IF NOT EXISTS daily_metrics (
    symbol              VARCHAR  NOT NULL,
    trade_date          DATE     NOT NULL,
    close_price         DECIMAL(18, 4),
    market_cap          DECIMAL(20, 4),
    pe_ttm              DECIMAL(18, 6),
    pb_ttm              DECIMAL(18, 6),
    dividend_yield_ttm  DECIMAL(18, 6),
    fetched_at          TIMESTAMP NOT NULL,
    PRIMARY KEY (symbol, trade_date)
);

CREATE TABLE IF NOT EXISTS quarterly_financials (
    symbol                  VARCHAR NOT NULL,
    report_period           VARCHAR NOT NULL,
    publish_date            DATE,
    free_cash_flow          DECIMAL(24, 4),
    debt_to_asset_ratio     DECIMAL(18, 6),
    dividend_payout_ratio   DECIMAL(18, 6),
    roe_ttm                 DECIMAL(18, 6),
    gross_margin            DECIMAL(18, 6),
    revenue_growth_yoy      DECIMAL(18, 6),
    net_profit_growth_yoy   DECIMAL(18, 6),
    PRIMARY KEY (symbol, report_period)
);

CREATE SEQUENCE IF NOT EXISTS ingest_run_seq START 1;

CREATE TABLE IF NOT EXISTS ingest_runs (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('ingest_run_seq'),
    started_at          TIMESTAMP NOT NULL,
    finished_at         TIMESTAMP,
    status              VARCHAR NOT NULL DEFAULT 'running',
    symbols_processed   INTEGER DEFAULT 0,
    rows_upserted       INTEGER DEFAULT 0,
    error_msg           VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_metrics_date     ON daily_metrics (trade_date);
CREATE INDEX IF NOT EXISTS idx_metrics_symbol   ON daily_metrics (symbol);
CREATE INDEX IF NOT EXISTS idx_quarterly_symbol ON quarterly_financials (symbol);
"#;

// ── Decimal columns ───────────────────────────────────────────────────────────
//
// Decimals cross the driver boundary as text: written through an explicit
// CAST, read back with CAST(... AS VARCHAR).

fn dec_param(v: Option<Decimal>) -> Option<String> {
    v.map(|d| d.normalize().to_string())
}

fn dec_col(row: &Row<'_>, idx: usize) -> duckdb::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        Decimal::from_str(s.trim())
            .map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

const DAILY_COLUMNS: &str = r#"symbol, trade_date,
    CAST(close_price AS VARCHAR), CAST(market_cap AS VARCHAR),
    CAST(pe_ttm AS VARCHAR), CAST(pb_ttm AS VARCHAR),
    CAST(dividend_yield_ttm AS VARCHAR), fetched_at"#;

fn daily_from_row(r: &Row<'_>) -> duckdb::Result<DailyMetrics> {
    Ok(DailyMetrics {
        symbol: r.get(0)?,
        trade_date: r.get(1)?,
        close_price: dec_col(r, 2)?,
        market_cap: dec_col(r, 3)?,
        pe_ttm: dec_col(r, 4)?,
        pb_ttm: dec_col(r, 5)?,
        dividend_yield_ttm: dec_col(r, 6)?,
        fetched_at: r.get(7)?,
    })
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Tracked stocks ────────────────────────────────────────────────────────

    /// Adds a stock, or re-activates it with refreshed metadata.
    pub fn track_stock(&self, stock: &StockMeta) -> Result<()> {
        self.conn
            .execute(
                r#"INSERT INTO stock_meta (symbol, name, sector, is_active, created_at)
                   VALUES (?, ?, ?, true, ?)
                   ON CONFLICT (symbol) DO UPDATE SET
                       name      = CASE WHEN excluded.name = '' THEN name ELSE excluded.name END,
                       sector    = COALESCE(excluded.sector, sector),
                       is_active = true"#,
                params![stock.symbol, stock.name, stock.sector, stock.created_at],
            )
            .with_context(|| format!("track stock {}", stock.symbol))?;
        Ok(())
    }

    /// Soft delete. Returns false when the symbol was not actively tracked.
    pub fn untrack_stock(&self, symbol: &str) -> Result<bool> {
        let n = self.conn.execute(
            "UPDATE stock_meta SET is_active = false WHERE symbol = ? AND is_active",
            params![symbol],
        )?;
        Ok(n > 0)
    }

    pub fn get_stock(&self, symbol: &str) -> Result<Option<StockMeta>> {
        let stock = self
            .conn
            .query_row(
                "SELECT symbol, name, sector, is_active, created_at FROM stock_meta WHERE symbol = ?",
                params![symbol],
                |r| {
                    Ok(StockMeta {
                        symbol: r.get(0)?,
                        name: r.get(1)?,
                        sector: r.get(2)?,
                        is_active: r.get(3)?,
                        created_at: r.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(stock)
    }

    pub fn list_active(&self) -> Result<Vec<StockMeta>> {
        let mut stmt = self.conn.prepare(
            "SELECT symbol, name, sector, is_active, created_at
             FROM stock_meta WHERE is_active ORDER BY symbol",
        )?;
        let stocks = stmt
            .query_map([], |r| {
                Ok(StockMeta {
                    symbol: r.get(0)?,
                    name: r.get(1)?,
                    sector: r.get(2)?,
                    is_active: r.get(3)?,
                    created_at: r.get(4)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(stocks)
    }

    pub fn list_symbols(&self) -> Result<Vec<String>> {
        Ok(self.list_active()?.into_iter().map(|s| s.symbol).collect())
    }

    // ── Daily metrics ─────────────────────────────────────────────────────────

    /// Upsert rows; idempotent, safe to re-run on same data.
    pub fn upsert_daily_metrics(&self, rows: &[DailyMetrics]) -> Result<usize> {
        if rows.is_empty() { return Ok(0); }

        let tx = self.conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO daily_metrics
                (symbol, trade_date, close_price, market_cap, pe_ttm, pb_ttm, dividend_yield_ttm, fetched_at)
            VALUES (?, ?,
                CAST(? AS DECIMAL(18, 4)), CAST(? AS DECIMAL(20, 4)),
                CAST(? AS DECIMAL(18, 6)), CAST(? AS DECIMAL(18, 6)),
                CAST(? AS DECIMAL(18, 6)), ?)
            ON CONFLICT (symbol, trade_date) DO UPDATE SET
                close_price        = excluded.close_price,
                market_cap         = excluded.market_cap,
                pe_ttm             = excluded.pe_ttm,
                pb_ttm             = excluded.pb_ttm,
                dividend_yield_ttm = excluded.dividend_yield_ttm,
                fetched_at         = excluded.fetched_at
        "#;

        for row in rows {
            tx.execute(sql, params![
                row.symbol, row.trade_date,
                dec_param(row.close_price), dec_param(row.market_cap),
                dec_param(row.pe_ttm), dec_param(row.pb_ttm),
                dec_param(row.dividend_yield_ttm),
                row.fetched_at,
            ]).with_context(|| format!("upsert metrics {} {}", row.symbol, row.trade_date))?;
        }

        tx.commit()?;
        Ok(rows.len())
    }

    /// All stored rows for a symbol, oldest first.
    pub fn load_daily_metrics(&self, symbol: &str) -> Result<Vec<DailyMetrics>> {
        let sql = format!(
            "SELECT {} FROM daily_metrics WHERE symbol = ? ORDER BY trade_date",
            DAILY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![symbol], daily_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()
            .with_context(|| format!("load metrics for {}", symbol))?;
        Ok(rows)
    }

    pub fn latest_daily_metrics(&self, symbol: &str) -> Result<Option<DailyMetrics>> {
        let sql = format!(
            "SELECT {} FROM daily_metrics WHERE symbol = ? ORDER BY trade_date DESC LIMIT 1",
            DAILY_COLUMNS
        );
        Ok(self.conn.query_row(&sql, params![symbol], daily_from_row).optional()?)
    }

    /// The series snapshot the engine consumes.
    pub fn load_metric_series(&self, symbol: &str, kind: MetricKind) -> Result<MetricSeries> {
        let rows = self.load_daily_metrics(symbol)?;
        Ok(MetricSeries::from_daily(symbol, &rows, kind)?)
    }

    /// Latest date stored for a symbol, drives incremental backfill.
    pub fn latest_date_for_symbol(&self, symbol: &str) -> Result<Option<NaiveDate>> {
        let date: Option<NaiveDate> = self.conn.query_row(
            "SELECT MAX(trade_date) FROM daily_metrics WHERE symbol = ?",
            params![symbol],
            |r| r.get(0),
        )?;
        Ok(date)
    }

    pub fn metric_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM daily_metrics")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn metric_count_for(&self, symbol: &str) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM daily_metrics WHERE symbol = ?")?;
        Ok(s.query_row(params![symbol], |r| r.get(0))?)
    }

    pub fn stock_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM stock_meta WHERE is_active")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn date_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let mut s = self.conn.prepare("SELECT MIN(trade_date), MAX(trade_date) FROM daily_metrics")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Quarterly financials ──────────────────────────────────────────────────

    pub fn upsert_quarterly_financials(&self, reports: &[QuarterlyFinancials]) -> Result<usize> {
        if reports.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO quarterly_financials
                (symbol, report_period, publish_date, free_cash_flow, debt_to_asset_ratio,
                 dividend_payout_ratio, roe_ttm, gross_margin, revenue_growth_yoy, net_profit_growth_yoy)
            VALUES (?, ?, ?,
                CAST(? AS DECIMAL(24, 4)), CAST(? AS DECIMAL(18, 6)),
                CAST(? AS DECIMAL(18, 6)), CAST(? AS DECIMAL(18, 6)),
                CAST(? AS DECIMAL(18, 6)), CAST(? AS DECIMAL(18, 6)),
                CAST(? AS DECIMAL(18, 6)))
            ON CONFLICT (symbol, report_period) DO UPDATE SET
                publish_date          = excluded.publish_date,
                free_cash_flow        = excluded.free_cash_flow,
                debt_to_asset_ratio   = excluded.debt_to_asset_ratio,
                dividend_payout_ratio = COALESCE(excluded.dividend_payout_ratio, dividend_payout_ratio),
                roe_ttm               = excluded.roe_ttm,
                gross_margin          = excluded.gross_margin,
                revenue_growth_yoy    = excluded.revenue_growth_yoy,
                net_profit_growth_yoy = excluded.net_profit_growth_yoy
        "#;

        for f in reports {
            tx.execute(
                sql,
                params![
                    f.symbol,
                    f.report_period,
                    f.publish_date,
                    dec_param(f.free_cash_flow),
                    dec_param(f.debt_to_asset_ratio),
                    dec_param(f.dividend_payout_ratio),
                    dec_param(f.roe_ttm),
                    dec_param(f.gross_margin),
                    dec_param(f.revenue_growth_yoy),
                    dec_param(f.net_profit_growth_yoy),
                ],
            )
            .with_context(|| format!("upsert financials {} {}", f.symbol, f.report_period))?;
        }

        tx.commit()?;
        Ok(reports.len())
    }

    /// Most recent report period for a symbol.
    pub fn latest_financials(&self, symbol: &str) -> Result<Option<QuarterlyFinancials>> {
        let report = self
            .conn
            .query_row(
                r#"SELECT symbol, report_period, publish_date,
                       CAST(free_cash_flow AS VARCHAR), CAST(debt_to_asset_ratio AS VARCHAR),
                       CAST(dividend_payout_ratio AS VARCHAR), CAST(roe_ttm AS VARCHAR),
                       CAST(gross_margin AS VARCHAR), CAST(revenue_growth_yoy AS VARCHAR),
                       CAST(net_profit_growth_yoy AS VARCHAR)
                   FROM quarterly_financials
                   WHERE symbol = ?
                   ORDER BY report_period DESC
                   LIMIT 1"#,
                params![symbol],
                |r| {
                    Ok(QuarterlyFinancials {
                        symbol: r.get(0)?,
                        report_period: r.get(1)?,
                        publish_date: r.get(2)?,
                        free_cash_flow: dec_col(r, 3)?,
                        debt_to_asset_ratio: dec_col(r, 4)?,
                        dividend_payout_ratio: dec_col(r, 5)?,
                        roe_ttm: dec_col(r, 6)?,
                        gross_margin: dec_col(r, 7)?,
                        revenue_growth_yoy: dec_col(r, 8)?,
                        net_profit_growth_yoy: dec_col(r, 9)?,
                    })
                },
            )
            .optional()?;
        Ok(report)
    }

    // ── Ingest run log ────────────────────────────────────────────────────────

    pub fn begin_ingest_run(&self) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO ingest_runs (started_at, status) VALUES (?, 'running') RETURNING id",
            params![Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_ingest_run(
        &self, run_id: i64, symbols: usize, rows: usize, error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE ingest_runs SET
               finished_at = ?, status = ?,
               symbols_processed = ?, rows_upserted = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                symbols as i64, rows as i64, error, run_id,
            ],
        )?;
        Ok(())
    }

    pub fn last_ingest_status(&self, run_id: i64) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT status FROM ingest_runs WHERE id = ?", params![run_id], |r| r.get(0))
            .optional()?)
    }
}
