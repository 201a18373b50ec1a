use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use dividend_signal::board::{SignalBoard, SignalCard};
use dividend_signal::config::AppConfig;
use dividend_signal::ingest::TushareSource;
use dividend_signal::ingest::parsers::normalise_symbol;
use dividend_signal::loader::{discover_csv_files, load_csv};
use dividend_signal::models::{MetricKind, StockMeta};
use dividend_signal::pipeline::Pipeline;
use dividend_signal::storage::Repository;
use dividend_signal::utils::{self, fmt_decimal, fmt_ratio_pct};

#[derive(Parser)]
#[command(name = "dividend-signal", about = "Percentile valuation signals for dividend stocks", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Add a symbol to the watch list (re-activates an untracked one)
    Track {
        symbol: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long)]
        sector: Option<String>,
    },

    /// Stop tracking a symbol; its history is kept
    Untrack { symbol: String },

    /// List tracked symbols
    Symbols,

    /// Bulk-load per-symbol daily_basic CSV exports
    LoadCsv {
        #[arg(short, long, default_value = "data")]
        dir: PathBuf,
    },

    /// Fetch missing history from Tushare (all tracked symbols by default)
    Backfill {
        #[arg(short, long)]
        symbol: Option<String>,
    },

    /// Percentile bands and signal for one symbol, or every tracked one
    Analyze {
        symbol: Option<String>,

        #[arg(short, long, default_value = "dividend-yield")]
        metric: MetricKind,

        /// Every metric for the symbol instead of just --metric
        #[arg(long, requires = "symbol", conflicts_with = "metric")]
        all_metrics: bool,

        /// Print the last N cleaned points
        #[arg(short, long)]
        display: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Show database statistics
    Stats,

    /// Apply schema migrations without loading data
    Migrate,
}

fn open_repo(config: &AppConfig) -> Result<Repository> {
    let repo = Repository::open(&config.storage.db_path)?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }
    Ok(repo)
}

fn track(repo: &Repository, symbol: &str, name: String, sector: Option<String>) -> Result<String> {
    let symbol = normalise_symbol(symbol);
    if symbol.is_empty() {
        bail!("Empty symbol");
    }
    repo.track_stock(&StockMeta {
        symbol: symbol.clone(),
        name,
        sector,
        is_active: true,
        created_at: Utc::now().naive_utc(),
    })?;
    Ok(symbol)
}

fn print_cards(cards: &[SignalCard]) {
    println!(
        "{:<8} {:<15} {:>9} {:>9} {:>9} {:>7}  {:<12} {:<12}",
        "SYMBOL", "METRIC", "LATEST", "P_LOW", "P_HIGH", "RANK", "SIGNAL", "HEALTH"
    );
    for card in cards {
        let a = &card.analysis;
        println!(
            "{:<8} {:<15} {:>9} {:>9} {:>9} {:>7}  {:<12} {:<12}",
            a.symbol,
            a.metric,
            fmt_decimal(a.latest.and_then(|p| p.value), 2),
            fmt_decimal(a.thresholds.low, 2),
            fmt_decimal(a.thresholds.high, 2),
            fmt_decimal(a.reading.percentile_rank, 1),
            a.reading.label(),
            format!("{:?}", card.health.status),
        );
        if !a.reading.no_data && !a.coverage.is_sufficient() {
            println!(
                "         ⚠ {} of {} points: {} short of a full window",
                a.coverage.total,
                a.coverage.required,
                a.coverage.missing()
            );
        }
        if !card.health.flags.is_empty() {
            println!(
                "         flags: {:?} (payout {})",
                card.health.flags,
                fmt_ratio_pct(card.health.payout_ratio)
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "dividend_signal=info,warn",
        1 => "dividend_signal=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Track { symbol, name, sector } => {
            let repo = open_repo(&config)?;
            let symbol = track(&repo, &symbol, name, sector)?;
            println!("Tracking {}", symbol);
        }

        Command::Untrack { symbol } => {
            let repo = open_repo(&config)?;
            let symbol = normalise_symbol(&symbol);
            if repo.untrack_stock(&symbol)? {
                println!("Stopped tracking {}", symbol);
            } else {
                println!("{} was not tracked", symbol);
            }
        }

        Command::Symbols => {
            let repo = open_repo(&config)?;
            let stocks = repo.list_active()?;
            if stocks.is_empty() {
                println!("No symbols — run `dividend-signal track <SYMBOL>` first.");
            } else {
                println!("{} symbols:", stocks.len());
                for s in &stocks {
                    println!("  {:<8} {} {}", s.symbol, s.name, s.sector.as_deref().unwrap_or(""));
                }
            }
        }

        Command::LoadCsv { dir } => {
            let _t = utils::Timer::start("CSV bulk load");
            let repo = open_repo(&config)?;

            let files = discover_csv_files(&dir)?;
            info!("Found {} CSV files in {:?}", files.len(), dir);

            let mut total_rows = 0usize;
            let mut errors = 0usize;

            for path in &files {
                match load_csv(path) {
                    Ok((symbol, rows)) => {
                        track(&repo, &symbol, String::new(), None)?;
                        total_rows += repo.upsert_daily_metrics(&rows)?;
                    }
                    Err(e) => {
                        warn!("Error loading {:?}: {:#}", path, e);
                        errors += 1;
                    }
                }
            }

            info!("Done: {} rows upserted, {} errors", total_rows, errors);
        }

        Command::Backfill { symbol } => {
            let _t = utils::Timer::start("Backfill");
            let repo = open_repo(&config)?;
            let symbols = match symbol {
                Some(s) => vec![track(&repo, &s, String::new(), None)?],
                None => repo.list_symbols()?,
            };
            if symbols.is_empty() {
                bail!("No tracked symbols — run `dividend-signal track <SYMBOL>` first");
            }

            let source = TushareSource::new(&config.source).context("Failed to build Tushare client")?;
            let pipeline = Pipeline::new(config.pipeline.clone(), Arc::new(source));
            let stats = pipeline.backfill(&repo, &symbols).await?;
            info!(
                "Done: {} symbols, {} rows, {} errors",
                stats.symbols_processed, stats.rows_upserted, stats.errors
            );
        }

        Command::Analyze { symbol, metric, all_metrics, display, json } => {
            let repo = open_repo(&config)?;
            let mut params = config.engine_params()?;
            if let Some(n) = display {
                params.display_points = n;
            }
            let board = SignalBoard::new(&repo, params, config.health.params(), config.cache_ttl());

            let cards = match &symbol {
                Some(s) if all_metrics => board.all_metrics(&normalise_symbol(s))?,
                Some(s) => vec![board.analyze(&normalise_symbol(s), metric)?],
                None => board.overview(metric)?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&cards)?);
            } else {
                print_cards(&cards);
            }

            if display.is_some() && !json {
                for card in &cards {
                    let window = card.analysis.display();
                    println!(
                        "\n{} {}: last {} of {} points",
                        card.analysis.symbol,
                        card.analysis.metric,
                        window.points.len(),
                        window.total_count
                    );
                    let history = card.analysis.percentile_history();
                    let ranks = &history[history.len() - window.points.len()..];
                    for (p, (_, rank)) in window.points.iter().zip(ranks) {
                        println!("  {}  {:>10}  {:>6}", p.trade_date, fmt_decimal(p.value, 4), fmt_decimal(*rank, 1));
                    }
                }
            }
        }

        Command::Stats => {
            let repo = open_repo(&config)?;
            let rows = repo.metric_count()?;
            let stocks = repo.stock_count()?;
            let (min, max) = repo.date_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  dividend-signal — Database Stats");
            println!("─────────────────────────────────");
            println!("  Tracked     : {}", utils::fmt_number(stocks));
            println!("  Daily rows  : {}", utils::fmt_number(rows));
            println!("  From        : {}", min.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  To          : {}", max.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
