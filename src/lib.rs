//! Percentile-based valuation signals for dividend stocks.
//!
//! The [`engine`] is pure and synchronous; everything else moves data in and
//! out of it (Tushare / CSV ingestion, DuckDB storage, the CLI board).

pub mod board;
pub mod config;
pub mod engine;
pub mod ingest;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod storage;
pub mod utils;
