//! CSV loader for bulk-importing exported `daily_basic` history.

use crate::ingest::parsers::{csv_row_to_metrics, dedup_by_date};
use crate::models::{DailyMetrics, RawMetricCsvRow};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Extract symbol from CSV filename. "600036_daily.csv" → "600036"
pub fn extract_symbol_from_filename(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let symbol = stem
        .split(['_', ' ', '.'])
        .next()?
        .trim()
        .to_uppercase();

    if symbol.is_empty() { None } else { Some(symbol) }
}

/// Column positions resolved from the header row; falls back to the
/// export order trade_date, close, pe_ttm, pb, dv_ttm, total_mv.
struct ColumnMap(HashMap<&'static str, usize>);

impl ColumnMap {
    const COLUMNS: [&'static str; 6] = ["trade_date", "close", "pe_ttm", "pb", "dv_ttm", "total_mv"];

    fn from_headers(headers: &csv::StringRecord) -> Self {
        let mut map = HashMap::new();
        for (i, h) in headers.iter().enumerate() {
            let h = h.trim().to_ascii_lowercase();
            if let Some(name) = Self::COLUMNS.iter().find(|c| **c == h) {
                map.insert(*name, i);
            }
        }
        if !map.contains_key("trade_date") {
            map = Self::COLUMNS.iter().enumerate().map(|(i, c)| (*c, i)).collect();
        }
        Self(map)
    }

    fn cell(&self, record: &csv::StringRecord, name: &str) -> Option<String> {
        self.0.get(name).and_then(|i| record.get(*i)).map(|s| s.to_string())
    }
}

/// Parse one per-symbol CSV; bad rows are skipped with a warning.
pub fn load_csv(path: &Path) -> Result<(String, Vec<DailyMetrics>)> {
    let symbol = extract_symbol_from_filename(path)
        .with_context(|| format!("No symbol in filename {:?}", path))?;

    debug!("Loading {} from {:?}", symbol, path);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Cannot open {:?}", path))?;

    let columns = ColumnMap::from_headers(reader.headers()?);
    let now = Utc::now().naive_utc();
    let mut rows = Vec::new();

    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };

        let raw = RawMetricCsvRow {
            trade_date: columns.cell(&record, "trade_date"),
            close: columns.cell(&record, "close"),
            pe_ttm: columns.cell(&record, "pe_ttm"),
            pb: columns.cell(&record, "pb"),
            dv_ttm: columns.cell(&record, "dv_ttm"),
            total_mv: columns.cell(&record, "total_mv"),
        };

        if let Some(row) = csv_row_to_metrics(&symbol, &raw, now) {
            rows.push(row);
        }
    }

    let rows = dedup_by_date(rows);
    info!("{}: {} rows loaded", symbol, rows.len());
    Ok((symbol, rows))
}

pub fn discover_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
