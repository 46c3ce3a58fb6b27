use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};

use crate::artifacts::write_wide_frame;
use crate::error::LabError;
use crate::feed::{fetch_adj_close_frame, PriceHistorySource};
use crate::io::table::{csv_to_parquet, parse_date, parse_number, read_table, RawTable, TableFormat};
use crate::model::WideFrame;

/// Padding added on both sides of the requested range when fetching.
pub const FETCH_PADDING_DAYS: i64 = 7;

const SOURCE_NAME: &str = "equity cache";

/// Where a loaded equity frame came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EquityOrigin {
    Cache(PathBuf),
    Fetched,
}

/// Loads cached adjusted closes, or fetches and caches them.
///
/// Lookup order: the configured cache, then its sibling `.csv` when the
/// configured cache is Parquet and cannot be read, then `source`.
pub fn load_or_fetch_equity_adj_close(
    cache_path: &Path,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
    source: &dyn PriceHistorySource,
) -> Result<(WideFrame, EquityOrigin)> {
    let format = TableFormat::from_path(cache_path);
    let csv_path = sibling_csv(cache_path);

    if cache_path.exists() {
        match read_table(cache_path, format) {
            Ok(table) => {
                let frame = frame_from_table(&table)?;
                tracing::info!(path = %cache_path.display(), rows = frame.len(), "loaded equity cache");
                return Ok((frame, EquityOrigin::Cache(cache_path.to_path_buf())));
            }
            Err(err) if format == TableFormat::Parquet => {
                tracing::warn!(
                    path = %cache_path.display(),
                    error = %err,
                    "parquet equity cache unreadable; trying csv fallback"
                );
            }
            Err(err) => return Err(err),
        }
    }

    if format == TableFormat::Parquet && csv_path.exists() {
        let table = read_table(&csv_path, TableFormat::Csv)?;
        let frame = frame_from_table(&table)?;
        tracing::info!(path = %csv_path.display(), rows = frame.len(), "loaded equity csv fallback");
        return Ok((frame, EquityOrigin::Cache(csv_path)));
    }

    let fetch_start = start - Duration::days(FETCH_PADDING_DAYS);
    let fetch_end = end + Duration::days(FETCH_PADDING_DAYS);
    tracing::info!(
        symbols = symbols.len(),
        start = %fetch_start,
        end = %fetch_end,
        "equity cache missing; fetching price history"
    );
    let frame = fetch_adj_close_frame(source, symbols, fetch_start, fetch_end)
        .map_err(|err| LabError::EquityFetch(format!("{err:#}")))
        .with_context(|| {
            format!(
                "could not load equity cache at {} and the price fetch failed",
                cache_path.display()
            )
        })?;

    write_wide_frame(&csv_path, &frame)?;
    if format == TableFormat::Parquet {
        if let Err(err) = csv_to_parquet(&csv_path, cache_path) {
            tracing::warn!(
                path = %cache_path.display(),
                error = %err,
                "parquet conversion failed; keeping csv cache"
            );
        }
    }
    Ok((frame, EquityOrigin::Fetched))
}

/// `foo.parquet` -> `foo.csv`; a CSV path maps to itself.
pub fn sibling_csv(path: &Path) -> PathBuf {
    path.with_extension("csv")
}

/// Interprets a cache table: a date column (named `date`, `Date`, or the
/// pandas index column, else the first column) plus one column per symbol.
pub fn frame_from_table(table: &RawTable) -> Result<WideFrame, LabError> {
    if table.headers.is_empty() {
        return Err(LabError::missing_column("date", SOURCE_NAME));
    }
    let date_col = table
        .headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("date") || h == "__index_level_0__")
        .unwrap_or(0);

    let mut observations: BTreeMap<String, Vec<(NaiveDate, f64)>> = BTreeMap::new();
    for (col, name) in table.headers.iter().enumerate() {
        if col != date_col {
            observations.insert(name.clone(), Vec::with_capacity(table.len()));
        }
    }
    for row in 0..table.len() {
        let raw = table.cell(row, date_col);
        let date = parse_date(raw).ok_or_else(|| {
            LabError::Validation(format!("unparseable equity cache date `{raw}` on row {}", row + 1))
        })?;
        for (col, name) in table.headers.iter().enumerate() {
            if col == date_col {
                continue;
            }
            if let Some(obs) = observations.get_mut(name) {
                obs.push((date, parse_number(table.cell(row, col))));
            }
        }
    }
    Ok(WideFrame::from_observations(&observations))
}
