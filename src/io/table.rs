use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use duckdb::Connection;

use crate::error::LabError;

/// File layouts the loaders understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Tsv,
    Parquet,
}

impl TableFormat {
    /// Guesses the layout from the extension; unknown extensions read as CSV.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("parquet") | Some("pq") => TableFormat::Parquet,
            Some("tsv") | Some("delim") | Some("tab") => TableFormat::Tsv,
            _ => TableFormat::Csv,
        }
    }
}

/// Untyped table: header names plus string cells, one `Vec` per row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn require_column(&self, name: &str, source_name: &str) -> Result<usize, LabError> {
        self.column_index(name)
            .ok_or_else(|| LabError::missing_column(name, source_name))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows[row].get(col).map(String::as_str).unwrap_or("")
    }
}

pub fn read_table(path: &Path, format: TableFormat) -> Result<RawTable> {
    read_table_columns(path, format, None)
}

/// Reads only `columns` when given, in file order.
///
/// Requested names the file lacks are left out of the result so the caller's
/// `require_column` reports them.
pub fn read_table_columns(
    path: &Path,
    format: TableFormat,
    columns: Option<&[String]>,
) -> Result<RawTable> {
    match format {
        TableFormat::Csv => read_delimited(path, b',', columns),
        TableFormat::Tsv => read_delimited(path, b'\t', columns),
        TableFormat::Parquet => read_parquet(path, columns),
    }
}

fn keep_header(name: &str, columns: Option<&[String]>) -> bool {
    columns.map_or(true, |wanted| wanted.iter().any(|c| c == name))
}

fn read_delimited(path: &Path, delimiter: u8, columns: Option<&[String]>) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let all: Vec<String> = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let keep: Vec<usize> = (0..all.len())
        .filter(|&i| keep_header(&all[i], columns))
        .collect();
    let headers = keep.iter().map(|&i| all[i].clone()).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("malformed row in {}", path.display()))?;
        rows.push(
            keep.iter()
                .map(|&i| record.get(i).unwrap_or("").trim().to_string())
                .collect(),
        );
    }
    Ok(RawTable { headers, rows })
}

/// Reads a Parquet file through an in-memory DuckDB, casting the selected
/// columns to text.
fn read_parquet(path: &Path, columns: Option<&[String]>) -> Result<RawTable> {
    let conn = Connection::open_in_memory().context("failed to open duckdb")?;
    let source = format!("read_parquet('{}')", sql_path(path));

    let mut describe = conn
        .prepare(&format!("DESCRIBE SELECT * FROM {source}"))
        .with_context(|| format!("failed to inspect {}", path.display()))?;
    let headers: Vec<String> = describe
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|h| keep_header(h, columns))
        .collect();
    if headers.is_empty() {
        return Ok(RawTable::default());
    }

    let projection = headers
        .iter()
        .map(|h| format!("CAST(\"{}\" AS VARCHAR)", h.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(", ");
    let mut select = conn
        .prepare(&format!("SELECT {projection} FROM {source}"))
        .with_context(|| format!("failed to read {}", path.display()))?;
    let width = headers.len();
    let rows = select
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, Option<String>>(i).map(Option::unwrap_or_default))
                .collect::<std::result::Result<Vec<_>, _>>()
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(RawTable { headers, rows })
}

/// Converts a CSV file into Parquet through DuckDB.
pub fn csv_to_parquet(csv_path: &Path, parquet_path: &Path) -> Result<()> {
    let conn = Connection::open_in_memory().context("failed to open duckdb")?;
    conn.execute_batch(&format!(
        "COPY (SELECT * FROM read_csv_auto('{}', header = true)) TO '{}' (FORMAT PARQUET);",
        sql_path(csv_path),
        sql_path(parquet_path)
    ))
    .with_context(|| format!("failed to convert {} to parquet", csv_path.display()))?;
    Ok(())
}

fn sql_path(path: &Path) -> String {
    path.display().to_string().replace('\'', "''")
}

/// Parses the date part of a cell (`YYYY-MM-DD`, optionally followed by a time).
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let head = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y%m%d"))
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%m/%d/%Y"))
        .ok()
}

/// Parses a numeric cell; blanks and `NaN`-like markers read as NaN.
pub fn parse_number(raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}
