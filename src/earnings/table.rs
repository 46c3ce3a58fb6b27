use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::artifacts::{ensure_parent, format_cell};
use crate::earnings::panel::month_end;
use crate::error::LabError;
use crate::io::table::{csv_to_parquet, parse_date, parse_number, read_table, TableFormat};

/// Prediction, analyst forecast and realized value for one horizon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizonCells {
    pub pred: f64,
    pub af: f64,
    pub ae: f64,
}

impl HorizonCells {
    pub const MISSING: HorizonCells = HorizonCells {
        pred: f64::NAN,
        af: f64::NAN,
        ae: f64::NAN,
    };
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRow {
    pub permno: i64,
    pub year_month: NaiveDate,
    /// One entry per horizon, in [`ForecastTable::horizons`] order.
    pub cells: Vec<HorizonCells>,
}

/// Firm-month forecast table with `<prefix>_<h>`, `AF_<h>`, `AE_<h>` columns.
///
/// `prefix` is `NN` for network forecasts and `RF` for the random-forest
/// baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastTable {
    pub prefix: String,
    pub horizons: Vec<String>,
    pub rows: Vec<ForecastRow>,
}

impl ForecastTable {
    pub fn new(prefix: impl Into<String>, horizons: Vec<String>) -> Self {
        Self {
            prefix: prefix.into(),
            horizons,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn horizon_index(&self, horizon: &str) -> Option<usize> {
        self.horizons.iter().position(|h| h == horizon)
    }

    pub fn month_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.rows.iter().map(|r| r.year_month).min()?;
        let max = self.rows.iter().map(|r| r.year_month).max()?;
        Some((min, max))
    }

    /// Outer-joins per-horizon results on (`permno`, `YearMonth`), sorted by
    /// (`YearMonth`, `permno`). Absent cells are NaN.
    pub fn outer_join(
        prefix: impl Into<String>,
        per_horizon: Vec<(String, Vec<(i64, NaiveDate, HorizonCells)>)>,
    ) -> Self {
        let horizons: Vec<String> = per_horizon.iter().map(|(h, _)| h.clone()).collect();
        let width = horizons.len();
        let mut merged: BTreeMap<(NaiveDate, i64), Vec<HorizonCells>> = BTreeMap::new();
        for (slot, (_, rows)) in per_horizon.into_iter().enumerate() {
            for (permno, year_month, cells) in rows {
                let entry = merged
                    .entry((year_month, permno))
                    .or_insert_with(|| vec![HorizonCells::MISSING; width]);
                entry[slot] = cells;
            }
        }
        let rows = merged
            .into_iter()
            .map(|((year_month, permno), cells)| ForecastRow {
                permno,
                year_month,
                cells,
            })
            .collect();
        Self {
            prefix: prefix.into(),
            horizons,
            rows,
        }
    }

    pub fn header(&self) -> Vec<String> {
        let mut header = vec!["permno".to_string(), "YearMonth".to_string()];
        for h in &self.horizons {
            header.push(format!("{}_{h}", self.prefix));
            header.push(format!("AF_{h}"));
            header.push(format!("AE_{h}"));
        }
        header
    }
}

/// Writes the table as CSV; a `.parquet` path also gets a CSV sibling that
/// is converted with duckdb.
pub fn write_forecast_table(path: &Path, table: &ForecastTable) -> Result<()> {
    let csv_path = if TableFormat::from_path(path) == TableFormat::Parquet {
        path.with_extension("csv")
    } else {
        path.to_path_buf()
    };
    ensure_parent(&csv_path)?;
    let mut writer = csv::Writer::from_path(&csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    writer.write_record(table.header())?;
    for row in &table.rows {
        let mut record = Vec::with_capacity(2 + 3 * row.cells.len());
        record.push(row.permno.to_string());
        record.push(row.year_month.format("%Y-%m-%d").to_string());
        for cells in &row.cells {
            record.push(format_cell(cells.pred));
            record.push(format_cell(cells.af));
            record.push(format_cell(cells.ae));
        }
        writer.write_record(&record)?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", csv_path.display()))?;

    if csv_path != path {
        csv_to_parquet(&csv_path, path)?;
    }
    tracing::info!(path = %path.display(), rows = table.len(), "wrote forecast table");
    Ok(())
}

/// Reads a forecast table written by this crate or by the random-forest
/// baseline. Every `<prefix>_<h>`, `AF_<h>` and `AE_<h>` column must exist.
pub fn read_forecast_table(path: &Path, prefix: &str, horizons: &[String]) -> Result<ForecastTable> {
    if !path.exists() {
        return Err(LabError::MissingInput(path.to_path_buf()).into());
    }
    let source_name = format!("{prefix} forecasts");
    let raw = read_table(path, TableFormat::from_path(path))?;
    let permno_col = raw.require_column("permno", &source_name)?;
    let ym_col = raw.require_column("YearMonth", &source_name)?;
    let mut horizon_cols = Vec::with_capacity(horizons.len());
    for h in horizons {
        horizon_cols.push((
            raw.require_column(&format!("{prefix}_{h}"), &source_name)?,
            raw.require_column(&format!("AF_{h}"), &source_name)?,
            raw.require_column(&format!("AE_{h}"), &source_name)?,
        ));
    }

    let mut table = ForecastTable::new(prefix, horizons.to_vec());
    for row in 0..raw.len() {
        let permno = parse_number(raw.cell(row, permno_col));
        let year_month = parse_date(raw.cell(row, ym_col));
        let (Some(year_month), true) = (year_month, permno.is_finite()) else {
            return Err(LabError::Validation(format!(
                "{source_name}: row {} has an invalid permno or YearMonth",
                row + 1
            ))
            .into());
        };
        let cells = horizon_cols
            .iter()
            .map(|&(p, af, ae)| HorizonCells {
                pred: parse_number(raw.cell(row, p)),
                af: parse_number(raw.cell(row, af)),
                ae: parse_number(raw.cell(row, ae)),
            })
            .collect();
        table.rows.push(ForecastRow {
            permno: permno as i64,
            year_month: month_end(year_month),
            cells,
        });
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32) -> NaiveDate {
        month_end(NaiveDate::from_ymd_opt(2000, m, 1).unwrap())
    }

    fn cells(v: f64) -> HorizonCells {
        HorizonCells { pred: v, af: v, ae: v }
    }

    #[test]
    fn outer_join_fills_gaps_and_sorts_by_month_then_firm() {
        let table = ForecastTable::outer_join(
            "NN",
            vec![
                ("q1".to_string(), vec![(7, d(2), cells(1.0)), (3, d(1), cells(2.0))]),
                ("q2".to_string(), vec![(7, d(1), cells(3.0))]),
            ],
        );
        let keys: Vec<(NaiveDate, i64)> = table.rows.iter().map(|r| (r.year_month, r.permno)).collect();
        assert_eq!(keys, vec![(d(1), 3), (d(1), 7), (d(2), 7)]);
        assert!(table.rows[0].cells[1].pred.is_nan());
        assert_eq!(table.rows[1].cells[1].pred, 3.0);
        assert!(table.rows[1].cells[0].ae.is_nan());
        assert_eq!(table.month_range(), Some((d(1), d(2))));
    }

    #[test]
    fn header_groups_columns_by_horizon() {
        let table = ForecastTable::new("RF", vec!["y1".to_string()]);
        assert_eq!(table.header(), vec!["permno", "YearMonth", "RF_y1", "AF_y1", "AE_y1"]);
    }
}
