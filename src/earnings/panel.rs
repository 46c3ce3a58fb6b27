use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Result;
use chrono::{Datelike, Months, NaiveDate};

use crate::error::LabError;
use crate::io::table::{parse_date, parse_number, read_table_columns, RawTable, TableFormat};

const SOURCE_NAME: &str = "training panel";

/// Last calendar day of `date`'s month.
pub fn month_end(date: NaiveDate) -> NaiveDate {
    let first = date.with_day(1).unwrap_or(date);
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}

/// Moves a month-end date back by `months` month-ends.
pub fn shift_month_ends_back(date: NaiveDate, months: u32) -> NaiveDate {
    let first = date.with_day(1).unwrap_or(date);
    first
        .checked_sub_months(Months::new(months))
        .map(month_end)
        .unwrap_or(date)
}

/// Firm-month training panel keyed by (`permno`, `YearMonth`).
///
/// Only the requested columns are materialised. Numeric gaps are NaN and
/// missing dates are `None`.
#[derive(Debug, Clone, Default)]
pub struct TrainingPanel {
    pub permno: Vec<i64>,
    pub year_month: Vec<NaiveDate>,
    numeric: BTreeMap<String, Vec<f64>>,
    dates: BTreeMap<String, Vec<Option<NaiveDate>>>,
}

impl TrainingPanel {
    pub fn len(&self) -> usize {
        self.permno.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permno.is_empty()
    }

    pub fn numeric(&self, name: &str) -> Result<&[f64], LabError> {
        self.numeric
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| LabError::missing_column(name, SOURCE_NAME))
    }

    pub fn date(&self, name: &str) -> Result<&[Option<NaiveDate>], LabError> {
        self.dates
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| LabError::missing_column(name, SOURCE_NAME))
    }

    /// Distinct month-ends at or after `start`, ascending.
    pub fn months_from(&self, start: NaiveDate) -> Vec<NaiveDate> {
        self.year_month
            .iter()
            .copied()
            .filter(|m| *m >= start)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Builds a panel in memory; every column must match `permno` in length.
    pub fn from_parts(
        permno: Vec<i64>,
        year_month: Vec<NaiveDate>,
        numeric: BTreeMap<String, Vec<f64>>,
        dates: BTreeMap<String, Vec<Option<NaiveDate>>>,
    ) -> Result<Self, LabError> {
        let n = permno.len();
        let bad_len = year_month.len() != n
            || numeric.values().any(|c| c.len() != n)
            || dates.values().any(|c| c.len() != n);
        if bad_len {
            return Err(LabError::Validation(
                "training panel columns must all have one value per row".to_string(),
            ));
        }
        Ok(Self {
            permno,
            year_month: year_month.into_iter().map(month_end).collect(),
            numeric,
            dates,
        })
    }
}

/// Reads the panel from CSV or Parquet, keeping only the requested columns.
pub fn load_training_panel(
    path: &Path,
    numeric_cols: &[String],
    date_cols: &[String],
) -> Result<TrainingPanel> {
    if !path.exists() {
        return Err(LabError::MissingInput(path.to_path_buf()).into());
    }
    let wanted: Vec<String> = ["permno", "YearMonth"]
        .iter()
        .map(|c| c.to_string())
        .chain(numeric_cols.iter().cloned())
        .chain(date_cols.iter().cloned())
        .collect();
    let table = read_table_columns(path, TableFormat::from_path(path), Some(&wanted))?;
    let panel = panel_from_table(&table, numeric_cols, date_cols)?;
    tracing::info!(
        path = %path.display(),
        rows = panel.len(),
        numeric = numeric_cols.len(),
        "loaded training panel"
    );
    Ok(panel)
}

fn panel_from_table(
    table: &RawTable,
    numeric_cols: &[String],
    date_cols: &[String],
) -> Result<TrainingPanel, LabError> {
    let permno_col = table.require_column("permno", SOURCE_NAME)?;
    let ym_col = table.require_column("YearMonth", SOURCE_NAME)?;

    let mut permno = Vec::with_capacity(table.len());
    let mut year_month = Vec::with_capacity(table.len());
    for row in 0..table.len() {
        let raw_id = table.cell(row, permno_col);
        let id = parse_number(raw_id);
        if !id.is_finite() {
            return Err(LabError::Validation(format!(
                "invalid permno `{raw_id}` on row {}",
                row + 1
            )));
        }
        permno.push(id as i64);
        let raw_ym = table.cell(row, ym_col);
        let ym = parse_date(raw_ym).ok_or_else(|| {
            LabError::Validation(format!("invalid YearMonth `{raw_ym}` on row {}", row + 1))
        })?;
        year_month.push(ym);
    }

    let mut numeric = BTreeMap::new();
    for name in numeric_cols {
        if numeric.contains_key(name) {
            continue;
        }
        let col = table.require_column(name, SOURCE_NAME)?;
        let values = (0..table.len())
            .map(|row| parse_number(table.cell(row, col)))
            .collect();
        numeric.insert(name.clone(), values);
    }

    let mut dates = BTreeMap::new();
    for name in date_cols {
        if dates.contains_key(name) {
            continue;
        }
        let col = table.require_column(name, SOURCE_NAME)?;
        let values = (0..table.len())
            .map(|row| parse_date(table.cell(row, col)))
            .collect();
        dates.insert(name.clone(), values);
    }

    TrainingPanel::from_parts(permno, year_month, numeric, dates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn month_end_handles_leap_february() {
        assert_eq!(month_end(d(2020, 2, 3)), d(2020, 2, 29));
        assert_eq!(month_end(d(2021, 12, 31)), d(2021, 12, 31));
    }

    #[test]
    fn shifting_back_twelve_month_ends() {
        assert_eq!(shift_month_ends_back(d(1987, 1, 31), 12), d(1986, 1, 31));
        assert_eq!(shift_month_ends_back(d(2021, 3, 31), 1), d(2021, 2, 28));
    }

    #[test]
    fn from_parts_snaps_to_month_end() {
        let panel = TrainingPanel::from_parts(
            vec![1],
            vec![d(2000, 5, 1)],
            BTreeMap::new(),
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(panel.year_month[0], d(2000, 5, 31));
        assert!(panel.numeric("x").is_err());
    }
}
