use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::error::LabError;

/// A single dated series. Missing values are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl Series {
    pub fn new(name: impl Into<String>, dates: Vec<NaiveDate>, values: Vec<f64>) -> Self {
        assert_eq!(dates.len(), values.len(), "series dates and values must align");
        Self {
            name: name.into(),
            dates,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Date-indexed table with one f64 column per instrument.
///
/// Dates are strictly increasing. Columns are kept in name order, which is
/// also the ticker order used downstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WideFrame {
    dates: Vec<NaiveDate>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl WideFrame {
    pub fn new(dates: Vec<NaiveDate>) -> Result<Self, LabError> {
        if let Some(pair) = dates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(LabError::Validation(format!(
                "date index must be strictly increasing (found {} before {})",
                pair[0], pair[1]
            )));
        }
        Ok(Self {
            dates,
            columns: BTreeMap::new(),
        })
    }

    pub fn from_columns(
        dates: Vec<NaiveDate>,
        columns: BTreeMap<String, Vec<f64>>,
    ) -> Result<Self, LabError> {
        let mut frame = Self::new(dates)?;
        for (name, values) in columns {
            frame.insert_column(name, values)?;
        }
        Ok(frame)
    }

    /// Builds a frame over the union of observation dates; gaps become NaN.
    /// When a symbol repeats a date, the later observation wins.
    pub fn from_observations(observations: &BTreeMap<String, Vec<(NaiveDate, f64)>>) -> Self {
        let dates: Vec<NaiveDate> = observations
            .values()
            .flat_map(|obs| obs.iter().map(|(d, _)| *d))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let position: BTreeMap<NaiveDate, usize> =
            dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

        let mut columns = BTreeMap::new();
        for (name, obs) in observations {
            let mut values = vec![f64::NAN; dates.len()];
            for (date, value) in obs {
                values[position[date]] = *value;
            }
            columns.insert(name.clone(), values);
        }
        Self { dates, columns }
    }

    pub fn insert_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<(), LabError> {
        let name = name.into();
        if values.len() != self.dates.len() {
            return Err(LabError::Validation(format!(
                "column `{}` has {} values but the index has {} dates",
                name,
                values.len(),
                self.dates.len()
            )));
        }
        self.columns.insert(name, values);
        Ok(())
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Projects onto `names`; any name not present is a `MissingColumn` error.
    pub fn select(&self, names: &[String], source_name: &str) -> Result<WideFrame, LabError> {
        let mut columns = BTreeMap::new();
        for name in names {
            let values = self
                .columns
                .get(name)
                .ok_or_else(|| LabError::missing_column(name.clone(), source_name))?;
            columns.insert(name.clone(), values.clone());
        }
        Ok(WideFrame {
            dates: self.dates.clone(),
            columns,
        })
    }

    pub fn series(&self, name: &str, source_name: &str) -> Result<Series, LabError> {
        let values = self
            .column(name)
            .ok_or_else(|| LabError::missing_column(name, source_name))?;
        Ok(Series::new(name, self.dates.clone(), values.to_vec()))
    }

    /// Keeps only the rows at `rows` (ascending positions).
    pub fn take_rows(&self, rows: &[usize]) -> WideFrame {
        let dates = rows.iter().map(|&i| self.dates[i]).collect();
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| (name.clone(), rows.iter().map(|&i| values[i]).collect()))
            .collect();
        WideFrame { dates, columns }
    }

    /// Applies `f` to every column, keeping the index.
    pub fn map_columns(&self, f: impl Fn(&[f64]) -> Vec<f64>) -> WideFrame {
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| (name.clone(), f(values)))
            .collect();
        WideFrame {
            dates: self.dates.clone(),
            columns,
        }
    }
}
