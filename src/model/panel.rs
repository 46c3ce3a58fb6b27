use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::artifacts::nan_as_empty;

/// One (date, ticker) row of the decomposition panel. Undefined values are NaN.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelRow {
    pub date: NaiveDate,
    pub ticker: String,
    #[serde(serialize_with = "nan_as_empty")]
    pub r_cds: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub r_equity: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub m: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub r_index: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub gamma: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub beta_equity: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub beta_index: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub f: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub rho: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub c: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub mu_boxcar: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub mu_ew: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub pred_boxcar: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub pred_ew: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub q_boxcar: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub q_ew: f64,
}

/// Long-format panel: rows grouped by ticker, dates ascending within a ticker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Panel {
    rows: Vec<PanelRow>,
}

impl Panel {
    pub fn new(rows: Vec<PanelRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[PanelRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct tickers, sorted.
    pub fn tickers(&self) -> Vec<String> {
        self.by_ticker().into_keys().map(str::to_string).collect()
    }

    pub fn by_ticker(&self) -> BTreeMap<&str, Vec<&PanelRow>> {
        let mut groups: BTreeMap<&str, Vec<&PanelRow>> = BTreeMap::new();
        for row in &self.rows {
            groups.entry(row.ticker.as_str()).or_default().push(row);
        }
        groups
    }

    pub fn by_date(&self) -> BTreeMap<NaiveDate, Vec<&PanelRow>> {
        let mut groups: BTreeMap<NaiveDate, Vec<&PanelRow>> = BTreeMap::new();
        for row in &self.rows {
            groups.entry(row.date).or_default().push(row);
        }
        groups
    }

    pub fn ticker_rows<'a>(&'a self, ticker: &'a str) -> impl Iterator<Item = &'a PanelRow> + 'a {
        self.rows.iter().filter(move |r| r.ticker == ticker)
    }

    pub fn column(&self, pick: impl Fn(&PanelRow) -> f64) -> Vec<f64> {
        self.rows.iter().map(pick).collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.by_date().into_keys().collect()
    }
}
