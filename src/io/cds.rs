use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use chrono::NaiveDate;

use crate::error::LabError;
use crate::io::table::{parse_date, parse_number, read_table, RawTable, TableFormat};

pub const EXPECTED_TENOR: &str = "5Y";
pub const EXPECTED_CURRENCY: &str = "USD";

const SOURCE_NAME: &str = "CDS input";

#[derive(Debug, Clone, PartialEq)]
pub struct CdsQuote {
    pub date: NaiveDate,
    pub ticker: String,
    pub tenor: String,
    pub currency: String,
    pub parspread: f64,
}

/// Loads tab-delimited CDS quotes sorted by (date, ticker).
///
/// The file must hold a single tenor (`5Y`) and a single currency (`USD`).
pub fn load_cds(path: &Path) -> Result<Vec<CdsQuote>> {
    if !path.exists() {
        return Err(LabError::MissingInput(path.to_path_buf()).into());
    }
    let table = read_table(path, TableFormat::Tsv)?;
    let quotes = quotes_from_table(&table)?;

    check_single_value(quotes.iter().map(|q| q.tenor.as_str()), EXPECTED_TENOR, "tenor")?;
    check_single_value(
        quotes.iter().map(|q| q.currency.as_str()),
        EXPECTED_CURRENCY,
        "currency",
    )?;

    tracing::info!(
        path = %path.display(),
        rows = quotes.len(),
        tickers = tickers(&quotes).len(),
        "loaded CDS quotes"
    );
    Ok(quotes)
}

fn quotes_from_table(table: &RawTable) -> Result<Vec<CdsQuote>, LabError> {
    let date_col = table.require_column("date", SOURCE_NAME)?;
    let ticker_col = table.require_column("ticker", SOURCE_NAME)?;
    let tenor_col = table.require_column("tenor", SOURCE_NAME)?;
    let currency_col = table.require_column("currency", SOURCE_NAME)?;
    let spread_col = table.require_column("parspread", SOURCE_NAME)?;

    let mut quotes = Vec::with_capacity(table.len());
    for row in 0..table.len() {
        let raw_date = table.cell(row, date_col);
        let date = parse_date(raw_date).ok_or_else(|| {
            LabError::Validation(format!("unparseable CDS date `{raw_date}` on row {}", row + 1))
        })?;
        quotes.push(CdsQuote {
            date,
            ticker: table.cell(row, ticker_col).to_string(),
            tenor: table.cell(row, tenor_col).to_string(),
            currency: table.cell(row, currency_col).to_string(),
            parspread: parse_number(table.cell(row, spread_col)),
        });
    }
    quotes.sort_by(|a, b| (a.date, &a.ticker).cmp(&(b.date, &b.ticker)));
    Ok(quotes)
}

fn check_single_value<'a>(
    values: impl Iterator<Item = &'a str>,
    expected: &str,
    what: &str,
) -> Result<(), LabError> {
    let distinct: BTreeSet<&str> = values.collect();
    match distinct.len() {
        1 if distinct.contains(expected) => Ok(()),
        _ => Err(LabError::Validation(format!(
            "expected only {expected} {what}, found {:?}",
            distinct
        ))),
    }
}

/// Distinct tickers in sorted order.
pub fn tickers(quotes: &[CdsQuote]) -> Vec<String> {
    quotes
        .iter()
        .map(|q| q.ticker.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
