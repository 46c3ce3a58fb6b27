pub mod yahoo;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::error::LabError;
use crate::model::WideFrame;

pub use yahoo::{parse_chart_payload, YahooChartClient};

/// A source of daily adjusted closing prices.
pub trait PriceHistorySource {
    /// Daily (date, adjusted close) observations in `[start, end]`, ascending.
    fn daily_adj_close(&self, symbol: &str, start: NaiveDate, end: NaiveDate)
        -> Result<Vec<(NaiveDate, f64)>>;
}

/// Fetches every symbol and lays the closes out as a date × symbol frame.
pub fn fetch_adj_close_frame(
    source: &dyn PriceHistorySource,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<WideFrame> {
    let mut observations = BTreeMap::new();
    for symbol in symbols {
        let closes = source
            .daily_adj_close(symbol, start, end)
            .with_context(|| format!("failed to fetch price history for {symbol}"))?;
        tracing::debug!(symbol = %symbol, points = closes.len(), "fetched price history");
        observations.insert(symbol.clone(), closes);
    }
    let frame = WideFrame::from_observations(&observations);
    if frame.is_empty() {
        return Err(LabError::EquityFetch(format!(
            "no prices returned for {} symbols between {start} and {end}",
            symbols.len()
        ))
        .into());
    }
    Ok(frame)
}
