use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use url::Url;

use super::PriceHistorySource;

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Blocking client for the public chart endpoint (`/v8/finance/chart/{symbol}`).
pub struct YahooChartClient {
    http: reqwest::blocking::Client,
    base_url: Url,
}

impl YahooChartClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid price feed base url `{base_url}`"))?;
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("basis-lab/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build price feed HTTP client")?;
        Ok(Self { http, base_url })
    }

    fn chart_url(&self, symbol: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("price feed base url cannot carry a path"))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", symbol]);
        Ok(url)
    }
}

impl PriceHistorySource for YahooChartClient {
    fn daily_adj_close(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>> {
        let period1 = start.and_hms_opt(0, 0, 0).map(|t| t.and_utc().timestamp()).unwrap_or(0);
        let period2 = end
            .and_hms_opt(23, 59, 59)
            .map(|t| t.and_utc().timestamp())
            .unwrap_or(period1);
        let url = self.chart_url(symbol)?;
        let p1 = period1.to_string();
        let p2 = period2.to_string();

        let root: Value = self
            .http
            .get(url)
            .query(&[
                ("period1", p1.as_str()),
                ("period2", p2.as_str()),
                ("interval", "1d"),
                ("events", "div,splits"),
            ])
            .send()
            .context("price feed HTTP request failed")?
            .error_for_status()
            .context("price feed returned error status")?
            .json()
            .context("price feed JSON parse failed")?;

        let mut points = parse_chart_payload(&root)?;
        points.retain(|(date, _)| *date >= start && *date <= end);
        Ok(points)
    }
}

/// Extracts (local trading date, adjusted close) pairs from a chart payload.
///
/// Adjusted close is used where present, plain close otherwise. Null prices
/// are skipped. Dates are shifted by the exchange `gmtoffset`.
pub fn parse_chart_payload(root: &Value) -> Result<Vec<(NaiveDate, f64)>> {
    let chart = root.get("chart").context("chart payload missing `chart`")?;
    if let Some(err) = chart.get("error").filter(|e| !e.is_null()) {
        let description = err
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("price feed error: {description}");
    }
    let Some(result) = chart
        .get("result")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
    else {
        return Ok(Vec::new());
    };

    let offset = result
        .get("meta")
        .and_then(|m| m.get("gmtoffset"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let timestamps = result
        .get("timestamp")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let indicators = result.get("indicators");
    let adjclose = indicators
        .and_then(|i| i.get("adjclose"))
        .and_then(|a| a.get(0))
        .and_then(|a| a.get("adjclose"))
        .and_then(Value::as_array);
    let close = indicators
        .and_then(|i| i.get("quote"))
        .and_then(|q| q.get(0))
        .and_then(|q| q.get("close"))
        .and_then(Value::as_array);
    let prices = match (adjclose, close) {
        (Some(adj), _) => adj,
        (None, Some(close)) => close,
        (None, None) => return Ok(Vec::new()),
    };

    let mut points = Vec::with_capacity(timestamps.len());
    for (ts, price) in timestamps.iter().zip(prices.iter()) {
        let (Some(ts), Some(price)) = (ts.as_i64(), price.as_f64()) else {
            continue;
        };
        let Some(local) = DateTime::from_timestamp(ts + offset, 0) else {
            continue;
        };
        points.push((local.date_naive(), price));
    }
    points.sort_by_key(|(date, _)| *date);
    points.dedup_by_key(|(date, _)| *date);
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_adjusted_close_and_skips_nulls() {
        let payload = json!({
            "chart": {
                "result": [{
                    "meta": {"gmtoffset": -18000},
                    "timestamp": [1704205800, 1704292200, 1704378600],
                    "indicators": {
                        "quote": [{"close": [10.0, 11.0, 12.0]}],
                        "adjclose": [{"adjclose": [9.5, null, 11.5]}]
                    }
                }],
                "error": null
            }
        });
        let points = parse_chart_payload(&payload).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], (NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), 9.5));
        assert_eq!(points[1].1, 11.5);
    }

    #[test]
    fn falls_back_to_close() {
        let payload = json!({
            "chart": {
                "result": [{
                    "timestamp": [1704205800],
                    "indicators": {"quote": [{"close": [10.0]}]}
                }]
            }
        });
        assert_eq!(parse_chart_payload(&payload).unwrap()[0].1, 10.0);
    }

    #[test]
    fn surfaces_feed_error() {
        let payload = json!({
            "chart": {"result": null, "error": {"code": "Not Found", "description": "No data found"}}
        });
        let err = parse_chart_payload(&payload).unwrap_err();
        assert!(err.to_string().contains("No data found"));
    }

    #[test]
    fn chart_url_appends_symbol_path() {
        let client = YahooChartClient::new("https://example.test/").unwrap();
        let url = client.chart_url("SPY").unwrap();
        assert_eq!(url.as_str(), "https://example.test/v8/finance/chart/SPY");
    }
}
