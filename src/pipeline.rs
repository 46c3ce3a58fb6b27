use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::Config;
use crate::error::LabError;
use crate::feed::PriceHistorySource;
use crate::io::{cds, equity};
use crate::model::{Panel, PanelRow, Series, WideFrame};
use crate::rolling::{rolling_ols_no_intercept, rolling_slope_boxcar, rolling_slope_ew};
use crate::transforms::{
    align_weekly_returns, cds_wide_parspread, resample_weekly_last, shift, simple_returns,
};

/// Window and decay settings for one panel build.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PanelParams {
    /// Window for the factor regressions (`gamma`, `beta_*`).
    pub boxcar_window: usize,
    /// Window for both basis slope estimators.
    pub ew_window: usize,
    pub ew_half_life: f64,
}

/// Mean of the finite values in each row; NaN for a row with none.
pub fn cross_sectional_mean(frame: &WideFrame) -> Vec<f64> {
    let mut sums = vec![0.0; frame.len()];
    let mut counts = vec![0usize; frame.len()];
    for (_, values) in frame.columns() {
        for (t, v) in values.iter().enumerate() {
            if v.is_finite() {
                sums[t] += v;
                counts[t] += 1;
            }
        }
    }
    sums.into_iter()
        .zip(counts)
        .map(|(s, n)| if n == 0 { f64::NAN } else { s / n as f64 })
        .collect()
}

/// Builds the per-ticker decomposition panel from aligned weekly returns.
///
/// Every coefficient at row `i` is fit on rows strictly before `i`, and the
/// basis prediction at `i` uses the slope fit at `i - 1` times `c[i - 1]`.
pub fn compute_panel(
    cds_ret: &WideFrame,
    eq_ret: &WideFrame,
    market_ret: &Series,
    params: PanelParams,
) -> Result<Panel, LabError> {
    if eq_ret.dates() != cds_ret.dates() || market_ret.dates.as_slice() != cds_ret.dates() {
        return Err(LabError::Validation(
            "CDS, equity and market returns must share one date index".to_string(),
        ));
    }
    let dates = cds_ret.dates();
    let m = market_ret.values.as_slice();
    let r_index = cross_sectional_mean(cds_ret);

    let mut rows = Vec::with_capacity(dates.len() * cds_ret.width());
    for (ticker, r_cds) in cds_ret.columns() {
        let r_equity = eq_ret
            .column(ticker)
            .ok_or_else(|| LabError::missing_column(ticker, "equity returns"))?;

        let gamma = rolling_ols_no_intercept(r_equity, &[m], params.boxcar_window).remove(0);
        let mut betas =
            rolling_ols_no_intercept(r_cds, &[r_equity, r_index.as_slice()], params.boxcar_window);
        let beta_index = betas.pop().unwrap_or_default();
        let beta_equity = betas.pop().unwrap_or_default();

        let n = dates.len();
        let f: Vec<f64> = (0..n)
            .map(|t| beta_equity[t] * r_equity[t] + beta_index[t] * r_index[t])
            .collect();
        let rho: Vec<f64> = (0..n).map(|t| r_cds[t] - f[t]).collect();
        let c: Vec<f64> = (0..n).map(|t| r_equity[t] - gamma[t] * m[t]).collect();

        let c_lag = shift(&c, 1);
        let mu_boxcar = rolling_slope_boxcar(&rho, &c_lag, params.ew_window);
        let mu_ew = rolling_slope_ew(&rho, &c_lag, params.ew_window, params.ew_half_life);
        let mu_boxcar_lag = shift(&mu_boxcar, 1);
        let mu_ew_lag = shift(&mu_ew, 1);

        for t in 0..n {
            let pred_boxcar = mu_boxcar_lag[t] * c_lag[t];
            let pred_ew = mu_ew_lag[t] * c_lag[t];
            rows.push(PanelRow {
                date: dates[t],
                ticker: ticker.to_string(),
                r_cds: r_cds[t],
                r_equity: r_equity[t],
                m: m[t],
                r_index: r_index[t],
                gamma: gamma[t],
                beta_equity: beta_equity[t],
                beta_index: beta_index[t],
                f: f[t],
                rho: rho[t],
                c: c[t],
                mu_boxcar: mu_boxcar[t],
                mu_ew: mu_ew[t],
                pred_boxcar,
                pred_ew,
                q_boxcar: rho[t] - pred_boxcar,
                q_ew: rho[t] - pred_ew,
            });
        }
    }
    Ok(Panel::new(rows))
}

/// Weekly return inputs shared by the baseline panel and the robustness sweep.
#[derive(Debug, Clone)]
pub struct AlignedReturns {
    pub cds: WideFrame,
    pub equity: WideFrame,
    pub market: Series,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub panel: Panel,
    pub returns: AlignedReturns,
    pub equity_origin: equity::EquityOrigin,
}

/// Loads inputs, resamples to weekly, aligns returns and builds the baseline panel.
pub fn run_pipeline(config: &Config, source: &dyn PriceHistorySource) -> Result<PipelineResult> {
    let (returns, equity_origin) = load_aligned_returns(config, source)?;
    let params = config.panel_params();
    let panel = compute_panel(&returns.cds, &returns.equity, &returns.market, params)
        .context("failed to build the basis panel")?;
    tracing::info!(
        rows = panel.len(),
        tickers = returns.cds.width(),
        weeks = returns.cds.len(),
        boxcar_window = params.boxcar_window,
        ew_window = params.ew_window,
        ew_half_life = params.ew_half_life,
        "basis panel computed"
    );
    Ok(PipelineResult {
        panel,
        returns,
        equity_origin,
    })
}

pub fn load_aligned_returns(
    config: &Config,
    source: &dyn PriceHistorySource,
) -> Result<(AlignedReturns, equity::EquityOrigin)> {
    let anchor = config.resample_weekday()?;
    let quotes = cds::load_cds(&config.cds_path())?;
    let tickers = cds::tickers(&quotes);
    let cds_px = cds_wide_parspread(&quotes)?;
    let (Some(start), Some(end)) = (cds_px.first_date(), cds_px.last_date()) else {
        return Err(LabError::Validation("CDS input has no quotes".to_string()).into());
    };

    let market_symbol = config.cds.market_symbol.clone();
    let symbols: Vec<String> = tickers
        .iter()
        .cloned()
        .chain(std::iter::once(market_symbol.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let (eq_px, origin) = equity::load_or_fetch_equity_adj_close(
        &config.equity_cache_path(),
        &symbols,
        start,
        end,
        source,
    )?;
    if eq_px.column(&market_symbol).is_none() {
        return Err(LabError::Validation(format!(
            "equity adjusted close data must include {market_symbol}"
        ))
        .into());
    }

    let cds_weekly = resample_weekly_last(&cds_px, anchor)?;
    let eq_weekly = resample_weekly_last(&eq_px, anchor)?;

    let cds_ret = simple_returns(&cds_weekly);
    let eq_ret = simple_returns(&eq_weekly.select(&tickers, "equity cache")?);
    let market_ret = simple_returns(&eq_weekly.select(&[market_symbol.clone()], "equity cache")?)
        .series(&market_symbol, "equity cache")?;

    let (cds, equity, market) = align_weekly_returns(&cds_ret, &eq_ret, &market_ret);
    tracing::info!(
        weeks = cds.len(),
        first = ?cds.first_date(),
        last = ?cds.last_date(),
        "weekly returns aligned"
    );
    Ok((
        AlignedReturns {
            cds,
            equity,
            market: Series::new("m", market.dates, market.values),
        },
        origin,
    ))
}
