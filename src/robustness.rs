use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::artifacts::{nan_as_empty, write_csv};
use crate::config::Config;
use crate::metrics::{nan_rms, pooled_metrics, ModelKind};
use crate::model::Panel;
use crate::pipeline::{compute_panel, AlignedReturns, PanelParams};

pub const SWEEP_FILE: &str = "robustness_sweep.csv";

/// One (window, half-life) point of the sweep, measured on the EW model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobustnessRow {
    pub window: usize,
    pub half_life: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub ew_rmse: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub ew_oos_r2: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub delta_rmse_vs_baseline: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub delta_r2_vs_baseline: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub stability_rank_corr: f64,
}

/// Per ticker `rmse(q_ew) - rmse(q_boxcar)` over that ticker's finite errors.
pub fn ticker_rmse_gap(panel: &Panel) -> BTreeMap<String, f64> {
    panel
        .by_ticker()
        .into_iter()
        .map(|(ticker, rows)| {
            let ew = nan_rms(rows.iter().map(|r| r.q_ew));
            let boxcar = nan_rms(rows.iter().map(|r| r.q_boxcar));
            (ticker.to_string(), ew - boxcar)
        })
        .collect()
}

fn ew_summary(panel: &Panel) -> (f64, f64) {
    pooled_metrics(panel)
        .into_iter()
        .find(|row| row.model == ModelKind::Ew)
        .map(|row| (row.rmse, row.oos_r2))
        .unwrap_or((f64::NAN, f64::NAN))
}

/// Re-runs the panel over the configured window × half-life grid.
///
/// The factor-regression window stays at `boxcar_window`. Stability compares
/// each grid point's per-ticker gaps with the same window at the configured
/// half-life. Rows come back sorted by (window, half_life).
pub fn run_robustness(config: &Config, returns: &AlignedReturns) -> Result<Vec<RobustnessRow>> {
    let base_params = config.panel_params();
    let build = |params: PanelParams| {
        compute_panel(&returns.cds, &returns.equity, &returns.market, params).with_context(|| {
            format!(
                "failed to build panel for window {} half-life {}",
                params.ew_window, params.ew_half_life
            )
        })
    };

    let baseline = build(base_params)?;
    let (base_rmse, base_r2) = ew_summary(&baseline);

    let mut rows = Vec::new();
    for &window in &config.robustness.windows {
        let window_base = build(PanelParams {
            ew_window: window,
            ..base_params
        })?;
        let base_gaps = ticker_rmse_gap(&window_base);

        for &half_life in &config.robustness.half_lives {
            let panel = build(PanelParams {
                ew_window: window,
                ew_half_life: half_life,
                ..base_params
            })?;
            let (ew_rmse, ew_r2) = ew_summary(&panel);
            let gaps = ticker_rmse_gap(&panel);
            let (a, b): (Vec<f64>, Vec<f64>) = gaps
                .iter()
                .filter_map(|(ticker, gap)| base_gaps.get(ticker).map(|base| (*gap, *base)))
                .unzip();
            let stability = spearman(&a, &b);
            tracing::debug!(window, half_life, ew_rmse, stability, "robustness grid point");
            rows.push(RobustnessRow {
                window,
                half_life,
                ew_rmse,
                ew_oos_r2: ew_r2,
                delta_rmse_vs_baseline: ew_rmse - base_rmse,
                delta_r2_vs_baseline: ew_r2 - base_r2,
                stability_rank_corr: stability,
            });
        }
    }
    rows.sort_by(|a, b| {
        a.window
            .cmp(&b.window)
            .then_with(|| a.half_life.total_cmp(&b.half_life))
    });
    Ok(rows)
}

pub fn write_robustness(dir: &Path, rows: &[RobustnessRow]) -> Result<()> {
    write_csv(&dir.join(SWEEP_FILE), rows)
}

/// Ranks starting at 1; tied values share the average of their ranks.
pub fn rank_average(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let avg = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = avg;
        }
        start = end;
    }
    ranks
}

pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return f64::NAN;
    }
    let ma = a[..n].iter().sum::<f64>() / n as f64;
    let mb = b[..n].iter().sum::<f64>() / n as f64;
    let (mut cov, mut va, mut vb) = (0.0, 0.0, 0.0);
    for i in 0..n {
        let (da, db) = (a[i] - ma, b[i] - mb);
        cov += da * db;
        va += da * da;
        vb += db * db;
    }
    if va <= 0.0 || vb <= 0.0 {
        return f64::NAN;
    }
    cov / (va * vb).sqrt()
}

/// Spearman correlation over pairs where both values are finite.
pub fn spearman(a: &[f64], b: &[f64]) -> f64 {
    let (fa, fb): (Vec<f64>, Vec<f64>) = a
        .iter()
        .zip(b)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .unzip();
    pearson(&rank_average(&fa), &rank_average(&fb))
}
