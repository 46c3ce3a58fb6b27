use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::metrics::{quantile, WeeklyGap};
use crate::model::Panel;
use crate::robustness::RobustnessRow;

pub const ROLLING_RMSE_FILE: &str = "rolling_rmse.png";
pub const ERROR_GAP_FILE: &str = "error_gap.png";
pub const TAIL_QQ_FILE: &str = "tail_qq.png";
pub const DELTA_RMSE_HEATMAP_FILE: &str = "delta_rmse_heatmap.png";
pub const STABILITY_HEATMAP_FILE: &str = "stability_heatmap.png";

/// Trailing mean over `window` values; NaN until a full window of finite values exists.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    assert!(window > 0, "rolling window must be > 0");
    let mut out = vec![f64::NAN; values.len()];
    for i in (window - 1)..values.len() {
        let slice = &values[i + 1 - window..=i];
        if slice.iter().all(|v| v.is_finite()) {
            out[i] = slice.iter().sum::<f64>() / window as f64;
        }
    }
    out
}

/// Paired error quantiles at 1%..99% for boxcar (x) and EW (y).
///
/// Empty when either model has no finite errors.
pub fn error_quantile_pairs(panel: &Panel) -> Vec<(f64, f64)> {
    let boxcar = panel.column(|r| r.q_boxcar);
    let ew = panel.column(|r| r.q_ew);
    if !boxcar.iter().any(|v| v.is_finite()) || !ew.iter().any(|v| v.is_finite()) {
        return Vec::new();
    }
    (1..=99)
        .map(|k| {
            let q = k as f64 / 100.0;
            (quantile(&boxcar, q), quantile(&ew, q))
        })
        .collect()
}

/// Sweep values pivoted to rows = windows, columns = half-lives (both ascending).
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapGrid {
    pub windows: Vec<usize>,
    pub half_lives: Vec<f64>,
    pub values: Vec<Vec<f64>>,
}

pub fn heatmap_grid(rows: &[RobustnessRow], pick: impl Fn(&RobustnessRow) -> f64) -> HeatmapGrid {
    let mut windows: Vec<usize> = rows.iter().map(|r| r.window).collect();
    windows.sort_unstable();
    windows.dedup();
    let mut half_lives: Vec<f64> = rows.iter().map(|r| r.half_life).collect();
    half_lives.sort_by(|a, b| a.total_cmp(b));
    half_lives.dedup();

    let mut values = vec![vec![f64::NAN; half_lives.len()]; windows.len()];
    for row in rows {
        let i = windows.iter().position(|w| *w == row.window);
        let j = half_lives.iter().position(|h| *h == row.half_life);
        if let (Some(i), Some(j)) = (i, j) {
            values[i][j] = pick(row);
        }
    }
    HeatmapGrid {
        windows,
        half_lives,
        values,
    }
}

/// Renders every chart into `out_dir`. Returns the files written.
#[cfg(feature = "charts")]
pub fn render_all(
    out_dir: &Path,
    panel: &Panel,
    weekly: &[WeeklyGap],
    sweep: Option<&[RobustnessRow]>,
    rolling_weeks: usize,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    let path = out_dir.join(ROLLING_RMSE_FILE);
    render::rolling_rmse(&path, weekly, rolling_weeks)?;
    written.push(path);

    let path = out_dir.join(ERROR_GAP_FILE);
    render::error_gap(&path, weekly)?;
    written.push(path);

    let pairs = error_quantile_pairs(panel);
    if !pairs.is_empty() {
        let path = out_dir.join(TAIL_QQ_FILE);
        render::tail_qq(&path, &pairs)?;
        written.push(path);
    }

    if let Some(rows) = sweep {
        let dir = out_dir.join("robustness");
        let path = dir.join(DELTA_RMSE_HEATMAP_FILE);
        render::heatmap(&path, &heatmap_grid(rows, |r| r.delta_rmse_vs_baseline), "delta_rmse_vs_baseline")?;
        written.push(path);
        let path = dir.join(STABILITY_HEATMAP_FILE);
        render::heatmap(&path, &heatmap_grid(rows, |r| r.stability_rank_corr), "stability_rank_corr")?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(not(feature = "charts"))]
pub fn render_all(
    _out_dir: &Path,
    _panel: &Panel,
    _weekly: &[WeeklyGap],
    _sweep: Option<&[RobustnessRow]>,
    _rolling_weeks: usize,
) -> Result<Vec<PathBuf>> {
    tracing::warn!("built without the `charts` feature; skipping chart rendering");
    Ok(Vec::new())
}

#[cfg(feature = "charts")]
mod render {
    use std::path::Path;

    use anyhow::{anyhow, Result};
    use plotters::prelude::*;

    use super::{rolling_mean, HeatmapGrid};
    use crate::artifacts::ensure_parent;
    use crate::metrics::WeeklyGap;

    const FONT: &str = "sans-serif";

    fn chart_err<E: std::fmt::Debug>(err: E) -> anyhow::Error {
        anyhow!("chart rendering failed: {err:?}")
    }

    fn finite_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
        let (lo, hi) = values
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        if !lo.is_finite() {
            return (-1.0, 1.0);
        }
        let pad = ((hi - lo) * 0.05).max(1e-9);
        (lo - pad, hi + pad)
    }

    /// Splits a series into runs of finite points so gaps are not bridged.
    fn finite_runs(values: &[f64]) -> Vec<Vec<(f64, f64)>> {
        let mut runs = Vec::new();
        let mut current = Vec::new();
        for (i, v) in values.iter().enumerate() {
            if v.is_finite() {
                current.push((i as f64, *v));
            } else if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            runs.push(current);
        }
        runs
    }

    fn date_label(weekly: &[WeeklyGap], x: f64) -> String {
        let idx = x.round();
        if idx < 0.0 {
            return String::new();
        }
        weekly
            .get(idx as usize)
            .map(|w| w.date.format("%Y-%m").to_string())
            .unwrap_or_default()
    }

    pub fn rolling_rmse(path: &Path, weekly: &[WeeklyGap], window: usize) -> Result<()> {
        ensure_parent(path)?;
        let boxcar: Vec<f64> = weekly.iter().map(|w| w.rmse_boxcar).collect();
        let ew: Vec<f64> = weekly.iter().map(|w| w.rmse_ew).collect();
        let boxcar = rolling_mean(&boxcar, window);
        let ew = rolling_mean(&ew, window);
        let (y0, y1) = finite_range(boxcar.iter().chain(ew.iter()).copied());
        let x1 = weekly.len().max(2) as f64 - 1.0;

        let root = BitMapBackend::new(path, (1100, 500)).into_drawing_area();
        root.fill(&WHITE).map_err(chart_err)?;
        let mut chart = ChartBuilder::on(&root)
            .caption(format!("Rolling pooled RMSE ({window}-week mean)"), (FONT, 20))
            .margin(12)
            .x_label_area_size(32)
            .y_label_area_size(64)
            .build_cartesian_2d(0.0..x1, y0..y1)
            .map_err(chart_err)?;
        chart
            .configure_mesh()
            .x_labels(10)
            .x_label_formatter(&|x| date_label(weekly, *x))
            .draw()
            .map_err(chart_err)?;

        for (name, values, color) in [("Boxcar", &boxcar, BLUE), ("EWLS", &ew, RED)] {
            let mut first = true;
            for run in finite_runs(values) {
                let series = chart
                    .draw_series(LineSeries::new(run, color.stroke_width(2)))
                    .map_err(chart_err)?;
                if first {
                    series
                        .label(name)
                        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
                    first = false;
                }
            }
        }
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(chart_err)?;
        root.present().map_err(chart_err)?;
        Ok(())
    }

    pub fn error_gap(path: &Path, weekly: &[WeeklyGap]) -> Result<()> {
        ensure_parent(path)?;
        let gap: Vec<f64> = weekly.iter().map(|w| w.gap_ew_minus_boxcar).collect();
        let (y0, y1) = finite_range(gap.iter().copied().chain(std::iter::once(0.0)));
        let x1 = weekly.len().max(2) as f64 - 1.0;

        let root = BitMapBackend::new(path, (1100, 400)).into_drawing_area();
        root.fill(&WHITE).map_err(chart_err)?;
        let mut chart = ChartBuilder::on(&root)
            .caption("Weekly pooled RMSE gap (EW - Boxcar)", (FONT, 20))
            .margin(12)
            .x_label_area_size(32)
            .y_label_area_size(64)
            .build_cartesian_2d(0.0..x1, y0..y1)
            .map_err(chart_err)?;
        chart
            .configure_mesh()
            .x_labels(10)
            .x_label_formatter(&|x| date_label(weekly, *x))
            .draw()
            .map_err(chart_err)?;
        for run in finite_runs(&gap) {
            chart
                .draw_series(LineSeries::new(run, BLUE.stroke_width(1)))
                .map_err(chart_err)?;
        }
        chart
            .draw_series(LineSeries::new(vec![(0.0, 0.0), (x1, 0.0)], BLACK.stroke_width(1)))
            .map_err(chart_err)?;
        root.present().map_err(chart_err)?;
        Ok(())
    }

    pub fn tail_qq(path: &Path, pairs: &[(f64, f64)]) -> Result<()> {
        ensure_parent(path)?;
        let (lo, hi) = finite_range(pairs.iter().flat_map(|(a, b)| [*a, *b]));

        let root = BitMapBackend::new(path, (600, 600)).into_drawing_area();
        root.fill(&WHITE).map_err(chart_err)?;
        let mut chart = ChartBuilder::on(&root)
            .caption("Tail comparison: error quantile-quantile", (FONT, 18))
            .margin(12)
            .x_label_area_size(40)
            .y_label_area_size(64)
            .build_cartesian_2d(lo..hi, lo..hi)
            .map_err(chart_err)?;
        chart
            .configure_mesh()
            .x_desc("Boxcar error quantiles")
            .y_desc("EWLS error quantiles")
            .draw()
            .map_err(chart_err)?;
        chart
            .draw_series(LineSeries::new(pairs.iter().copied(), BLUE.stroke_width(2)))
            .map_err(chart_err)?;
        chart
            .draw_series(LineSeries::new(vec![(lo, lo), (hi, hi)], BLACK.stroke_width(1)))
            .map_err(chart_err)?;
        root.present().map_err(chart_err)?;
        Ok(())
    }

    /// Diverging blue-white-red scale for `t` in `[0, 1]`.
    fn diverging(t: f64) -> RGBColor {
        let lerp = |a: u8, b: u8, s: f64| (a as f64 + (b as f64 - a as f64) * s).round() as u8;
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.5 };
        let (cold, mid, hot) = ((59, 76, 192), (221, 221, 221), (180, 4, 38));
        let (from, to, s) = if t < 0.5 {
            (cold, mid, t * 2.0)
        } else {
            (mid, hot, (t - 0.5) * 2.0)
        };
        RGBColor(lerp(from.0, to.0, s), lerp(from.1, to.1, s), lerp(from.2, to.2, s))
    }

    pub fn heatmap(path: &Path, grid: &HeatmapGrid, title: &str) -> Result<()> {
        ensure_parent(path)?;
        let rows = grid.windows.len().max(1);
        let cols = grid.half_lives.len().max(1);
        let (lo, hi) = finite_range(grid.values.iter().flatten().copied());

        let root = BitMapBackend::new(path, (700, 400)).into_drawing_area();
        root.fill(&WHITE).map_err(chart_err)?;
        let mut chart = ChartBuilder::on(&root)
            .caption(title, (FONT, 18))
            .margin(12)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(0.0..cols as f64, 0.0..rows as f64)
            .map_err(chart_err)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .x_labels(cols * 2 + 1)
            .y_labels(rows * 2 + 1)
            .x_label_formatter(&|x| {
                let frac = x.fract();
                let idx = x.floor() as usize;
                match grid.half_lives.get(idx) {
                    Some(h) if (frac - 0.5).abs() < 1e-6 => format!("{h}"),
                    _ => String::new(),
                }
            })
            .y_label_formatter(&|y| {
                let frac = y.fract();
                let idx = y.floor() as usize;
                match grid.windows.get(idx) {
                    Some(w) if (frac - 0.5).abs() < 1e-6 => format!("{w}"),
                    _ => String::new(),
                }
            })
            .x_desc("Half-life")
            .y_desc("Window")
            .draw()
            .map_err(chart_err)?;

        let span = hi - lo;
        let cells: Vec<(usize, usize, f64)> = grid
            .values
            .iter()
            .enumerate()
            .flat_map(|(i, row)| row.iter().enumerate().map(move |(j, v)| (i, j, *v)))
            .collect();
        chart
            .draw_series(cells.iter().map(|&(i, j, v)| {
                let t = if span > 0.0 { (v - lo) / span } else { 0.5 };
                Rectangle::new(
                    [(j as f64, i as f64), (j as f64 + 1.0, i as f64 + 1.0)],
                    diverging(t).filled(),
                )
            }))
            .map_err(chart_err)?;
        chart
            .draw_series(cells.iter().map(|&(i, j, v)| {
                let label = if v.is_finite() { format!("{v:.4}") } else { "nan".to_string() };
                Text::new(label, (j as f64 + 0.4, i as f64 + 0.5), (FONT, 13).into_font())
            }))
            .map_err(chart_err)?;
        root.present().map_err(chart_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_mean_waits_for_full_window() {
        let out = rolling_mean(&[1.0, 2.0, 3.0, f64::NAN, 5.0], 2);
        assert!(out[0].is_nan());
        assert_eq!(out[1], 1.5);
        assert_eq!(out[2], 2.5);
        assert!(out[3].is_nan());
        assert!(out[4].is_nan());
    }

    #[test]
    fn heatmap_grid_pivots_sorted_axes() {
        let row = |window, half_life, v| RobustnessRow {
            window,
            half_life,
            ew_rmse: v,
            ew_oos_r2: 0.0,
            delta_rmse_vs_baseline: v,
            delta_r2_vs_baseline: 0.0,
            stability_rank_corr: 1.0,
        };
        let rows = vec![row(26, 8.0, 3.0), row(12, 20.0, 2.0), row(12, 8.0, 1.0)];
        let grid = heatmap_grid(&rows, |r| r.delta_rmse_vs_baseline);
        assert_eq!(grid.windows, vec![12, 26]);
        assert_eq!(grid.half_lives, vec![8.0, 20.0]);
        assert_eq!(grid.values[0], vec![1.0, 2.0]);
        assert_eq!(grid.values[1][0], 3.0);
        assert!(grid.values[1][1].is_nan());
    }
}
