use std::fmt::Write as _;

use crate::metrics::{PooledMetricsRow, WeeklyGap};
use crate::pipeline::PanelParams;
use crate::robustness::RobustnessRow;

/// GitHub-flavoured markdown table.
pub fn markdown_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "| {} |", headers.join(" | "));
    let _ = writeln!(
        out,
        "|{}|",
        headers.iter().map(|_| "---").collect::<Vec<_>>().join("|")
    );
    for row in rows {
        let _ = writeln!(out, "| {} |", row.join(" | "));
    }
    out
}

pub fn fmt_value(value: f64, decimals: usize) -> String {
    if value.is_finite() {
        format!("{value:.decimals$}")
    } else {
        "nan".to_string()
    }
}

pub struct SummaryInputs<'a> {
    pub params: PanelParams,
    pub tickers: usize,
    pub weeks: usize,
    pub pooled: &'a [PooledMetricsRow],
    pub events: &'a [WeeklyGap],
    pub sweep: Option<&'a [RobustnessRow]>,
    pub outputs: &'a [String],
}

/// Renders `summary.md`.
pub fn render_summary(inputs: &SummaryInputs<'_>) -> String {
    let mut out = String::new();
    out.push_str("# Predictive Regression Summary\n\n");
    let _ = writeln!(
        out,
        "{} tickers over {} weeks; factor window {}, slope window {}, EW half-life {}.\n",
        inputs.tickers,
        inputs.weeks,
        inputs.params.boxcar_window,
        inputs.params.ew_window,
        inputs.params.ew_half_life
    );

    out.push_str("## Pooled metrics\n\n");
    let rows: Vec<Vec<String>> = inputs
        .pooled
        .iter()
        .map(|r| {
            vec![
                r.model.label().to_string(),
                fmt_value(r.rmse, 6),
                fmt_value(r.oos_r2, 4),
                fmt_value(r.q01, 6),
                fmt_value(r.q99, 6),
                fmt_value(r.kurtosis, 3),
                fmt_value(r.rmse_delta_vs_boxcar, 6),
                r.n.to_string(),
            ]
        })
        .collect();
    out.push_str(&markdown_table(
        &["model", "rmse", "oos_r2", "q01", "q99", "kurtosis", "rmse_delta_vs_boxcar", "n"],
        &rows,
    ));

    if !inputs.events.is_empty() {
        out.push_str("\n## Largest weekly model gaps\n\n");
        let rows: Vec<Vec<String>> = inputs
            .events
            .iter()
            .map(|e| {
                vec![
                    e.date.to_string(),
                    fmt_value(e.rmse_boxcar, 6),
                    fmt_value(e.rmse_ew, 6),
                    fmt_value(e.gap_ew_minus_boxcar, 6),
                ]
            })
            .collect();
        out.push_str(&markdown_table(
            &["date", "rmse_boxcar", "rmse_ew", "gap_ew_minus_boxcar"],
            &rows,
        ));
    }

    if let Some(sweep) = inputs.sweep {
        out.push_str("\n## Robustness sweep\n\n");
        let rows: Vec<Vec<String>> = sweep
            .iter()
            .map(|r| {
                vec![
                    r.window.to_string(),
                    r.half_life.to_string(),
                    fmt_value(r.ew_rmse, 6),
                    fmt_value(r.delta_rmse_vs_baseline, 6),
                    fmt_value(r.stability_rank_corr, 3),
                ]
            })
            .collect();
        out.push_str(&markdown_table(
            &["window", "half_life", "ew_rmse", "delta_rmse_vs_baseline", "stability_rank_corr"],
            &rows,
        ));
    }

    out.push_str("\n## Generated outputs\n\n");
    for name in inputs.outputs {
        let _ = writeln!(out, "- {name}");
    }
    out.push_str(
        "\nSee event_windows.csv for the largest model gaps, and compare pooled and tail metrics between boxcar and EW.\n",
    );
    out
}
