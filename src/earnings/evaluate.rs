use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;

use crate::artifacts::{ensure_parent, nan_as_empty, write_csv};
use crate::earnings::spec::LookaheadMode;
use crate::earnings::table::{ForecastRow, ForecastTable, HorizonCells};
use crate::error::LabError;

pub const COMPARISON_CSV: &str = "mse_comparison_table.csv";
pub const COMPARISON_MD: &str = "mse_comparison_table.md";
pub const IMPROVEMENT_CSV: &str = "mse_improvement.csv";
pub const SUMMARY_TXT: &str = "summary.txt";

pub fn comparison_file_name(mode: LookaheadMode) -> String {
    format!("NN_vs_RF_MSE_{}.csv", mode.tag())
}

/// Per-horizon average of monthly cross-sectional MSE.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MseComparisonRow {
    pub horizon: String,
    #[serde(rename = "MSE_Analyst", serialize_with = "nan_as_empty")]
    pub mse_analyst: f64,
    #[serde(rename = "MSE_RF", serialize_with = "nan_as_empty")]
    pub mse_rf: f64,
    #[serde(rename = "MSE_NN", serialize_with = "nan_as_empty")]
    pub mse_nn: f64,
    #[serde(rename = "NN_minus_RF", serialize_with = "nan_as_empty")]
    pub nn_minus_rf: f64,
    #[serde(rename = "RF_minus_Analyst", serialize_with = "nan_as_empty")]
    pub rf_minus_analyst: f64,
    #[serde(rename = "NN_minus_Analyst", serialize_with = "nan_as_empty")]
    pub nn_minus_analyst: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImprovementRow {
    pub horizon: String,
    #[serde(serialize_with = "nan_as_empty")]
    pub pct_improvement_nn_vs_rf: f64,
}

/// Cross-sectional mean of squared errors per month for one horizon.
///
/// `pick` selects the forecast being scored; rows where it or the realized
/// value is missing are ignored.
pub fn monthly_mse_by(
    table: &ForecastTable,
    horizon: &str,
    pick: impl Fn(&HorizonCells) -> f64,
) -> Result<BTreeMap<NaiveDate, f64>, LabError> {
    let slot = table.horizon_index(horizon).ok_or_else(|| {
        LabError::missing_column(format!("{}_{horizon}", table.prefix), format!("{} forecasts", table.prefix))
    })?;
    let mut sums: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for row in &table.rows {
        let cells = &row.cells[slot];
        let pred = pick(cells);
        if !pred.is_finite() || !cells.ae.is_finite() {
            continue;
        }
        let entry = sums.entry(row.year_month).or_insert((0.0, 0));
        entry.0 += (pred - cells.ae).powi(2);
        entry.1 += 1;
    }
    Ok(sums
        .into_iter()
        .map(|(month, (sum, n))| (month, sum / n as f64))
        .collect())
}

/// Monthly MSE of the table's own model forecasts.
pub fn monthly_mse(table: &ForecastTable, horizon: &str) -> Result<BTreeMap<NaiveDate, f64>, LabError> {
    monthly_mse_by(table, horizon, |c| c.pred)
}

fn mean_of(values: &BTreeMap<NaiveDate, f64>) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.values().sum::<f64>() / values.len() as f64
}

fn restrict(table: &ForecastTable, keys: &BTreeSet<(i64, NaiveDate)>) -> ForecastTable {
    let rows: Vec<ForecastRow> = table
        .rows
        .iter()
        .filter(|r| keys.contains(&(r.permno, r.year_month)))
        .cloned()
        .collect();
    ForecastTable {
        prefix: table.prefix.clone(),
        horizons: table.horizons.clone(),
        rows,
    }
}

/// Compares network, random forest and analyst forecasts on the firm-months
/// both model tables cover. The analyst benchmark is scored from the random
/// forest table.
pub fn summarize_mse_comparison(
    rf: &ForecastTable,
    nn: &ForecastTable,
) -> Result<Vec<MseComparisonRow>, LabError> {
    let nn_keys: BTreeSet<(i64, NaiveDate)> = nn.rows.iter().map(|r| (r.permno, r.year_month)).collect();
    let common: BTreeSet<(i64, NaiveDate)> = rf
        .rows
        .iter()
        .map(|r| (r.permno, r.year_month))
        .filter(|k| nn_keys.contains(k))
        .collect();
    let rf = restrict(rf, &common);
    let nn = restrict(nn, &common);
    tracing::info!(common_rows = common.len(), "aligned forecast tables");

    nn.horizons
        .iter()
        .map(|h| {
            let mse_rf = mean_of(&monthly_mse(&rf, h)?);
            let mse_nn = mean_of(&monthly_mse(&nn, h)?);
            let mse_analyst = mean_of(&monthly_mse_by(&rf, h, |c| c.af)?);
            Ok(MseComparisonRow {
                horizon: h.clone(),
                mse_analyst,
                mse_rf,
                mse_nn,
                nn_minus_rf: mse_nn - mse_rf,
                rf_minus_analyst: mse_rf - mse_analyst,
                nn_minus_analyst: mse_nn - mse_analyst,
            })
        })
        .collect()
}

/// Relative MSE reduction of the network over the random forest.
pub fn percent_improvement(rows: &[MseComparisonRow]) -> Vec<ImprovementRow> {
    rows.iter()
        .map(|r| ImprovementRow {
            horizon: r.horizon.clone(),
            pct_improvement_nn_vs_rf: if r.mse_rf > 0.0 {
                (r.mse_rf - r.mse_nn) / r.mse_rf
            } else {
                f64::NAN
            },
        })
        .collect()
}

fn md_value(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        "nan".to_string()
    }
}

fn md_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format!("| {} |", headers.join(" | ")));
    lines.push(format!(
        "| {} |",
        headers.iter().map(|_| "---").collect::<Vec<_>>().join(" | ")
    ));
    for row in rows {
        lines.push(format!("| {} |", row.join(" | ")));
    }
    lines.join("\n")
}

pub fn render_comparison_markdown(
    mode: LookaheadMode,
    rows: &[MseComparisonRow],
    improvement: &[ImprovementRow],
) -> String {
    let main: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            vec![
                r.horizon.clone(),
                md_value(r.mse_analyst),
                md_value(r.mse_rf),
                md_value(r.mse_nn),
                md_value(r.nn_minus_rf),
                md_value(r.rf_minus_analyst),
                md_value(r.nn_minus_analyst),
            ]
        })
        .collect();
    let imp: Vec<Vec<String>> = improvement
        .iter()
        .map(|r| vec![r.horizon.clone(), md_value(r.pct_improvement_nn_vs_rf)])
        .collect();

    let mut out = String::new();
    let _ = write!(out, "# MSE Comparison ({})\n\n", mode.tag());
    out.push_str(&md_table(
        &[
            "horizon",
            "MSE_Analyst",
            "MSE_RF",
            "MSE_NN",
            "NN_minus_RF",
            "RF_minus_Analyst",
            "NN_minus_Analyst",
        ],
        &main,
    ));
    out.push_str("\n\n## Percent Improvement (NN vs RF)\n\n");
    out.push_str(&md_table(&["horizon", "pct_improvement_nn_vs_rf"], &imp));
    out.push('\n');
    out
}

pub fn render_run_summary(nn: &ForecastTable) -> String {
    let (min, max) = match nn.month_range() {
        Some((min, max)) => (min.to_string(), max.to_string()),
        None => ("n/a".to_string(), "n/a".to_string()),
    };
    let analyst = nn
        .rows
        .iter()
        .any(|r| r.cells.iter().any(|c| c.af.is_finite()));
    format!(
        "min_YearMonth: {min}\nmax_YearMonth: {max}\nforecasted_rows: {}\nanalyst_forecasts_available: {}\n",
        nn.len(),
        if analyst { "yes" } else { "no" }
    )
}

fn write_text(path: &Path, body: &str) -> Result<()> {
    ensure_parent(path)?;
    std::fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

/// Writes the comparison, improvement and summary artifacts into `out_dir`.
pub fn write_evaluation(
    out_dir: &Path,
    mode: LookaheadMode,
    rows: &[MseComparisonRow],
    nn: &ForecastTable,
) -> Result<Vec<PathBuf>> {
    let improvement = percent_improvement(rows);
    let paths = [
        out_dir.join(comparison_file_name(mode)),
        out_dir.join(COMPARISON_CSV),
        out_dir.join(IMPROVEMENT_CSV),
        out_dir.join(COMPARISON_MD),
        out_dir.join(SUMMARY_TXT),
    ];
    write_csv(&paths[0], rows)?;
    write_csv(&paths[1], rows)?;
    write_csv(&paths[2], &improvement)?;
    write_text(&paths[3], &render_comparison_markdown(mode, rows, &improvement))?;
    write_text(&paths[4], &render_run_summary(nn))?;
    Ok(paths.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::earnings::panel::month_end;

    fn me(m: u32) -> NaiveDate {
        month_end(NaiveDate::from_ymd_opt(2001, m, 1).unwrap())
    }

    fn row(permno: i64, m: u32, pred: f64, af: f64, ae: f64) -> ForecastRow {
        ForecastRow {
            permno,
            year_month: me(m),
            cells: vec![HorizonCells { pred, af, ae }],
        }
    }

    fn table(prefix: &str, rows: Vec<ForecastRow>) -> ForecastTable {
        ForecastTable {
            prefix: prefix.to_string(),
            horizons: vec!["q1".to_string()],
            rows,
        }
    }

    #[test]
    fn monthly_mse_averages_within_month_then_skips_missing() {
        let t = table(
            "NN",
            vec![row(1, 1, 1.0, 0.0, 0.0), row(2, 1, 3.0, 0.0, 0.0), row(3, 2, f64::NAN, 0.0, 0.0)],
        );
        let mse = monthly_mse(&t, "q1").unwrap();
        assert_eq!(mse.len(), 1);
        assert_eq!(mse[&me(1)], 5.0);
        assert!(monthly_mse(&t, "y2").is_err());
    }

    #[test]
    fn comparison_uses_common_keys_and_rf_analyst() {
        let rf = table("RF", vec![row(1, 1, 1.0, 2.0, 0.0), row(9, 1, 100.0, 100.0, 0.0)]);
        let nn = table("NN", vec![row(1, 1, 0.5, f64::NAN, 0.0), row(2, 1, 9.0, 9.0, 0.0)]);
        let out = summarize_mse_comparison(&rf, &nn).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mse_rf, 1.0);
        assert_eq!(out[0].mse_nn, 0.25);
        assert_eq!(out[0].mse_analyst, 4.0);
        assert_eq!(out[0].nn_minus_rf, -0.75);
        let imp = percent_improvement(&out);
        assert_eq!(imp[0].pct_improvement_nn_vs_rf, 0.75);
    }

    #[test]
    fn markdown_uses_spaced_separators() {
        let md = render_comparison_markdown(LookaheadMode::WithoutLookahead, &[], &[]);
        assert!(md.starts_with("# MSE Comparison (woLAB)\n\n| horizon | MSE_Analyst"));
        assert!(md.contains("| --- | --- |"));
        assert!(md.contains("## Percent Improvement (NN vs RF)"));
    }
}
