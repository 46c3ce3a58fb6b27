use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use basis_lab::config::Config;
use basis_lab::earnings::evaluate::{summarize_mse_comparison, COMPARISON_MD, SUMMARY_TXT};
use basis_lab::earnings::panel::month_end;
use basis_lab::earnings::table::{read_forecast_table, write_forecast_table};
use basis_lab::earnings::{
    build_specs, run_earnings, run_mlp_forecasts, EarningsRun, ForecastSpec, LookaheadMode,
    MlpParams, TrainingPanel,
};
use chrono::{Datelike, Months, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn temp_dir(test_name: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be monotonic")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("basis-lab-{}-{}", test_name, ts));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn me(y: i32, m: u32) -> NaiveDate {
    month_end(NaiveDate::from_ymd_opt(y, m, 1).unwrap())
}

fn months_after(date: NaiveDate, n: u32) -> NaiveDate {
    month_end(date.with_day(1).unwrap().checked_add_months(Months::new(n)).unwrap())
}

fn tiny_params() -> MlpParams {
    MlpParams {
        hidden_layer_sizes: vec![4],
        batch_size: 16,
        max_iter: 5,
        ..MlpParams::default()
    }
}

fn spec(horizon: &str, lag: &str) -> ForecastSpec {
    ForecastSpec {
        horizon: horizon.to_string(),
        y_col: format!("y_{horizon}"),
        af_col: format!("af_{horizon}"),
        ann_date_col: lag.to_string(),
        x_cols: vec!["x1".to_string(), "x2".to_string()],
    }
}

/// 10 firms over 2000-01..2000-12; `ann_near` lands one month after the
/// panel month, `ann_far` three months after.
fn synthetic_panel() -> TrainingPanel {
    let mut rng = StdRng::seed_from_u64(11);
    let mut permno = Vec::new();
    let mut year_month = Vec::new();
    let mut cols: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut near = Vec::new();
    let mut far = Vec::new();
    for m in 1..=12 {
        for firm in 0..10 {
            let ym = me(2000, m);
            permno.push(10_000 + firm);
            year_month.push(ym);
            let x1: f64 = rng.gen_range(-1.0..1.0);
            let x2: f64 = rng.gen_range(-1.0..1.0);
            for (name, value) in [
                ("x1", x1),
                ("x2", x2),
                ("y_q1", 2.0 * x1 - x2),
                ("y_y1", x1 + x2),
                ("af_q1", 2.0 * x1),
                ("af_y1", f64::NAN),
            ] {
                cols.entry(name.to_string()).or_default().push(value);
            }
            near.push(Some(months_after(ym, 1)));
            far.push(Some(months_after(ym, 3)));
        }
    }
    let mut dates = BTreeMap::new();
    dates.insert("ann_near".to_string(), near);
    dates.insert("ann_far".to_string(), far);
    TrainingPanel::from_parts(permno, year_month, cols, dates).expect("consistent panel")
}

#[test]
/// Verifies the rolling forecasts cover every month from the start date,
/// sorted by month then firm, with realized and analyst values carried through.
fn rolling_forecasts_cover_test_months_in_order() {
    let panel = synthetic_panel();
    let specs = vec![spec("q1", "ann_near"), spec("y1", "ann_far")];
    let table = run_mlp_forecasts(&panel, &specs, &tiny_params(), 6, me(2000, 7), 0).unwrap();

    assert_eq!(table.prefix, "NN");
    assert_eq!(table.horizons, vec!["q1", "y1"]);
    assert_eq!(table.len(), 6 * 10);
    assert_eq!(table.month_range(), Some((me(2000, 7), me(2000, 12))));
    let keys: Vec<(NaiveDate, i64)> = table.rows.iter().map(|r| (r.year_month, r.permno)).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);

    let first = &table.rows[0];
    let row = panel
        .permno
        .iter()
        .zip(&panel.year_month)
        .position(|(&p, &ym)| p == first.permno && ym == first.year_month)
        .unwrap();
    let q1 = &first.cells[0];
    assert_eq!(q1.ae, panel.numeric("y_q1").unwrap()[row]);
    assert_eq!(q1.af, panel.numeric("af_q1").unwrap()[row]);
    assert!(q1.pred.is_finite());
    assert!(first.cells[1].af.is_nan());
}

#[test]
/// Verifies a horizon that never gets a training set is an error rather
/// than an empty column.
fn horizon_without_training_rows_is_an_error() {
    let panel = synthetic_panel();
    // announcements three months out never precede a month inside a one-month window
    let err = run_mlp_forecasts(&panel, &[spec("y1", "ann_far")], &tiny_params(), 1, me(2000, 7), 0)
        .unwrap_err();
    assert!(format!("{err:#}").contains("y1"));
}

#[test]
/// Verifies the written table reads back with the same keys and values, and
/// comparing a table against itself gives zero differences.
fn forecast_table_round_trips_and_self_compares() {
    let dir = temp_dir("earnings-table");
    let panel = synthetic_panel();
    let specs = vec![spec("q1", "ann_near")];
    let table = run_mlp_forecasts(&panel, &specs, &tiny_params(), 6, me(2000, 9), 0).unwrap();

    let path = dir.join("nn.csv");
    write_forecast_table(&path, &table).unwrap();
    let back = read_forecast_table(&path, "NN", &table.horizons).unwrap();
    assert_eq!(back.len(), table.len());
    for (a, b) in table.rows.iter().zip(&back.rows) {
        assert_eq!((a.permno, a.year_month), (b.permno, b.year_month));
        assert!((a.cells[0].pred - b.cells[0].pred).abs() < 1e-9);
        assert_eq!(a.cells[0].ae, b.cells[0].ae);
    }

    let rows = summarize_mse_comparison(&back, &table).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].nn_minus_rf.abs() < 1e-12);
    assert!(rows[0].mse_analyst.is_finite());
    let _ = std::fs::remove_dir_all(dir);
}

fn write_panel_csv(path: &Path, specs: &[ForecastSpec]) -> Vec<(i64, NaiveDate, BTreeMap<String, f64>)> {
    let mut numeric: Vec<String> = Vec::new();
    for spec in specs {
        for col in spec.numeric_columns() {
            if !numeric.contains(&col) {
                numeric.push(col);
            }
        }
    }
    let mut body = String::from("permno,YearMonth");
    for col in &numeric {
        let _ = write!(body, ",{col}");
    }
    for spec in specs {
        let _ = write!(body, ",{}", spec.ann_date_col);
    }
    body.push('\n');

    let mut rng = StdRng::seed_from_u64(5);
    let mut rows = Vec::new();
    for m in 1..=14u32 {
        let ym = months_after(me(2000, 1), m - 1);
        for firm in 0..8i64 {
            let mut values = BTreeMap::new();
            let _ = write!(body, "{},{}", 500 + firm, ym.format("%Y-%m-%d"));
            for col in &numeric {
                let v: f64 = rng.gen_range(-1.0..1.0);
                values.insert(col.clone(), v);
                let _ = write!(body, ",{v}");
            }
            for (k, _) in specs.iter().enumerate() {
                let ann = months_after(ym, 1 + (k as u32 % 2));
                let _ = write!(body, ",{}", ann.format("%Y-%m-%d"));
            }
            body.push('\n');
            rows.push((500 + firm, ym, values));
        }
    }
    std::fs::write(path, body).expect("write panel");
    rows
}

fn write_rf_csv(path: &Path, rows: &[(i64, NaiveDate, BTreeMap<String, f64>)], bias: f64) {
    let horizons = ["q1", "q2", "q3", "y1", "y2"];
    let mut body = String::from("permno,YearMonth");
    for h in horizons {
        let _ = write!(body, ",RF_{h},AF_{h},AE_{h}");
    }
    body.push('\n');
    for (permno, ym, values) in rows {
        let _ = write!(body, "{permno},{}", ym.format("%Y-%m-%d"));
        for h in horizons {
            let ae = values[&format!("EPS_true_{h}")];
            let af = values[&format!("EPS_ana_{h}")];
            let _ = write!(body, ",{},{af},{ae}", ae + bias);
        }
        body.push('\n');
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create rf dir");
    }
    std::fs::write(path, body).expect("write rf");
}

fn earnings_config(root: &Path, extra_earnings: &str) -> Config {
    let toml = format!(
        r#"
root = "{}"

[cds]
path = "unused.delim"
boxcar_window = 8
ew_window = 8
ew_half_life = 4.0

[equity]
cache_path = "unused.csv"

[robustness]
windows = [8]
half_lives = [4.0]

[output]
dir = "output"

[earnings]
panel_path = "panel.csv"
output_dir = "output/earnings"
verbose_every = 2
{extra_earnings}

[earnings.mlp]
hidden_layer_sizes = [4]
max_iter = 3
batch_size = 16

[logging]
level = "warn"
"#,
        root.display()
    );
    let config = Config::parse(&toml).expect("earnings config should parse");
    config.validate().expect("earnings config should validate");
    config
}

fn run_for(mode: LookaheadMode, start: NaiveDate, out: Option<PathBuf>) -> EarningsRun {
    EarningsRun {
        mode,
        train_window_months: 4,
        start_date: start,
        evaluate: true,
        out,
    }
}

#[test]
/// Verifies the command path loads a CSV panel, writes the forecast table
/// and, with evaluation on, writes the comparison artifacts.
fn run_earnings_end_to_end_with_baseline() {
    let dir = temp_dir("earnings-run");
    let mode = LookaheadMode::WithoutLookahead;
    let rows = write_panel_csv(&dir.join("panel.csv"), &build_specs(mode));
    write_rf_csv(&dir.join("rf").join("RF_wo_lookahead_raw_005.csv"), &rows, 0.1);
    let config = earnings_config(&dir, r#"rf_forecasts_dir = "rf""#);

    let run = run_for(mode, NaiveDate::from_ymd_opt(2000, 8, 15).unwrap(), None);
    let outcome = run_earnings(&config, &run).expect("earnings run should succeed");
    let out_dir = dir.join("output").join("earnings");
    assert_eq!(outcome.forecast_path, out_dir.join("NN_wo_lookahead_raw.csv"));
    assert!(outcome.forecast_path.exists());
    assert_eq!(outcome.forecast_rows, 7 * 8);
    assert_eq!(outcome.evaluation.len(), 5);
    assert!(out_dir.join("NN_vs_RF_MSE_woLAB.csv").exists());

    let markdown = std::fs::read_to_string(out_dir.join(COMPARISON_MD)).unwrap();
    assert!(markdown.contains("| --- |"));
    for h in ["q1", "q2", "q3", "y1", "y2"] {
        assert!(markdown.contains(h), "{h} missing from markdown");
    }
    let summary = std::fs::read_to_string(out_dir.join(SUMMARY_TXT)).unwrap();
    assert!(summary.contains("2000-08-31"));
    let _ = std::fs::remove_dir_all(dir);
}

fn mse_rf_column(path: &Path) -> Vec<f64> {
    let mut reader = csv::Reader::from_path(path).expect("open comparison csv");
    let col = reader
        .headers()
        .unwrap()
        .iter()
        .position(|h| h == "MSE_RF")
        .expect("MSE_RF column");
    reader
        .records()
        .map(|r| r.unwrap()[col].parse::<f64>().unwrap())
        .collect()
}

#[test]
/// Verifies each lookahead mode is scored against the baseline trained under
/// the same mode when both baselines sit in the configured directory.
fn each_mode_reads_its_own_baseline() {
    let dir = temp_dir("earnings-rf-per-mode");
    let rows = write_panel_csv(&dir.join("panel.csv"), &build_specs(LookaheadMode::WithLookahead));
    write_rf_csv(&dir.join("rf").join("RF_with_lookahead_raw_005.csv"), &rows, 0.3);
    write_rf_csv(&dir.join("rf").join("RF_wo_lookahead_raw_005.csv"), &rows, 0.1);
    let config = earnings_config(&dir, r#"rf_forecasts_dir = "rf""#);
    assert_eq!(
        config.rf_forecasts_path(LookaheadMode::WithLookahead),
        Some(dir.join("rf").join("RF_with_lookahead_raw_005.csv"))
    );

    let start = NaiveDate::from_ymd_opt(2000, 10, 31).unwrap();
    run_earnings(&config, &run_for(LookaheadMode::WithLookahead, start, None)).unwrap();
    let out_dir = dir.join("output").join("earnings");
    let with = mse_rf_column(&out_dir.join("NN_vs_RF_MSE_wLAB.csv"));
    assert_eq!(with.len(), 5);
    assert!(with.iter().all(|v| (v - 0.09).abs() < 1e-9), "{with:?}");

    let panel_wo = write_panel_csv(&dir.join("panel.csv"), &build_specs(LookaheadMode::WithoutLookahead));
    write_rf_csv(&dir.join("rf").join("RF_wo_lookahead_raw_005.csv"), &panel_wo, 0.1);
    run_earnings(&config, &run_for(LookaheadMode::WithoutLookahead, start, None)).unwrap();
    let without = mse_rf_column(&out_dir.join("NN_vs_RF_MSE_woLAB.csv"));
    assert!(without.iter().all(|v| (v - 0.01).abs() < 1e-9), "{without:?}");
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
/// Verifies a configured directory missing the mode's baseline names the
/// expected Parquet file.
fn missing_mode_baseline_names_expected_file() {
    let dir = temp_dir("earnings-rf-missing");
    let rows = write_panel_csv(&dir.join("panel.csv"), &build_specs(LookaheadMode::WithLookahead));
    write_rf_csv(&dir.join("rf").join("RF_wo_lookahead_raw_005.csv"), &rows, 0.1);
    let config = earnings_config(&dir, r#"rf_forecasts_dir = "rf""#);
    let start = NaiveDate::from_ymd_opt(2000, 12, 31).unwrap();
    let err = run_earnings(&config, &run_for(LookaheadMode::WithLookahead, start, None)).unwrap_err();
    assert!(format!("{err:#}").contains("RF_with_lookahead_raw_005.parquet"));
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
/// Verifies evaluation without a configured baseline directory fails after
/// the forecasts are written.
fn evaluate_requires_baseline_dir() {
    let dir = temp_dir("earnings-no-rf");
    write_panel_csv(&dir.join("panel.csv"), &build_specs(LookaheadMode::WithLookahead));
    let config = earnings_config(&dir, "");
    let out = dir.join("custom").join("nn.csv");
    let start = NaiveDate::from_ymd_opt(2000, 12, 31).unwrap();
    let err = run_earnings(&config, &run_for(LookaheadMode::WithLookahead, start, Some(out.clone())))
        .unwrap_err();
    assert!(format!("{err:#}").contains("rf_forecasts_dir"));
    assert!(out.exists());
    let _ = std::fs::remove_dir_all(dir);
}
