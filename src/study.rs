use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;

use crate::artifacts::{write_csv, write_json};
use crate::config::Config;
use crate::feed::PriceHistorySource;
use crate::io::EquityOrigin;
use crate::metrics::{event_windows, metrics_by_ticker, pooled_metrics, weekly_pooled_rmse};
use crate::pipeline::{run_pipeline, PanelParams};
use crate::plots;
use crate::report::{render_summary, SummaryInputs};
use crate::robustness::{run_robustness, write_robustness, RobustnessRow, SWEEP_FILE};

pub const PANEL_FILE: &str = "panel_results.csv";
pub const TICKER_METRICS_FILE: &str = "metrics_per_ticker.csv";
pub const POOLED_METRICS_FILE: &str = "metrics_pooled.csv";
pub const EVENT_WINDOWS_FILE: &str = "event_windows.csv";
pub const SUMMARY_FILE: &str = "summary.md";
pub const MANIFEST_FILE: &str = "run_manifest.json";

/// Which parts of the basis study a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyScope {
    /// Panel, metrics, robustness sweep, charts and summary.
    Full,
    /// Panel and metrics only.
    Panel,
    /// Robustness sweep only.
    Robustness,
}

impl StudyScope {
    fn writes_panel(self) -> bool {
        matches!(self, StudyScope::Full | StudyScope::Panel)
    }

    fn runs_sweep(self) -> bool {
        matches!(self, StudyScope::Full | StudyScope::Robustness)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub generated_at: String,
    pub version: &'static str,
    pub scope: StudyScope,
    pub params: PanelParams,
    pub robustness_windows: Vec<usize>,
    pub robustness_half_lives: Vec<f64>,
    pub cds_path: PathBuf,
    pub equity_source: String,
    pub tickers: Vec<String>,
    pub weeks: usize,
    pub first_week: Option<NaiveDate>,
    pub last_week: Option<NaiveDate>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StudyOutcome {
    pub output_dir: PathBuf,
    pub outputs: Vec<String>,
    pub panel_rows: usize,
    pub sweep: Option<Vec<RobustnessRow>>,
}

fn relative_name(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Runs the basis study and writes its artifacts under the configured output dir.
pub fn run_study(
    config: &Config,
    source: &dyn PriceHistorySource,
    scope: StudyScope,
) -> Result<StudyOutcome> {
    let out_dir = config.output_dir();
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    tracing::info!(scope = ?scope, output_dir = %out_dir.display(), "starting basis study");

    let result = run_pipeline(config, source)?;
    let panel = &result.panel;
    let mut outputs = Vec::new();

    let pooled = pooled_metrics(panel);
    let weekly = weekly_pooled_rmse(panel);
    let events = event_windows(panel, config.output.event_top_n);
    if scope.writes_panel() {
        write_csv(&out_dir.join(PANEL_FILE), panel.rows())?;
        write_csv(&out_dir.join(TICKER_METRICS_FILE), &metrics_by_ticker(panel))?;
        write_csv(&out_dir.join(POOLED_METRICS_FILE), &pooled)?;
        write_csv(&out_dir.join(EVENT_WINDOWS_FILE), &events)?;
        outputs.extend(
            [PANEL_FILE, TICKER_METRICS_FILE, POOLED_METRICS_FILE, EVENT_WINDOWS_FILE]
                .map(str::to_string),
        );
    }

    let sweep = if scope.runs_sweep() {
        let rows = run_robustness(config, &result.returns)?;
        let dir = config.robustness_dir();
        write_robustness(&dir, &rows)?;
        outputs.push(relative_name(&out_dir, &dir.join(SWEEP_FILE)));
        tracing::info!(points = rows.len(), "robustness sweep written");
        Some(rows)
    } else {
        None
    };

    if scope == StudyScope::Full {
        if config.output.charts {
            let written = plots::render_all(
                &out_dir,
                panel,
                &weekly,
                sweep.as_deref(),
                config.output.rolling_rmse_weeks,
            )?;
            outputs.extend(written.iter().map(|p| relative_name(&out_dir, p)));
        }
        outputs.push(SUMMARY_FILE.to_string());
        let summary = render_summary(&SummaryInputs {
            params: config.panel_params(),
            tickers: result.returns.cds.width(),
            weeks: result.returns.cds.len(),
            pooled: &pooled,
            events: &events,
            sweep: sweep.as_deref(),
            outputs: &outputs,
        });
        let path = out_dir.join(SUMMARY_FILE);
        std::fs::write(&path, summary)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    outputs.push(MANIFEST_FILE.to_string());
    let manifest = RunManifest {
        generated_at: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
        scope,
        params: config.panel_params(),
        robustness_windows: config.robustness.windows.clone(),
        robustness_half_lives: config.robustness.half_lives.clone(),
        cds_path: config.cds_path(),
        equity_source: match &result.equity_origin {
            EquityOrigin::Cache(path) => path.display().to_string(),
            EquityOrigin::Fetched => "fetched".to_string(),
        },
        tickers: result.returns.cds.column_names(),
        weeks: result.returns.cds.len(),
        first_week: result.returns.cds.first_date(),
        last_week: result.returns.cds.last_date(),
        outputs: outputs.clone(),
    };
    write_json(&out_dir.join(MANIFEST_FILE), &manifest)?;

    tracing::info!(files = outputs.len(), "basis study complete");
    Ok(StudyOutcome {
        output_dir: out_dir,
        outputs,
        panel_rows: panel.len(),
        sweep,
    })
}
