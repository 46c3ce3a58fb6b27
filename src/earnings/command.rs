use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;

use crate::config::{Config, EarningsConfig};
use crate::earnings::evaluate::{summarize_mse_comparison, write_evaluation};
use crate::earnings::forecast::run_mlp_forecasts;
use crate::earnings::panel::{load_training_panel, month_end};
use crate::earnings::spec::{build_specs, LookaheadMode, HORIZONS};
use crate::earnings::table::{read_forecast_table, write_forecast_table};
use crate::error::LabError;
use crate::logging::init_tracing;

/// Command-line overrides; unset fields fall back to `[earnings]` config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EarningsArgs {
    pub config_path: Option<PathBuf>,
    pub mode: Option<LookaheadMode>,
    pub train_window_months: Option<u32>,
    pub start_date: Option<NaiveDate>,
    pub evaluate: bool,
    pub out: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EarningsCommand {
    Run(EarningsArgs),
    Help,
}

/// Settings for one forecasting run after merging args over config.
#[derive(Debug, Clone, PartialEq)]
pub struct EarningsRun {
    pub mode: LookaheadMode,
    pub train_window_months: u32,
    pub start_date: NaiveDate,
    pub evaluate: bool,
    pub out: Option<PathBuf>,
}

impl EarningsArgs {
    pub fn resolve(&self, earnings: &EarningsConfig) -> EarningsRun {
        EarningsRun {
            mode: self.mode.unwrap_or(earnings.mode),
            train_window_months: self
                .train_window_months
                .unwrap_or(earnings.train_window_months),
            start_date: self.start_date.unwrap_or(earnings.start_date),
            evaluate: self.evaluate,
            out: self.out.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EarningsOutcome {
    pub forecast_path: PathBuf,
    pub forecast_rows: usize,
    pub evaluation: Vec<PathBuf>,
}

fn flag_value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<&'a String> {
    iter.next()
        .ok_or_else(|| anyhow!("`{}` requires a value", flag))
}

pub fn parse_earnings_command(args: &[String]) -> Result<EarningsCommand> {
    let mut parsed = EarningsArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "help" | "--help" | "-h" => return Ok(EarningsCommand::Help),
            "--config" => parsed.config_path = Some(PathBuf::from(flag_value(&mut iter, arg)?)),
            "--mode" => parsed.mode = Some(flag_value(&mut iter, arg)?.parse()?),
            "--train-window-months" | "--train_window_months" => {
                let raw = flag_value(&mut iter, arg)?;
                let months: u32 = raw
                    .parse()
                    .with_context(|| format!("invalid month count `{raw}`"))?;
                if months == 0 {
                    bail!("`{}` must be > 0", arg);
                }
                parsed.train_window_months = Some(months);
            }
            "--start-date" | "--start_date" => {
                let raw = flag_value(&mut iter, arg)?;
                let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .with_context(|| format!("invalid start date `{raw}`: expected YYYY-MM-DD"))?;
                parsed.start_date = Some(date);
            }
            "--evaluate" => parsed.evaluate = true,
            "--out" => {
                let raw = flag_value(&mut iter, arg)?;
                if !raw.trim().is_empty() {
                    parsed.out = Some(PathBuf::from(raw));
                }
            }
            other => bail!(
                "unknown argument `{}`. usage: earnings-forecast [--mode wLAB|woLAB] \
                 [--train-window-months N] [--start-date YYYY-MM-DD] [--evaluate] [--out PATH] [--config PATH]",
                other
            ),
        }
    }
    Ok(EarningsCommand::Run(parsed))
}

/// Fits the rolling forecasts, writes the `NN` table and, when asked,
/// scores it against the random-forest baseline.
pub fn run_earnings(config: &Config, run: &EarningsRun) -> Result<EarningsOutcome> {
    let out_dir = config.resolve(&config.earnings.output_dir);
    let specs = build_specs(run.mode);

    let mut numeric_cols: Vec<String> = Vec::new();
    let mut date_cols: Vec<String> = Vec::new();
    for spec in &specs {
        for col in spec.numeric_columns() {
            if !numeric_cols.contains(&col) {
                numeric_cols.push(col);
            }
        }
        if !date_cols.contains(&spec.ann_date_col) {
            date_cols.push(spec.ann_date_col.clone());
        }
    }

    let panel_path = config.resolve(&config.earnings.panel_path);
    let panel = load_training_panel(&panel_path, &numeric_cols, &date_cols)?;
    tracing::info!(
        mode = %run.mode,
        train_window_months = run.train_window_months,
        start = %run.start_date,
        "starting earnings forecasts"
    );

    let forecasts = run_mlp_forecasts(
        &panel,
        &specs,
        &config.earnings.mlp,
        run.train_window_months,
        month_end(run.start_date),
        config.earnings.verbose_every,
    )?;
    let forecast_path = match &run.out {
        Some(path) => path.clone(),
        None => out_dir.join(format!("{}.csv", run.mode.forecast_file_stem())),
    };
    write_forecast_table(&forecast_path, &forecasts)?;

    let mut evaluation = Vec::new();
    if run.evaluate {
        let rf_path = config.rf_forecasts_path(run.mode).ok_or_else(|| {
            LabError::Config("--evaluate requires earnings.rf_forecasts_dir".to_string())
        })?;
        tracing::info!(mode = %run.mode, path = %rf_path.display(), "reading baseline forecasts");
        let horizons: Vec<String> = HORIZONS.iter().map(|h| h.to_string()).collect();
        let rf = read_forecast_table(&rf_path, "RF", &horizons)
            .with_context(|| format!("failed to read baseline {}", rf_path.display()))?;
        let rows = summarize_mse_comparison(&rf, &forecasts)?;
        for row in &rows {
            tracing::info!(
                horizon = %row.horizon,
                mse_analyst = row.mse_analyst,
                mse_rf = row.mse_rf,
                mse_nn = row.mse_nn,
                "mse comparison"
            );
        }
        evaluation = write_evaluation(&out_dir, run.mode, &rows, &forecasts)?;
    }

    Ok(EarningsOutcome {
        forecast_path,
        forecast_rows: forecasts.len(),
        evaluation,
    })
}

pub fn run_earnings_cli(args: &[String]) -> Result<()> {
    let parsed = match parse_earnings_command(args)? {
        EarningsCommand::Help => {
            print_usage();
            return Ok(());
        }
        EarningsCommand::Run(parsed) => parsed,
    };
    let config = match &parsed.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    init_tracing(&config.logging)?;

    let run = parsed.resolve(&config.earnings);
    let outcome = run_earnings(&config, &run)?;
    println!(
        "saved {} forecast rows to {}",
        outcome.forecast_rows,
        outcome.forecast_path.display()
    );
    for path in &outcome.evaluation {
        println!("  {}", path.display());
    }
    Ok(())
}

fn print_usage() {
    println!("earnings-forecast: rolling MLP earnings forecasts vs the random-forest baseline");
    println!();
    println!("usage: earnings-forecast [--mode wLAB|woLAB] [--train-window-months N]");
    println!("                         [--start-date YYYY-MM-DD] [--evaluate] [--out PATH] [--config PATH]");
    println!();
    println!("env: BASIS_LAB_CONFIG, RUST_LOG");
}
