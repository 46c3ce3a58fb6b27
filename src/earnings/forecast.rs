use anyhow::{Context, Result};
use chrono::NaiveDate;
use ndarray::{Array1, Array2};

use crate::earnings::mlp::{MlpParams, MlpPipeline};
use crate::earnings::panel::{month_end, shift_month_ends_back, TrainingPanel};
use crate::earnings::spec::ForecastSpec;
use crate::earnings::table::{ForecastTable, HorizonCells};
use crate::error::LabError;

/// Row indices of one month's training and test sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonthSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Rolling-window split for forecast month `t`.
///
/// Train rows fall in `[t - window month-ends, t)` and were announced in a
/// month before `t`. Test rows are month `t` firms whose announcement is
/// still ahead. Rows missing any feature or the target are dropped from both.
pub fn split_month(
    panel: &TrainingPanel,
    spec: &ForecastSpec,
    t: NaiveDate,
    train_window_months: u32,
) -> Result<MonthSplit, LabError> {
    let t0 = shift_month_ends_back(t, train_window_months);
    let ann = panel.date(&spec.ann_date_col)?;
    let y = panel.numeric(&spec.y_col)?;
    let features = spec
        .x_cols
        .iter()
        .map(|c| panel.numeric(c))
        .collect::<Result<Vec<_>, _>>()?;
    let complete = |row: usize| y[row].is_finite() && features.iter().all(|col| col[row].is_finite());

    let mut split = MonthSplit::default();
    for (row, &ym) in panel.year_month.iter().enumerate() {
        let Some(ann_date) = ann[row] else {
            continue;
        };
        if ym >= t0 && ym < t && month_end(ann_date) < t {
            if complete(row) {
                split.train.push(row);
            }
        } else if ym == t && ann_date > ym && complete(row) {
            split.test.push(row);
        }
    }
    Ok(split)
}

fn gather_matrix(columns: &[&[f64]], rows: &[usize]) -> Array2<f64> {
    Array2::from_shape_fn((rows.len(), columns.len()), |(i, j)| columns[j][rows[i]])
}

fn gather(column: &[f64], rows: &[usize]) -> Array1<f64> {
    rows.iter().map(|&r| column[r]).collect()
}

/// Forecasts one horizon month by month with a freshly fit pipeline.
pub fn forecast_horizon(
    panel: &TrainingPanel,
    spec: &ForecastSpec,
    months: &[NaiveDate],
    params: &MlpParams,
    train_window_months: u32,
    verbose_every: usize,
) -> Result<Vec<(i64, NaiveDate, HorizonCells)>> {
    let features = spec
        .x_cols
        .iter()
        .map(|c| panel.numeric(c))
        .collect::<Result<Vec<_>, _>>()?;
    let y = panel.numeric(&spec.y_col)?;
    let af = panel.numeric(&spec.af_col)?;

    let mut out = Vec::new();
    let mut skipped = 0usize;
    for (j, &t) in months.iter().enumerate() {
        let split = split_month(panel, spec, t, train_window_months)?;
        if split.train.is_empty() || split.test.is_empty() {
            skipped += 1;
            tracing::debug!(
                horizon = %spec.horizon,
                month = %t,
                train = split.train.len(),
                test = split.test.len(),
                "skipping month with an empty split"
            );
            continue;
        }

        let mut pipeline = MlpPipeline::new(params.clone());
        pipeline
            .fit(gather_matrix(&features, &split.train).view(), gather(y, &split.train).view())
            .with_context(|| format!("[{}] fit failed for {t}", spec.horizon))?;
        let preds = pipeline.predict(gather_matrix(&features, &split.test).view())?;

        for (&row, pred) in split.test.iter().zip(preds.iter()) {
            out.push((
                panel.permno[row],
                panel.year_month[row],
                HorizonCells {
                    pred: *pred,
                    af: af[row],
                    ae: y[row],
                },
            ));
        }

        if verbose_every > 0 && j > 0 && j % verbose_every == 0 {
            tracing::info!(
                horizon = %spec.horizon,
                processed = j,
                total = months.len(),
                last = %t,
                epochs = pipeline.model().n_iter(),
                "forecast progress"
            );
        }
    }

    if out.is_empty() {
        return Err(LabError::Validation(format!(
            "no forecasts produced for horizon {}; check date filters and missing data",
            spec.horizon
        ))
        .into());
    }
    tracing::info!(
        horizon = %spec.horizon,
        forecasts = out.len(),
        skipped_months = skipped,
        "horizon complete"
    );
    Ok(out)
}

/// Runs every horizon and outer-joins the results into one `NN` table.
pub fn run_mlp_forecasts(
    panel: &TrainingPanel,
    specs: &[ForecastSpec],
    params: &MlpParams,
    train_window_months: u32,
    start_date: NaiveDate,
    verbose_every: usize,
) -> Result<ForecastTable> {
    let months = panel.months_from(start_date);
    tracing::info!(
        months = months.len(),
        horizons = specs.len(),
        start = %start_date,
        "running rolling forecasts"
    );

    let mut per_horizon = Vec::with_capacity(specs.len());
    for spec in specs {
        let rows = forecast_horizon(panel, spec, &months, params, train_window_months, verbose_every)?;
        per_horizon.push((spec.horizon.clone(), rows));
    }
    Ok(ForecastTable::outer_join("NN", per_horizon))
}
