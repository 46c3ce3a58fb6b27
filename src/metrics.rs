use serde::Serialize;

use crate::artifacts::nan_as_empty;
use crate::model::{Panel, PanelRow};

/// Distribution summary of forecast errors over their finite values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ErrorStats {
    #[serde(serialize_with = "nan_as_empty")]
    pub rmse: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub mean: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub std: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub q01: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub q05: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub q95: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub q99: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub skew: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub kurtosis: f64,
    pub n: usize,
}

impl ErrorStats {
    pub fn empty() -> Self {
        Self {
            rmse: f64::NAN,
            mean: f64::NAN,
            std: f64::NAN,
            q01: f64::NAN,
            q05: f64::NAN,
            q95: f64::NAN,
            q99: f64::NAN,
            skew: f64::NAN,
            kurtosis: f64::NAN,
            n: 0,
        }
    }
}

pub fn error_stats(errors: &[f64]) -> ErrorStats {
    let mut e: Vec<f64> = errors.iter().copied().filter(|v| v.is_finite()).collect();
    if e.is_empty() {
        return ErrorStats::empty();
    }
    let n = e.len();
    let nf = n as f64;
    let mean = e.iter().sum::<f64>() / nf;
    let rmse = (e.iter().map(|v| v * v).sum::<f64>() / nf).sqrt();

    let (mut s2, mut s3, mut s4) = (0.0, 0.0, 0.0);
    for v in &e {
        let d = v - mean;
        let d2 = d * d;
        s2 += d2;
        s3 += d2 * d;
        s4 += d2 * d2;
    }
    let std = if n > 1 { (s2 / (nf - 1.0)).sqrt() } else { f64::NAN };

    let skew = if n < 3 {
        f64::NAN
    } else if s2 == 0.0 {
        0.0
    } else {
        let m2 = s2 / nf;
        let m3 = s3 / nf;
        (nf * (nf - 1.0)).sqrt() / (nf - 2.0) * m3 / m2.powf(1.5)
    };

    let kurtosis = if n < 4 {
        f64::NAN
    } else if s2 == 0.0 {
        0.0
    } else {
        let adj = 3.0 * (nf - 1.0).powi(2) / ((nf - 2.0) * (nf - 3.0));
        nf * (nf + 1.0) * (nf - 1.0) * s4 / ((nf - 2.0) * (nf - 3.0) * s2 * s2) - adj
    };

    e.sort_by(|a, b| a.total_cmp(b));
    ErrorStats {
        rmse,
        mean,
        std,
        q01: quantile_sorted(&e, 0.01),
        q05: quantile_sorted(&e, 0.05),
        q95: quantile_sorted(&e, 0.95),
        q99: quantile_sorted(&e, 0.99),
        skew,
        kurtosis,
        n,
    }
}

/// Linear-interpolation quantile of the finite values in `values`.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    quantile_sorted(&sorted, q)
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Out-of-sample R² on rows where both values are finite.
///
/// NaN when no such rows exist or the realized values have no dispersion.
pub fn oos_r2(y: &[f64], yhat: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = y
        .iter()
        .zip(yhat)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .collect();
    if pairs.is_empty() {
        return f64::NAN;
    }
    let mean = pairs.iter().map(|(a, _)| a).sum::<f64>() / pairs.len() as f64;
    let sse: f64 = pairs.iter().map(|(a, b)| (a - b).powi(2)).sum();
    let sst: f64 = pairs.iter().map(|(a, _)| (a - mean).powi(2)).sum();
    if sst <= 0.0 {
        return f64::NAN;
    }
    1.0 - sse / sst
}

/// The two basis predictors being compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Boxcar,
    Ew,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Boxcar, ModelKind::Ew];

    pub fn label(self) -> &'static str {
        match self {
            ModelKind::Boxcar => "boxcar",
            ModelKind::Ew => "ew",
        }
    }

    pub fn error(self, row: &PanelRow) -> f64 {
        match self {
            ModelKind::Boxcar => row.q_boxcar,
            ModelKind::Ew => row.q_ew,
        }
    }

    pub fn prediction(self, row: &PanelRow) -> f64 {
        match self {
            ModelKind::Boxcar => row.pred_boxcar,
            ModelKind::Ew => row.pred_ew,
        }
    }
}

// CSV rows spell the statistics out: the csv serializer cannot flatten nested structs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerMetricsRow {
    pub ticker: String,
    pub model: ModelKind,
    #[serde(serialize_with = "nan_as_empty")]
    pub rmse: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub mean: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub std: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub q01: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub q05: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub q95: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub q99: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub skew: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub kurtosis: f64,
    pub n: usize,
    #[serde(serialize_with = "nan_as_empty")]
    pub oos_r2: f64,
}

impl TickerMetricsRow {
    pub fn new(ticker: impl Into<String>, model: ModelKind, s: ErrorStats, oos_r2: f64) -> Self {
        Self {
            ticker: ticker.into(),
            model,
            rmse: s.rmse,
            mean: s.mean,
            std: s.std,
            q01: s.q01,
            q05: s.q05,
            q95: s.q95,
            q99: s.q99,
            skew: s.skew,
            kurtosis: s.kurtosis,
            n: s.n,
            oos_r2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PooledMetricsRow {
    pub model: ModelKind,
    #[serde(serialize_with = "nan_as_empty")]
    pub rmse: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub mean: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub std: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub q01: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub q05: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub q95: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub q99: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub skew: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub kurtosis: f64,
    pub n: usize,
    #[serde(serialize_with = "nan_as_empty")]
    pub oos_r2: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub rmse_delta_vs_boxcar: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub oos_r2_delta_vs_boxcar: f64,
}

fn model_summary<'a>(
    rows: impl Iterator<Item = &'a PanelRow> + Clone,
    model: ModelKind,
) -> (ErrorStats, f64) {
    let errors: Vec<f64> = rows.clone().map(|r| model.error(r)).collect();
    let rho: Vec<f64> = rows.clone().map(|r| r.rho).collect();
    let pred: Vec<f64> = rows.map(|r| model.prediction(r)).collect();
    (error_stats(&errors), oos_r2(&rho, &pred))
}

/// Two rows (boxcar, ew) per ticker, tickers sorted.
pub fn metrics_by_ticker(panel: &Panel) -> Vec<TickerMetricsRow> {
    let mut out = Vec::new();
    for (ticker, rows) in panel.by_ticker() {
        for model in ModelKind::ALL {
            let (stats, r2) = model_summary(rows.iter().copied(), model);
            out.push(TickerMetricsRow::new(ticker, model, stats, r2));
        }
    }
    out
}

pub fn pooled_metrics(panel: &Panel) -> Vec<PooledMetricsRow> {
    let summaries: Vec<(ModelKind, ErrorStats, f64)> = ModelKind::ALL
        .iter()
        .map(|&model| {
            let (stats, r2) = model_summary(panel.rows().iter(), model);
            (model, stats, r2)
        })
        .collect();
    let (box_rmse, box_r2) = summaries
        .iter()
        .find(|(m, _, _)| *m == ModelKind::Boxcar)
        .map(|(_, s, r2)| (s.rmse, *r2))
        .unwrap_or((f64::NAN, f64::NAN));

    summaries
        .into_iter()
        .map(|(model, s, r2)| PooledMetricsRow {
            model,
            rmse: s.rmse,
            mean: s.mean,
            std: s.std,
            q01: s.q01,
            q05: s.q05,
            q95: s.q95,
            q99: s.q99,
            skew: s.skew,
            kurtosis: s.kurtosis,
            n: s.n,
            oos_r2: r2,
            rmse_delta_vs_boxcar: s.rmse - box_rmse,
            oos_r2_delta_vs_boxcar: r2 - box_r2,
        })
        .collect()
}

/// Root of the mean of squared finite values; NaN when none are finite.
pub fn nan_rms(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v * v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        (sum / n as f64).sqrt()
    }
}

/// Cross-sectional RMSE of both models for one week.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeeklyGap {
    pub date: chrono::NaiveDate,
    #[serde(serialize_with = "nan_as_empty")]
    pub rmse_boxcar: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub rmse_ew: f64,
    #[serde(serialize_with = "nan_as_empty")]
    pub gap_ew_minus_boxcar: f64,
}

/// Pooled RMSE per date, dates ascending.
pub fn weekly_pooled_rmse(panel: &Panel) -> Vec<WeeklyGap> {
    panel
        .by_date()
        .into_iter()
        .map(|(date, rows)| {
            let rmse_boxcar = nan_rms(rows.iter().map(|r| r.q_boxcar));
            let rmse_ew = nan_rms(rows.iter().map(|r| r.q_ew));
            WeeklyGap {
                date,
                rmse_boxcar,
                rmse_ew,
                gap_ew_minus_boxcar: rmse_ew - rmse_boxcar,
            }
        })
        .collect()
}

/// Weeks with the largest absolute model gap, largest first; undefined gaps sort last.
pub fn event_windows(panel: &Panel, top_n: usize) -> Vec<WeeklyGap> {
    let mut weeks = weekly_pooled_rmse(panel);
    // stable sort keeps date order among equal gaps
    weeks.sort_by(|a, b| {
        let (ga, gb) = (a.gap_ew_minus_boxcar.abs(), b.gap_ew_minus_boxcar.abs());
        match (ga.is_nan(), gb.is_nan()) {
            (false, false) => gb.total_cmp(&ga),
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
        }
    });
    weeks.truncate(top_n);
    weeks
}
