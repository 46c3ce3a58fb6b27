use std::collections::BTreeMap;

use basis_lab::model::{Series, WideFrame};
use basis_lab::pipeline::{compute_panel, cross_sectional_mean, PanelParams};
use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const WEEKS: usize = 80;

fn weekly_dates(n: usize) -> Vec<NaiveDate> {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    (0..n).map(|i| start + Duration::days(7 * i as i64)).collect()
}

fn draws(rng: &mut StdRng, n: usize, scale: f64) -> Vec<f64> {
    (0..n).map(|_| rng.gen_range(-scale..scale)).collect()
}

struct Inputs {
    cds: WideFrame,
    equity: WideFrame,
    market: Series,
}

fn synthetic_inputs(seed: u64) -> Inputs {
    let mut rng = StdRng::seed_from_u64(seed);
    let dates = weekly_dates(WEEKS);
    let market = draws(&mut rng, WEEKS, 0.03);
    let mut cds_cols = BTreeMap::new();
    let mut eq_cols = BTreeMap::new();
    for (i, ticker) in ["AAA", "BBB", "CCC"].iter().enumerate() {
        let idio = draws(&mut rng, WEEKS, 0.02);
        let eq: Vec<f64> = market
            .iter()
            .zip(&idio)
            .map(|(m, e)| (1.0 + 0.2 * i as f64) * m + e)
            .collect();
        let shock = draws(&mut rng, WEEKS, 0.05);
        let cds: Vec<f64> = eq.iter().zip(&shock).map(|(e, s)| -1.5 * e + s).collect();
        cds_cols.insert(ticker.to_string(), cds);
        eq_cols.insert(ticker.to_string(), eq);
    }
    Inputs {
        cds: WideFrame::from_columns(dates.clone(), cds_cols).unwrap(),
        equity: WideFrame::from_columns(dates.clone(), eq_cols).unwrap(),
        market: Series::new("m", dates, market),
    }
}

fn params() -> PanelParams {
    PanelParams {
        boxcar_window: 12,
        ew_window: 10,
        ew_half_life: 6.0,
    }
}

fn same(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

#[test]
/// Verifies one row per (week, ticker), grouped by ticker with dates ascending.
fn panel_has_one_row_per_week_and_ticker() {
    let inputs = synthetic_inputs(7);
    let panel = compute_panel(&inputs.cds, &inputs.equity, &inputs.market, params()).unwrap();
    assert_eq!(panel.len(), WEEKS * 3);
    assert_eq!(panel.tickers(), vec!["AAA", "BBB", "CCC"]);
    let aaa: Vec<NaiveDate> = panel.ticker_rows("AAA").map(|r| r.date).collect();
    assert_eq!(aaa, weekly_dates(WEEKS));
}

#[test]
/// Verifies the decomposition identities hold wherever the terms are defined:
/// rho = r_cds - f, q = rho - pred, pred = mu[t-1] * c[t-1].
fn residual_identities_hold_row_by_row() {
    let inputs = synthetic_inputs(11);
    let panel = compute_panel(&inputs.cds, &inputs.equity, &inputs.market, params()).unwrap();
    let mut checked = 0;
    for rows in panel.by_ticker().values() {
        for pair in rows.windows(2) {
            let (prev, row) = (pair[0], pair[1]);
            assert!(same(row.rho, row.r_cds - row.f));
            assert!(same(row.q_boxcar, row.rho - row.pred_boxcar));
            assert!(same(row.q_ew, row.rho - row.pred_ew));
            assert!(same(row.pred_ew, prev.mu_ew * prev.c));
            if row.q_ew.is_finite() {
                checked += 1;
            }
        }
    }
    assert!(checked > 100, "only {checked} defined residuals");
}

#[test]
/// Verifies warm-up rows are undefined: factors need a full factor window,
/// slopes need three usable pairs, and predictions use the previous slope.
fn warm_up_rows_are_undefined() {
    let inputs = synthetic_inputs(13);
    let p = params();
    let panel = compute_panel(&inputs.cds, &inputs.equity, &inputs.market, p).unwrap();
    let rows: Vec<_> = panel.ticker_rows("BBB").collect();
    assert!(rows[p.boxcar_window - 1].gamma.is_nan());
    assert!(rows[p.boxcar_window].gamma.is_finite());
    assert!(rows[p.boxcar_window].beta_equity.is_finite());
    // c_lag is first defined at boxcar_window + 1, so three pairs exist at + 4
    assert!(rows[p.boxcar_window + 3].mu_ew.is_nan());
    assert!(rows[p.boxcar_window + 4].mu_ew.is_finite());
    assert!(rows[p.boxcar_window + 4].pred_ew.is_nan());
    assert!(rows[p.boxcar_window + 5].pred_ew.is_finite());
}

#[test]
/// Verifies no quantity at week t depends on data observed after week t,
/// except the same-week returns that enter f and rho.
fn predictions_are_causal() {
    let inputs = synthetic_inputs(17);
    let base = compute_panel(&inputs.cds, &inputs.equity, &inputs.market, params()).unwrap();

    let cut = 50;
    let bump = |frame: &WideFrame| frame.map_columns(|v| {
        let mut out = v.to_vec();
        for x in out.iter_mut().skip(cut + 1) {
            *x += 0.5;
        }
        out
    });
    let mut market = inputs.market.clone();
    for x in market.values.iter_mut().skip(cut + 1) {
        *x -= 0.25;
    }
    let shocked = compute_panel(&bump(&inputs.cds), &bump(&inputs.equity), &market, params()).unwrap();

    for (a, b) in base.rows().iter().zip(shocked.rows()) {
        let index = (a.date - weekly_dates(1)[0]).num_days() as usize / 7;
        if index > cut {
            continue;
        }
        assert!(same(a.q_ew, b.q_ew), "{} {} q_ew", a.ticker, a.date);
        assert!(same(a.q_boxcar, b.q_boxcar), "{} {} q_boxcar", a.ticker, a.date);
        assert!(same(a.mu_ew, b.mu_ew));
        assert!(same(a.gamma, b.gamma));
    }
}

#[test]
/// Verifies the index return averages only the tickers quoted that week.
fn index_return_skips_missing_tickers() {
    let dates = weekly_dates(2);
    let mut cols = BTreeMap::new();
    cols.insert("A".to_string(), vec![0.1, f64::NAN]);
    cols.insert("B".to_string(), vec![0.3, f64::NAN]);
    cols.insert("C".to_string(), vec![f64::NAN, f64::NAN]);
    let frame = WideFrame::from_columns(dates, cols).unwrap();
    let mean = cross_sectional_mean(&frame);
    assert!((mean[0] - 0.2).abs() < 1e-12);
    assert!(mean[1].is_nan());
}

#[test]
/// Verifies mismatched inputs are rejected rather than silently misaligned.
fn mismatched_inputs_are_rejected() {
    let inputs = synthetic_inputs(19);
    let short = Series::new(
        "m",
        inputs.market.dates[1..].to_vec(),
        inputs.market.values[1..].to_vec(),
    );
    assert!(compute_panel(&inputs.cds, &inputs.equity, &short, params()).is_err());

    let equity = inputs
        .equity
        .select(&["AAA".to_string(), "BBB".to_string()], "equity")
        .unwrap();
    let err = compute_panel(&inputs.cds, &equity, &inputs.market, params()).unwrap_err();
    assert!(err.to_string().contains("CCC"));
}
