use nalgebra::{DMatrix, DVector};

/// Trailing-window least squares through the origin.
///
/// For each `i >= window` the coefficients are fit on rows `[i - window, i)`,
/// so row `i` never enters its own estimate. Rows with a non-finite response
/// or regressor are dropped from that window. When no more usable rows remain
/// than there are regressors, the estimate at `i` is NaN.
///
/// Returns one coefficient series per regressor, each as long as `y`.
pub fn rolling_ols_no_intercept(y: &[f64], regressors: &[&[f64]], window: usize) -> Vec<Vec<f64>> {
    assert!(window > 0, "rolling window must be > 0");
    let n = y.len();
    let p = regressors.len();
    for col in regressors {
        assert_eq!(col.len(), n, "regressor length must match response length");
    }

    let mut out = vec![vec![f64::NAN; n]; p];
    if p == 0 {
        return out;
    }

    let mut usable: Vec<usize> = Vec::with_capacity(window);
    for i in window..n {
        usable.clear();
        usable.extend(
            (i - window..i)
                .filter(|&t| y[t].is_finite() && regressors.iter().all(|col| col[t].is_finite())),
        );
        if usable.len() <= p {
            continue;
        }

        let design = DMatrix::from_fn(usable.len(), p, |r, c| regressors[c][usable[r]]);
        let response = DVector::from_iterator(usable.len(), usable.iter().map(|&t| y[t]));
        if let Some(beta) = min_norm_lstsq(design, &response) {
            for (k, b) in beta.iter().enumerate() {
                out[k][i] = *b;
            }
        }
    }
    out
}

/// Minimum-norm least-squares solution of `design * beta = response`.
///
/// Singular values at or below `eps * max(rows, cols) * s_max` are treated as
/// zero, which gives pseudo-inverse behaviour on rank-deficient windows.
pub fn min_norm_lstsq(design: DMatrix<f64>, response: &DVector<f64>) -> Option<DVector<f64>> {
    let (rows, cols) = design.shape();
    if rows == 0 || cols == 0 {
        return None;
    }
    let svd = design.svd(true, true);
    let s_max = svd
        .singular_values
        .iter()
        .fold(0.0_f64, |acc, &s| acc.max(s.abs()));
    let cutoff = f64::EPSILON * rows.max(cols) as f64 * s_max;
    let beta = svd.solve(response, cutoff).ok()?;
    beta.iter().all(|b| b.is_finite()).then_some(beta)
}
