/// Fewest jointly-finite pairs a window needs before a slope is reported.
pub const MIN_SLOPE_OBSERVATIONS: usize = 3;

/// Per-period decay for a half-life given in periods: `0.5^(1 / half_life)`.
pub fn decay_from_half_life(half_life: f64) -> f64 {
    0.5_f64.powf(1.0 / half_life)
}

/// Normalized exponential weights over a full window, oldest first.
///
/// The oldest slot has age `window - 1`, the newest age `0`, so the newest
/// observation carries the largest weight.
pub fn ew_weights(window: usize, half_life: f64) -> Vec<f64> {
    assert!(window > 0, "rolling window must be > 0");
    assert!(half_life > 0.0, "half-life must be > 0");
    let lambda = decay_from_half_life(half_life);
    let raw: Vec<f64> = (0..window)
        .map(|slot| lambda.powi((window - 1 - slot) as i32))
        .collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

/// Unweighted no-intercept slope of `y` on `x` over `[i - window, i)`.
pub fn rolling_slope_boxcar(y: &[f64], x: &[f64], window: usize) -> Vec<f64> {
    assert!(window > 0, "rolling window must be > 0");
    rolling_weighted_slope(y, x, &vec![1.0; window], false)
}

/// Exponentially weighted no-intercept slope of `y` on `x` over `[i - window, i)`.
///
/// Weights are assigned over the full window first, then restricted to the
/// finite pairs and renormalized to sum to one.
pub fn rolling_slope_ew(y: &[f64], x: &[f64], window: usize, half_life: f64) -> Vec<f64> {
    let weights = ew_weights(window, half_life);
    rolling_weighted_slope(y, x, &weights, true)
}

fn rolling_weighted_slope(y: &[f64], x: &[f64], weights: &[f64], renormalize: bool) -> Vec<f64> {
    assert_eq!(y.len(), x.len(), "slope inputs must have equal length");
    let window = weights.len();
    let n = y.len();
    let mut out = vec![f64::NAN; n];

    let mut kept: Vec<(f64, f64, f64)> = Vec::with_capacity(window);
    for i in window..n {
        kept.clear();
        for (slot, t) in (i - window..i).enumerate() {
            if y[t].is_finite() && x[t].is_finite() {
                kept.push((weights[slot], x[t], y[t]));
            }
        }
        if kept.len() < MIN_SLOPE_OBSERVATIONS {
            continue;
        }

        let scale = if renormalize {
            let total: f64 = kept.iter().map(|(w, _, _)| w).sum();
            if total <= 0.0 {
                continue;
            }
            total
        } else {
            1.0
        };

        let mut num = 0.0;
        let mut den = 0.0;
        for (w, xv, yv) in &kept {
            let w = w / scale;
            num += w * xv * yv;
            den += w * xv * xv;
        }
        if !(den > 0.0) {
            continue;
        }
        out[i] = num / den;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one_and_favor_recent() {
        let w = ew_weights(6, 3.0);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(w.windows(2).all(|p| p[0] < p[1]));
        let lambda = decay_from_half_life(3.0);
        assert!((w[4] / w[5] - lambda).abs() < 1e-12);
    }

    #[test]
    fn half_life_decay_halves_after_half_life_periods() {
        let lambda = decay_from_half_life(12.0);
        assert!((lambda.powi(12) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn boxcar_is_ols_through_origin() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.1, 5.9, 0.0];
        let out = rolling_slope_boxcar(&y, &x, 3);
        let expected = (1.0 * 2.0 + 2.0 * 4.1 + 3.0 * 5.9) / (1.0 + 4.0 + 9.0);
        assert!((out[3] - expected).abs() < 1e-12);
    }

    #[test]
    fn zero_energy_regressor_is_undefined() {
        let x = [0.0, 0.0, 0.0, 0.0, 1.0];
        let y = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = rolling_slope_ew(&y, &x, 4, 2.0);
        assert!(out[4].is_nan());
    }
}
