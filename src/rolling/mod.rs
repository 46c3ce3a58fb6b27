pub mod ols;
pub mod slope;

pub use ols::{min_norm_lstsq, rolling_ols_no_intercept};
pub use slope::{
    decay_from_half_life, ew_weights, rolling_slope_boxcar, rolling_slope_ew,
    MIN_SLOPE_OBSERVATIONS,
};
