//! Rolling neural-network earnings forecasts and their comparison against a
//! random-forest baseline and analyst consensus.

pub mod command;
pub mod evaluate;
pub mod forecast;
pub mod mlp;
pub mod panel;
pub mod spec;
pub mod table;

pub use command::{parse_earnings_command, run_earnings, run_earnings_cli, EarningsArgs, EarningsRun};
pub use forecast::{run_mlp_forecasts, split_month};
pub use mlp::{MlpParams, MlpPipeline, MlpRegressor, StandardScaler};
pub use panel::{load_training_panel, TrainingPanel};
pub use spec::{build_specs, ForecastSpec, LookaheadMode};
pub use table::{ForecastTable, HorizonCells};
