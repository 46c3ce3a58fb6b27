pub mod artifacts;
pub mod cli;
pub mod config;
pub mod earnings;
pub mod error;
pub mod feed;
pub mod io;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod plots;
pub mod report;
pub mod robustness;
pub mod rolling;
pub mod study;
pub mod transforms;
