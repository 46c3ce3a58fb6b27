use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabError {
    #[error("config error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("missing required column `{column}` in {source_name}")]
    MissingColumn { column: String, source_name: String },

    #[error("missing required input {}", .0.display())]
    MissingInput(PathBuf),

    #[error("equity price fetch failed: {0}")]
    EquityFetch(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LabError {
    pub fn missing_column(column: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self::MissingColumn {
            column: column.into(),
            source_name: source_name.into(),
        }
    }
}
