use std::path::Path;

use anyhow::{Context, Result};
use serde::{Serialize, Serializer};

use crate::model::WideFrame;

/// Writes non-finite floats as an empty cell instead of `NaN`.
pub fn nan_as_empty<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else {
        serializer.serialize_none()
    }
}

pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Serializes `rows` to a headed CSV file, creating parent directories.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("failed to write row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

/// Writes a wide frame as `date,<col>,<col>,...`.
pub fn write_wide_frame(path: &Path, frame: &WideFrame) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let names = frame.column_names();
    let mut header = Vec::with_capacity(names.len() + 1);
    header.push("date".to_string());
    header.extend(names.iter().cloned());
    writer.write_record(&header)?;

    let columns: Vec<&[f64]> = frame.columns().map(|(_, values)| values).collect();
    for (row, date) in frame.dates().iter().enumerate() {
        let mut record = Vec::with_capacity(columns.len() + 1);
        record.push(date.format("%Y-%m-%d").to_string());
        for values in &columns {
            record.push(format_cell(values[row]));
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let payload = serde_json::to_string_pretty(value).context("failed to encode json")?;
    std::fs::write(path, payload).with_context(|| format!("failed to write {}", path.display()))
}

pub fn format_cell(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        String::new()
    }
}
