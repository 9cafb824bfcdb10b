//! Run-directory persistence: predictions, resume skip-set, run metadata.
//!
//! Every file here is newline-delimited JSON except `run_info.json` and
//! `metrics.json`, which are single JSON objects. The predictions file is
//! append-only and owned by exactly one writer for a run's lifetime.

use crate::data::{item_id, Prediction, QaPair};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use thiserror::Error;

pub const DATASET_FILE: &str = "dataset.jsonl";
pub const PREDICTIONS_FILE: &str = "predictions.jsonl";
pub const EVENT_LOG_FILE: &str = "run.log";
pub const RUN_INFO_FILE: &str = "run_info.json";
pub const METRICS_FILE: &str = "metrics.json";

/// Errors that can occur during persistence
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Read newline-delimited JSON records, skipping blank lines.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line fails to parse.
pub fn load_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let text = fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(line)?);
    }
    Ok(rows)
}

/// Load predictions, recomputing identity for legacy records that were
/// written before `item_id` existed.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a record fails to parse.
pub fn load_predictions(path: &Path) -> Result<Vec<Prediction>, StoreError> {
    let mut preds: Vec<Prediction> = load_jsonl(path)?;
    for p in &mut preds {
        if p.item_id.is_empty() {
            p.item_id = item_id(&p.pair_id, &p.question);
        }
    }
    Ok(preds)
}

/// Build the resume skip-set from a prior run's predictions file.
///
/// A missing file yields an empty set (nothing to skip).
///
/// # Errors
///
/// Returns an error if an existing file cannot be read or parsed.
pub fn load_skip_set(path: &Path) -> Result<HashSet<String>, StoreError> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    Ok(load_predictions(path)?
        .into_iter()
        .map(|p| p.item_id)
        .collect())
}

/// Write QA pairs to a JSONL dataset file, left item before right.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_dataset(pairs: &[QaPair], path: &Path) -> Result<(), StoreError> {
    let mut out = String::new();
    for pair in pairs {
        for item in [&pair.left, &pair.right] {
            out.push_str(&serde_json::to_string(item)?);
            out.push('\n');
        }
    }
    fs::write(path, out)?;
    Ok(())
}

/// Append-only predictions sink.
///
/// Each write is flushed and forced to disk so that killing the process
/// after N items preserves exactly those N records, never a partial one.
#[derive(Debug)]
pub struct PredictionWriter {
    file: File,
}

impl PredictionWriter {
    /// Open the predictions file: append when resuming, truncate otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path, append: bool) -> Result<Self, StoreError> {
        let file = if append {
            OpenOptions::new().create(true).append(true).open(path)?
        } else {
            File::create(path)?
        };
        Ok(Self { file })
    }

    /// Append one record durably (write + flush + fsync).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any write step fails.
    pub fn write(&mut self, pred: &Prediction) -> Result<(), StoreError> {
        let line = serde_json::to_string(pred)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Force outstanding writes to disk and release the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails.
    pub fn close(self) -> Result<(), StoreError> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Persisted record of run parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunInfo {
    pub client: String,
    pub model: String,
    pub pairs: usize,
    pub seed: Option<u64>,
    pub timestamp: String,
    pub resumed: bool,
}

impl RunInfo {
    /// Merge into any existing `run_info.json`: this run's fields overwrite,
    /// fields this write does not know about persist from the prior write.
    /// An unreadable existing file is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the final write fails.
    pub fn merge_into(&self, path: &Path) -> Result<(), StoreError> {
        let mut merged = if path.exists() {
            fs::read_to_string(path)
                .ok()
                .and_then(|text| serde_json::from_str::<Value>(&text).ok())
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
        } else {
            Value::Object(serde_json::Map::new())
        };
        let update = serde_json::to_value(self)?;
        if let (Value::Object(base), Value::Object(new)) = (&mut merged, update) {
            for (k, v) in new {
                base.insert(k, v);
            }
        }
        fs::write(path, serde_json::to_string_pretty(&merged)?)?;
        Ok(())
    }
}
