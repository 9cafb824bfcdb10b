//! Core data structures for minimal-pair benchmarks.
//!
//! Defines QA items, pairs, prediction records, the stable item identity
//! used for resume bookkeeping, and JSONL dataset loading.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading a dataset
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed record on line {line}: {source}")]
    Malformed {
        line: usize,
        source: serde_json::Error,
    },

    #[error("Pair {0} has {1} item(s), expected exactly 2")]
    IncompletePair(String, usize),
}

/// Typed answer kind for a question.
///
/// Unrecognized kinds in persisted records deserialize to [`AnswerType::Other`]
/// and grade by exact trimmed string equality.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerType {
    /// Yes/No question
    Boolean,
    /// Comma-separated id list
    IdList,
    /// Anything else (defensive fallback)
    #[serde(other)]
    Other,
}

/// Single QA item with context and gold answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QaItem {
    /// Identifier shared by both items of a pair
    pub pair_id: String,
    /// Logical contrast family the pair exercises
    pub operator: String,
    /// Content domain the context is drawn from
    pub domain: String,
    /// Tiny context the question is asked against
    pub context: String,
    /// The question text
    pub question: String,
    /// Gold answer
    pub answer: String,
    /// How the answer is graded
    pub answer_type: AnswerType,
}

/// Two minimally different items forming a pair.
///
/// Left/right order is the dataset file order and is preserved through the
/// run loop for deterministic replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QaPair {
    /// Shared pair identifier
    pub id: String,
    /// First item of the pair
    pub left: QaItem,
    /// Second item of the pair
    pub right: QaItem,
}

/// Operator/domain tags carried along with a prediction
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PredictionMeta {
    pub operator: String,
    pub domain: String,
}

/// Model prediction record, appended to `predictions.jsonl` exactly once
/// per successfully evaluated item and never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prediction {
    pub pair_id: String,
    /// Stable identity; may be absent in legacy records (recomputed on read)
    #[serde(default)]
    pub item_id: String,
    pub question: String,
    pub prediction: String,
    pub gold: String,
    pub answer_type: AnswerType,
    pub correct: bool,
    #[serde(default)]
    pub meta: PredictionMeta,
}

/// Deterministic identity for an item across runs, processes, and machines.
///
/// 16 hex chars of SHA-256 over `pair_id|question`. Collisions are accepted
/// as negligible at dataset scale.
#[must_use]
pub fn item_id(pair_id: &str, question: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pair_id.as_bytes());
    hasher.update(b"|");
    hasher.update(question.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Load QA pairs from a JSONL dataset file.
///
/// Records are grouped by `pair_id` in first-seen order; within a pair the
/// first record becomes `left` and the second `right`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, a line fails to parse, or a
/// pair does not have exactly two items.
pub fn load_pairs(path: &Path) -> Result<Vec<QaPair>, DatasetError> {
    let text = fs::read_to_string(path)?;

    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<QaItem>> = HashMap::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let item: QaItem = serde_json::from_str(line).map_err(|source| DatasetError::Malformed {
            line: idx + 1,
            source,
        })?;
        if !grouped.contains_key(&item.pair_id) {
            order.push(item.pair_id.clone());
        }
        grouped.entry(item.pair_id.clone()).or_default().push(item);
    }

    let mut pairs = Vec::with_capacity(order.len());
    for pid in order {
        let Some(items) = grouped.remove(&pid) else {
            continue;
        };
        if items.len() != 2 {
            return Err(DatasetError::IncompletePair(pid, items.len()));
        }
        let mut it = items.into_iter();
        let (Some(left), Some(right)) = (it.next(), it.next()) else {
            return Err(DatasetError::IncompletePair(pid, 0));
        };
        pairs.push(QaPair {
            id: pid,
            left,
            right,
        });
    }
    Ok(pairs)
}
