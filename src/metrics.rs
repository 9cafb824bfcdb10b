//! Metric aggregation over a finished prediction set.
//!
//! The aggregator is a stateless pass over immutable predictions; it never
//! touches run storage beyond writing the final `metrics.json`.

use crate::data::Prediction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while persisting metrics
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Per-operator accuracy slice
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperatorMetrics {
    pub item_accuracy: f64,
}

/// Aggregated metrics for a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metrics {
    /// Fraction of all predictions marked correct
    pub item_accuracy: f64,
    /// Fraction of pairs where every item is correct
    pub pair_joint_accuracy: f64,
    /// Item accuracy within each operator family
    pub by_operator: BTreeMap<String, OperatorMetrics>,
}

#[allow(clippy::cast_precision_loss)]
fn fraction(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Compute item-level accuracy, pair-level joint accuracy, and per-operator
/// metrics. Empty input yields zeros, not an error.
///
/// `pair_joint_accuracy <= item_accuracy` always holds: the joint metric is
/// a per-pair AND of the item-level predicate.
#[must_use]
pub fn aggregate(preds: &[Prediction]) -> Metrics {
    let correct = preds.iter().filter(|p| p.correct).count();

    let mut by_pair: BTreeMap<&str, bool> = BTreeMap::new();
    let mut by_op: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for p in preds {
        let joint = by_pair.entry(p.pair_id.as_str()).or_insert(true);
        *joint &= p.correct;
        let (hits, total) = by_op.entry(p.meta.operator.as_str()).or_insert((0, 0));
        *total += 1;
        if p.correct {
            *hits += 1;
        }
    }

    let joint_pairs = by_pair.values().filter(|ok| **ok).count();
    let by_operator = by_op
        .into_iter()
        .map(|(op, (hits, total))| {
            (
                op.to_string(),
                OperatorMetrics {
                    item_accuracy: fraction(hits, total),
                },
            )
        })
        .collect();

    Metrics {
        item_accuracy: fraction(correct, preds.len()),
        pair_joint_accuracy: fraction(joint_pairs, by_pair.len()),
        by_operator,
    }
}

/// Write metrics as pretty JSON.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_metrics(metrics: &Metrics, path: &Path) -> Result<(), MetricsError> {
    fs::write(path, serde_json::to_string_pretty(metrics)?)?;
    Ok(())
}
