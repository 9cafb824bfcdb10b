//! # nqmp-bench
//!
//! Benchmark harness for minimal-pair question sets: each pair holds two
//! near-identical questions probing a logical contrast (e.g. "more than
//! half" vs "at least half"). The harness drives a dataset through a
//! pluggable inference client and grades/aggregates the answers.
//!
//! The interesting engineering is correctness under partial failure, not
//! throughput: the run loop is strictly sequential, every prediction is
//! flushed and fsynced the moment it exists, failures are isolated per
//! item, and interrupted runs resume by item identity rather than position.
//!
//! ## Pipeline
//!
//! ```text
//! dataset.jsonl (pairs, left/right order preserved)
//!        ↓
//! Runner: resume skip-set check → client predict (retry/backoff inside)
//!        ↓
//! Grader (boolean / id-list normalization)
//!        ↓
//! Event log (run.log) + durable append (predictions.jsonl)
//!        ↓
//! Aggregator → metrics.json (item / pair-joint / per-operator accuracy)
//! ```

pub mod client;
pub mod config;
pub mod data;
pub mod grader;
pub mod metrics;
pub mod runner;
pub mod store;

pub use client::{
    call_with_retry, Client, ClientError, EchoClient, LlmResponse, OpenRouterClient, RetryConfig,
};
pub use config::ClientSettings;
pub use data::{
    item_id, load_pairs, AnswerType, DatasetError, Prediction, PredictionMeta, QaItem, QaPair,
};
pub use grader::is_correct;
pub use metrics::{aggregate, write_metrics, Metrics, MetricsError, OperatorMetrics};
pub use runner::{run_dataset, CancelFlag, Event, EventLog, RunConfig, RunError};
pub use store::{
    load_jsonl, load_predictions, load_skip_set, write_dataset, PredictionWriter, RunInfo,
    StoreError, DATASET_FILE, EVENT_LOG_FILE, METRICS_FILE, PREDICTIONS_FILE, RUN_INFO_FILE,
};
