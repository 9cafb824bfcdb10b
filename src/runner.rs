//! Benchmark run loop.
//!
//! Drives pairs through a client in generation order (left item then
//! right), applies the resume skip-set, grades results, persists each
//! prediction durably through a caller-supplied writer, and emits one
//! structured event per item. Failures are isolated per item; only
//! configuration errors and cancellation stop the batch.

use crate::client::{Client, ClientError, RetryConfig};
use crate::config::ClientSettings;
use crate::data::{item_id, AnswerType, Prediction, PredictionMeta, QaItem, QaPair};
use crate::grader::is_correct;
use crate::store::{StoreError, EVENT_LOG_FILE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Questions longer than this are clipped in log events
const MAX_QUESTION_CHARS: usize = 96;

/// Prompt sent to the client for every item
const PROMPT_TEMPLATE: &str = "You will be given a tiny context and a question.
- If the question is yes/no, answer exactly 'Yes' or 'No'.
- If the question asks to list ids, return a comma-separated list of ids with no spaces.
- Do not add any extra text.

CONTEXT:
{context}

QUESTION:
{question}
";

/// Errors that terminate a run early
#[derive(Error, Debug)]
pub enum RunError {
    /// Unknown client name or missing credentials, raised before the loop
    #[error("configuration error: {0}")]
    Config(#[source] ClientError),

    /// External interrupt observed at an item boundary
    #[error("run interrupted")]
    Interrupted,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failure of a single item's evaluation; logged, never fatal to the batch
#[derive(Error, Debug)]
enum ItemError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Configuration for running a dataset against a client
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Client to dispatch to (`echo` or `openrouter`)
    pub client_name: String,
    /// Model override; the client's default applies when absent
    pub model_name: Option<String>,
    /// Sampling temperature
    pub temperature: f64,
    /// Run directory holding the event log; no file sink when absent
    pub out_dir: Option<PathBuf>,
    /// Whether this invocation resumes a prior run
    pub resume: bool,
    /// Emit events (file and console)
    pub verbose: bool,
    /// Retry policy handed to the client
    pub retry: RetryConfig,
    /// Seed for the offline stub
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            client_name: "echo".to_string(),
            model_name: None,
            temperature: 0.0,
            out_dir: None,
            resume: false,
            verbose: true,
            retry: RetryConfig::default(),
            seed: 0,
        }
    }
}

/// Cooperative cancellation flag, observed between items only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One structured event per item, written as a JSON line to the per-run
/// event log before any console rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    LlmCall {
        pair_id: String,
        operator: String,
        domain: String,
        question: String,
        gold: String,
        prediction: String,
        answer_type: AnswerType,
        correct: bool,
        latency_s: f64,
        client: String,
        model: String,
        attempts: u32,
        status_code: Option<u16>,
    },
    LlmError {
        pair_id: String,
        operator: String,
        domain: String,
        question: String,
        error: String,
        client: String,
        model: String,
    },
    Skip {
        pair_id: String,
        question: String,
        item_id: String,
    },
    Interrupt {
        pair_id: String,
        question: String,
    },
}

/// Event sink: durable JSONL file first, console second.
///
/// Console rendering goes through `tracing` and is presentation only; the
/// file is the record downstream tooling reads.
#[derive(Debug)]
pub struct EventLog {
    file: Option<File>,
    enabled: bool,
}

impl EventLog {
    /// Open the sink; no file is created when disabled or pathless.
    ///
    /// # Errors
    ///
    /// Returns an error if the log file cannot be opened.
    pub fn open(path: Option<&Path>, enabled: bool) -> Result<Self, std::io::Error> {
        let file = match (enabled, path) {
            (true, Some(p)) => Some(OpenOptions::new().create(true).append(true).open(p)?),
            _ => None,
        };
        Ok(Self { file, enabled })
    }

    /// Write the event to the file sink, flush, then render to console.
    ///
    /// # Errors
    ///
    /// Returns an error if the file write fails.
    pub fn emit(&mut self, event: &Event) -> Result<(), StoreError> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(f) = self.file.as_mut() {
            let line = serde_json::to_string(event)?;
            f.write_all(line.as_bytes())?;
            f.write_all(b"\n")?;
            f.flush()?;
        }
        render(event);
        Ok(())
    }

    /// Force the file sink to disk and release it. Called on every exit
    /// path: normal completion, per-item error, and cancellation.
    pub fn close(&mut self) {
        if let Some(f) = self.file.take() {
            let _ = f.sync_all();
        }
    }
}

fn render(event: &Event) {
    match event {
        Event::LlmCall {
            pair_id,
            operator,
            domain,
            prediction,
            gold,
            correct,
            latency_s,
            client,
            model,
            attempts,
            ..
        } => tracing::info!(
            pair_id = %pair_id,
            operator = %operator,
            domain = %domain,
            prediction = %prediction,
            gold = %gold,
            correct = %correct,
            latency_s = %latency_s,
            client = %client,
            model = %model,
            attempts = %attempts,
            "llm_call"
        ),
        Event::LlmError {
            pair_id,
            error,
            client,
            model,
            ..
        } => tracing::warn!(
            pair_id = %pair_id,
            error = %error,
            client = %client,
            model = %model,
            "llm_error"
        ),
        Event::Skip {
            pair_id, item_id, ..
        } => tracing::info!(pair_id = %pair_id, item_id = %item_id, "skip"),
        Event::Interrupt { pair_id, .. } => {
            tracing::warn!(pair_id = %pair_id, "interrupt");
        }
    }
}

/// Truncate a long string with an ellipsis, char-boundary safe.
fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut s: String = text.chars().take(width.saturating_sub(1)).collect();
        s.push('…');
        s
    }
}

fn build_prompt(item: &QaItem) -> String {
    PROMPT_TEMPLATE
        .replace("{context}", &item.context)
        .replace("{question}", &item.question)
}

/// Run all items; persist each prediction immediately; continue past
/// per-item failures.
///
/// Pairs run in the order given, items left then right; predictions and
/// log lines are written in exactly that order. The skip-set is keyed on
/// item identity, not position.
///
/// # Errors
///
/// `Config` for an unknown client or missing credentials (before any item
/// runs), `Interrupted` when the cancel flag is observed, `Store`/`IoError`
/// when the event log itself cannot be written. Per-item failures are
/// logged and do not surface here.
pub fn run_dataset(
    pairs: &[QaPair],
    cfg: &RunConfig,
    settings: &ClientSettings,
    resume_skip: &HashSet<String>,
    write_pred: &mut dyn FnMut(&Prediction) -> Result<(), StoreError>,
    cancel: &CancelFlag,
) -> Result<Vec<Prediction>, RunError> {
    let client = Client::from_name(&cfg.client_name, settings, cfg.retry.clone(), cfg.seed)
        .map_err(RunError::Config)?;
    let log_path = cfg.out_dir.as_ref().map(|d| d.join(EVENT_LOG_FILE));
    let mut log = EventLog::open(log_path.as_deref(), cfg.verbose)?;

    let result = run_loop(pairs, cfg, &client, resume_skip, write_pred, cancel, &mut log);
    log.close();
    result
}

fn run_loop(
    pairs: &[QaPair],
    cfg: &RunConfig,
    client: &Client,
    resume_skip: &HashSet<String>,
    write_pred: &mut dyn FnMut(&Prediction) -> Result<(), StoreError>,
    cancel: &CancelFlag,
    log: &mut EventLog,
) -> Result<Vec<Prediction>, RunError> {
    let model_label = client.model_label(cfg.model_name.as_deref());
    let mut preds = Vec::new();

    for pair in pairs {
        for item in [&pair.left, &pair.right] {
            if cancel.is_cancelled() {
                log.emit(&Event::Interrupt {
                    pair_id: item.pair_id.clone(),
                    question: clip(&item.question, MAX_QUESTION_CHARS),
                })?;
                return Err(RunError::Interrupted);
            }

            let id = item_id(&item.pair_id, &item.question);
            if resume_skip.contains(&id) {
                log.emit(&Event::Skip {
                    pair_id: item.pair_id.clone(),
                    question: clip(&item.question, MAX_QUESTION_CHARS),
                    item_id: id,
                })?;
                continue;
            }

            let outcome = eval_item(client, item, cfg, &model_label, log)
                .and_then(|p| write_pred(&p).map(|()| p).map_err(ItemError::from));
            match outcome {
                Ok(p) => preds.push(p),
                Err(err) => {
                    log.emit(&Event::LlmError {
                        pair_id: item.pair_id.clone(),
                        operator: item.operator.clone(),
                        domain: item.domain.clone(),
                        question: clip(&item.question, MAX_QUESTION_CHARS),
                        error: err.to_string(),
                        client: client.name().to_string(),
                        model: model_label.clone(),
                    })?;
                }
            }
        }
    }
    Ok(preds)
}

/// Query the client and grade a single item, emitting an `llm_call` event.
fn eval_item(
    client: &Client,
    item: &QaItem,
    cfg: &RunConfig,
    model_label: &str,
    log: &mut EventLog,
) -> Result<Prediction, ItemError> {
    let prompt = build_prompt(item);
    let start = Instant::now();
    let resp = client.predict(&prompt, cfg.model_name.as_deref(), cfg.temperature)?;
    let latency_s = (start.elapsed().as_secs_f64() * 1000.0).round() / 1000.0;

    let correct = is_correct(item.answer_type, &resp.text, &item.answer);
    log.emit(&Event::LlmCall {
        pair_id: item.pair_id.clone(),
        operator: item.operator.clone(),
        domain: item.domain.clone(),
        question: clip(&item.question, MAX_QUESTION_CHARS),
        gold: item.answer.clone(),
        prediction: resp.text.clone(),
        answer_type: item.answer_type,
        correct,
        latency_s,
        client: client.name().to_string(),
        model: model_label.to_string(),
        attempts: resp.attempts,
        status_code: resp.status_code,
    })?;

    Ok(Prediction {
        pair_id: item.pair_id.clone(),
        item_id: item_id(&item.pair_id, &item.question),
        question: item.question.clone(),
        prediction: resp.text,
        gold: item.answer.clone(),
        answer_type: item.answer_type,
        correct,
        meta: PredictionMeta {
            operator: item.operator.clone(),
            domain: item.domain.clone(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pair_id: &str, question: &str) -> QaItem {
        QaItem {
            pair_id: pair_id.to_string(),
            operator: "more/atleast_as_many".to_string(),
            domain: "shelves".to_string(),
            context: "Shelf A holds 3 books. Shelf B holds 2 books.".to_string(),
            question: question.to_string(),
            answer: "Yes".to_string(),
            answer_type: AnswerType::Boolean,
        }
    }

    fn pair(id: &str) -> QaPair {
        QaPair {
            id: id.to_string(),
            left: item(id, &format!("left question of {id}")),
            right: item(id, &format!("right question of {id}")),
        }
    }

    #[test]
    fn test_clip_short_and_long() {
        assert_eq!(clip("short", 96), "short");
        let long = "x".repeat(120);
        let clipped = clip(&long, 96);
        assert_eq!(clipped.chars().count(), 96);
        assert!(clipped.ends_with('…'));
    }

    #[test]
    fn test_build_prompt_embeds_fields() {
        let it = item("p1", "Does shelf A hold more books than shelf B?");
        let prompt = build_prompt(&it);
        assert!(prompt.contains(&it.context));
        assert!(prompt.contains(&it.question));
        assert!(!prompt.contains("{context}"));
        assert!(!prompt.contains("{question}"));
    }

    #[test]
    fn test_event_serde_tagging() {
        let event = Event::Skip {
            pair_id: "p1".to_string(),
            question: "q".to_string(),
            item_id: "abc".to_string(),
        };
        let line = serde_json::to_string(&event).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "skip");
        assert_eq!(value["item_id"], "abc");
    }

    #[test]
    fn test_run_evaluates_left_then_right() {
        let pairs = vec![pair("p1"), pair("p2")];
        let cfg = RunConfig {
            verbose: false,
            ..RunConfig::default()
        };
        let mut written = Vec::new();
        let preds = run_dataset(
            &pairs,
            &cfg,
            &ClientSettings::default(),
            &HashSet::new(),
            &mut |p| {
                written.push(p.question.clone());
                Ok(())
            },
            &CancelFlag::new(),
        )
        .unwrap();

        assert_eq!(preds.len(), 4);
        assert_eq!(
            written,
            vec![
                "left question of p1",
                "right question of p1",
                "left question of p2",
                "right question of p2",
            ]
        );
        // every prediction is stamped with its identity
        for p in &preds {
            assert_eq!(p.item_id, item_id(&p.pair_id, &p.question));
        }
    }

    #[test]
    fn test_unknown_client_is_fatal_before_loop() {
        let pairs = vec![pair("p1")];
        let cfg = RunConfig {
            client_name: "nope".to_string(),
            verbose: false,
            ..RunConfig::default()
        };
        let mut calls = 0usize;
        let err = run_dataset(
            &pairs,
            &cfg,
            &ClientSettings::default(),
            &HashSet::new(),
            &mut |_| {
                calls += 1;
                Ok(())
            },
            &CancelFlag::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RunError::Config(ClientError::UnknownClient(_))));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_pre_cancelled_run_interrupts_immediately() {
        let pairs = vec![pair("p1")];
        let cfg = RunConfig {
            verbose: false,
            ..RunConfig::default()
        };
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut calls = 0usize;
        let err = run_dataset(
            &pairs,
            &cfg,
            &ClientSettings::default(),
            &HashSet::new(),
            &mut |_| {
                calls += 1;
                Ok(())
            },
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, RunError::Interrupted));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_skip_set_suppresses_persistence() {
        let pairs = vec![pair("p1")];
        let left_id = item_id("p1", "left question of p1");
        let skip: HashSet<String> = [left_id].into_iter().collect();
        let cfg = RunConfig {
            verbose: false,
            ..RunConfig::default()
        };
        let mut written = Vec::new();
        let preds = run_dataset(
            &pairs,
            &cfg,
            &ClientSettings::default(),
            &skip,
            &mut |p| {
                written.push(p.question.clone());
                Ok(())
            },
            &CancelFlag::new(),
        )
        .unwrap();

        assert_eq!(preds.len(), 1);
        assert_eq!(written, vec!["right question of p1"]);
    }

    #[test]
    fn test_write_failure_is_per_item() {
        let pairs = vec![pair("p1")];
        let cfg = RunConfig {
            verbose: false,
            ..RunConfig::default()
        };
        let mut calls = 0usize;
        let preds = run_dataset(
            &pairs,
            &cfg,
            &ClientSettings::default(),
            &HashSet::new(),
            &mut |_| {
                calls += 1;
                if calls == 1 {
                    Err(StoreError::IoError(std::io::Error::other("disk full")))
                } else {
                    Ok(())
                }
            },
            &CancelFlag::new(),
        )
        .unwrap();

        // first item failed to persist; the run continued
        assert_eq!(calls, 2);
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].question, "right question of p1");
    }
}
