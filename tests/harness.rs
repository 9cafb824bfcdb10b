//! End-to-end harness tests: offline echo runs, resume semantics, failure
//! isolation, and dataset round-trips, all inside temp directories.

#![allow(clippy::unwrap_used)]

use nqmp_bench::{
    item_id, load_pairs, load_predictions, load_skip_set, run_dataset, write_dataset, AnswerType,
    CancelFlag, ClientSettings, PredictionWriter, QaItem, QaPair, RetryConfig, RunConfig,
    RunError, EVENT_LOG_FILE, PREDICTIONS_FILE,
};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

fn boolean_item(pair_id: &str, question: &str, answer: &str) -> QaItem {
    QaItem {
        pair_id: pair_id.to_string(),
        operator: "more/atleast_as_many".to_string(),
        domain: "shelves".to_string(),
        context: "Shelf A holds 3 books. Shelf B holds 2 books.".to_string(),
        question: question.to_string(),
        answer: answer.to_string(),
        answer_type: AnswerType::Boolean,
    }
}

fn list_item(pair_id: &str, question: &str, answer: &str) -> QaItem {
    QaItem {
        pair_id: pair_id.to_string(),
        operator: "all/any".to_string(),
        domain: "lockers".to_string(),
        context: "Locker X1 is full. Locker X2 is empty.".to_string(),
        question: question.to_string(),
        answer: answer.to_string(),
        answer_type: AnswerType::IdList,
    }
}

fn sample_pairs() -> Vec<QaPair> {
    vec![
        QaPair {
            id: "p0001".to_string(),
            left: boolean_item("p0001", "Does shelf A hold more books than shelf B?", "Yes"),
            right: boolean_item(
                "p0001",
                "Does shelf A hold at least as many books as shelf B?",
                "Yes",
            ),
        },
        QaPair {
            id: "p0002".to_string(),
            left: list_item("p0002", "List ids of full lockers.", "X1"),
            right: list_item("p0002", "List ids of empty lockers.", "X2"),
        },
    ]
}

fn echo_config(out_dir: &Path) -> RunConfig {
    RunConfig {
        out_dir: Some(out_dir.to_path_buf()),
        ..RunConfig::default()
    }
}

fn run_once(out_dir: &Path, cfg: &RunConfig, resume: bool) -> Result<usize, RunError> {
    let pairs = sample_pairs();
    let preds_path = out_dir.join(PREDICTIONS_FILE);
    let skip: HashSet<String> = if resume {
        load_skip_set(&preds_path).unwrap()
    } else {
        HashSet::new()
    };
    let append = resume && preds_path.exists();
    let mut writer = PredictionWriter::open(&preds_path, append).unwrap();
    let preds = run_dataset(
        &pairs,
        cfg,
        &ClientSettings::default(),
        &skip,
        &mut |p| writer.write(p),
        &CancelFlag::new(),
    )?;
    Ok(preds.len())
}

fn events_of_kind(out_dir: &Path, kind: &str) -> usize {
    let text = fs::read_to_string(out_dir.join(EVENT_LOG_FILE)).unwrap();
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
        .filter(|v| v["event"] == kind)
        .count()
}

#[test]
fn test_echo_runs_are_byte_identical() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let n_a = run_once(dir_a.path(), &echo_config(dir_a.path()), false).unwrap();
    let n_b = run_once(dir_b.path(), &echo_config(dir_b.path()), false).unwrap();
    assert_eq!(n_a, 4);
    assert_eq!(n_b, 4);

    let bytes_a = fs::read(dir_a.path().join(PREDICTIONS_FILE)).unwrap();
    let bytes_b = fs::read(dir_b.path().join(PREDICTIONS_FILE)).unwrap();
    assert_eq!(bytes_a, bytes_b);
    assert_eq!(events_of_kind(dir_a.path(), "llm_call"), 4);
}

#[test]
fn test_rerun_without_resume_duplicates_nothing_silently() {
    // Without resume the writer truncates: a fresh, independent record set
    let dir = tempfile::tempdir().unwrap();
    let cfg = echo_config(dir.path());

    run_once(dir.path(), &cfg, false).unwrap();
    let first = fs::read(dir.path().join(PREDICTIONS_FILE)).unwrap();
    run_once(dir.path(), &cfg, false).unwrap();
    let second = fs::read(dir.path().join(PREDICTIONS_FILE)).unwrap();

    assert_eq!(first, second);
    assert_eq!(load_predictions(&dir.path().join(PREDICTIONS_FILE)).unwrap().len(), 4);
    // both runs logged their calls
    assert_eq!(events_of_kind(dir.path(), "llm_call"), 8);
}

#[test]
fn test_resume_skips_completed_items() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = echo_config(dir.path());

    let first = run_once(dir.path(), &cfg, false).unwrap();
    assert_eq!(first, 4);

    let resumed = run_once(dir.path(), &cfg, true).unwrap();
    assert_eq!(resumed, 0, "all items should be skipped on resume");

    let preds = load_predictions(&dir.path().join(PREDICTIONS_FILE)).unwrap();
    assert_eq!(preds.len(), 4, "no duplicate records appended");
    assert_eq!(events_of_kind(dir.path(), "skip"), 4);
    assert_eq!(events_of_kind(dir.path(), "llm_call"), 4);

    // the skip events reference real identities
    let ids: HashSet<String> = preds.iter().map(|p| p.item_id.clone()).collect();
    assert!(ids.contains(&item_id(
        "p0001",
        "Does shelf A hold more books than shelf B?"
    )));
}

#[test]
fn test_partial_resume_runs_only_missing_items() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = echo_config(dir.path());
    let pairs = sample_pairs();
    let preds_path = dir.path().join(PREDICTIONS_FILE);

    // Simulate an interrupted first run: only the first item persisted
    {
        let mut writer = PredictionWriter::open(&preds_path, false).unwrap();
        let mut seen = 0usize;
        let result = run_dataset(
            &pairs,
            &cfg,
            &ClientSettings::default(),
            &HashSet::new(),
            &mut |p| {
                writer.write(p)?;
                seen += 1;
                Ok(())
            },
            &CancelFlag::new(),
        );
        assert!(result.is_ok());
        assert_eq!(seen, 4);
    }
    // keep only the first persisted line
    let text = fs::read_to_string(&preds_path).unwrap();
    let first_line = text.lines().next().unwrap().to_string();
    fs::write(&preds_path, format!("{first_line}\n")).unwrap();

    let resumed = run_once(dir.path(), &cfg, true).unwrap();
    assert_eq!(resumed, 3, "three items were missing");
    assert_eq!(load_predictions(&preds_path).unwrap().len(), 4);
}

#[test]
fn test_per_item_failures_do_not_stop_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    // Unroutable endpoint: every item fails at the network level
    let settings = ClientSettings {
        api_key: Some("test-key".to_string()),
        base_url: "http://127.0.0.1:9/v1/chat/completions".to_string(),
        ..ClientSettings::default()
    };
    let cfg = RunConfig {
        client_name: "openrouter".to_string(),
        out_dir: Some(dir.path().to_path_buf()),
        retry: RetryConfig {
            max_retries: 0,
            backoff_base: 0.0,
            backoff_cap: 0.0,
        },
        ..RunConfig::default()
    };

    let pairs = sample_pairs();
    let preds_path = dir.path().join(PREDICTIONS_FILE);
    let mut writer = PredictionWriter::open(&preds_path, false).unwrap();
    let preds = run_dataset(
        &pairs,
        &cfg,
        &settings,
        &HashSet::new(),
        &mut |p| writer.write(p),
        &CancelFlag::new(),
    )
    .unwrap();

    assert!(preds.is_empty());
    assert_eq!(events_of_kind(dir.path(), "llm_error"), 4);
    assert_eq!(load_predictions(&preds_path).unwrap().len(), 0);
}

#[test]
fn test_interrupt_is_logged_and_propagated() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = echo_config(dir.path());
    let cancel = CancelFlag::new();
    cancel.cancel();

    let pairs = sample_pairs();
    let err = run_dataset(
        &pairs,
        &cfg,
        &ClientSettings::default(),
        &HashSet::new(),
        &mut |_| Ok(()),
        &cancel,
    )
    .unwrap_err();

    assert!(matches!(err, RunError::Interrupted));
    assert_eq!(events_of_kind(dir.path(), "interrupt"), 1);
    assert_eq!(events_of_kind(dir.path(), "llm_call"), 0);
}

#[test]
fn test_dataset_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dataset.jsonl");
    let pairs = sample_pairs();

    write_dataset(&pairs, &path).unwrap();
    let loaded = load_pairs(&path).unwrap();
    assert_eq!(loaded, pairs);
}
