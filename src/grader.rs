//! Grading: normalization and correctness checks per answer type.

use crate::data::AnswerType;

const YES: [&str; 4] = ["yes", "y", "true", "1"];
const NO: [&str; 4] = ["no", "n", "false", "0"];

/// Normalize a boolean answer to canonical `Yes`/`No`.
///
/// Falls back to scanning whitespace-delimited tokens for a bare yes/no
/// amidst chatter; if neither matches, returns the trimmed raw string so the
/// caller still compares something meaningful.
fn normalize_boolean(s: &str) -> String {
    let t = s.trim().to_lowercase();
    if YES.contains(&t.as_str()) {
        return "Yes".to_string();
    }
    if NO.contains(&t.as_str()) {
        return "No".to_string();
    }
    if t.split_whitespace().any(|w| w == "yes") {
        "Yes".to_string()
    } else if t.split_whitespace().any(|w| w == "no") {
        "No".to_string()
    } else {
        s.trim().to_string()
    }
}

/// Normalize a comma-separated id list: trim, drop empties, sort.
///
/// Order- and whitespace-insensitive, but sensitive to exact token spelling
/// and duplicates.
fn normalize_id_list(s: &str) -> Vec<String> {
    let mut parts: Vec<String> = s
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    parts.sort();
    parts
}

/// Return true if the prediction matches gold under the type's normalizer.
#[must_use]
pub fn is_correct(answer_type: AnswerType, pred: &str, gold: &str) -> bool {
    match answer_type {
        AnswerType::Boolean => normalize_boolean(pred) == normalize_boolean(gold),
        AnswerType::IdList => normalize_id_list(pred) == normalize_id_list(gold),
        AnswerType::Other => pred.trim() == gold.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_case_insensitive() {
        assert!(is_correct(AnswerType::Boolean, "YES", "Yes"));
        assert!(is_correct(AnswerType::Boolean, "no", "No"));
        assert!(is_correct(AnswerType::Boolean, "true", "Yes"));
        assert!(is_correct(AnswerType::Boolean, "0", "No"));
    }

    #[test]
    fn test_boolean_token_scan() {
        assert!(is_correct(AnswerType::Boolean, "well, yes I think", "Yes"));
        assert!(is_correct(AnswerType::Boolean, "the answer is no", "No"));
        assert!(!is_correct(AnswerType::Boolean, "maybe", "Yes"));
    }

    #[test]
    fn test_boolean_raw_fallback() {
        // Neither side normalizes; trimmed raw strings compare
        assert!(is_correct(AnswerType::Boolean, " unclear ", "unclear"));
    }

    #[test]
    fn test_id_list_whitespace_and_order() {
        assert!(is_correct(AnswerType::IdList, "A,B", "A, B"));
        assert!(is_correct(AnswerType::IdList, "B,A", "A,B"));
        assert!(is_correct(AnswerType::IdList, "", ""));
    }

    #[test]
    fn test_id_list_extra_token() {
        assert!(!is_correct(AnswerType::IdList, "A,B", "A,B,C"));
        assert!(!is_correct(AnswerType::IdList, "A,A,B", "A,B"));
    }

    #[test]
    fn test_id_list_drops_empty_tokens() {
        assert!(is_correct(AnswerType::IdList, "A,,B,", "A,B"));
    }

    #[test]
    fn test_other_exact_match() {
        assert!(is_correct(AnswerType::Other, " x ", "x"));
        assert!(!is_correct(AnswerType::Other, "x", "X"));
    }
}
