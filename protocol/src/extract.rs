//! Pulls the single JSON result out of a job's free-form log output.
//!
//! The runner prints its result between two marker lines. Everything else in
//! the log is ignored. Extraction never fails outward: every problem with the
//! markers or the payload becomes an unsuccessful `ExecutionResult`.

use crate::{error_type, ExecutionResult};

/// Line printed right before the result document.
pub const RESULT_START: &str = "QUBOTS_RESULT_START";
/// Line printed right after the result document.
pub const RESULT_END: &str = "QUBOTS_RESULT_END";
/// Prefix of progress lines the runner wants relayed to streaming clients.
pub const PROGRESS_PREFIX: &str = "QUBOTS_PROGRESS ";

/// How much of the log tail is attached to failed results.
const EXCERPT_LEN: usize = 4000;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ExtractError {
    #[error("Result markers not found in job logs (no QUBOTS_RESULT_START line)")]
    MissingStart,
    #[error("Result markers not found in job logs (no QUBOTS_RESULT_END line after QUBOTS_RESULT_START)")]
    MissingEnd,
}

/// Locate the payload between the first start marker and the first end marker after it.
pub fn find_payload(logs: &str) -> Result<&str, ExtractError> {
    let mut offset = 0;
    let mut payload_start = None;
    for line in logs.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        if let Some(start) = payload_start {
            if line.trim() == RESULT_END {
                return Ok(&logs[start..line_start]);
            }
        } else if line.trim() == RESULT_START {
            payload_start = Some(offset);
        }
    }
    if payload_start.is_some() {
        Err(ExtractError::MissingEnd)
    } else {
        Err(ExtractError::MissingStart)
    }
}

/// Turn raw job logs into a result. Never panics, never returns an error.
pub fn extract_result(logs: &str) -> ExecutionResult {
    let payload = match find_payload(logs) {
        Ok(payload) => payload,
        Err(e) => {
            log::debug!("{e}");
            return ExecutionResult::failure(error_type::PARSE, e.to_string())
                .with_raw_log(excerpt(logs));
        }
    };
    match serde_json::from_str::<ExecutionResult>(payload.trim()) {
        Ok(result) => result,
        Err(e) => {
            log::debug!("result payload is not valid: {e}");
            ExecutionResult::failure(error_type::PARSE, format!("Failed to parse result JSON: {e}"))
                .with_raw_log(excerpt(logs))
        }
    }
}

/// Progress messages printed by the runner, in order, without their prefix.
pub fn progress_lines(logs: &str) -> impl Iterator<Item = &str> {
    logs.lines()
        .filter_map(|line| line.strip_prefix(PROGRESS_PREFIX))
        .map(str::trim_end)
}

/// Tail of `logs`, at most `EXCERPT_LEN` bytes, cut on a char boundary.
pub fn excerpt(logs: &str) -> &str {
    let mut start = logs.len().saturating_sub(EXCERPT_LEN);
    while !logs.is_char_boundary(start) {
        start += 1;
    }
    &logs[start..]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trip() {
        let logs = "loading...\nQUBOTS_RESULT_START\n{\"success\":true,\"best_value\":425.3}\nQUBOTS_RESULT_END\n";
        let result = extract_result(logs);
        assert_eq!(
            result,
            ExecutionResult {
                success: true,
                best_value: Some(425.3),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_multiline_payload_and_crlf() {
        let logs = "a\r\nQUBOTS_RESULT_START\r\n{\r\n  \"success\": true,\r\n  \"iterations\": 7\r\n}\r\nQUBOTS_RESULT_END\r\ntrailing";
        let result = extract_result(logs);
        assert!(result.success);
        assert_eq!(result.extra["iterations"], 7);
    }

    #[test]
    fn test_first_markers_win() {
        let logs = "QUBOTS_RESULT_START\n{\"success\":true,\"best_value\":1}\nQUBOTS_RESULT_END\n\
                    QUBOTS_RESULT_START\n{\"success\":true,\"best_value\":2}\nQUBOTS_RESULT_END\n";
        assert_eq!(extract_result(logs).best_value, Some(1.0));
    }

    #[test]
    fn test_missing_markers() {
        let result = extract_result("Traceback (most recent call last):\nImportError: qubots\n");
        assert!(!result.success);
        assert_eq!(result.error_type.as_deref(), Some(error_type::PARSE));
        assert!(result.error_message.unwrap().contains("markers not found"));
        assert!(result.raw_log.unwrap().contains("ImportError"));
    }

    #[test]
    fn test_end_before_start() {
        let logs = "QUBOTS_RESULT_END\n{\"success\":true}\nQUBOTS_RESULT_START\n";
        assert_eq!(find_payload(logs), Err(ExtractError::MissingEnd));
        let result = extract_result(logs);
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("markers not found"));
    }

    #[test]
    fn test_marker_must_be_whole_line() {
        let logs = "echo QUBOTS_RESULT_START\n{}\nQUBOTS_RESULT_END\n";
        assert_eq!(find_payload(logs), Err(ExtractError::MissingStart));
    }

    #[test]
    fn test_invalid_json() {
        let logs = "QUBOTS_RESULT_START\n{not json\nQUBOTS_RESULT_END\n";
        let result = extract_result(logs);
        assert!(!result.success);
        assert_eq!(result.error_type.as_deref(), Some(error_type::PARSE));
        assert!(result
            .error_message
            .unwrap()
            .starts_with("Failed to parse result JSON"));
    }

    #[test]
    fn test_non_object_payload() {
        let result = extract_result("QUBOTS_RESULT_START\n42\nQUBOTS_RESULT_END\n");
        assert!(!result.success);
        assert_eq!(result.error_type.as_deref(), Some(error_type::PARSE));
    }

    #[test]
    fn test_loosely_typed_values_kept() {
        let logs = "QUBOTS_RESULT_START\n{\"success\": true, \"best_value\": \"42\"}\nQUBOTS_RESULT_END\n";
        let result = extract_result(logs);
        assert!(result.success);
        assert_eq!(result.best_value, Some(42.0));

        let logs = "QUBOTS_RESULT_START\n{\"success\": true, \"best_value\": [3.0, 4.0]}\nQUBOTS_RESULT_END\n";
        let result = extract_result(logs);
        assert!(result.success);
        assert_eq!(result.best_value, None);
        assert_eq!(result.extra["best_value"], serde_json::json!([3.0, 4.0]));
    }

    #[test]
    fn test_job_reported_failure_passes_through() {
        let logs = "QUBOTS_RESULT_START\n{\"success\":false,\"error_type\":\"execution_error\",\"error_message\":\"no module\"}\nQUBOTS_RESULT_END\n";
        let result = extract_result(logs);
        assert!(!result.success);
        assert_eq!(result.error_type.as_deref(), Some("execution_error"));
        assert_eq!(result.raw_log, None);
    }

    #[test]
    fn test_progress_lines() {
        let logs = "QUBOTS_PROGRESS setup: cloning alice/tsp\nnoise\nQUBOTS_PROGRESS run: optimizing\n";
        let lines: Vec<_> = progress_lines(logs).collect();
        assert_eq!(lines, vec!["setup: cloning alice/tsp", "run: optimizing"]);
    }

    #[test]
    fn test_excerpt_char_boundary() {
        let logs = "é".repeat(EXCERPT_LEN);
        let tail = excerpt(&logs);
        assert!(tail.len() <= EXCERPT_LEN);
        assert!(tail.chars().all(|c| c == 'é'));
        assert_eq!(excerpt("short"), "short");
    }
}
