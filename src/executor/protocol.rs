//! Wire messages between a worker and its subordinate.
//!
//! A subordinate receives exactly one [`SubordinateRequest`] and answers with
//! at most one [`SubordinateResponse`]. Only data crosses the boundary: the
//! task to run is named by its [`TaskKind`], never shipped as code.

use crate::tasks::TaskKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request from worker to subordinate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubordinateRequest {
    /// Position of the task in the caller's input sequence.
    pub index: usize,
    /// Which task function to run.
    pub task: TaskKind,
    /// The task input, already serialized by the caller.
    pub payload: Value,
}

/// Response from subordinate to worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SubordinateResponse {
    /// The task function returned. `value` is null when it reported failure.
    #[serde(rename = "done")]
    Done { value: Option<Value> },

    /// The task function raised an error instead of returning.
    #[serde(rename = "failed")]
    Failed { message: String },

    /// The request line could not be decoded.
    #[serde(rename = "rejected")]
    Rejected { message: String },
}

impl SubordinateResponse {
    pub fn done(value: Option<Value>) -> Self {
        Self::Done { value }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_carries_task_and_payload() {
        let req = SubordinateRequest {
            index: 7,
            task: TaskKind::command("echo", vec!["{}".into()]),
            payload: json!("app.apk"),
        };
        let line = serde_json::to_string(&req).unwrap();
        assert!(line.contains("\"index\":7"));
        assert!(line.contains("app.apk"));

        let parsed: SubordinateRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.index, 7);
        assert_eq!(parsed.payload, json!("app.apk"));
        assert!(matches!(parsed.task, TaskKind::Command { .. }));
    }

    #[test]
    fn test_done_with_null_value() {
        let line = serde_json::to_string(&SubordinateResponse::done(None)).unwrap();
        assert_eq!(line, r#"{"type":"done","value":null}"#);
        let parsed: SubordinateResponse = serde_json::from_str(&line).unwrap();
        assert!(matches!(parsed, SubordinateResponse::Done { value: None }));
    }

    #[test]
    fn test_failed_is_distinct_from_rejected() {
        let line = serde_json::to_string(&SubordinateResponse::failed("no such file")).unwrap();
        assert_eq!(line, r#"{"type":"failed","message":"no such file"}"#);
        assert!(matches!(
            serde_json::from_str(&line).unwrap(),
            SubordinateResponse::Failed { .. }
        ));
    }

    #[test]
    fn test_rejected_message() {
        let line = serde_json::to_string(&SubordinateResponse::rejected("bad payload")).unwrap();
        match serde_json::from_str(&line).unwrap() {
            SubordinateResponse::Rejected { message } => assert_eq!(message, "bad payload"),
            other => panic!("Expected Rejected variant, got {:?}", other),
        }
    }
}
