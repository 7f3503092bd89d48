//! Task functions a subordinate can run.
//!
//! A task is named by data, not shipped as code: the worker sends a
//! [`TaskKind`] with each payload and the subordinate resolves it here.

mod command;

pub use command::run_command;

use crate::error::{ApkxError, Result};
use crate::extractor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// The task applied to every payload of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// Run an external program. Every `{}` in `args` is replaced by the
    /// payload; without a placeholder the payload is appended.
    Command { program: String, args: Vec<String> },

    /// Extract APK features with an external analyzer command, caching the
    /// result under `out_dir`.
    Extract {
        analyzer: Vec<String>,
        out_dir: Option<PathBuf>,
    },
}

impl TaskKind {
    pub fn command(program: impl Into<String>, args: Vec<String>) -> Self {
        Self::Command {
            program: program.into(),
            args,
        }
    }

    pub fn extract(analyzer: Vec<String>, out_dir: Option<PathBuf>) -> Self {
        Self::Extract { analyzer, out_dir }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Extract { .. } => "extract",
        }
    }

    /// Run the task on one payload.
    ///
    /// `Ok(None)` means the task ran and produced nothing. An error means the
    /// request itself could not be served.
    pub fn run(&self, payload: Value) -> Result<Option<Value>> {
        let input = payload_string(&payload);
        match self {
            Self::Command { program, args } => {
                Ok(run_command(program, args, &input)?.map(Value::String))
            }
            Self::Extract { analyzer, out_dir } => {
                if analyzer.is_empty() {
                    return Err(ApkxError::Analyzer("No analyzer command given".into()));
                }
                let features = extractor::extract_apk(analyzer, out_dir.as_deref(), Path::new(&input));
                Ok(features.map(Value::from))
            }
        }
    }
}

/// The text form of a payload: strings as-is, anything else as JSON.
pub fn payload_string(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
