//! External command task.

use crate::error::{ApkxError, Result};
use std::process::{Command, Stdio};
use tracing::debug;

const PLACEHOLDER: &str = "{}";

/// Run `program` with `args` for one payload.
///
/// Returns trimmed stdout when the program exits with status 0 and `None`
/// for any other status. A program that cannot be started is an error.
pub fn run_command(program: &str, args: &[String], payload: &str) -> Result<Option<String>> {
    let args = substitute(args, payload);

    let output = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|e| ApkxError::Subordinate(format!("Failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        debug!(program, status = %output.status, "Command failed");
        return Ok(None);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(Some(stdout.trim().to_string()))
}

/// Replace every placeholder with the payload, or append the payload when
/// there is none.
fn substitute(args: &[String], payload: &str) -> Vec<String> {
    if args.iter().any(|a| a.contains(PLACEHOLDER)) {
        args.iter().map(|a| a.replace(PLACEHOLDER, payload)).collect()
    } else {
        let mut args = args.to_vec();
        args.push(payload.to_string());
        args
    }
}
