//! JSON output for batch results.

use super::ResultRow;

/// Render results as a pretty-printed JSON array.
pub fn render_json(results: &[ResultRow]) -> String {
    serde_json::to_string_pretty(results).unwrap_or_else(|_| "[]".to_string())
}
