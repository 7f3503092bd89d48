//! Plain text output for batch results.

use super::ResultRow;

/// Render results as `input<TAB>value` lines, `-` for no result.
pub fn render_plain(results: &[ResultRow]) -> String {
    results
        .iter()
        .map(|row| {
            let value = row.display_value().unwrap_or_else(|| "-".to_string());
            format!("{}\t{}", row.input, value)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
