//! Colored table output for batch results.

use super::ResultRow;
use crate::theme::{Semantic, ThemedCell};
use comfy_table::{
    Cell, ContentArrangement, Table,
    presets::{ASCII_FULL, UTF8_FULL},
};

/// Render results as a table, `ascii` selecting plain ASCII borders.
pub fn render_table(results: &[ResultRow], ascii: bool) -> String {
    if results.is_empty() {
        return "No inputs.".to_string();
    }

    let mut table = Table::new();
    table.load_preset(if ascii { ASCII_FULL } else { UTF8_FULL });
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["#", "Input", "Result"]);

    for (index, row) in results.iter().enumerate() {
        let result = match row.display_value() {
            Some(value) => Cell::new(value).themed(Semantic::Value),
            None => Cell::new("no result").themed(Semantic::Missing),
        };
        table.add_row(vec![
            Cell::new(index),
            Cell::new(&row.input).themed(Semantic::Input),
            result,
        ]);
    }

    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_table_empty() {
        assert_eq!(render_table(&[], false), "No inputs.");
    }

    #[test]
    fn test_render_table_with_results() {
        let results = vec![
            ResultRow::new("a.apk", Some(json!("done"))),
            ResultRow::new("b.apk", None),
        ];
        let table = render_table(&results, true);
        assert!(table.contains("a.apk"));
        assert!(table.contains("done"));
        assert!(table.contains("no result"));
        assert!(table.contains("Input"));
    }
}
