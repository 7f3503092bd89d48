//! Output formatting for batch results.

pub mod json;
pub mod plain;
pub mod table;

use serde::Serialize;
use serde_json::Value;

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Colored table output (default).
    #[default]
    Table,
    /// JSON array of `{input, value}` objects.
    Json,
    /// One tab-separated line per input, `-` for no result.
    Plain,
}

/// One input and what it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub input: String,
    pub value: Option<Value>,
}

impl ResultRow {
    pub fn new(input: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            input: input.into(),
            value,
        }
    }

    /// Single-line text form of the value: strings verbatim, lists joined
    /// with spaces, anything else as JSON.
    pub fn display_value(&self) -> Option<String> {
        self.value.as_ref().map(|value| match value {
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" "),
            other => other.to_string(),
        })
    }
}

/// Pair inputs with their results, in order.
pub fn rows<I, V>(inputs: I, values: Vec<Option<V>>) -> Vec<ResultRow>
where
    I: IntoIterator,
    I::Item: ToString,
    V: Into<Value>,
{
    inputs
        .into_iter()
        .zip(values)
        .map(|(input, value)| ResultRow::new(input.to_string(), value.map(Into::into)))
        .collect()
}

/// Format and print results to stdout.
pub fn print_results(results: &[ResultRow], format: OutputFormat, ascii: bool) {
    let rendered = match format {
        OutputFormat::Table => table::render_table(results, ascii),
        OutputFormat::Json => json::render_json(results),
        OutputFormat::Plain => plain::render_plain(results),
    };
    println!("{}", rendered);
}
