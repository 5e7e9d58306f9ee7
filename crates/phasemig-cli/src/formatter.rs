//! Output formatters for command results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use serde_json::Value;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format rows under the given headers.
    fn format_rows(&self, headers: &[&str], rows: &[Vec<String>]) -> String;

    /// Format a structured document, such as a configuration or a plan.
    fn format_document(&self, document: &Value) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_rows(&self, headers: &[&str], rows: &[Vec<String>]) -> String {
        if rows.is_empty() {
            return "No results".to_string();
        }

        let mut table = Table::new();
        table.set_header(headers.iter().map(|h| Cell::new(*h)).collect::<Vec<_>>());
        for row in rows {
            table.add_row(row.iter().map(Cell::new).collect::<Vec<_>>());
        }

        format!("{}\n{} row(s)", table, rows.len())
    }

    fn format_document(&self, document: &Value) -> String {
        serde_json::to_string_pretty(document).unwrap_or_else(|_| document.to_string())
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_rows(&self, headers: &[&str], rows: &[Vec<String>]) -> String {
        let array: Vec<Value> = rows
            .iter()
            .map(|row| {
                let obj: serde_json::Map<String, Value> = headers
                    .iter()
                    .zip(row)
                    .map(|(h, v)| (h.to_string(), Value::String(v.clone())))
                    .collect();
                Value::Object(obj)
            })
            .collect();
        serde_json::to_string_pretty(&array).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_document(&self, document: &Value) -> String {
        document.to_string()
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({
            "message": message
        })
        .to_string()
    }
}
