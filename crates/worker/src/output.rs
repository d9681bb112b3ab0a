//! Rendering of a finished run for the terminal or for machines.

use std::str::FromStr;

use comfy_table::{Cell, Table};
use fanout_core::outcome::RunReport;
use serde::Serialize;

/// How the run report is printed to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Pretty-printed table followed by a summary line.
    #[default]
    Table,
    /// A single JSON document with the report and its summary.
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("expected 'table' or 'json', got '{other}'")),
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    report: &'a RunReport,
    total: usize,
    succeeded: usize,
    failed: usize,
    all_succeeded: bool,
}

pub fn render(report: &RunReport, format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Table => Ok(render_table(report)),
        OutputFormat::Json => render_json(report),
    }
}

pub fn render_table(report: &RunReport) -> String {
    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
        .set_header(vec!["instance", "status", "rows", "duration (ms)", "error"]);

    for outcome in report.outcomes() {
        table.add_row(vec![
            Cell::new(outcome.instance()),
            Cell::new(if outcome.success() { "ok" } else { "failed" }),
            Cell::new(optional(outcome.rows_affected())),
            Cell::new(optional(outcome.duration_ms())),
            Cell::new(outcome.error().unwrap_or_default()),
        ]);
    }

    let summary = report.summary();
    format!(
        "{table}\n{} of {} instances succeeded, {} failed (run {})",
        summary.succeeded(),
        summary.total,
        summary.failed,
        report.run_id,
    )
}

pub fn render_json(report: &RunReport) -> Result<String, serde_json::Error> {
    let summary = report.summary();
    serde_json::to_string_pretty(&JsonReport {
        report,
        total: summary.total,
        succeeded: summary.succeeded(),
        failed: summary.failed,
        all_succeeded: report.all_succeeded(),
    })
}

fn optional(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
