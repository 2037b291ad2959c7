//! Validation report emission: JSON for machines, HTML for review.

use std::path::PathBuf;

use tracing::info;

use crate::error::Result;
use crate::runs::RunContext;

use super::{ValidationReport, ValidationResult};

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn render_table(result: &ValidationResult) -> String {
    let mut rows = String::new();
    for check in &result.checks {
        let status = if check.pass {
            if check.warning.is_some() {
                "warn"
            } else {
                "pass"
            }
        } else {
            "fail"
        };
        rows.push_str(&format!(
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            status,
            html_escape(&check.kind),
            html_escape(check.column.as_deref().unwrap_or("")),
            html_escape(check.source.as_deref().unwrap_or("")),
            html_escape(check.target.as_deref().unwrap_or("")),
            html_escape(
                check
                    .detail
                    .as_deref()
                    .or(check.warning.as_deref())
                    .unwrap_or("")
            ),
        ));
    }

    format!(
        "<h2>{} &rarr; {} — {}</h2>\n\
         <table>\n<tr><th>check</th><th>column</th><th>source</th><th>target</th>\
         <th>detail</th></tr>\n{}</table>\n",
        html_escape(&result.source_table),
        html_escape(&result.target_table),
        if result.pass { "PASS" } else { "FAIL" },
        rows
    )
}

/// Render the HTML summary page.
pub fn render_html(report: &ValidationReport) -> String {
    let tables: String = report.tables.iter().map(render_table).collect();
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
         <title>Validation {}</title>\n\
         <style>\n\
         body {{ font-family: sans-serif; margin: 2em; }}\n\
         table {{ border-collapse: collapse; margin-bottom: 2em; }}\n\
         th, td {{ border: 1px solid #ccc; padding: 4px 10px; text-align: left; }}\n\
         tr.pass td {{ background: #eaf7ea; }}\n\
         tr.warn td {{ background: #fdf6e3; }}\n\
         tr.fail td {{ background: #fbeaea; }}\n\
         </style></head><body>\n\
         <h1>Validation report — {}</h1>\n\
         <p>{} &rarr; {}, level {}, validated at {}</p>\n\
         {}\
         </body></html>\n",
        if report.all_pass { "PASS" } else { "FAIL" },
        if report.all_pass { "ALL PASS" } else { "FAILURES" },
        html_escape(&report.source_engine),
        html_escape(&report.target_engine),
        html_escape(&report.level),
        html_escape(&report.validated_at),
        tables
    )
}

/// Write `summary.json` and `summary.html` under `reports/<run_id>/`.
/// Returns the JSON path.
pub fn write_reports(run: &RunContext, report: &ValidationReport) -> Result<PathBuf> {
    let dir = run.reports_dir();
    std::fs::create_dir_all(&dir)?;

    let json_path = dir.join("summary.json");
    std::fs::write(&json_path, serde_json::to_string_pretty(report)?)?;

    let html_path = dir.join("summary.html");
    std::fs::write(&html_path, render_html(report))?;

    info!(
        json = %json_path.display(),
        html = %html_path.display(),
        "validation reports written"
    );
    Ok(json_path)
}
