//! Plain-text rendering of a batch execution report.

use std::collections::BTreeMap;
use std::fmt::Write;

use kiln_runtime::{ExecutionOutcome, ExecutionReport};

/// Renders the per-file outcomes, per-runtime tallies and, when coverage
/// was collected, statement coverage per file plus the total.
pub fn render_summary(report: &ExecutionReport) -> String {
    let mut out = String::new();
    let executions = report.execution_count();
    let rejected = report.rejection_count();
    let resolved = executions - rejected;

    let _ = writeln!(
        out,
        "{executions} execution{} across {} file{}: {resolved} resolved, {rejected} rejected",
        plural(executions),
        report.files.len(),
        plural(report.files.len()),
    );

    for (file, runs) in &report.files {
        let _ = writeln!(out, "\n{file}");
        for (runtime, outcome) in runs {
            let _ = writeln!(out, "  {runtime}: {}", describe(outcome));
        }
    }

    let tallies = runtime_tallies(report);
    if !tallies.is_empty() {
        let _ = writeln!(out, "\nper runtime:");
        for (runtime, (resolved, rejected)) in tallies {
            let _ = writeln!(out, "  {runtime}: {resolved} resolved, {rejected} rejected");
        }
    }

    if !report.coverage.is_empty() {
        let _ = writeln!(out, "\ncoverage:");
        let mut total_touched = 0usize;
        let mut total_statements = 0usize;
        for (path, coverage) in &report.coverage {
            let touched = coverage.statements.values().filter(|count| **count > 0).count();
            let statements = coverage.statements.len();
            total_touched += touched;
            total_statements += statements;
            let _ = writeln!(
                out,
                "  {path}: {} ({touched}/{statements} statements)",
                percent(touched, statements)
            );
        }
        let _ = writeln!(
            out,
            "  total: {} ({total_touched}/{total_statements} statements)",
            percent(total_touched, total_statements)
        );
    }
    out
}

fn describe(outcome: &ExecutionOutcome) -> String {
    if outcome.is_rejected() {
        match &outcome.error {
            Some(error) => format!("rejected: {}", error.message),
            None => "rejected".to_string(),
        }
    } else {
        "resolved".to_string()
    }
}

fn runtime_tallies(report: &ExecutionReport) -> BTreeMap<&str, (usize, usize)> {
    let mut tallies: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for runs in report.files.values() {
        for (runtime, outcome) in runs {
            let entry = tallies.entry(runtime.as_str()).or_default();
            if outcome.is_rejected() {
                entry.1 += 1;
            } else {
                entry.0 += 1;
            }
        }
    }
    tallies
}

fn percent(touched: usize, total: usize) -> String {
    if total == 0 {
        return "100.0%".to_string();
    }
    format!("{:.1}%", touched as f64 / total as f64 * 100.0)
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}
