//! CLI-side helpers: styled output (no-op styling when stdout isn't a TTY) and report rendering.

use std::env;
use std::io::IsTerminal;

use colored::Colorize;
use pkgmirror_core::{CrawlReport, ToolMirrorReport};

pub fn use_color() -> bool {
    std::io::stdout().is_terminal() && env::var("NO_COLOR").unwrap_or_default().is_empty()
}

pub fn success(msg: &str) {
    if use_color() {
        println!("{}", msg.green());
    } else {
        println!("{}", msg);
    }
}

pub fn error(msg: &str) {
    if use_color() {
        eprintln!("{}", msg.red());
    } else {
        eprintln!("{}", msg);
    }
}

pub fn warning(msg: &str) {
    if use_color() {
        eprintln!("{}", msg.yellow());
    } else {
        eprintln!("{}", msg);
    }
}

pub fn info(msg: &str) {
    if use_color() {
        println!("{}", msg.cyan());
    } else {
        println!("{}", msg);
    }
}

pub fn dim(msg: &str) {
    if use_color() {
        println!("{}", msg.dimmed());
    } else {
        println!("{}", msg);
    }
}

/// Human-readable summary of a mirror run.
pub fn print_report(report: Option<&CrawlReport>, tools: Option<&ToolMirrorReport>) {
    if let Some(tools) = tools {
        info(&format!(
            "{}: {} file(s), {} downloaded, {} cached",
            tools.tool, tools.keys, tools.downloaded, tools.cached
        ));
        for failure in &tools.failures {
            warning(&format!("  {}", failure));
        }
    }

    let Some(report) = report else {
        return;
    };
    success(&format!(
        "Mirrored {} package version(s): {} downloaded, {} cached",
        report.total(),
        report.downloaded,
        report.cache_hits
    ));
    if !report.digest_mismatches.is_empty() {
        warning(&format!("{} digest mismatch(es):", report.digest_mismatches.len()));
        for mismatch in &report.digest_mismatches {
            warning(&format!("  {}", mismatch));
        }
    }
    if !report.unverified.is_empty() {
        dim(&format!(
            "{} artifact(s) had no declared digest: {}",
            report.unverified.len(),
            report.unverified.join(", ")
        ));
    }
    if !report.failures.is_empty() {
        warning(&format!("{} specifier(s) could not be mirrored:", report.failures.len()));
        for failure in &report.failures {
            warning(&format!("  {}: {}", failure.spec, failure.error));
        }
    }
    if !report.abandoned.is_empty() {
        warning(&format!(
            "Stopped at the time limit; {} specifier(s) left unvisited. Re-run to continue.",
            report.abandoned.len()
        ));
    }
}

/// JSON form of a mirror run, for `--json`.
pub fn report_json(report: Option<&CrawlReport>, tools: Option<&ToolMirrorReport>) -> String {
    let value = serde_json::json!({
        "packages": report,
        "tools": tools,
    });
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
}
