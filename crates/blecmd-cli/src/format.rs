//! Output formatting for session reports and stored targets.

use anyhow::Result;
use blecmd_core::{FailureReason, SessionReport, SessionResult, ShutdownTargets};
use owo_colors::OwoColorize;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// Use compact JSON output (no pretty-printing).
    pub compact: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool) -> Self {
        Self {
            no_color,
            compact: false,
        }
    }

    /// Serialize `value` to JSON, honoring the compact setting.
    pub fn as_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        Ok(json + "\n")
    }
}

/// A session report as printed by `send` and `sleep`.
#[derive(Debug, Serialize)]
pub struct CommandOutput<'a> {
    #[serde(flatten)]
    pub report: &'a SessionReport,
    pub attempts: u32,
}

/// Render a result label, colored by outcome.
pub fn format_result(result: &SessionResult, no_color: bool) -> String {
    let label = result.to_string();
    if no_color {
        return label;
    }
    match result {
        SessionResult::Success => label.green().bold().to_string(),
        SessionResult::Timeout => label.yellow().bold().to_string(),
        SessionResult::Failure(FailureReason::Cancelled) => label.yellow().to_string(),
        SessionResult::Failure(_) => label.red().bold().to_string(),
    }
}

pub fn format_report_text(report: &SessionReport, attempts: u32, opts: &FormatOptions) -> String {
    let mut output = String::new();
    let heading = if opts.no_color {
        report.address.to_string()
    } else {
        report.address.to_string().bold().to_string()
    };
    output.push_str(&format!("{}\n", heading));
    output.push_str(&format!(
        "  Result:     {}\n",
        format_result(&report.result, opts.no_color)
    ));
    output.push_str(&format!(
        "  Elapsed:    {} ms\n",
        report.elapsed.as_millis()
    ));
    if attempts > 1 {
        output.push_str(&format!("  Attempts:   {}\n", attempts));
    }
    output.push_str(&format!(
        "  Disconnect: {}\n",
        yes_no(report.disconnect_requested)
    ));
    output.push_str(&format!("  Released:   {}\n", yes_no(report.released)));
    if let Ok(finished) = report.finished_at.format(&Rfc3339) {
        let finished = if opts.no_color {
            finished
        } else {
            finished.dimmed().to_string()
        };
        output.push_str(&format!("  Finished:   {}\n", finished));
    }
    output
}

pub fn format_report_json(
    report: &SessionReport,
    attempts: u32,
    opts: &FormatOptions,
) -> Result<String> {
    opts.as_json(&CommandOutput { report, attempts })
}

pub fn format_targets_text(targets: &ShutdownTargets, opts: &FormatOptions) -> String {
    let none = if opts.no_color {
        "(none)".to_string()
    } else {
        "(none)".dimmed().to_string()
    };
    let machine = targets
        .machine
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| none.clone());
    let scale = targets
        .scale
        .as_ref()
        .map(|s| format!("{} ({})", s.address, s.scale_type))
        .unwrap_or(none);
    format!("Machine: {}\nScale:   {}\n", machine, scale)
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
