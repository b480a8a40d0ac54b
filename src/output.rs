//! Report formatting for read outcomes.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::fault::Fault;
use crate::validate::ValidationWarning;

/// Outcome of reading one document.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReadStatus {
    Valid { element: String },
    Fault { fault: Fault },
}

impl ReadStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, ReadStatus::Valid { .. })
    }
}

/// Full report for one read, renderable as text or JSON.
#[derive(Debug, Clone, Serialize)]
pub struct ReadReport {
    pub file: PathBuf,
    pub schema: Option<String>,
    pub status: ReadStatus,
    pub warnings: Vec<ValidationWarning>,
    pub duration: Duration,
}

/// Simple output formatter for human-readable results
pub struct Output {
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn render(&self, report: &ReadReport, format: OutputFormat) -> String {
        match format {
            OutputFormat::Json => serde_json::to_string_pretty(report)
                .unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e)),
            OutputFormat::Text => self.format_report(report),
        }
    }

    fn format_report(&self, report: &ReadReport) -> String {
        let path_display = report.file.display();
        let duration_str = format_duration(report.duration);

        let mut output = match &report.status {
            ReadStatus::Valid { element } => {
                if self.verbosity == VerbosityLevel::Quiet {
                    return String::new();
                }
                format!(
                    "{}  {} ({}) - {}",
                    self.colorize("✓ VALID", "32"),
                    path_display,
                    duration_str,
                    element
                )
            }
            ReadStatus::Fault { fault } => {
                let (label, color) = if fault.is_schema_violation() {
                    ("✗ INVALID", "31")
                } else if fault.is_malformed_input() {
                    ("✗ MALFORMED", "31")
                } else {
                    ("⚠ ERROR", "33")
                };
                let mut line = format!(
                    "{}  {} ({}) - {}",
                    self.colorize(label, color),
                    path_display,
                    duration_str,
                    fault.message
                );
                if self.verbosity >= VerbosityLevel::Verbose {
                    for cause in &fault.causes {
                        line.push_str(&format!("\n    {}", cause));
                    }
                    if let Some(location) = fault.location {
                        line.push_str(&format!("\n    at {}", location));
                    }
                }
                line
            }
        };

        if !report.warnings.is_empty() && self.verbosity >= VerbosityLevel::Normal {
            output.push_str(&format!(
                "\n  {} {}",
                self.colorize("Warnings:", "33"),
                report.warnings.len()
            ));
            if self.verbosity >= VerbosityLevel::Verbose {
                for warning in &report.warnings {
                    output.push_str(&format!("\n    {}", warning.message));
                }
            }
        }

        if self.verbosity >= VerbosityLevel::Verbose {
            if let Some(schema) = &report.schema {
                output.push_str(&format!("\n  Schema: {}", schema));
            }
        }

        output
    }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
