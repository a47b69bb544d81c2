//! Output formatting for review reports.
//!
//! Supports three output formats:
//! - Pretty: colored terminal output for human readability
//! - JSON: structured output for programmatic consumption
//! - Markdown: a document suitable for pull request comments

use std::fmt::Write as _;

use colored::*;
use serde::{Deserialize, Serialize};

use crate::aggregate::{FindingGroup, Report};
use crate::rules::{self, Finding, Severity, SeverityCounts, PROJECT_SCOPE};

/// Output formats accepted by `--format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Pretty,
    Json,
    Markdown,
}

impl std::str::FromStr for Format {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(Format::Pretty),
            "json" => Ok(Format::Json),
            "markdown" | "md" => Ok(Format::Markdown),
            _ => anyhow::bail!("unknown format: {} (expected pretty, json or markdown)", s),
        }
    }
}

// =============================================================================
// JSON Format
// =============================================================================

/// Top-level JSON document.
#[derive(Serialize, Deserialize)]
pub struct JsonReport {
    pub version: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    pub passed: bool,
    pub cancelled: bool,
    pub files_scanned: usize,
    pub summary: SeverityCounts,
    /// Findings left out by `max_issues_per_file`.
    #[serde(default)]
    pub truncated: usize,
    pub groups: Vec<FindingGroup>,
}

/// Serialize a report as pretty-printed JSON.
pub fn to_json(path: &str, config_path: Option<&str>, report: &Report) -> anyhow::Result<String> {
    let doc = JsonReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        path: path.to_string(),
        config: config_path.map(str::to_string),
        passed: !report.has_blocking_errors,
        cancelled: report.cancelled,
        files_scanned: report.files_scanned,
        summary: report.summary,
        truncated: report.truncated,
        groups: report.groups.clone(),
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Write results in JSON format.
pub fn write_json(path: &str, config_path: Option<&str>, report: &Report) -> anyhow::Result<()> {
    let json = to_json(path, config_path, report)?;
    println!("{}", json);
    Ok(())
}

// =============================================================================
// Markdown Format
// =============================================================================

fn location(f: &Finding) -> String {
    if f.file == PROJECT_SCOPE {
        "(project)".to_string()
    } else if f.line > 0 {
        format!("{}:{}", f.file, f.line)
    } else {
        f.file.clone()
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Render a report as a Markdown document.
pub fn render_markdown(path: &str, report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# freview report for `{}`", path);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "**{}**: {} errors, {} warnings, {} info across {} files",
        if report.has_blocking_errors { "FAILED" } else { "PASSED" },
        report.summary.errors,
        report.summary.warnings,
        report.summary.infos,
        report.files_scanned
    );
    if report.cancelled {
        let _ = writeln!(out);
        let _ = writeln!(out, "_Review was cancelled; results are partial._");
    }
    if report.truncated > 0 {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "_{} findings omitted by max_issues_per_file._",
            report.truncated
        );
    }

    for group in &report.groups {
        let _ = writeln!(out);
        let _ = writeln!(out, "## {}", group.analyzer.title());
        let _ = writeln!(out);
        if group.findings.is_empty() {
            let _ = writeln!(out, "No findings.");
            continue;
        }
        let _ = writeln!(out, "| Severity | Rule | Location | Entity | Message |");
        let _ = writeln!(out, "|---|---|---|---|---|");
        for f in &group.findings {
            let _ = writeln!(
                out,
                "| {} | `{}` | `{}` | {} | {} |",
                f.severity,
                f.rule,
                location(f),
                escape_cell(&f.entity),
                escape_cell(&f.message)
            );
        }
    }
    out
}

pub fn write_markdown(path: &str, report: &Report) {
    print!("{}", render_markdown(path, report));
}

// =============================================================================
// Pretty Format
// =============================================================================

/// Write results in pretty (human-readable) format.
pub fn write_pretty(path: &str, config_path: Option<&str>, report: &Report) {
    // Header
    println!();
    print!("  ");
    print!("{}", "freview".cyan().bold());
    println!(" v{}", env!("CARGO_PKG_VERSION"));
    println!();

    print!("  {}", "Reviewing: ".dimmed());
    println!("{}", path);
    print!("  {}", "Config:    ".dimmed());
    println!("{}", config_path.unwrap_or("(defaults)"));
    print!("  {}", "Files:     ".dimmed());
    println!("{}", report.files_scanned);
    println!();

    for group in &report.groups {
        write_group(group);
    }

    write_final_status(report);
    println!();
}

fn write_group(group: &FindingGroup) {
    print!("  {}", group.analyzer.title().bold());
    if group.findings.is_empty() {
        println!(" {}", "(clean)".green());
        println!();
        return;
    }
    println!(" ({}):", group.findings.len());
    println!();

    for f in &group.findings {
        write_severity_tag(&f.severity);
        print!("   ");
        print!("{:<30}", f.rule.as_str().dimmed());
        if f.file == PROJECT_SCOPE {
            print!("{}", "(project)".blue());
        } else {
            print!("{}", f.file.blue());
            if f.line > 0 {
                print!("{}", format!(":{}", f.line).dimmed());
            }
        }
        println!();

        // Message on next line, indented
        println!("            {}", f.message);
        println!();
    }
}

fn write_severity_tag(severity: &Severity) {
    match severity {
        Severity::Error => print!("    {} ", "ERROR".red()),
        Severity::Warning => print!("    {} ", "WARN ".yellow()),
        Severity::Info => print!("    {} ", "INFO ".blue()),
    }
}

fn write_final_status(report: &Report) {
    let summary = &report.summary;
    print!(
        "  {}",
        format!(
            "{} errors, {} warnings, {} info",
            summary.errors, summary.warnings, summary.infos
        )
        .dimmed()
    );
    print!("  ");
    if report.has_blocking_errors {
        print!("{}", "✗ FAILED".red());
    } else {
        print!("{}", "✓ PASSED".green());
    }
    if report.cancelled {
        print!("  {}", "(cancelled)".yellow());
    }
    println!();
    if report.truncated > 0 {
        println!(
            "  {}",
            format!("{} more findings omitted (max_issues_per_file)", report.truncated).dimmed()
        );
    }
}

// =============================================================================
// Rule listing
// =============================================================================

/// Print every rule with its default severity and owning analyzer.
pub fn write_rules() {
    println!();
    println!("  {}", "Rules".bold());
    println!();
    for (id, info) in rules::catalog() {
        write_severity_tag(&info.severity);
        let area = info.area.map(|a| a.as_str()).unwrap_or("any");
        print!("   {:<34}", id.as_str());
        println!("{}", format!("[{}]", area).dimmed());
        println!("            {}", info.summary);
    }
    println!();
}
