//! CLI Output Formatting Module
//! Provides consistent, colorized output for terminal UX

use colored::Colorize;
use serde_json::Value;

use crate::engine::migration::MigrationReport;

pub struct CliFormatter;

impl CliFormatter {
    /// Print a success message
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    /// Print an error message
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    /// Print a warning message
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message);
    }

    /// Print a section header
    pub fn header(title: &str) {
        println!("\n{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(title.chars().count()).bright_black());
    }

    /// Print a key-value pair
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }

    pub fn migration_report(store: &str, report: &MigrationReport) {
        Self::header(&format!("Backfill: {}", store));
        Self::kv("Scanned", &report.scanned.to_string());
        Self::kv("Copied", &report.copied.to_string());
        Self::kv("Already present", &report.scanned.saturating_sub(report.copied).to_string());
    }

    /// Print a record as indented JSON
    pub fn record(value: &Value) {
        let rendered = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        for line in rendered.lines() {
            println!("  {}", line.bright_white());
        }
    }
}

/// Format a copy ratio as a percentage
pub fn format_ratio(part: usize, total: usize) -> String {
    if total == 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", part as f64 / total as f64 * 100.0)
}
