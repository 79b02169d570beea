//! CLI Output Formatting Module
//! Colorized terminal output for update progress and results

use crate::engine::updater::{RuntimeStatus, UpdateEvent, UpdateOutcome};
use colored::Colorize;

pub struct CliFormatter;

impl CliFormatter {
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message);
    }

    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    /// Print a section header
    pub fn header(title: &str) {
        println!("\n{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(title.len()).bright_black());
    }

    /// Print a key-value pair
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }

    pub fn item(text: &str) {
        println!("  {} {}", "•".bright_black(), text);
    }

    /// Redraw the download bar in place
    pub fn progress(percent: u8) {
        print!("\r  {} ", "▶".bright_blue());
        print!("[{}] {:>3}%", progress_bar(percent), percent);
        std::io::Write::flush(&mut std::io::stdout()).ok();
        if percent >= 100 {
            println!();
        }
    }

    /// One line per listener event
    pub fn event(event: &UpdateEvent) {
        match event {
            UpdateEvent::Started => Self::info("Download started"),
            UpdateEvent::Progress(percent) => Self::progress(*percent),
            UpdateEvent::Completed => Self::success("Runtime updated"),
            UpdateEvent::Cancelled => Self::warning("Update cancelled"),
            UpdateEvent::Failed(e) => Self::error(&format!("Update failed: {}", e)),
        }
    }

    pub fn outcome(outcome: Option<&UpdateOutcome>) {
        match outcome {
            Some(UpdateOutcome::Completed) => Self::kv("Result", &"completed".green().to_string()),
            Some(UpdateOutcome::Cancelled) => Self::kv("Result", &"cancelled".yellow().to_string()),
            Some(UpdateOutcome::Failed(e)) => Self::kv("Result", &e.to_string().red().to_string()),
            None => Self::kv("Result", "nothing to do"),
        }
    }
}

fn progress_bar(percent: u8) -> String {
    let filled = usize::from(percent.min(100)) / 5;
    format!(
        "{}{}",
        "█".repeat(filled).bright_green(),
        "░".repeat(20 - filled).bright_black()
    )
}

/// Human label for a runtime status
pub fn status_label(status: RuntimeStatus) -> &'static str {
    match status {
        RuntimeStatus::Absent => "not installed",
        RuntimeStatus::PendingFirstUse => "installed, not yet used",
        RuntimeStatus::VersionMismatch => "version mismatch",
        RuntimeStatus::Matched => "up to date",
        RuntimeStatus::Unknown => "unknown",
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500.00 B");
        assert_eq!(format_size(1048576), "1.00 MB");
    }

    #[test]
    fn test_status_label() {
        assert_eq!(status_label(RuntimeStatus::Matched), "up to date");
        assert_eq!(status_label(RuntimeStatus::Absent), "not installed");
    }
}
