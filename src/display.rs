// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Terminal presentation helpers.
//!
//! Sizes and speeds are shown in base 1024 with at most two decimals
//! (`1.5 KB`, `2.25 MB/s`). Every status carries a text label next to its
//! color so the output stays readable without color support.

use colored::{ColoredString, Colorize};

use crate::download::{Download, DownloadStats, DownloadStatus};

const BYTE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
const SPEED_UNITS: [&str; 5] = ["B/s", "KB/s", "MB/s", "GB/s", "TB/s"];

fn scaled(value: f64, units: &[&str]) -> String {
    if !value.is_finite() || value <= 0.0 {
        return format!("0 {}", units[0]);
    }
    let exponent = (value.ln() / 1024f64.ln()).floor().max(0.0) as usize;
    let exponent = exponent.min(units.len() - 1);
    let amount = value / 1024f64.powi(exponent as i32);

    let mut text = format!("{:.2}", amount);
    if text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    format!("{} {}", text, units[exponent])
}

/// Human-readable size, e.g. `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    scaled(bytes as f64, &BYTE_UNITS)
}

/// Human-readable throughput, e.g. `2.25 MB/s`.
pub fn format_speed(bytes_per_second: f64) -> String {
    scaled(bytes_per_second, &SPEED_UNITS)
}

/// Status label in its display color.
pub fn status_colored(status: DownloadStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        DownloadStatus::Downloading => label.green(),
        DownloadStatus::Paused => label.yellow(),
        DownloadStatus::Completed => label.bright_green(),
        DownloadStatus::Failed | DownloadStatus::Cancelled => label.red(),
        DownloadStatus::Queued => label.blue(),
    }
}

/// `Active: 2  Completed: 1  Failed: 1  Speed: 1.46 KB/s`
pub fn stats_line(stats: &DownloadStats) -> String {
    format!(
        "Active: {}  Completed: {}  Failed: {}  Speed: {}",
        stats.active.to_string().bold(),
        stats.completed.to_string().bold(),
        stats.failed.to_string().bold(),
        format_speed(stats.total_speed).bold(),
    )
}

/// Progress part of a record line: `512 KB of 1 MB` or just `512 KB`.
pub fn progress_text(record: &Download) -> String {
    match record.file_size {
        Some(size) => format!("{} of {}", format_bytes(record.downloaded_bytes), format_bytes(size)),
        None => format_bytes(record.downloaded_bytes),
    }
}

/// One line per record: id, status, name, progress and, while running, speed.
pub fn record_line(record: &Download) -> String {
    let name = if record.file_name.is_empty() {
        record.url.as_str()
    } else {
        record.file_name.as_str()
    };

    let mut line = format!(
        "{:>4}  {:<11}  {}  {:>5.1}%  {}",
        record.id.as_str().bright_black(),
        status_colored(record.status),
        name.bright_white(),
        record.progress,
        progress_text(record),
    );
    if record.effective_speed() > 0.0 {
        line.push_str(&format!("  {}", format_speed(record.effective_speed()).cyan()));
    }
    if let Some(threads) = record.number_of_threads {
        let plural = if threads == 1 { "" } else { "s" };
        line.push_str(&format!("  {} thread{}", threads, plural).bright_black().to_string());
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1024 * 1024), "1 MB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5 GB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(0.0), "0 B/s");
        assert_eq!(format_speed(1500.0), "1.46 KB/s");
        assert_eq!(format_speed(2.25 * 1024.0 * 1024.0), "2.25 MB/s");
        assert_eq!(format_speed(-3.0), "0 B/s");
        assert_eq!(format_speed(0.5), "0.5 B/s");
    }

    #[test]
    fn test_huge_values_stay_in_largest_unit() {
        assert!(format_bytes(u64::MAX).ends_with(" TB"));
    }

    #[test]
    fn test_progress_text_unknown_size() {
        let mut record = Download::new("1", "https://example.com/f");
        record.downloaded_bytes = 2048;
        assert_eq!(progress_text(&record), "2 KB");

        record.file_size = Some(4096);
        assert_eq!(progress_text(&record), "2 KB of 4 KB");
    }

    #[test]
    fn test_record_line_mentions_name_and_status() {
        colored::control::set_override(false);
        let mut record = Download::new("7", "https://example.com/file.iso");
        record.file_name = "file.iso".to_string();
        record.status = DownloadStatus::Downloading;
        record.download_speed = 1024.0;
        record.number_of_threads = Some(1);

        let line = record_line(&record);
        assert!(line.contains("file.iso"));
        assert!(line.contains("DOWNLOADING"));
        assert!(line.contains("1 KB/s"));
        assert!(line.contains("1 thread"));
        assert!(!line.contains("threads"));
    }
}
