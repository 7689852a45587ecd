//! Output formatting for recording sessions and archive summaries
//!
//! Supports pretty (colored terminal), JSON, and compact formats.

use colored::Colorize;
use serde::Serialize;

use crate::har::{self, Har};
use crate::record::RecordSession;

/// Condensed view of an archive, as shown by `kiroku inspect`
#[derive(Debug, Serialize)]
pub struct ArchiveSummary {
    pub archive: String,
    pub version: String,
    pub creator: String,
    pub total_entries: usize,
    pub failed_entries: usize,
    pub size_mismatches: usize,
    pub entries: Vec<EntrySummary>,
}

#[derive(Debug, Serialize)]
pub struct EntrySummary {
    pub index: usize,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub time_ms: i64,
    pub response_size: i64,
    /// Recorded `headersSize` values agree with the header lists
    pub headers_size_ok: bool,
}

impl ArchiveSummary {
    pub fn from_har(archive: impl Into<String>, har: &Har) -> Self {
        let entries: Vec<EntrySummary> = har
            .log
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| EntrySummary {
                index,
                method: entry.request.method.clone(),
                url: entry.request.url.clone(),
                status: entry.response.status,
                time_ms: entry.time,
                response_size: entry.response.content.size,
                headers_size_ok: size_ok(entry.request.headers_size, &entry.request.headers)
                    && size_ok(entry.response.headers_size, &entry.response.headers),
            })
            .collect();

        Self {
            archive: archive.into(),
            version: har.log.version.clone(),
            creator: format!("{} {}", har.log.creator.name, har.log.creator.version),
            total_entries: entries.len(),
            failed_entries: entries.iter().filter(|e| e.status == 0).count(),
            size_mismatches: entries.iter().filter(|e| !e.headers_size_ok).count(),
            entries,
        }
    }
}

fn size_ok(recorded: i64, headers: &[har::Header]) -> bool {
    recorded == -1 || recorded == har::headers_size(headers)
}

/// Print recording session in pretty format
pub fn print_record_pretty(session: &RecordSession) {
    println!();
    println!("{} {}", "kiroku".bold().cyan(), "traffic capture".dimmed());
    println!("{}", "─".repeat(60).dimmed());
    println!();

    println!("  {} {}", "Archive:".bold(), session.archive);
    println!(
        "  {} {}",
        "Time:".bold(),
        session.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    println!("  {} {}", "Requests:".bold(), session.total_requests);
    println!(
        "  {} {}",
        "Successful:".bold(),
        session.successful.to_string().green()
    );
    if session.failed > 0 {
        println!("  {} {}", "Failed:".bold(), session.failed.to_string().red());
    }
    println!("  {} {}", "Captured:".bold(), session.entries_written);
    println!();

    for result in &session.results {
        let status_str = match result.error {
            Some(_) => "ERR".red().to_string(),
            None => format_status(result.status),
        };

        println!(
            "    {} {} {} {} {}",
            format!("#{}", result.request_index).dimmed(),
            status_str,
            result.method.bold(),
            truncate_url(&result.url, 40),
            format!("{}ms", result.duration_ms).dimmed()
        );

        if let Some(ref error) = result.error {
            println!("      {} {}", "Error:".red(), error);
        }
    }
    println!();

    println!("{}", "─".repeat(60).dimmed());
}

/// Print archive summary in pretty format
pub fn print_summary_pretty(summary: &ArchiveSummary) {
    println!();
    println!("{} {}", "kiroku".bold().cyan(), "archive".dimmed());
    println!("{}", "─".repeat(60).dimmed());
    println!();

    println!("  {} {}", "Archive:".bold(), summary.archive);
    println!("  {} {}", "Creator:".bold(), summary.creator);
    println!("  {} {}", "Format:".bold(), summary.version);
    println!("  {} {}", "Entries:".bold(), summary.total_entries);
    if summary.failed_entries > 0 {
        println!(
            "  {} {}",
            "Failed:".bold(),
            summary.failed_entries.to_string().red()
        );
    }
    if summary.size_mismatches > 0 {
        println!(
            "  {} {}",
            "Header size mismatches:".bold(),
            summary.size_mismatches.to_string().yellow()
        );
    }
    println!();

    for entry in &summary.entries {
        let check = if entry.headers_size_ok {
            "✓".green().to_string()
        } else {
            "!".yellow().to_string()
        };
        println!(
            "    {} {} {} {} {} {}",
            format!("#{}", entry.index).dimmed(),
            check,
            format_status(entry.status),
            entry.method.bold(),
            truncate_url(&entry.url, 40),
            format!("{}ms", entry.time_ms).dimmed()
        );
    }
    if !summary.entries.is_empty() {
        println!();
    }

    println!("{}", "─".repeat(60).dimmed());
}

/// Format status code with color
fn format_status(status: u16) -> String {
    if status == 0 {
        "N/A".dimmed().to_string()
    } else if status >= 500 {
        status.to_string().red().to_string()
    } else if status >= 400 {
        status.to_string().yellow().to_string()
    } else if status >= 300 {
        status.to_string().cyan().to_string()
    } else {
        status.to_string().green().to_string()
    }
}

/// Print recording session as JSON
pub fn print_record_json(session: &RecordSession) -> String {
    serde_json::to_string_pretty(session).unwrap_or_else(|_| "{}".to_string())
}

/// Print archive summary as JSON
pub fn print_summary_json(summary: &ArchiveSummary) -> String {
    serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string())
}

/// Print recording session in compact format
pub fn print_record_compact(session: &RecordSession) -> String {
    let mut parts = vec![format!(
        "{}: {}/{}",
        session.archive, session.successful, session.total_requests
    )];

    if session.failed > 0 {
        parts.push(format!("failed={}", session.failed));
    }
    parts.push(format!("captured={}", session.entries_written));

    parts.join(" ")
}

/// Print archive summary in compact format
pub fn print_summary_compact(summary: &ArchiveSummary) -> String {
    let status = if summary.size_mismatches > 0 {
        "SIZE_MISMATCH"
    } else {
        "OK"
    };

    format!(
        "{}: {} entries={} failed={}",
        summary.archive, status, summary.total_entries, summary.failed_entries
    )
}

/// Truncate a string
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    } else {
        s.to_string()
    }
}

/// Truncate URL, keeping the path visible
fn truncate_url(url: &str, max_len: usize) -> String {
    if url.len() <= max_len {
        return url.to_string();
    }

    if let Ok(parsed) = url::Url::parse(url) {
        let path = parsed.path();
        if path.len() <= max_len {
            return format!("...{}", path);
        }
        return format!("...{}", truncate(path, max_len));
    }

    truncate(url, max_len)
}
