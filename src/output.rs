//! CLI output formatting for the `serve` and `transform` commands.
//!
//! Logs go to stderr through `tracing`; this module renders the short
//! human-readable summary that goes to stdout.
//!
//! # Output Format
//!
//! ## Transform
//!
//! ```text
//! photo.png → photo-rotated.png
//!     001 rotate NINETY_DEG: 48.2 KB → 47.9 KB (12 ms)
//!     002 mean filter: 47.9 KB → 45.1 KB (31 ms)
//! Wrote 45.1 KB to photo-rotated.png
//! ```
//!
//! ## Serve
//!
//! ```text
//! Listening on 127.0.0.1:50051
//!     Workers: 10
//!     Max frame: 64.0 MB
//!     Shutdown grace: 5s
//!     Formats: Png, Jpeg, Gif, WebP, Tiff, Bmp
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::config::ServerConfig;
use crate::imaging::supported_formats;
use crate::pipeline::JobReport;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte count: `812 B`, `48.2 KB`, `3.1 MB`.
fn format_bytes(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / MB)
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    format!("{} ms", elapsed.as_millis())
}

fn display_name(path: &Path) -> String {
    path.display().to_string()
}

// ============================================================================
// Transform
// ============================================================================

/// Format the summary of a finished transform job.
pub fn format_transform_report(report: &JobReport) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} → {}",
        display_name(&report.input),
        display_name(&report.output)
    ));

    for (i, stage) in report.stages.iter().enumerate() {
        lines.push(format!(
            "{}{} {}: {} → {} ({})",
            indent(1),
            format_index(i + 1),
            stage.stage,
            format_bytes(stage.input_bytes),
            format_bytes(stage.output_bytes),
            format_elapsed(stage.elapsed)
        ));
    }

    lines.push(format!(
        "Wrote {} to {}",
        format_bytes(report.output_bytes),
        display_name(&report.output)
    ));
    lines
}

pub fn print_transform_report(report: &JobReport) {
    for line in format_transform_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Serve
// ============================================================================

/// Format the startup banner for a bound server.
pub fn format_serve_banner(addr: SocketAddr, config: &ServerConfig) -> Vec<String> {
    vec![
        format!("Listening on {}", addr),
        format!("{}Workers: {}", indent(1), config.workers.max_workers),
        format!(
            "{}Max frame: {}",
            indent(1),
            format_bytes(config.limits.max_frame_bytes)
        ),
        format!(
            "{}Shutdown grace: {}s",
            indent(1),
            config.server.shutdown_grace_secs
        ),
        format!("{}Formats: {}", indent(1), format_formats()),
    ]
}

fn format_formats() -> String {
    supported_formats()
        .iter()
        .map(|format| format!("{format:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn print_serve_banner(addr: SocketAddr, config: &ServerConfig) {
    for line in format_serve_banner(addr, config) {
        println!("{}", line);
    }
}
