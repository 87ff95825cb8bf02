//! Reporting sinks
//!
//! Workers and the orchestrator never print directly. They hand a [`Report`]
//! to whatever [`Reporter`] was injected into the run:
//! - [`TracingReporter`] turns reports into `tracing` events
//! - [`ConsoleReporter`] prints colorized lines prefixed with the cluster
//!   (`region/name`)

use std::fmt;
use std::io::Write;

use tracing::{error, info, warn};

/// Where a worker (or the run as a whole) currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Run-level messages outside any single cluster
    Run,
    Fetching,
    Reconciling,
    Updating,
    Polling,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Run => "run",
            Phase::Fetching => "fetching",
            Phase::Reconciling => "reconciling",
            Phase::Updating => "updating",
            Phase::Polling => "polling",
            Phase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Severity of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Info,
    Success,
    Warn,
    Error,
}

/// One status line
#[derive(Debug, Clone, Copy)]
pub struct Report<'a> {
    /// Cluster as `region/name`, `None` for run-level reports
    pub cluster: Option<&'a str>,
    pub phase: Phase,
    pub kind: ReportKind,
    pub message: &'a str,
    pub error: Option<&'a dyn std::error::Error>,
}

impl<'a> Report<'a> {
    pub fn new(kind: ReportKind, phase: Phase, message: &'a str) -> Self {
        Self {
            cluster: None,
            phase,
            kind,
            message,
            error: None,
        }
    }

    pub fn cluster(mut self, cluster: &'a str) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn error(mut self, error: &'a dyn std::error::Error) -> Self {
        self.error = Some(error);
        self
    }
}

/// Sink for worker and orchestrator status
pub trait Reporter: Send + Sync {
    fn report(&self, report: &Report<'_>);
}

// ============================================================================
// Tracing
// ============================================================================

/// Forwards reports as structured `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, r: &Report<'_>) {
        let cluster = r.cluster.unwrap_or("-");
        let phase = r.phase;
        match (r.kind, r.error) {
            (ReportKind::Error, Some(e)) => {
                error!(cluster, %phase, error = %e, "{}", r.message)
            }
            (ReportKind::Error, None) => error!(cluster, %phase, "{}", r.message),
            (ReportKind::Warn, Some(e)) => {
                warn!(cluster, %phase, error = %e, "{}", r.message)
            }
            (ReportKind::Warn, None) => warn!(cluster, %phase, "{}", r.message),
            (ReportKind::Success, _) => info!(cluster, %phase, success = true, "{}", r.message),
            (ReportKind::Info, _) => info!(cluster, %phase, "{}", r.message),
        }
    }
}

// ============================================================================
// Console
// ============================================================================

const RESET: &str = "\x1b[0m";
const CYAN: &str = "\x1b[36m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const MAGENTA: &str = "\x1b[95m";
const ORANGE: &str = "\x1b[38;5;208m";
const SKY: &str = "\x1b[38;5;117m";
const ADDRESS: &str = "\x1b[38;5;39m";

/// Message tint by what the line is about; first match wins
const MESSAGE_TINTS: &[(&str, &str)] = &[
    ("removing", YELLOW),
    ("adding", GREEN),
    ("updated successfully", GREEN),
    ("processed successfully", GREEN),
    ("operation completed", GREEN),
    ("new authorized networks", SKY),
    ("waiting", ORANGE),
    ("update", CYAN),
];

/// Human-facing output: level badge, colored `[cluster]` prefix, message
#[derive(Debug, Clone, Copy)]
pub struct ConsoleReporter {
    color: bool,
}

impl ConsoleReporter {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    /// Render one report without the trailing newline
    pub fn format(&self, r: &Report<'_>) -> String {
        let (label, badge) = match r.kind {
            ReportKind::Info => ("INFO", CYAN),
            ReportKind::Success => ("SUCCESS", GREEN),
            ReportKind::Warn => ("WARN", YELLOW),
            ReportKind::Error => ("ERROR", RED),
        };

        let mut line = String::new();
        line.push_str(&self.paint(badge, label));
        line.push(' ');
        if let Some(cluster) = r.cluster {
            line.push('[');
            line.push_str(&self.paint(&cluster_color(cluster), cluster));
            line.push_str("] ");
        }
        if self.color {
            line.push_str(&highlight(r.message));
        } else {
            line.push_str(r.message);
        }
        if let Some(e) = r.error {
            line.push(' ');
            line.push_str(&self.paint(MAGENTA, &format!("error={}", e)));
        }
        line
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.color {
            format!("{}{}{}", color, text, RESET)
        } else {
            text.to_string()
        }
    }
}

impl Reporter for ConsoleReporter {
    fn report(&self, r: &Report<'_>) {
        let line = self.format(r);
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", line);
    }
}

/// Tint the message by topic and pick out IPv4 addresses and CIDRs
fn highlight(message: &str) -> String {
    let lower = message.to_lowercase();
    let tint = MESSAGE_TINTS
        .iter()
        .find(|(needle, _)| lower.contains(*needle))
        .map(|(_, color)| *color);

    let mut out = String::with_capacity(message.len() + 32);
    out.push_str(tint.unwrap_or(""));
    for (i, word) in message.split(' ').enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let core = word.trim_matches(|c| matches!(c, '[' | ']' | '(' | ')' | ','));
        if core.is_empty() || !is_address(core) {
            out.push_str(word);
            continue;
        }
        let start = word.len() - word.trim_start_matches(|c| matches!(c, '[' | '(')).len();
        out.push_str(&word[..start]);
        out.push_str(ADDRESS);
        out.push_str(core);
        out.push_str(RESET);
        out.push_str(tint.unwrap_or(""));
        out.push_str(&word[start + core.len()..]);
    }
    if tint.is_some() {
        out.push_str(RESET);
    }
    out
}

/// `a.b.c.d` or `a.b.c.d/len`
fn is_address(s: &str) -> bool {
    let (ip, len) = match s.split_once('/') {
        Some((ip, len)) => (ip, Some(len)),
        None => (s, None),
    };
    ip.parse::<std::net::Ipv4Addr>().is_ok()
        && len.map_or(true, |l| l.parse::<u8>().map_or(false, |n| n <= 32))
}

/// Stable ANSI 256-color escape for a cluster name.
///
/// The name is hashed onto a hue, converted at fixed saturation/value and
/// snapped onto the 6x6x6 color cube.
pub fn cluster_color(name: &str) -> String {
    let hue = (fnv1a(name) % 360) as f64;
    let (r, g, b) = hsv_to_rgb(hue, 0.65, 0.95);
    let cube = |x: f64| (x * 5.0).round().clamp(0.0, 5.0) as u8;
    let code = 16 + 36 * cube(r) + 6 * cube(g) + cube(b);
    format!("\x1b[38;5;{}m", code)
}

fn fnv1a(s: &str) -> u32 {
    s.bytes().fold(0x811c_9dc5u32, |h, b| {
        (h ^ u32::from(b)).wrapping_mul(0x0100_0193)
    })
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (f64, f64, f64) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    (r + m, g + m, b + m)
}
