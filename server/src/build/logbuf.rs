//! Bounded build log buffer and line filtering

use std::collections::VecDeque;
use std::sync::Arc;

/// Maximum retained log lines per build
pub const MAX_LOG_LINES: usize = 500;

/// Predicate deciding whether a toolchain output line is retained in the
/// durable log. A display/bandwidth optimization, not a correctness
/// boundary: memory-usage extraction reads the raw stream, never this.
pub type LineFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

const KEYWORDS: [&str; 19] = [
    "Compiling",
    "Linking",
    "Building",
    "RAM:",
    "Flash:",
    "SUCCESS",
    "FAILED",
    "Error",
    "error:",
    "warning:",
    "Library",
    "LDF",
    "Scanning",
    "Found",
    "Checking",
    "Retrieving",
    "esptool",
    "Creating",
    "Merged",
];

/// The stock allow-list filter: compilation progress, size reports,
/// errors and warnings pass; verbose cmake chatter is dropped.
pub fn keyword_filter() -> LineFilter {
    Arc::new(|line: &str| {
        KEYWORDS.iter().any(|kw| line.contains(kw)) || line.starts_with('[') || line.contains('%')
    })
}

/// A filter that retains everything; used by tests.
pub fn unfiltered() -> LineFilter {
    Arc::new(|_: &str| true)
}

/// Owned, append-only log for one build, bounded to the most recent
/// `cap` lines. The owning orchestration task is the only writer;
/// readers see snapshots persisted through the registry.
#[derive(Debug)]
pub struct BuildLog {
    lines: VecDeque<String>,
    cap: usize,
}

impl BuildLog {
    pub fn new(cap: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            cap,
        }
    }

    /// Start from lines already recorded (the initial "queued" line).
    pub fn with_lines(cap: usize, lines: Vec<String>) -> Self {
        let mut log = Self::new(cap);
        for line in lines {
            log.push_line(line);
        }
        log
    }

    /// Append a pre-formatted line, evicting the oldest past capacity.
    pub fn push_line(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > self.cap {
            self.lines.pop_front();
        }
    }

    /// Append a timestamped, leveled line.
    pub fn push(&mut self, level: &str, msg: &str) {
        self.push_line(format_line(level, msg));
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Copy-on-read snapshot in append order.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

/// Format a log line the way build logs are rendered:
/// `[HH:MM:SS] [LEVEL] message`.
pub fn format_line(level: &str, msg: &str) -> String {
    let ts = chrono::Utc::now().format("%H:%M:%S");
    format!("[{}] [{}] {}", ts, level, msg)
}
