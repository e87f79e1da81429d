//! Structured JSON logger
//!
//! One log line per event, synchronous, deterministic key order
//! (ts, severity, event, then caller fields in given order).

use std::fmt;
use std::io::Write;
use std::sync::Mutex;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

enum Sink {
    Stdout,
    Memory(Mutex<Vec<String>>),
    Disabled,
}

/// Synchronous structured logger.
pub struct Logger {
    min_severity: Severity,
    sink: Sink,
}

impl Logger {
    /// Logger writing JSON lines to stdout.
    pub fn stdout(min_severity: Severity) -> Self {
        Self {
            min_severity,
            sink: Sink::Stdout,
        }
    }

    /// Logger retaining lines in memory; used by tests.
    pub fn memory() -> Self {
        Self {
            min_severity: Severity::Trace,
            sink: Sink::Memory(Mutex::new(Vec::new())),
        }
    }

    /// Logger that drops everything.
    pub fn disabled() -> Self {
        Self {
            min_severity: Severity::Error,
            sink: Sink::Disabled,
        }
    }

    pub fn log(&self, severity: Severity, event: &str, fields: &[(&str, String)]) {
        if severity < self.min_severity {
            return;
        }
        if matches!(self.sink, Sink::Disabled) {
            return;
        }

        let mut map = serde_json::Map::new();
        map.insert(
            "ts".to_string(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
        map.insert(
            "severity".to_string(),
            serde_json::Value::String(severity.as_str().to_string()),
        );
        map.insert(
            "event".to_string(),
            serde_json::Value::String(event.to_string()),
        );
        for (k, v) in fields {
            map.insert(k.to_string(), serde_json::Value::String(v.clone()));
        }
        let line = serde_json::Value::Object(map).to_string();

        match &self.sink {
            Sink::Stdout => {
                let stdout = std::io::stdout();
                let mut handle = stdout.lock();
                let _ = writeln!(handle, "{}", line);
            }
            Sink::Memory(lines) => {
                lines.lock().unwrap().push(line);
            }
            Sink::Disabled => {}
        }
    }

    pub fn trace(&self, event: &str, fields: &[(&str, String)]) {
        self.log(Severity::Trace, event, fields);
    }

    pub fn info(&self, event: &str, fields: &[(&str, String)]) {
        self.log(Severity::Info, event, fields);
    }

    pub fn warn(&self, event: &str, fields: &[(&str, String)]) {
        self.log(Severity::Warn, event, fields);
    }

    pub fn error(&self, event: &str, fields: &[(&str, String)]) {
        self.log(Severity::Error, event, fields);
    }

    /// Lines captured by a memory logger.
    pub fn captured(&self) -> Vec<String> {
        match &self.sink {
            Sink::Memory(lines) => lines.lock().unwrap().clone(),
            _ => Vec::new(),
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Logger::stdout(Severity::Info)
    }
}
