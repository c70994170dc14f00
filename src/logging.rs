//! Structured load events and the process logger
//!
//! Loader code reports events such as `tsx:compiled` or `module:loaded` to a
//! [`LogClient`]. Delivery is the client's business: [`LogCrateClient`] forwards
//! to the `log` facade, [`RecordingLogClient`] keeps them for assertions.
//! [`SimpleLogger`] is the colored `log` backend installed by the binary.

use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use parking_lot::Mutex;
use serde_json::Value;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use url::Url;

/// Query parameter that turns on CI logging (`?ci=1`).
pub const CI_LOG_QUERY_PARAM: &str = "ci";

/// Sink for loader events.
pub trait LogClient {
    fn log(&self, event: &str, detail: Value, level: Level);

    fn info(&self, event: &str, detail: Value) {
        self.log(event, detail, Level::Info);
    }

    fn warn(&self, event: &str, detail: Value) {
        self.log(event, detail, Level::Warn);
    }

    fn error(&self, event: &str, detail: Value) {
        self.log(event, detail, Level::Error);
    }
}

/// Forwards events to the `log` facade under the `rwtra::events` target.
///
/// Info and below are dropped unless CI logging is enabled; warnings and
/// errors always go through.
#[derive(Debug, Default)]
pub struct LogCrateClient {
    ci_logging: AtomicBool,
}

impl LogCrateClient {
    pub fn new(ci_logging: bool) -> Self {
        Self {
            ci_logging: AtomicBool::new(ci_logging),
        }
    }

    pub fn set_ci_logging_enabled(&self, enabled: bool) {
        self.ci_logging.store(enabled, Ordering::Relaxed);
    }

    pub fn is_ci_logging_enabled(&self) -> bool {
        self.ci_logging.load(Ordering::Relaxed)
    }
}

impl LogClient for LogCrateClient {
    fn log(&self, event: &str, detail: Value, level: Level) {
        if level > Level::Warn && !self.is_ci_logging_enabled() {
            return;
        }
        log::log!(target: "rwtra::events", level, "{} {}", event, detail);
    }
}

/// A logged event
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub event: String,
    pub detail: Value,
    pub level: Level,
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingLogClient {
    events: Mutex<Vec<LogEvent>>,
}

impl RecordingLogClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    pub fn named(&self, event: &str) -> Vec<LogEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event == event)
            .cloned()
            .collect()
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.events.lock().iter().any(|e| e.event == event)
    }
}

impl LogClient for RecordingLogClient {
    fn log(&self, event: &str, detail: Value, level: Level) {
        self.events.lock().push(LogEvent {
            event: event.to_string(),
            detail,
            level,
        });
    }
}

/// Decide whether info-level events should be emitted.
///
/// Checked in order: the `RWTRA_CI_MODE` override, `?ci=1|true` on the
/// origin, a localhost origin, then the config flag.
pub fn detect_ci_logging(config_flag: bool, origin: &Url) -> bool {
    if let Ok(mode) = std::env::var("RWTRA_CI_MODE") {
        match mode.trim().to_ascii_lowercase().as_str() {
            "1" | "true" => return true,
            "0" | "false" => return false,
            _ => {}
        }
    }
    let query_enabled = origin
        .query_pairs()
        .any(|(k, v)| k == CI_LOG_QUERY_PARAM && (v == "1" || v.eq_ignore_ascii_case("true")));
    if query_enabled {
        return true;
    }
    if matches!(origin.host_str(), Some("localhost") | Some("127.0.0.1")) {
        return true;
    }
    config_flag
}

/// Colored stdout/stderr logger for the `rwtra` binary
pub struct SimpleLogger {
    level: LevelFilter,
    use_colors: bool,
}

impl SimpleLogger {
    pub fn new(level: LevelFilter, use_colors: bool) -> Self {
        Self { level, use_colors }
    }

    fn label(&self, level: Level) -> ColoredString {
        let text = match level {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        if !self.use_colors {
            return text.normal();
        }
        match level {
            Level::Error => text.red().bold(),
            Level::Warn => text.yellow().bold(),
            Level::Info => text.blue().bold(),
            Level::Debug => text.cyan().bold(),
            Level::Trace => text.green().bold(),
        }
    }
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && metadata.target().starts_with("rwtra")
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let target = record.target();
        let output = if self.use_colors {
            format!("[{}] {}: {}", self.label(record.level()), target.dimmed(), record.args())
        } else {
            format!("[{}] {}: {}", self.label(record.level()), target, record.args())
        };
        match record.level() {
            Level::Error | Level::Warn => {
                let _ = writeln!(io::stderr(), "{}", output);
            }
            _ => {
                let _ = writeln!(io::stdout(), "{}", output);
            }
        }
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
    }
}

static LOGGER: std::sync::OnceLock<SimpleLogger> = std::sync::OnceLock::new();

pub fn init_logger(level: LevelFilter, use_colors: bool) -> Result<(), SetLoggerError> {
    let logger = LOGGER.get_or_init(|| SimpleLogger::new(level, use_colors));
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}
