//! Leveled JSON-line logger.
//!
//! Every entry is one JSON object on its own line:
//!
//! ```text
//! {"level":"ERROR","time":"2024-05-01T10:00:00Z","message":"...","properties":{...},"trace":"..."}
//! ```
//!
//! Serialization happens before the sink lock is taken; the lock only covers
//! the write of one complete line, so concurrent callers never interleave.

use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Free-form string properties attached to an entry.
pub type Properties = BTreeMap<String, String>;

/// Severity of a log entry. Ordered: `Info < Error < Fatal < Off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Info,
    Error,
    Fatal,
    Off,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
            LogLevel::Off => "",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(LogLevel::Info),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            "off" | "" => Ok(LogLevel::Off),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}

#[derive(Serialize)]
struct LogEntry<'a> {
    level: LogLevel,
    time: String,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<&'a Properties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<String>,
}

struct Inner {
    out: Mutex<Box<dyn Write + Send>>,
    min_level: LogLevel,
}

/// Thread-safe JSON-line logger. Clones share the same sink.
#[derive(Clone)]
pub struct JsonLogger {
    inner: Arc<Inner>,
}

impl JsonLogger {
    pub fn new(out: impl Write + Send + 'static, min_level: LogLevel) -> Self {
        Self {
            inner: Arc::new(Inner {
                out: Mutex::new(Box::new(out)),
                min_level,
            }),
        }
    }

    /// Logger writing to standard output.
    pub fn stdout(min_level: LogLevel) -> Self {
        Self::new(io::stdout(), min_level)
    }

    pub fn min_level(&self) -> LogLevel {
        self.inner.min_level
    }

    pub fn print_info(&self, message: &str, properties: Option<&Properties>) {
        let _ = self.print(LogLevel::Info, message, properties);
    }

    pub fn print_error(&self, err: &dyn fmt::Display, properties: Option<&Properties>) {
        let _ = self.print(LogLevel::Error, &err.to_string(), properties);
    }

    /// Write a FATAL entry, then terminate the process with exit status 1.
    pub fn print_fatal(&self, err: &dyn fmt::Display, properties: Option<&Properties>) -> ! {
        let _ = self.print(LogLevel::Fatal, &err.to_string(), properties);
        std::process::exit(1)
    }

    /// Write one entry. Returns the number of bytes written, `0` if the
    /// entry was below the minimum level.
    pub fn print(
        &self,
        level: LogLevel,
        message: &str,
        properties: Option<&Properties>,
    ) -> io::Result<usize> {
        if level < self.inner.min_level {
            return Ok(0);
        }

        let entry = LogEntry {
            level,
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            message,
            properties: properties.filter(|p| !p.is_empty()),
            trace: (level >= LogLevel::Error).then(|| Backtrace::force_capture().to_string()),
        };

        let mut line = match serde_json::to_vec(&entry) {
            Ok(line) => line,
            Err(err) => format!(
                "{}: unable to marshal log message: {err}",
                LogLevel::Error
            )
            .into_bytes(),
        };
        line.push(b'\n');

        let mut out = self
            .inner
            .out
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        out.write_all(&line)?;
        out.flush()?;
        Ok(line.len())
    }
}

impl fmt::Debug for JsonLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLogger")
            .field("min_level", &self.inner.min_level)
            .finish_non_exhaustive()
    }
}

/// Forwards `tracing` events into a [`JsonLogger`].
///
/// `ERROR` events become ERROR entries; everything else is INFO. Event
/// fields other than `message` become properties.
pub struct JsonLayer {
    logger: JsonLogger,
}

impl JsonLayer {
    pub fn new(logger: JsonLogger) -> Self {
        Self { logger }
    }
}

impl<S: Subscriber> Layer<S> for JsonLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = if *event.metadata().level() == tracing::Level::ERROR {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        if level < self.logger.min_level() {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        visitor
            .properties
            .insert("target".to_string(), event.metadata().target().to_string());

        let _ = self
            .logger
            .print(level, &visitor.message, Some(&visitor.properties));
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    properties: Properties,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.properties
                .insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.properties
                .insert(field.name().to_string(), format!("{value:?}"));
        }
    }
}
