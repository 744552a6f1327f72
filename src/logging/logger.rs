//! Loggers handed to modules, and the cores they write through.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::logging::encoders::Encoder;
use crate::logging::filter::NamespaceFilter;
use crate::logging::sampling::Sampler;
use crate::logging::writers::SharedWriter;
use crate::logging::LoggingError;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Panic,
    Fatal,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Panic => "panic",
            LogLevel::Fatal => "fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    /// Case-insensitive; empty means info.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "" | "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "panic" => Ok(LogLevel::Panic),
            "fatal" => Ok(LogLevel::Fatal),
            _ => Err(LoggingError::UnknownLevel(s.to_string())),
        }
    }
}

/// One record on its way to an encoder.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    pub level: LogLevel,
    pub time: DateTime<Utc>,
    pub logger: &'a str,
    pub message: &'a str,
    pub fields: &'a [(String, Value)],
}

/// A provisioned log: level gate, namespace filter, sampler, encoder, writer.
pub(crate) struct LogCore {
    pub(crate) writer: Arc<SharedWriter>,
    pub(crate) encoder: Arc<dyn Encoder>,
    pub(crate) level: LogLevel,
    pub(crate) filter: NamespaceFilter,
    pub(crate) sampler: Option<Sampler>,
    pub(crate) discard: bool,
}

impl LogCore {
    pub(crate) fn enabled(&self, level: LogLevel) -> bool {
        !self.discard && level >= self.level
    }

    pub(crate) fn write(&self, entry: &Entry<'_>) {
        if !self.enabled(entry.level) || !self.filter.allows(entry.logger) {
            return;
        }
        if let Some(sampler) = &self.sampler {
            if !sampler.sample(entry.level, entry.message) {
                return;
            }
        }

        let line = self.encoder.encode(entry);
        if let Err(e) = self.writer.write_line(&line) {
            tracing::warn!(writer = %self.writer.description(), error = %e, "Failed to write log entry");
        }
    }
}

impl fmt::Debug for LogCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogCore")
            .field("writer", &self.writer.description())
            .field("encoder", &self.encoder)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("sampling", &self.sampler.as_ref().map(Sampler::settings))
            .finish()
    }
}

/// A named logger that writes to every log routed for its name.
#[derive(Clone)]
pub struct Logger {
    name: String,
    fields: Vec<(String, Value)>,
    cores: Arc<[Arc<LogCore>]>,
}

impl Logger {
    pub(crate) fn new(name: impl Into<String>, cores: Vec<Arc<LogCore>>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            cores: cores.into(),
        }
    }

    /// A logger that drops everything.
    pub fn nop() -> Self {
        Self::new("", Vec::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A child logger; names join with a dot.
    pub fn named(&self, name: &str) -> Logger {
        let name = match (self.name.is_empty(), name.is_empty()) {
            (true, _) => name.to_string(),
            (false, true) => self.name.clone(),
            (false, false) => format!("{}.{}", self.name, name),
        };
        Logger {
            name,
            ..self.clone()
        }
    }

    /// A logger that adds `key` to every entry.
    pub fn with(&self, key: &str, value: impl Into<Value>) -> Logger {
        let mut logger = self.clone();
        logger.fields.push((key.to_string(), value.into()));
        logger
    }

    /// Number of logs this logger writes to.
    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        self.cores.iter().any(|core| core.enabled(level))
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if !self.enabled(level) {
            return;
        }
        let entry = Entry {
            level,
            time: Utc::now(),
            logger: &self.name,
            message,
            fields: &self.fields,
        };
        for core in self.cores.iter() {
            core.write(&entry);
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("cores", &self.cores.len())
            .finish()
    }
}
