//! Log entry encoders.

use std::fmt;
use std::io::{self, IsTerminal};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::logging::logger::Entry;
use crate::logging::writers::{WriterOpener, STDERR_KEY, STDOUT_KEY};
use crate::module::{Module, ModuleInfo, Registry, RegistryError};

pub const NAMESPACE: &str = "logging.encoders";

/// Turns an entry into one output line, trailing newline included.
pub trait Encoder: fmt::Debug + Send + Sync {
    fn encode(&self, entry: &Entry<'_>) -> Vec<u8>;
}

/// How timestamps are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFormat {
    UnixSecondsFloat,
    UnixMilliFloat,
    UnixNano,
    Iso8601,
    Rfc3339,
    Wall,
    WallMilli,
}

impl TimeFormat {
    pub fn render(self, time: DateTime<Utc>) -> Value {
        let nanos = f64::from(time.timestamp_subsec_nanos());
        match self {
            TimeFormat::UnixSecondsFloat => Value::from(time.timestamp() as f64 + nanos / 1e9),
            TimeFormat::UnixMilliFloat => {
                Value::from(time.timestamp() as f64 * 1e3 + nanos / 1e6)
            }
            TimeFormat::UnixNano => Value::from(time.timestamp_nanos_opt().unwrap_or_default()),
            TimeFormat::Iso8601 => Value::from(time.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()),
            TimeFormat::Rfc3339 => Value::from(time.to_rfc3339_opts(SecondsFormat::Secs, true)),
            TimeFormat::Wall => Value::from(time.format("%Y/%m/%d %H:%M:%S").to_string()),
            TimeFormat::WallMilli => Value::from(time.format("%Y/%m/%d %H:%M:%S%.3f").to_string()),
        }
    }
}

/// Key names shared by the encoders. An empty key omits that part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncoderKeys {
    pub message_key: Option<String>,
    pub level_key: Option<String>,
    pub time_key: Option<String>,
    pub name_key: Option<String>,
    pub time_format: Option<TimeFormat>,
}

impl EncoderKeys {
    fn key<'a>(configured: &'a Option<String>, default: &'a str) -> Option<&'a str> {
        match configured.as_deref().unwrap_or(default) {
            "" => None,
            key => Some(key),
        }
    }
}

/// One JSON object per line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct JsonEncoder(pub EncoderKeys);

/// Tab-separated human-readable lines; extra fields as trailing JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ConsoleEncoder(pub EncoderKeys);

impl Module for JsonEncoder {}
impl Module for ConsoleEncoder {}

impl Encoder for JsonEncoder {
    fn encode(&self, entry: &Entry<'_>) -> Vec<u8> {
        let keys = &self.0;
        let mut object = Map::new();

        if let Some(key) = EncoderKeys::key(&keys.time_key, "ts") {
            let format = keys.time_format.unwrap_or(TimeFormat::UnixSecondsFloat);
            object.insert(key.to_string(), format.render(entry.time));
        }
        if let Some(key) = EncoderKeys::key(&keys.level_key, "level") {
            object.insert(key.to_string(), Value::from(entry.level.as_str()));
        }
        if let Some(key) = EncoderKeys::key(&keys.name_key, "logger") {
            if !entry.logger.is_empty() {
                object.insert(key.to_string(), Value::from(entry.logger));
            }
        }
        if let Some(key) = EncoderKeys::key(&keys.message_key, "msg") {
            object.insert(key.to_string(), Value::from(entry.message));
        }
        for (key, value) in entry.fields {
            object.entry(key.clone()).or_insert_with(|| value.clone());
        }

        let mut line = Value::Object(object).to_string().into_bytes();
        line.push(b'\n');
        line
    }
}

impl Encoder for ConsoleEncoder {
    fn encode(&self, entry: &Entry<'_>) -> Vec<u8> {
        let keys = &self.0;
        let mut parts: Vec<String> = Vec::with_capacity(5);

        if EncoderKeys::key(&keys.time_key, "ts").is_some() {
            let format = keys.time_format.unwrap_or(TimeFormat::WallMilli);
            parts.push(match format.render(entry.time) {
                Value::String(text) => text,
                other => other.to_string(),
            });
        }
        if EncoderKeys::key(&keys.level_key, "level").is_some() {
            parts.push(entry.level.as_str().to_ascii_uppercase());
        }
        if EncoderKeys::key(&keys.name_key, "logger").is_some() && !entry.logger.is_empty() {
            parts.push(entry.logger.to_string());
        }
        if EncoderKeys::key(&keys.message_key, "msg").is_some() {
            parts.push(entry.message.to_string());
        }
        if !entry.fields.is_empty() {
            let fields: Map<String, Value> = entry.fields.iter().cloned().collect();
            parts.push(Value::Object(fields).to_string());
        }

        let mut line = parts.join("\t").into_bytes();
        line.push(b'\n');
        line
    }
}

/// Console when `writer` is a standard stream attached to a terminal,
/// JSON for everything else, files included.
pub fn default_encoder(writer: &dyn WriterOpener) -> Arc<dyn Encoder> {
    let terminal = match writer.writer_key().as_str() {
        STDERR_KEY => io::stderr().is_terminal(),
        STDOUT_KEY => io::stdout().is_terminal(),
        _ => false,
    };
    if terminal {
        Arc::new(ConsoleEncoder::default())
    } else {
        Arc::new(JsonEncoder::default())
    }
}

pub(crate) fn register(registry: &Registry) -> Result<(), RegistryError> {
    registry.register(
        ModuleInfo::builder::<JsonEncoder>("logging.encoders.json")
            .provides::<dyn Encoder>(|e| e as Arc<dyn Encoder>)
            .build(),
    )?;
    registry.register(
        ModuleInfo::builder::<ConsoleEncoder>("logging.encoders.console")
            .provides::<dyn Encoder>(|e| e as Arc<dyn Encoder>)
            .build(),
    )?;
    Ok(())
}
