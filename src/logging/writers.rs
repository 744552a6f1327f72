//! Log destinations.
//!
//! Writer modules describe a destination; opening it is deferred to the
//! logging pipeline, which pools open writers by `writer_key` so that every
//! log pointed at the same destination shares one handle.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::module::{BoxError, Module, ModuleInfo, Registry, RegistryError};
use crate::pool::Destructor;

pub const NAMESPACE: &str = "logging.writers";

pub const STDOUT_KEY: &str = "std:out";
pub const STDERR_KEY: &str = "std:err";

/// A module usable as a log destination.
pub trait WriterOpener: fmt::Display + fmt::Debug + Send + Sync {
    /// Identity of the destination. Equal keys share one open writer.
    fn writer_key(&self) -> String;

    fn open_writer(&self) -> io::Result<Box<dyn Write + Send>>;
}

/// An open destination shared through the writer pool.
pub struct SharedWriter {
    description: String,
    sink: Mutex<Option<Box<dyn Write + Send>>>,
}

impl SharedWriter {
    pub fn new(description: impl Into<String>, sink: Box<dyn Write + Send>) -> Self {
        Self {
            description: description.into(),
            sink: Mutex::new(Some(sink)),
        }
    }

    pub fn open(opener: &dyn WriterOpener) -> io::Result<Self> {
        Ok(Self::new(opener.to_string(), opener.open_writer()?))
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Write one encoded entry. Writes after `close` are dropped.
    pub fn write_line(&self, line: &[u8]) -> io::Result<()> {
        let mut sink = self.sink.lock();
        match sink.as_mut() {
            Some(writer) => {
                writer.write_all(line)?;
                writer.flush()
            }
            None => Ok(()),
        }
    }

    pub fn close(&self) -> io::Result<()> {
        match self.sink.lock().take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sink.lock().is_none()
    }
}

impl Destructor for SharedWriter {
    fn destruct(&self) -> Result<(), BoxError> {
        self.close()?;
        Ok(())
    }
}

impl fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedWriter")
            .field("description", &self.description)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Standard output.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StdoutWriter {}

/// Standard error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StderrWriter {}

/// Drops everything. Logs using it are removed from routing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscardWriter {}

/// Appends to a file, creating it and its parent directories.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileWriter {
    pub filename: String,
}

impl Module for StdoutWriter {}
impl Module for StderrWriter {}
impl Module for DiscardWriter {}

impl Module for FileWriter {
    fn validate(&self) -> Result<(), BoxError> {
        if self.filename.is_empty() {
            return Err("filename is required".into());
        }
        Ok(())
    }
}

impl fmt::Display for StdoutWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stdout")
    }
}

impl fmt::Display for StderrWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stderr")
    }
}

impl fmt::Display for DiscardWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("discard")
    }
}

impl fmt::Display for FileWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filename)
    }
}

impl WriterOpener for StdoutWriter {
    fn writer_key(&self) -> String {
        STDOUT_KEY.to_string()
    }

    fn open_writer(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(io::stdout()))
    }
}

impl WriterOpener for StderrWriter {
    fn writer_key(&self) -> String {
        STDERR_KEY.to_string()
    }

    fn open_writer(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(io::stderr()))
    }
}

impl WriterOpener for DiscardWriter {
    fn writer_key(&self) -> String {
        "discard".to_string()
    }

    fn open_writer(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(io::sink()))
    }
}

impl WriterOpener for FileWriter {
    fn writer_key(&self) -> String {
        format!("file:{}", self.filename)
    }

    fn open_writer(&self) -> io::Result<Box<dyn Write + Send>> {
        let path = Path::new(&self.filename);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(file))
    }
}

pub(crate) fn register(registry: &Registry) -> Result<(), RegistryError> {
    registry.register(
        ModuleInfo::builder::<StdoutWriter>("logging.writers.stdout")
            .provides::<dyn WriterOpener>(|w| w as Arc<dyn WriterOpener>)
            .build(),
    )?;
    registry.register(
        ModuleInfo::builder::<StderrWriter>("logging.writers.stderr")
            .provides::<dyn WriterOpener>(|w| w as Arc<dyn WriterOpener>)
            .build(),
    )?;
    registry.register(
        ModuleInfo::builder::<DiscardWriter>("logging.writers.discard")
            .provides::<dyn WriterOpener>(|w| w as Arc<dyn WriterOpener>)
            .build(),
    )?;
    registry.register(
        ModuleInfo::builder::<FileWriter>("logging.writers.file")
            .provides::<dyn WriterOpener>(|w| w as Arc<dyn WriterOpener>)
            .build(),
    )?;
    Ok(())
}
