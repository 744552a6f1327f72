//! One configured log: where entries go, how they look, which get through.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::config::{FieldSpec, RawConfig};
use crate::lifecycle::Context;
use crate::logging::encoders::{self, default_encoder, Encoder};
use crate::logging::filter::NamespaceFilter;
use crate::logging::logger::{LogCore, LogLevel};
use crate::logging::sampling::{LogSampling, Sampler};
use crate::logging::writers::{self, DiscardWriter, StderrWriter, WriterOpener};
use crate::logging::{open_writer, LoggingError};

const WRITER: FieldSpec = FieldSpec::new("writer")
    .namespace(writers::NAMESPACE)
    .inline_key("output");

const ENCODER: FieldSpec = FieldSpec::new("encoder")
    .namespace(encoders::NAMESPACE)
    .inline_key("format");

/// A named log's configuration, and its core once provisioned.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CustomLog {
    /// Writer module, named by `output`. Defaults to stderr.
    pub writer: RawConfig,

    /// Encoder module, named by `format`. Defaults to console when the
    /// writer is a standard stream attached to a terminal, JSON otherwise.
    pub encoder: RawConfig,

    /// Minimum level, case-insensitive. Empty means info.
    pub level: String,

    pub sampling: Option<LogSampling>,

    /// Logger namespaces to accept.
    pub include: Vec<String>,

    /// Logger namespaces to reject; `*` for all named loggers, `.` for the
    /// unnamed one.
    pub exclude: Vec<String>,

    #[serde(skip)]
    provisioned: Option<Provisioned>,
}

#[derive(Debug)]
struct Provisioned {
    core: Arc<LogCore>,
    filter: NamespaceFilter,
    writer_key: String,
    writer_description: String,
    discard: bool,
}

impl CustomLog {
    /// Resolve writer and encoder modules, open the writer through the
    /// shared pool and build the core. Every pool key acquired is pushed to
    /// `opened` so the owner can release it.
    pub(crate) fn provision(&mut self, ctx: &Context, opened: &Mutex<Vec<String>>) -> Result<(), LoggingError> {
        let level: LogLevel = self.level.parse()?;
        let filter = NamespaceFilter::new(self.include.clone(), self.exclude.clone())?;

        let (opener, discard): (Arc<dyn WriterOpener>, bool) = if self.writer.is_empty() {
            (Arc::new(StderrWriter::default()), false)
        } else {
            let module = ctx
                .load_single(&WRITER, std::mem::take(&mut self.writer))
                .map_err(LoggingError::LoadWriter)?;
            let opener = module
                .as_interface::<dyn WriterOpener>()
                .ok_or_else(|| LoggingError::NotAWriter(module.id().to_string()))?;
            (opener, module.is::<DiscardWriter>())
        };

        let writer_key = opener.writer_key();
        let (writer, _) = open_writer(&*opener, opened)?;

        let encoder: Arc<dyn Encoder> = if self.encoder.is_empty() {
            default_encoder(&*opener)
        } else {
            let module = ctx
                .load_single(&ENCODER, std::mem::take(&mut self.encoder))
                .map_err(LoggingError::LoadEncoder)?;
            module
                .as_interface::<dyn Encoder>()
                .ok_or_else(|| LoggingError::NotAnEncoder(module.id().to_string()))?
        };

        let core = LogCore {
            writer,
            encoder,
            level,
            filter: filter.clone(),
            sampler: self.sampling.map(Sampler::new),
            discard,
        };
        self.provisioned = Some(Provisioned {
            core: Arc::new(core),
            filter,
            writer_key,
            writer_description: opener.to_string(),
            discard,
        });
        Ok(())
    }

    pub(crate) fn core(&self) -> Option<&Arc<LogCore>> {
        self.provisioned.as_ref().map(|p| &p.core)
    }

    /// True once provisioned with the discard writer.
    pub fn is_discard(&self) -> bool {
        self.provisioned.as_ref().is_some_and(|p| p.discard)
    }

    /// Pool key of the provisioned writer.
    pub fn writer_key(&self) -> Option<&str> {
        self.provisioned.as_ref().map(|p| p.writer_key.as_str())
    }

    pub fn writer_description(&self) -> Option<&str> {
        self.provisioned.as_ref().map(|p| p.writer_description.as_str())
    }

    /// Could a logger for module `id` write to this log?
    pub fn matches_module(&self, id: &str) -> bool {
        self.provisioned
            .as_ref()
            .is_some_and(|p| p.filter.allows_module(id))
    }
}
