//! The sink: where the process's own `tracing` diagnostics go.
//!
//! Diagnostics from the runtime and its dependencies bypass the configured
//! logs. A configuration may point them at any writer module; the writer is
//! opened through the same pool as the logs, so a sink and a log naming one
//! file share a single handle.

use std::io::{self, Write};
use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::{FieldSpec, RawConfig};
use crate::lifecycle::Context;
use crate::logging::writers::{self, SharedWriter, WriterOpener};
use crate::logging::{open_writer, LoggingError};

const WRITER: FieldSpec = FieldSpec::new("writer")
    .namespace(writers::NAMESPACE)
    .inline_key("output");

/// The sink currently receiving diagnostics. Stderr when unset or closed.
static SINK: LazyLock<ArcSwapOption<OpenSink>> = LazyLock::new(ArcSwapOption::empty);

/// Sink configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SinkLog {
    /// Writer module, named by `output`. Empty leaves diagnostics where
    /// they are.
    pub writer: RawConfig,

    #[serde(skip)]
    opened: Option<Arc<OpenSink>>,
}

#[derive(Debug)]
struct OpenSink {
    writer: Arc<SharedWriter>,
    key: String,
}

impl SinkLog {
    /// Load the writer module and open its destination through the shared
    /// pool, recording the key in `opened`.
    pub(crate) fn provision(&mut self, ctx: &Context, opened: &Mutex<Vec<String>>) -> Result<(), LoggingError> {
        if self.writer.is_empty() {
            return Ok(());
        }
        let module = ctx
            .load_single(&WRITER, std::mem::take(&mut self.writer))
            .map_err(LoggingError::LoadWriter)?;
        let opener = module
            .as_interface::<dyn WriterOpener>()
            .ok_or_else(|| LoggingError::NotAWriter(module.id().to_string()))?;

        let (writer, _) = open_writer(&*opener, opened)?;
        self.opened = Some(Arc::new(OpenSink {
            writer,
            key: opener.writer_key(),
        }));
        Ok(())
    }

    /// Pool key of the provisioned writer.
    pub fn writer_key(&self) -> Option<&str> {
        self.opened.as_ref().map(|s| s.key.as_str())
    }

    /// Point diagnostics at this sink. A switch to a different destination
    /// is announced on both sides of it.
    pub(crate) fn install(&self) {
        let Some(sink) = &self.opened else {
            return;
        };
        let current = SINK.load_full();
        let redirect = current.as_ref().map(|c| c.key.as_str()) != Some(sink.key.as_str());

        if redirect {
            tracing::info!(to = %sink.writer.description(), "Redirecting sink");
        }
        SINK.store(Some(Arc::clone(sink)));
        if redirect {
            tracing::info!(writer = %sink.writer.description(), "Redirected sink to here");
        }
    }
}

/// A `tracing_subscriber` writer that follows the installed sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinkWriter;

/// One event's handle on the sink, taken when the event is written.
pub struct SinkHandle(Option<Arc<OpenSink>>);

impl<'a> MakeWriter<'a> for SinkWriter {
    type Writer = SinkHandle;

    fn make_writer(&'a self) -> Self::Writer {
        SinkHandle(SINK.load_full())
    }
}

impl Write for SinkHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.0 {
            Some(sink) if !sink.writer.is_closed() => sink.writer.write_line(buf)?,
            _ => io::stderr().write_all(buf)?,
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
