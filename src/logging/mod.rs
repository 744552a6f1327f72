//! Logging pipeline.
//!
//! # Data Flow
//! ```text
//! Config { logging: { sink: SinkLog, logs: { name → CustomLog } } }
//!     → Logging::open_logs(ctx)
//!         sink writer module opened first (tracing diagnostics)
//!         each CustomLog: level, include/exclude, writer module,
//!         encoder module (loaded through ctx)
//!         → writer opened through the shared WRITERS pool (by writer key)
//!         → LogCore
//!     → discard logs dropped from routing
//!
//! Context::logger(module id)
//!     → Logging::logger: every core whose filter may accept the id
//!     → Logger::info(...) → level gate → filter → sampler → encode → write
//!
//! Context canceled
//!     → on_cancel → release every writer key this configuration opened
//! ```
//!
//! # Design Decisions
//! - The `default` log always exists and becomes the process default log
//!   (`log()`) once its configuration is running
//! - The sink only redirects `tracing` output; it never becomes a log
//! - Writers are pooled, so logs and configurations pointing at the same
//!   destination share one open handle across reloads

pub mod custom_log;
pub mod encoders;
pub mod error;
pub mod filter;
pub mod logger;
pub mod sampling;
pub mod sink;
pub mod writers;

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::lifecycle::Context;
use crate::module::{Registry, RegistryError};
use crate::pool::UsagePool;

pub use custom_log::CustomLog;
pub use encoders::{ConsoleEncoder, Encoder, JsonEncoder, TimeFormat};
pub use error::LoggingError;
pub use filter::{FilterError, NamespaceFilter};
pub use logger::{Entry, LogLevel, Logger};
pub use sampling::{LogSampling, Sampler};
pub use sink::{SinkLog, SinkWriter};
pub use writers::{DiscardWriter, FileWriter, SharedWriter, StderrWriter, StdoutWriter, WriterOpener};

use logger::LogCore;

/// Name of the log that becomes the process default.
pub const DEFAULT_LOG_NAME: &str = "default";

/// Open writers shared by every configuration, keyed by writer key.
pub(crate) static WRITERS: LazyLock<UsagePool<SharedWriter>> =
    LazyLock::new(|| UsagePool::new("log_writers"));

static DEFAULT: LazyLock<ArcSwap<DefaultLog>> =
    LazyLock::new(|| ArcSwap::from_pointee(DefaultLog::initial()));

struct DefaultLog {
    logger: Logger,
    writer_key: String,
    writer_description: String,
}

impl DefaultLog {
    /// Stderr at info level, before any configuration has run.
    fn initial() -> Self {
        let opener = StderrWriter::default();
        let core = LogCore {
            writer: Arc::new(SharedWriter::new(opener.to_string(), Box::new(io::stderr()))),
            encoder: encoders::default_encoder(&opener),
            level: LogLevel::Info,
            filter: NamespaceFilter::default(),
            sampler: None,
            discard: false,
        };
        Self {
            logger: Logger::new("", vec![Arc::new(core)]),
            writer_key: opener.writer_key(),
            writer_description: opener.to_string(),
        }
    }
}

/// The process default logger.
pub fn log() -> Logger {
    DEFAULT.load().logger.clone()
}

/// Register the built-in writer and encoder modules.
pub fn register_modules(registry: &Registry) -> Result<(), RegistryError> {
    writers::register(registry)?;
    encoders::register(registry)?;
    Ok(())
}

/// The logging section of a configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    /// Destination for the process's `tracing` diagnostics.
    pub sink: Option<SinkLog>,

    /// Logs by name. `default` is created if absent.
    pub logs: BTreeMap<String, CustomLog>,

    #[serde(skip)]
    opened: Arc<Mutex<Vec<String>>>,
}

impl Logging {
    /// Provision every log under `ctx`. Writers opened here are released
    /// when `ctx` is canceled, including after a partial failure.
    pub fn open_logs(&mut self, ctx: &Context) -> Result<(), LoggingError> {
        let opened = Arc::clone(&self.opened);
        ctx.on_cancel(move || close_writers(&opened));

        if let Some(sink) = self.sink.as_mut() {
            sink.provision(ctx, &self.opened)
                .map_err(|source| LoggingError::Sink(Box::new(source)))?;
        }

        self.logs.entry(DEFAULT_LOG_NAME.to_string()).or_default();

        for (name, log) in self.logs.iter_mut() {
            log.provision(ctx, &self.opened).map_err(|source| {
                if name == DEFAULT_LOG_NAME {
                    LoggingError::DefaultLog(Box::new(source))
                } else {
                    LoggingError::CustomLog {
                        name: name.clone(),
                        source: Box::new(source),
                    }
                }
            })?;
        }

        self.logs
            .retain(|name, log| name == DEFAULT_LOG_NAME || !log.is_discard());

        tracing::debug!(context = %ctx.id(), logs = self.logs.len(), "Logs opened");
        Ok(())
    }

    /// Make this configuration's default log the process default.
    ///
    /// If the destination changes, the previous default announces the
    /// redirect before it is replaced.
    pub fn install_default(&self) {
        let Some(log) = self.logs.get(DEFAULT_LOG_NAME) else {
            return;
        };
        let (Some(core), Some(key), Some(description)) =
            (log.core(), log.writer_key(), log.writer_description())
        else {
            return;
        };

        let new = DefaultLog {
            logger: Logger::new("", vec![Arc::clone(core)]),
            writer_key: key.to_string(),
            writer_description: description.to_string(),
        };

        let old = DEFAULT.load_full();
        if old.writer_key != new.writer_key {
            old.logger
                .with("from", old.writer_description.as_str())
                .with("to", new.writer_description.as_str())
                .info("redirected default logger");
        }
        DEFAULT.store(Arc::new(new));
    }

    /// Point `tracing` diagnostics at this configuration's sink, if any.
    pub fn install_sink(&self) {
        if let Some(sink) = &self.sink {
            sink.install();
        }
    }

    /// Pool key of the sink writer.
    pub fn sink_key(&self) -> Option<&str> {
        self.sink.as_ref().and_then(SinkLog::writer_key)
    }

    /// A logger for module `id`, writing to every log that may accept it.
    pub fn logger(&self, id: &str) -> Logger {
        let cores = self
            .logs
            .values()
            .filter(|log| log.matches_module(id))
            .filter_map(|log| log.core().cloned())
            .collect();
        Logger::new(id, cores)
    }

    /// Names of the logs in the routing set.
    pub fn log_names(&self) -> Vec<&str> {
        self.logs.keys().map(String::as_str).collect()
    }

    /// Pool keys of the writers this configuration holds open.
    pub fn writer_keys(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    /// Release every writer opened by `open_logs`. Runs on cancel.
    pub fn close_logs(&self) {
        close_writers(&self.opened);
    }
}

/// Acquire `opener`'s destination from the shared pool and record its key
/// in `opened`. The flag is true if the writer was already open.
pub(crate) fn open_writer(
    opener: &dyn WriterOpener,
    opened: &Mutex<Vec<String>>,
) -> Result<(Arc<SharedWriter>, bool), LoggingError> {
    let key = opener.writer_key();
    let acquired = WRITERS
        .acquire(&key, || SharedWriter::open(opener).map_err(Into::into))
        .map_err(|source| LoggingError::OpenWriter {
            writer: opener.to_string(),
            source,
        })?;
    opened.lock().push(key);
    Ok(acquired)
}

fn close_writers(opened: &Mutex<Vec<String>>) {
    let keys = std::mem::take(&mut *opened.lock());
    for key in keys {
        if let Err(e) = WRITERS.release(&key) {
            tracing::error!(key = %key, error = %e, "Failed to close log writer");
        }
    }
}
