//! Logging pipeline errors.

use thiserror::Error;

use crate::logging::filter::FilterError;
use crate::module::ModuleError;
use crate::pool::PoolError;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("unrecognized log level: {0}")]
    UnknownLevel(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("loading log writer module: {0}")]
    LoadWriter(#[source] ModuleError),

    #[error("module '{0}' is not a log writer")]
    NotAWriter(String),

    #[error("opening log writer {writer}: {source}")]
    OpenWriter {
        writer: String,
        #[source]
        source: PoolError,
    },

    #[error("loading log encoder module: {0}")]
    LoadEncoder(#[source] ModuleError),

    #[error("module '{0}' is not a log encoder")]
    NotAnEncoder(String),

    #[error("setting up sink log: {0}")]
    Sink(#[source] Box<LoggingError>),

    #[error("setting up default log: {0}")]
    DefaultLog(#[source] Box<LoggingError>),

    #[error("setting up custom log '{name}': {source}")]
    CustomLog {
        name: String,
        #[source]
        source: Box<LoggingError>,
    },
}
