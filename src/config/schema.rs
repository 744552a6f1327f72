//! Top-level configuration document.
//!
//! The document carries only what the runtime itself interprets: the
//! logging pipeline and the raw table of top-level apps. Everything else
//! is module config, decoded by the modules that own it.

use serde::Deserialize;

use crate::config::raw::ModuleMap;
use crate::logging::Logging;

/// Root configuration document.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Process logging. Absent means a stderr default log at info level.
    pub logging: Option<Logging>,

    /// Top-level singleton modules, keyed by module id (empty namespace).
    pub apps: ModuleMap,
}
