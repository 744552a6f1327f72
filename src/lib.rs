//! Module runtime for a reloadable server.
//!
//! Pluggable modules register under dot-namespaced ids, get loaded from
//! declarative configuration into live instances, share pooled resources,
//! and are torn down exactly once when their configuration is replaced.

// Core subsystems
pub mod config;
pub mod lifecycle;
pub mod module;
pub mod pool;

// Reference consumer
pub mod logging;

// Cross-cutting concerns
pub mod observability;

pub use config::{Config, ConfigField, FieldSpec, Loaded, ModuleMap, RawConfig};
pub use lifecycle::{App, CancelFunc, Context, Runtime, RuntimeError};
pub use module::{BoxError, LoadedModule, Module, ModuleError, ModuleId, ModuleInfo, Registry};
pub use pool::{Destructor, PoolError, UsagePool};
