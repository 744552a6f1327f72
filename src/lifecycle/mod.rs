//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Runtime::load(config) (runtime.rs):
//!     Context::with_apps → open logs → Context::app for every app
//!     → App::start → swap in → stop + cancel the previous configuration
//!
//! Loading (loader.rs):
//!     FieldSpec + ConfigField → registry lookup → decode
//!     → provision (may recurse) → validate → tracked by the Context
//!
//! Cancellation (context.rs):
//!     children → on_cancel callbacks → Module::cleanup per instance
//! ```
//!
//! # Design Decisions
//! - Loading within one context is serialized by a reentrant lock, so
//!   provisioning may load nested modules on the same context
//! - Cancellation is synchronous and best-effort: cleanup errors are logged
//!   and draining continues
//! - No automatic rollback of siblings loaded before a failure; the owner
//!   cancels the whole context instead

pub mod context;
pub mod loader;
pub mod runtime;

pub use context::{CancelFunc, Context};
pub use runtime::{App, Runtime, RuntimeError};
