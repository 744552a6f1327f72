//! Configuration subsystem.
//!
//! # Data Flow
//! ```text
//! config file (JSON, or TOML by extension)
//!     → loader.rs (parse & deserialize)
//!     → Config { logging, apps: raw module table }
//!     → lifecycle::Runtime loads it under a fresh Context
//!
//! Inside a module's config:
//!     raw.rs: RawConfig blobs in one of five ConfigField shapes
//!     → FieldSpec tells the loader the namespace and inline key
//!     → lifecycle::Context::load → Loaded (same shape, live instances)
//!
//! On file change:
//!     watcher.rs detects a content change
//!     → loader.rs decodes the new document
//!     → Runtime::load swaps it in (only if it starts)
//! ```
//!
//! # Design Decisions
//! - Module config stays raw until the owning module is loaded
//! - Unknown fields are errors (closed-world decode)
//! - A document that fails to decode never replaces the running one

pub mod loader;
pub mod raw;
pub mod schema;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError, Format};
pub use raw::{ConfigField, FieldSpec, Loaded, ModuleMap, RawConfig};
pub use schema::Config;
pub use watcher::ConfigWatcher;
