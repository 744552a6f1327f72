//! Shared resource pooling.
//!
//! # Data Flow
//! ```text
//! Module provision
//!     → UsagePool::acquire(key, constructor)
//!         first caller constructs, later callers share (refs + 1)
//!
//! Context cancellation
//!     → UsagePool::release(key)
//!         refs - 1; at zero the entry is removed and Destructor::destruct runs
//! ```
//!
//! # Design Decisions
//! - Keys are supplied by the resource (e.g. a writer's identity string),
//!   so two modules configured for the same destination share one value
//! - A failed constructor never leaves an entry behind

pub mod usage;

pub use usage::{Destructor, PoolError, UsagePool};
