//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Module loader, contexts, pools, runtime:
//!     → tracing events (internal diagnostics)
//!     → metrics.rs (counters and gauges)
//!
//! Module-produced log records go through crate::logging instead.
//! ```

pub mod metrics;
