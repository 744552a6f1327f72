//! Runtime metrics.
//!
//! # Metrics
//! - `modules_loaded_total` (counter): modules provisioned and validated, by module
//! - `module_load_failures_total` (counter): failed loads, by module and stage
//! - `module_cleanups_total` (counter): cleanups run at cancellation, by module and outcome
//! - `pool_entries` (gauge): live entries in a usage pool, by pool
//! - `config_reloads_total` (counter): configuration loads, by outcome
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; installing an exporter is
//!   left to the embedding host
//! - Without a recorder installed every call is a no-op

/// Failure stage reported by `record_load_failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Lookup,
    Decode,
    Provision,
    Validate,
}

impl LoadStage {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadStage::Lookup => "lookup",
            LoadStage::Decode => "decode",
            LoadStage::Provision => "provision",
            LoadStage::Validate => "validate",
        }
    }
}

pub fn record_module_loaded(module: &str) {
    metrics::counter!("modules_loaded_total", "module" => module.to_string()).increment(1);
}

pub fn record_load_failure(module: &str, stage: LoadStage) {
    metrics::counter!(
        "module_load_failures_total",
        "module" => module.to_string(),
        "stage" => stage.as_str()
    )
    .increment(1);
}

pub fn record_cleanup(module: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    metrics::counter!(
        "module_cleanups_total",
        "module" => module.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_pool_size(pool: &'static str, size: usize) {
    metrics::gauge!("pool_entries", "pool" => pool).set(size as f64);
}

pub fn record_config_reload(ok: bool) {
    let outcome = if ok { "success" } else { "failure" };
    metrics::counter!("config_reloads_total", "outcome" => outcome).increment(1);
}
