//! Probe modules shared by the integration tests.
//!
//! Tests run in parallel inside one binary, so every probe carries a label
//! and counters are kept per label. Use a label unique to the test.

#![allow(dead_code)]

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;

use module_runtime::{
    App, BoxError, Config, Context, FieldSpec, Module, ModuleInfo, RawConfig, Registry,
};

static CLEANUPS: LazyLock<DashMap<String, usize>> = LazyLock::new(DashMap::new);
static EVENTS: LazyLock<Mutex<Vec<String>>> = LazyLock::new(|| Mutex::new(Vec::new()));

/// Namespace of the probe modules.
pub const PROBES: &str = "test.probes";

/// A list field of inline-named probes.
pub const PROBE_LIST: FieldSpec = FieldSpec::new("probes")
    .namespace(PROBES)
    .inline_key("probe");

/// Cleanups recorded for `label`.
pub fn cleanups(label: &str) -> usize {
    CLEANUPS.get(label).map(|count| *count).unwrap_or(0)
}

fn record_cleanup(label: &str) {
    *CLEANUPS.entry(label.to_string()).or_insert(0) += 1;
}

/// App events recorded for `label`, in order, e.g. `["start", "stop"]`.
pub fn events(label: &str) -> Vec<String> {
    let prefix = format!("{}:", label);
    EVENTS
        .lock()
        .iter()
        .filter_map(|event| event.strip_prefix(&prefix).map(str::to_string))
        .collect()
}

/// Every app event, in order, restricted to the given labels.
pub fn events_of(labels: &[&str]) -> Vec<String> {
    EVENTS
        .lock()
        .iter()
        .filter(|event| {
            labels
                .iter()
                .any(|label| event.starts_with(&format!("{}:", label)))
        })
        .cloned()
        .collect()
}

fn record_event(label: &str, event: &str) {
    EVENTS.lock().push(format!("{}:{}", label, event));
}

/// Counts its cleanups.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Counter {
    pub label: String,
}

impl Module for Counter {
    fn cleanup(&self) -> Result<(), BoxError> {
        record_cleanup(&self.label);
        Ok(())
    }
}

/// Fails validation on request and counts its cleanups.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Guard {
    pub label: String,
    pub reject: bool,
}

impl Module for Guard {
    fn validate(&self) -> Result<(), BoxError> {
        if self.reject {
            return Err("rejected".into());
        }
        Ok(())
    }

    fn cleanup(&self) -> Result<(), BoxError> {
        record_cleanup(&self.label);
        Ok(())
    }
}

/// App that loads its probes during provisioning and records start/stop.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Recorder {
    pub label: String,
    pub fail_start: bool,
    pub probes: Vec<RawConfig>,
    /// Written to the app's logger during provisioning.
    pub announce: Option<String>,

    #[serde(skip)]
    pub loaded: Mutex<Vec<String>>,
}

impl Module for Recorder {
    fn provision(&mut self, ctx: &Context) -> Result<(), BoxError> {
        let probes = ctx.load_list(&PROBE_LIST, std::mem::take(&mut self.probes))?;
        *self.loaded.lock() = probes.iter().map(|m| m.id().to_string()).collect();

        if let Some(message) = &self.announce {
            ctx.logger(&self.label).info(message);
        }
        Ok(())
    }

    fn cleanup(&self) -> Result<(), BoxError> {
        record_cleanup(&self.label);
        Ok(())
    }
}

impl App for Recorder {
    fn start(&self) -> Result<(), BoxError> {
        if self.fail_start {
            return Err("refusing to start".into());
        }
        record_event(&self.label, "start");
        Ok(())
    }

    fn stop(&self) -> Result<(), BoxError> {
        record_event(&self.label, "stop");
        Ok(())
    }
}

/// A registry with the built-in logging modules and every probe.
///
/// `Recorder` is registered twice, as apps `recorder` and `relay`, so a
/// configuration can run two of them.
pub fn registry() -> Arc<Registry> {
    let registry = Registry::new();
    module_runtime::logging::register_modules(&registry).unwrap();
    registry
        .register(ModuleInfo::builder::<Counter>("test.probes.counter").build())
        .unwrap();
    registry
        .register(ModuleInfo::builder::<Guard>("test.probes.guard").build())
        .unwrap();
    for id in ["recorder", "relay"] {
        registry
            .register(
                ModuleInfo::builder::<Recorder>(id)
                    .provides::<dyn App>(|app| app as Arc<dyn App>)
                    .build(),
            )
            .unwrap();
    }
    Arc::new(registry)
}

pub fn raw(value: Value) -> RawConfig {
    RawConfig::new(value)
}

pub fn config(value: Value) -> Config {
    serde_json::from_value(value).unwrap()
}
