//! Raw module configuration and field declarations.
//!
//! A configurable field holds undecoded module config in one of five shapes.
//! The shape is fixed by the field's Rust type; the field's [`FieldSpec`]
//! tells the loader which namespace the modules live in and, optionally,
//! which key inside each object carries the module's short name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::module::LoadedModule;

/// One module's undecoded configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawConfig(Value);

impl RawConfig {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// True for `null` (or an absent field): the module keeps its zero value.
    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for RawConfig {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Map of module short name (or arbitrary key, with an inline key) → config.
pub type ModuleMap = BTreeMap<String, RawConfig>;

/// The five structural shapes a configurable field may take.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigField {
    /// One inline-named module.
    Single(RawConfig),
    /// Ordered inline-named modules.
    List(Vec<RawConfig>),
    /// Ordered groups of ordered inline-named modules.
    Nested(Vec<Vec<RawConfig>>),
    /// Modules keyed by name, or by arbitrary key with an inline key.
    Map(ModuleMap),
    /// Ordered maps of modules.
    MapList(Vec<ModuleMap>),
}

impl ConfigField {
    pub fn shape(&self) -> &'static str {
        match self {
            ConfigField::Single(_) => "single",
            ConfigField::List(_) => "list",
            ConfigField::Nested(_) => "nested list",
            ConfigField::Map(_) => "map",
            ConfigField::MapList(_) => "list of maps",
        }
    }
}

impl From<RawConfig> for ConfigField {
    fn from(raw: RawConfig) -> Self {
        ConfigField::Single(raw)
    }
}

impl From<Vec<RawConfig>> for ConfigField {
    fn from(raws: Vec<RawConfig>) -> Self {
        ConfigField::List(raws)
    }
}

impl From<Vec<Vec<RawConfig>>> for ConfigField {
    fn from(raws: Vec<Vec<RawConfig>>) -> Self {
        ConfigField::Nested(raws)
    }
}

impl From<ModuleMap> for ConfigField {
    fn from(map: ModuleMap) -> Self {
        ConfigField::Map(map)
    }
}

impl From<Vec<ModuleMap>> for ConfigField {
    fn from(maps: Vec<ModuleMap>) -> Self {
        ConfigField::MapList(maps)
    }
}

/// Loader metadata attached to a configurable field.
///
/// ```ignore
/// const WRITER: FieldSpec = FieldSpec::new("writer")
///     .namespace("logging.writers")
///     .inline_key("output");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: &'static str,
    pub namespace: Option<&'static str>,
    pub inline_key: Option<&'static str>,
}

impl FieldSpec {
    pub const fn new(field: &'static str) -> Self {
        Self {
            field,
            namespace: None,
            inline_key: None,
        }
    }

    pub const fn namespace(self, namespace: &'static str) -> Self {
        Self {
            namespace: Some(namespace),
            ..self
        }
    }

    pub const fn inline_key(self, key: &'static str) -> Self {
        Self {
            inline_key: Some(key),
            ..self
        }
    }

    /// Namespace of the field. A missing namespace is a wiring defect.
    pub(crate) fn require_namespace(&self) -> &'static str {
        match self.namespace {
            Some(namespace) => namespace,
            None => panic!("missing namespace on module field '{}'", self.field),
        }
    }

    /// Inline key of the field, for shapes that cannot carry names in map keys.
    pub(crate) fn require_inline_key(&self, shape: &str) -> &'static str {
        match self.inline_key {
            Some(key) => key,
            None => panic!(
                "unable to determine module names without an inline key for {} field '{}'",
                shape, self.field
            ),
        }
    }
}

/// Loaded modules, mirroring the [`ConfigField`] shape they came from.
#[derive(Debug, Clone)]
pub enum Loaded {
    Single(LoadedModule),
    List(Vec<LoadedModule>),
    Nested(Vec<Vec<LoadedModule>>),
    Map(BTreeMap<String, LoadedModule>),
    MapList(Vec<BTreeMap<String, LoadedModule>>),
}

impl Loaded {
    pub fn into_single(self) -> Option<LoadedModule> {
        match self {
            Loaded::Single(module) => Some(module),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<Vec<LoadedModule>> {
        match self {
            Loaded::List(modules) => Some(modules),
            _ => None,
        }
    }

    pub fn into_nested(self) -> Option<Vec<Vec<LoadedModule>>> {
        match self {
            Loaded::Nested(modules) => Some(modules),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<BTreeMap<String, LoadedModule>> {
        match self {
            Loaded::Map(modules) => Some(modules),
            _ => None,
        }
    }

    pub fn into_map_list(self) -> Option<Vec<BTreeMap<String, LoadedModule>>> {
        match self {
            Loaded::MapList(modules) => Some(modules),
            _ => None,
        }
    }

    /// Every loaded module, in load order.
    pub fn flatten(&self) -> Vec<&LoadedModule> {
        match self {
            Loaded::Single(module) => vec![module],
            Loaded::List(modules) => modules.iter().collect(),
            Loaded::Nested(groups) => groups.iter().flatten().collect(),
            Loaded::Map(modules) => modules.values().collect(),
            Loaded::MapList(maps) => maps.iter().flat_map(|map| map.values()).collect(),
        }
    }
}
