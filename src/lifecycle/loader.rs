//! Turning raw module config into provisioned, validated instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::{ConfigField, FieldSpec, Loaded, ModuleMap, RawConfig};
use crate::lifecycle::Context;
use crate::module::{LoadedModule, ModuleError, ModuleId};
use crate::observability::metrics::{self, LoadStage};

impl Context {
    /// Load every module held by a configurable field.
    ///
    /// The result mirrors the field's shape. The first failing module aborts
    /// the rest of the field; modules loaded before it stay tracked by this
    /// context and are cleaned up when it is canceled.
    ///
    /// # Panics
    /// If `spec` has no namespace, or has no inline key for a shape that
    /// needs one (single, list, nested list).
    pub fn load(&self, spec: &FieldSpec, field: impl Into<ConfigField>) -> Result<Loaded, ModuleError> {
        match field.into() {
            ConfigField::Single(raw) => self.load_single(spec, raw).map(Loaded::Single),
            ConfigField::List(raws) => self.load_list(spec, raws).map(Loaded::List),
            ConfigField::Nested(groups) => self.load_nested(spec, groups).map(Loaded::Nested),
            ConfigField::Map(map) => self.load_map(spec, map).map(Loaded::Map),
            ConfigField::MapList(maps) => self.load_map_list(spec, maps).map(Loaded::MapList),
        }
    }

    /// Load one inline-named module.
    pub fn load_single(&self, spec: &FieldSpec, raw: RawConfig) -> Result<LoadedModule, ModuleError> {
        let namespace = spec.require_namespace();
        let key = spec.require_inline_key("single");
        self.load_inline(namespace, key, raw)
            .map_err(|e| in_field(spec, e))
    }

    /// Load an ordered list of inline-named modules.
    pub fn load_list(&self, spec: &FieldSpec, raws: Vec<RawConfig>) -> Result<Vec<LoadedModule>, ModuleError> {
        let namespace = spec.require_namespace();
        let key = spec.require_inline_key("list");
        self.load_inline_list(namespace, key, raws)
            .map_err(|e| in_field(spec, e))
    }

    /// Load ordered groups of inline-named modules.
    pub fn load_nested(
        &self,
        spec: &FieldSpec,
        groups: Vec<Vec<RawConfig>>,
    ) -> Result<Vec<Vec<LoadedModule>>, ModuleError> {
        let namespace = spec.require_namespace();
        let key = spec.require_inline_key("nested list");
        groups
            .into_iter()
            .enumerate()
            .map(|(i, group)| {
                self.load_inline_list(namespace, key, group)
                    .map_err(|e| e.at_position(i))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| in_field(spec, e))
    }

    /// Load a map of modules. Without an inline key the map keys are the
    /// module names; with one, keys are arbitrary and names come from the values.
    pub fn load_map(
        &self,
        spec: &FieldSpec,
        map: ModuleMap,
    ) -> Result<BTreeMap<String, LoadedModule>, ModuleError> {
        let namespace = spec.require_namespace();
        self.load_module_map(namespace, spec.inline_key, map)
            .map_err(|e| in_field(spec, e))
    }

    /// Load an ordered list of module maps.
    pub fn load_map_list(
        &self,
        spec: &FieldSpec,
        maps: Vec<ModuleMap>,
    ) -> Result<Vec<BTreeMap<String, LoadedModule>>, ModuleError> {
        let namespace = spec.require_namespace();
        maps.into_iter()
            .enumerate()
            .map(|(i, map)| {
                self.load_module_map(namespace, spec.inline_key, map)
                    .map_err(|e| e.at_position(i))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| in_field(spec, e))
    }

    /// Instantiate module `id` from `raw`: zero value or strict decode, then
    /// provision, then validate. The instance is tracked by this context.
    ///
    /// A failed provision or validate runs the instance's cleanup before the
    /// error is returned; a cleanup failure is carried in the same error.
    pub fn load_module_by_id(&self, id: &str, raw: RawConfig) -> Result<LoadedModule, ModuleError> {
        let _loading = self.load_lock();
        if self.is_canceled() {
            return Err(ModuleError::Canceled);
        }

        let Some(info) = self.registry().lookup(id) else {
            metrics::record_load_failure(id, LoadStage::Lookup);
            return Err(ModuleError::UnknownModule(id.to_string()));
        };

        let mut instance = if raw.is_empty() {
            info.new_instance()
        } else {
            info.decode(raw).map_err(|source| {
                metrics::record_load_failure(id, LoadStage::Decode);
                ModuleError::Decode {
                    id: id.to_string(),
                    source,
                }
            })?
        };

        if let Err(source) = instance.provision(self) {
            metrics::record_load_failure(id, LoadStage::Provision);
            return Err(ModuleError::Provision {
                id: id.to_string(),
                source,
                cleanup: instance.cleanup().err(),
            });
        }

        if let Err(source) = instance.validate() {
            metrics::record_load_failure(id, LoadStage::Validate);
            return Err(ModuleError::Validate {
                id: id.to_string(),
                source,
                cleanup: instance.cleanup().err(),
            });
        }

        let module = LoadedModule::new(info, Arc::from(instance));
        self.track(&module)?;

        metrics::record_module_loaded(id);
        tracing::debug!(module = id, context = %self.id(), "Module loaded");
        Ok(module)
    }

    fn load_inline(&self, namespace: &str, key: &str, raw: RawConfig) -> Result<LoadedModule, ModuleError> {
        let (name, raw) = take_module_name(key, raw)?;
        let id = ModuleId::join(namespace, &name);
        self.load_module_by_id(id.as_str(), raw)
            .map_err(|source| ModuleError::Inline {
                name,
                source: Box::new(source),
            })
    }

    fn load_inline_list(
        &self,
        namespace: &str,
        key: &str,
        raws: Vec<RawConfig>,
    ) -> Result<Vec<LoadedModule>, ModuleError> {
        raws.into_iter()
            .enumerate()
            .map(|(i, raw)| {
                self.load_inline(namespace, key, raw)
                    .map_err(|e| e.at_position(i))
            })
            .collect()
    }

    fn load_module_map(
        &self,
        namespace: &str,
        inline_key: Option<&str>,
        map: ModuleMap,
    ) -> Result<BTreeMap<String, LoadedModule>, ModuleError> {
        let mut loaded = BTreeMap::new();
        for (key, raw) in map {
            let module = match inline_key {
                None => {
                    let id = ModuleId::join(namespace, &key);
                    self.load_module_by_id(id.as_str(), raw)
                        .map_err(|source| ModuleError::AtModuleName {
                            name: key.clone(),
                            source: Box::new(source),
                        })?
                }
                Some(inline_key) => self
                    .load_inline(namespace, inline_key, raw)
                    .map_err(|e| e.at_key(&key))?,
            };
            loaded.insert(key, module);
        }
        Ok(loaded)
    }
}

fn in_field(spec: &FieldSpec, source: ModuleError) -> ModuleError {
    ModuleError::Field {
        field: spec.field.to_string(),
        source: Box::new(source),
    }
}

/// Split the module name out of an inline-named config object.
fn take_module_name(key: &str, raw: RawConfig) -> Result<(String, RawConfig), ModuleError> {
    let mut object = match raw.into_value() {
        Value::Object(object) => object,
        other => {
            return Err(ModuleError::NotAnObject {
                key: key.to_string(),
                found: kind(&other),
            })
        }
    };

    match object.remove(key) {
        Some(Value::String(name)) => Ok((name, RawConfig::new(Value::Object(object)))),
        Some(other) => Err(ModuleError::InvalidModuleName {
            key: key.to_string(),
            found: kind(&other),
        }),
        None => Err(ModuleError::MissingModuleName {
            key: key.to_string(),
        }),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
