//! Module loading and registration errors.

use thiserror::Error;

/// Error type returned by module capabilities.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while registering module descriptors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The id is already taken.
    #[error("module already registered: {0}")]
    Duplicate(String),

    /// The id is empty or has empty labels.
    #[error("malformed module id: '{0}'")]
    InvalidId(String),
}

/// Errors raised while turning raw config into live module instances.
///
/// Positional variants wrap an inner error so that a failure deep inside
/// nested configuration reads like `field 'routes': position 2: key tls: ...`.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// No module is registered under the id.
    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// Strict decode of the module's config failed.
    #[error("decoding module config: {id}: {source}")]
    Decode {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// `Module::provision` failed; `cleanup` holds a follow-up cleanup failure.
    #[error("provision {id}: {source}{}", additionally(.cleanup))]
    Provision {
        id: String,
        #[source]
        source: BoxError,
        cleanup: Option<BoxError>,
    },

    /// `Module::validate` failed; `cleanup` holds a follow-up cleanup failure.
    #[error("{id}: invalid configuration: {source}{}", additionally(.cleanup))]
    Validate {
        id: String,
        #[source]
        source: BoxError,
        cleanup: Option<BoxError>,
    },

    /// The inline key is absent from the module's config object.
    #[error("module name not specified with key '{key}'")]
    MissingModuleName { key: String },

    /// The inline key is present but does not hold a string.
    #[error("module name key '{key}' must hold a string, found {found}")]
    InvalidModuleName { key: String, found: &'static str },

    /// An inline-named config is not a JSON object.
    #[error("module config with inline key '{key}' must be an object, found {found}")]
    NotAnObject { key: String, found: &'static str },

    #[error("position {index}: {source}")]
    AtPosition {
        index: usize,
        #[source]
        source: Box<ModuleError>,
    },

    #[error("key {key}: {source}")]
    AtKey {
        key: String,
        #[source]
        source: Box<ModuleError>,
    },

    #[error("module name '{name}': {source}")]
    AtModuleName {
        name: String,
        #[source]
        source: Box<ModuleError>,
    },

    #[error("loading module '{name}': {source}")]
    Inline {
        name: String,
        #[source]
        source: Box<ModuleError>,
    },

    #[error("field '{field}': {source}")]
    Field {
        field: String,
        #[source]
        source: Box<ModuleError>,
    },

    #[error("loading {name} app module: {source}")]
    App {
        name: String,
        #[source]
        source: Box<ModuleError>,
    },

    /// An app asked for itself while it was still being provisioned.
    #[error("app '{0}' requested itself during its own provisioning")]
    AppSelfReference(String),

    /// The context was canceled before or during the load.
    #[error("context canceled")]
    Canceled,
}

impl ModuleError {
    pub(crate) fn at_position(self, index: usize) -> Self {
        ModuleError::AtPosition {
            index,
            source: Box::new(self),
        }
    }

    pub(crate) fn at_key(self, key: &str) -> Self {
        ModuleError::AtKey {
            key: key.to_string(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping positional wrappers.
    pub fn root(&self) -> &ModuleError {
        match self {
            ModuleError::AtPosition { source, .. }
            | ModuleError::AtKey { source, .. }
            | ModuleError::AtModuleName { source, .. }
            | ModuleError::Inline { source, .. }
            | ModuleError::Field { source, .. }
            | ModuleError::App { source, .. } => source.root(),
            other => other,
        }
    }
}

fn additionally(cleanup: &Option<BoxError>) -> String {
    match cleanup {
        Some(err) => format!("; additionally, cleanup: {}", err),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_context_renders_path() {
        let err = ModuleError::UnknownModule("http.handlers.nope".into())
            .at_position(2)
            .at_key("srv0");
        let err = ModuleError::Field {
            field: "routes".into(),
            source: Box::new(err),
        };

        assert_eq!(
            err.to_string(),
            "field 'routes': key srv0: position 2: unknown module: http.handlers.nope"
        );
        assert!(matches!(err.root(), ModuleError::UnknownModule(_)));
    }

    #[test]
    fn test_cleanup_failure_is_appended() {
        let err = ModuleError::Provision {
            id: "test.mod".into(),
            source: "boom".into(),
            cleanup: Some("stuck".into()),
        };
        assert_eq!(err.to_string(), "provision test.mod: boom; additionally, cleanup: stuck");
    }
}
