//! Module subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     ModuleInfo::builder::<T>(id)   (constructor + decoder + interfaces)
//!     → registry.rs (write-once table, id → descriptor)
//!
//! Configuration load:
//!     lifecycle::Context looks up id
//!     → ModuleInfo::new_instance() / decode()   (zero value or strict decode)
//!     → Module::provision / validate
//!     → LoadedModule (shared instance + descriptor)
//!
//! Cancellation:
//!     lifecycle::Context → Module::cleanup on every tracked instance
//! ```
//!
//! # Design Decisions
//! - Capabilities are trait methods with no-op defaults; a module type
//!   declares provision/validate/cleanup by overriding them
//! - Interfaces (writer, encoder, app, ...) are declared on the descriptor
//!   at registration, so callers never guess what an instance can do
//! - Config types decode with `deny_unknown_fields`

pub mod error;
pub mod registry;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::RawConfig;
use crate::lifecycle::Context;

pub use error::{BoxError, ModuleError, RegistryError};
pub use registry::Registry;

/// Dot-namespaced module identifier, e.g. `logging.writers.file`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build a full id from a namespace and a short name.
    /// An empty namespace yields the bare name (top-level apps).
    pub fn join(namespace: &str, name: &str) -> Self {
        if namespace.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}.{}", namespace, name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before the last label.
    pub fn namespace(&self) -> &str {
        match self.0.rfind('.') {
            Some(idx) => &self.0[..idx],
            None => "",
        }
    }

    /// The last label.
    pub fn name(&self) -> &str {
        match self.0.rfind('.') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// True if the id has no empty labels.
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty() && self.0.split('.').all(|label| !label.is_empty())
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Type-erasure helper implemented for every `Send + Sync + 'static` type.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &(dyn Any + Send + Sync);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A pluggable, independently configurable unit.
///
/// All three capabilities are optional: the defaults do nothing and succeed.
pub trait Module: AsAny {
    /// Finish setting up the instance after its config has been decoded.
    /// May load nested modules, register cancel callbacks on `ctx`, and
    /// acquire pooled resources.
    fn provision(&mut self, _ctx: &Context) -> Result<(), BoxError> {
        Ok(())
    }

    /// Check the provisioned instance for configuration errors.
    fn validate(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Release whatever `provision` set up. Called at most once per instance.
    fn cleanup(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

type NewFn = Arc<dyn Fn() -> Box<dyn Module> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(Value) -> Result<Box<dyn Module>, serde_json::Error> + Send + Sync>;

/// Converts a type-erased instance into `Arc<I>`.
struct Upcast<I: ?Sized>(Box<dyn Fn(Arc<dyn Any + Send + Sync>) -> Option<Arc<I>> + Send + Sync>);

/// Module descriptor: id, constructor, decoder and declared interfaces.
pub struct ModuleInfo {
    id: ModuleId,
    new: NewFn,
    decode: DecodeFn,
    interfaces: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ModuleInfo {
    /// Start describing module type `T` under `id`.
    pub fn builder<T>(id: impl Into<String>) -> ModuleInfoBuilder<T>
    where
        T: Module + Default + DeserializeOwned,
    {
        let new: NewFn = Arc::new(|| Box::new(T::default()) as Box<dyn Module>);
        let decode: DecodeFn = Arc::new(|value: Value| -> Result<Box<dyn Module>, serde_json::Error> {
            let module: T = serde_json::from_value(value)?;
            Ok(Box::new(module) as Box<dyn Module>)
        });
        ModuleInfoBuilder {
            info: ModuleInfo {
                id: ModuleId::new(id),
                new,
                decode,
                interfaces: HashMap::new(),
            },
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    /// A zero-value instance.
    pub fn new_instance(&self) -> Box<dyn Module> {
        (self.new)()
    }

    /// Strictly decode `raw` into a fresh instance.
    pub fn decode(&self, raw: RawConfig) -> Result<Box<dyn Module>, serde_json::Error> {
        (self.decode)(raw.into_value())
    }

    /// True if instances of this module can be viewed as `I`.
    pub fn provides<I: ?Sized + 'static>(&self) -> bool {
        self.interfaces.contains_key(&TypeId::of::<I>())
    }
}

impl fmt::Debug for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInfo")
            .field("id", &self.id)
            .field("interfaces", &self.interfaces.len())
            .finish()
    }
}

impl fmt::Display for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Builder returned by [`ModuleInfo::builder`].
pub struct ModuleInfoBuilder<T> {
    info: ModuleInfo,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Module> ModuleInfoBuilder<T> {
    /// Declare that instances of `T` can be viewed as `I`.
    ///
    /// ```ignore
    /// ModuleInfo::builder::<FileWriter>("logging.writers.file")
    ///     .provides::<dyn WriterOpener>(|w| w as Arc<dyn WriterOpener>)
    ///     .build()
    /// ```
    pub fn provides<I: ?Sized + 'static>(mut self, upcast: fn(Arc<T>) -> Arc<I>) -> Self {
        let cast = move |any: Arc<dyn Any + Send + Sync>| any.downcast::<T>().ok().map(upcast);
        self.info
            .interfaces
            .insert(TypeId::of::<I>(), Arc::new(Upcast::<I>(Box::new(cast))));
        self
    }

    pub fn build(self) -> ModuleInfo {
        self.info
    }
}

/// A provisioned, validated module instance returned by the loader.
#[derive(Clone)]
pub struct LoadedModule {
    info: Arc<ModuleInfo>,
    instance: Arc<dyn Module>,
}

impl LoadedModule {
    pub(crate) fn new(info: Arc<ModuleInfo>, instance: Arc<dyn Module>) -> Self {
        Self { info, instance }
    }

    pub fn id(&self) -> &ModuleId {
        self.info.id()
    }

    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    pub fn instance(&self) -> &Arc<dyn Module> {
        &self.instance
    }

    fn any_ref(&self) -> &(dyn Any + Send + Sync) {
        let module: &dyn Module = &*self.instance;
        module.as_any()
    }

    /// True if the instance is a `T`.
    pub fn is<T: Module>(&self) -> bool {
        self.any_ref().is::<T>()
    }

    pub fn downcast_ref<T: Module>(&self) -> Option<&T> {
        self.any_ref().downcast_ref::<T>()
    }

    pub fn downcast<T: Module>(&self) -> Option<Arc<T>> {
        AsAny::into_any(Arc::clone(&self.instance)).downcast::<T>().ok()
    }

    /// View the instance through an interface declared with
    /// [`ModuleInfoBuilder::provides`].
    pub fn as_interface<I: ?Sized + 'static>(&self) -> Option<Arc<I>> {
        let entry = self.info.interfaces.get(&TypeId::of::<I>())?;
        let upcast = entry.downcast_ref::<Upcast<I>>()?;
        (upcast.0)(AsAny::into_any(Arc::clone(&self.instance)))
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule").field("id", self.id()).finish()
    }
}
