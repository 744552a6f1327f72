//! Cancellable module scopes.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::{ModuleMap, RawConfig};
use crate::logging::{Logger, Logging};
use crate::module::{LoadedModule, ModuleError, Registry};
use crate::observability::metrics;

/// State shared by every scope created for one configuration.
struct OwnerConfig {
    apps: Mutex<AppTable>,
    logging: RwLock<Option<Arc<Logging>>>,
    /// Serializes loading across the whole scope tree. Reentrant so a
    /// module may load nested modules or other apps while provisioning.
    load_lock: ReentrantMutex<()>,
}

#[derive(Default)]
struct AppTable {
    raw: ModuleMap,
    loaded: HashMap<String, LoadedModule>,
    provisioning: HashSet<String>,
}

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ScopeState {
    canceled: bool,
    children: Vec<Arc<Scope>>,
    on_cancel: Vec<Callback>,
    instances: Vec<LoadedModule>,
}

struct Scope {
    id: Uuid,
    registry: Arc<Registry>,
    owner: Arc<OwnerConfig>,
    parent: Option<Weak<Scope>>,
    state: Mutex<ScopeState>,
    done: watch::Sender<bool>,
}

impl Scope {
    fn new(registry: Arc<Registry>, owner: Arc<OwnerConfig>, parent: Option<Weak<Scope>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            owner,
            parent,
            state: Mutex::new(ScopeState::default()),
            done: watch::channel(false).0,
        }
    }

    /// Children first, then callbacks, then instance cleanups in load order.
    fn cancel(self: &Arc<Self>) {
        let (children, callbacks, instances) = {
            let mut state = self.state.lock();
            if state.canceled {
                return;
            }
            state.canceled = true;
            (
                std::mem::take(&mut state.children),
                std::mem::take(&mut state.on_cancel),
                std::mem::take(&mut state.instances),
            )
        };
        self.done.send_replace(true);

        for child in &children {
            child.cancel();
        }

        for callback in callbacks {
            callback();
        }

        let cleaned = instances.len();
        for module in instances {
            cleanup_module(&module, self.id);
        }

        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent
                .state
                .lock()
                .children
                .retain(|child| !Arc::ptr_eq(child, self));
        }

        tracing::debug!(context = %self.id, modules = cleaned, "Context canceled");
    }
}

/// Run a module's cleanup, logging failures. Never aborts the caller.
pub(crate) fn cleanup_module(module: &LoadedModule, context: Uuid) {
    let id = module.id().as_str();
    match module.instance().cleanup() {
        Ok(()) => metrics::record_cleanup(id, true),
        Err(e) => {
            metrics::record_cleanup(id, false);
            tracing::error!(module = id, context = %context, error = %e, "Module cleanup failed");
        }
    }
}

/// Cancels the scope it was returned with. Calling it more than once is a no-op.
#[derive(Clone)]
pub struct CancelFunc(Arc<Scope>);

impl CancelFunc {
    pub fn cancel(&self) {
        self.0.cancel();
    }
}

impl fmt::Debug for CancelFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancelFunc").field(&self.0.id).finish()
    }
}

/// Lifetime scope of the modules loaded through it.
///
/// Every instance loaded in a context is tracked there and cleaned up
/// exactly once when the context is canceled. Contexts derived from it
/// share its configuration and are canceled with it.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Scope>,
}

impl Context {
    /// A root context with no top-level apps.
    pub fn new(registry: Arc<Registry>) -> (Context, CancelFunc) {
        Self::with_apps(registry, ModuleMap::new())
    }

    /// A root context for a configuration whose top-level apps are `apps`.
    pub fn with_apps(registry: Arc<Registry>, apps: ModuleMap) -> (Context, CancelFunc) {
        let owner = OwnerConfig {
            apps: Mutex::new(AppTable {
                raw: apps,
                ..AppTable::default()
            }),
            logging: RwLock::new(None),
            load_lock: ReentrantMutex::new(()),
        };
        let scope = Arc::new(Scope::new(registry, Arc::new(owner), None));
        (
            Context {
                inner: Arc::clone(&scope),
            },
            CancelFunc(scope),
        )
    }

    /// A child scope sharing this context's configuration.
    ///
    /// The child is canceled when this context is; a child derived from an
    /// already-canceled context starts out canceled.
    pub fn derive(&self) -> (Context, CancelFunc) {
        let child = Arc::new(Scope::new(
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.owner),
            Some(Arc::downgrade(&self.inner)),
        ));

        let parent_canceled = {
            let mut state = self.inner.state.lock();
            if !state.canceled {
                state.children.push(Arc::clone(&child));
            }
            state.canceled
        };
        if parent_canceled {
            child.cancel();
        }

        (
            Context {
                inner: Arc::clone(&child),
            },
            CancelFunc(child),
        )
    }

    /// Unique id of this scope, used in diagnostics.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.state.lock().canceled
    }

    /// Resolves once the context is canceled.
    pub async fn done(&self) {
        let mut rx = self.inner.done.subscribe();
        let _ = rx.wait_for(|canceled| *canceled).await;
    }

    /// Run `f` when the context is canceled, before instance cleanups.
    /// On an already-canceled context `f` runs immediately.
    pub fn on_cancel<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            if !state.canceled {
                state.on_cancel.push(Box::new(f));
                return;
            }
        }
        f();
    }

    /// Instances of module `id` loaded in this context, in load order.
    pub fn instances(&self, id: &str) -> Vec<LoadedModule> {
        self.inner
            .state
            .lock()
            .instances
            .iter()
            .filter(|module| module.id().as_str() == id)
            .cloned()
            .collect()
    }

    /// Number of instances tracked for cleanup.
    pub fn instance_count(&self) -> usize {
        self.inner.state.lock().instances.len()
    }

    /// Track a freshly loaded instance. A context canceled in the meantime
    /// cleans it up right away instead.
    pub(crate) fn track(&self, module: &LoadedModule) -> Result<(), ModuleError> {
        {
            let mut state = self.inner.state.lock();
            if !state.canceled {
                state.instances.push(module.clone());
                return Ok(());
            }
        }
        cleanup_module(module, self.inner.id);
        Err(ModuleError::Canceled)
    }

    pub(crate) fn load_lock(&self) -> parking_lot::ReentrantMutexGuard<'_, ()> {
        self.inner.owner.load_lock.lock()
    }

    /// The top-level app `name`, loading it on first use.
    ///
    /// The loaded app is cached for the configuration and its raw config
    /// discarded. An app that is not configured loads with its zero value.
    /// An app may not ask for itself while it is being provisioned.
    pub fn app(&self, name: &str) -> Result<LoadedModule, ModuleError> {
        let _loading = self.load_lock();
        let raw = {
            let mut apps = self.inner.owner.apps.lock();
            if let Some(app) = apps.loaded.get(name) {
                return Ok(app.clone());
            }
            if !apps.provisioning.insert(name.to_string()) {
                return Err(ModuleError::AppSelfReference(name.to_string()));
            }
            apps.raw.remove(name).unwrap_or_else(RawConfig::default)
        };

        let result = self.load_module_by_id(name, raw);

        let mut apps = self.inner.owner.apps.lock();
        apps.provisioning.remove(name);
        match result {
            Ok(app) => {
                apps.loaded.insert(name.to_string(), app.clone());
                Ok(app)
            }
            Err(source) => Err(ModuleError::App {
                name: name.to_string(),
                source: Box::new(source),
            }),
        }
    }

    /// Names of the apps loaded so far.
    pub fn loaded_apps(&self) -> Vec<String> {
        let apps = self.inner.owner.apps.lock();
        let mut names: Vec<String> = apps.loaded.keys().cloned().collect();
        names.sort();
        names
    }

    /// Attach the configuration's logging so modules can obtain loggers.
    pub fn set_logging(&self, logging: Arc<Logging>) {
        *self.inner.owner.logging.write() = Some(logging);
    }

    /// A logger named `name`, routed through the configuration's logs, or
    /// through the process default log if none are attached.
    pub fn logger(&self, name: &str) -> Logger {
        match self.inner.owner.logging.read().as_ref() {
            Some(logging) => logging.logger(name),
            None => crate::logging::log().named(name),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{BoxError, Module, ModuleInfo};
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    static SLOW_STARTED: AtomicBool = AtomicBool::new(false);
    static GREETER_PROVISIONS: AtomicUsize = AtomicUsize::new(0);

    /// Takes its time provisioning.
    #[derive(Debug, Default, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct Slow {
        delay_ms: u64,
    }

    impl Module for Slow {
        fn provision(&mut self, _ctx: &Context) -> Result<(), BoxError> {
            SLOW_STARTED.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(self.delay_ms));
            Ok(())
        }
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct Greeter {
        greeting: String,
    }

    impl Module for Greeter {
        fn provision(&mut self, _ctx: &Context) -> Result<(), BoxError> {
            GREETER_PROVISIONS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Asks for itself while provisioning.
    #[derive(Debug, Default, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct Narcissus {}

    impl Module for Narcissus {
        fn provision(&mut self, ctx: &Context) -> Result<(), BoxError> {
            ctx.app("narcissus")?;
            Ok(())
        }
    }

    fn root() -> (Context, CancelFunc) {
        Context::new(Arc::new(Registry::new()))
    }

    fn with_apps(apps: serde_json::Value) -> (Context, CancelFunc) {
        let registry = Registry::new();
        registry.register(ModuleInfo::builder::<Slow>("slow").build()).unwrap();
        registry.register(ModuleInfo::builder::<Greeter>("greeter").build()).unwrap();
        registry.register(ModuleInfo::builder::<Narcissus>("narcissus").build()).unwrap();
        Context::with_apps(Arc::new(registry), serde_json::from_value(apps).unwrap())
    }

    #[test]
    fn test_on_cancel_runs_once_in_order() {
        let (ctx, cancel) = root();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            ctx.on_cancel(move || order.lock().push(i));
        }

        cancel.cancel();
        cancel.cancel();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert!(ctx.is_canceled());
    }

    #[test]
    fn test_on_cancel_after_cancel_runs_immediately() {
        let (ctx, cancel) = root();
        cancel.cancel();

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        ctx.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_cascades_to_children() {
        let (parent, cancel) = root();
        let (child, _child_cancel) = parent.derive();
        let (grandchild, _) = child.derive();

        cancel.cancel();
        assert!(child.is_canceled());
        assert!(grandchild.is_canceled());
    }

    #[test]
    fn test_child_cancel_leaves_parent_running() {
        let (parent, _cancel) = root();
        let (child, child_cancel) = parent.derive();

        child_cancel.cancel();
        assert!(child.is_canceled());
        assert!(!parent.is_canceled());
        assert!(parent.inner.state.lock().children.is_empty());
    }

    #[test]
    fn test_derive_from_canceled_parent() {
        let (parent, cancel) = root();
        cancel.cancel();
        let (child, _) = parent.derive();
        assert!(child.is_canceled());
    }

    #[tokio::test]
    async fn test_done_resolves_on_cancel() {
        let (ctx, cancel) = root();
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.done().await })
        };
        cancel.cancel();
        waiter.await.unwrap();

        // Already canceled: resolves immediately.
        ctx.done().await;
    }

    #[test]
    fn test_unconfigured_app_is_unknown() {
        let (ctx, _cancel) = root();
        let err = ctx.app("nope").unwrap_err();
        assert_eq!(err.to_string(), "loading nope app module: unknown module: nope");
        assert!(ctx.loaded_apps().is_empty());
    }

    #[test]
    fn test_app_is_cached_and_raw_discarded() {
        let (ctx, _cancel) = with_apps(json!({"greeter": {"greeting": "hi"}}));

        let first = ctx.app("greeter").unwrap();
        let second = ctx.app("greeter").unwrap();

        assert!(Arc::ptr_eq(first.instance(), second.instance()));
        assert_eq!(GREETER_PROVISIONS.load(Ordering::SeqCst), 1);
        assert_eq!(first.downcast_ref::<Greeter>().unwrap().greeting, "hi");
        assert!(!ctx.inner.owner.apps.lock().raw.contains_key("greeter"));
        assert_eq!(ctx.loaded_apps(), vec!["greeter".to_string()]);
        assert_eq!(ctx.instance_count(), 1);
    }

    #[test]
    fn test_app_requesting_itself_fails() {
        let (ctx, _cancel) = with_apps(json!({}));

        let err = ctx.app("narcissus").unwrap_err();
        assert_eq!(
            err.to_string(),
            "loading narcissus app module: provision narcissus: \
             app 'narcissus' requested itself during its own provisioning"
        );
        let ModuleError::Provision { source, .. } = err.root() else {
            panic!("expected a provision error, got {err:?}");
        };
        assert!(matches!(
            source.downcast_ref::<ModuleError>(),
            Some(ModuleError::AppSelfReference(name)) if name == "narcissus"
        ));

        // Nothing is cached and the guard is released for the next attempt.
        assert!(ctx.loaded_apps().is_empty());
        assert!(ctx.inner.owner.apps.lock().provisioning.is_empty());
    }

    #[test]
    fn test_concurrent_app_request_waits_for_provisioning() {
        let (ctx, _cancel) = with_apps(json!({"slow": {"delay_ms": 300}}));
        let (child, _child_cancel) = ctx.derive();

        let loader = {
            let ctx = ctx.clone();
            thread::spawn(move || ctx.app("slow"))
        };
        while !SLOW_STARTED.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }

        let waited = child.app("slow").unwrap();
        let loaded = loader.join().unwrap().unwrap();
        assert!(Arc::ptr_eq(waited.instance(), loaded.instance()));
        assert_eq!(ctx.instance_count(), 1);
        assert_eq!(child.instance_count(), 0);
    }
}
