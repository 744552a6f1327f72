//! Running whole configurations.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::Config;
use crate::lifecycle::{CancelFunc, Context};
use crate::logging::{Logging, LoggingError};
use crate::module::{BoxError, ModuleError, Registry};
use crate::observability::metrics;

/// A top-level module with a running phase.
///
/// Register app modules with `.provides::<dyn App>(|a| a as Arc<dyn App>)`.
pub trait App: Send + Sync {
    fn start(&self) -> Result<(), BoxError>;
    fn stop(&self) -> Result<(), BoxError>;
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("setting up logging: {0}")]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error("module '{0}' is not an app")]
    NotAnApp(String),

    #[error("{app} app failed to start: {source}")]
    Start {
        app: String,
        #[source]
        source: BoxError,
    },
}

/// A started configuration.
struct Running {
    context: Context,
    cancel: CancelFunc,
    apps: Vec<(String, Arc<dyn App>)>,
    logging: Arc<Logging>,
}

impl Running {
    /// Stop apps in reverse start order, then cancel the context.
    fn shut_down(&self) {
        stop_apps(&self.apps);
        self.cancel.cancel();
        tracing::info!(context = %self.context.id(), "Configuration stopped");
    }
}

fn stop_apps(apps: &[(String, Arc<dyn App>)]) {
    for (name, app) in apps.iter().rev() {
        if let Err(e) = app.stop() {
            tracing::error!(app = %name, error = %e, "App failed to stop");
        }
    }
}

/// Owner of the current configuration.
///
/// `load` builds and starts a new configuration completely before the
/// previous one is stopped, so a failed load leaves the running one intact.
pub struct Runtime {
    registry: Arc<Registry>,
    current: ArcSwapOption<Running>,
    changing: Mutex<()>,
}

impl Runtime {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            current: ArcSwapOption::empty(),
            changing: Mutex::new(()),
        }
    }

    /// Load, provision and start `config`, then replace the running
    /// configuration with it.
    pub fn load(&self, config: Config) -> Result<(), RuntimeError> {
        let _changing = self.changing.lock();

        let running = match self.start(config) {
            Ok(running) => running,
            Err(e) => {
                metrics::record_config_reload(false);
                tracing::error!(error = %e, "Failed to load configuration");
                return Err(e);
            }
        };

        running.logging.install_sink();
        running.logging.install_default();
        let context = running.context.id();
        let apps = running.apps.len();

        if let Some(old) = self.current.swap(Some(Arc::new(running))) {
            old.shut_down();
        }

        metrics::record_config_reload(true);
        tracing::info!(context = %context, apps, "Configuration loaded");
        Ok(())
    }

    /// Stop and tear down the running configuration, if any.
    pub fn stop(&self) {
        let _changing = self.changing.lock();
        if let Some(old) = self.current.swap(None) {
            old.shut_down();
        }
    }

    pub fn is_running(&self) -> bool {
        self.current.load().is_some()
    }

    /// Context of the running configuration.
    pub fn context(&self) -> Option<Context> {
        self.current.load().as_ref().map(|running| running.context.clone())
    }

    fn start(&self, config: Config) -> Result<Running, RuntimeError> {
        let Config { logging, apps } = config;
        let names: Vec<String> = apps.keys().cloned().collect();
        let (context, cancel) = Context::with_apps(Arc::clone(&self.registry), apps);

        match provision(&context, logging.unwrap_or_default(), &names) {
            Ok((logging, apps)) => Ok(Running {
                context,
                cancel,
                apps,
                logging,
            }),
            Err(e) => {
                cancel.cancel();
                Err(e)
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Some(old) = self.current.swap(None) {
            old.shut_down();
        }
    }
}

type Started = (Arc<Logging>, Vec<(String, Arc<dyn App>)>);

fn provision(context: &Context, mut logging: Logging, names: &[String]) -> Result<Started, RuntimeError> {
    logging.open_logs(context)?;
    let logging = Arc::new(logging);
    context.set_logging(Arc::clone(&logging));

    let mut apps = Vec::with_capacity(names.len());
    for name in names {
        let module = context.app(name)?;
        let app = module
            .as_interface::<dyn App>()
            .ok_or_else(|| RuntimeError::NotAnApp(name.clone()))?;
        apps.push((name.clone(), app));
    }

    for (i, (name, app)) in apps.iter().enumerate() {
        if let Err(source) = app.start() {
            stop_apps(&apps[..i]);
            return Err(RuntimeError::Start {
                app: name.clone(),
                source,
            });
        }
        tracing::debug!(app = %name, "App started");
    }

    Ok((logging, apps))
}
