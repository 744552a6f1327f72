//! Configuration file watcher for hot reload.
//!
//! The parent directory is watched rather than the file itself so that
//! editors which save by renaming a temporary file over the original keep
//! triggering reloads. A change that leaves the file's bytes untouched
//! (touch, duplicate events from one save) does not produce a new document.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::loader::{parse_config, ConfigError, Format};
use crate::config::schema::Config;

/// Watches the configuration file and sends freshly decoded documents.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<Config>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<Config>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();
        // Content already running, so the first no-op event is ignored.
        let last = Arc::new(Mutex::new(fs::read_to_string(&path).ok()));

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) || !concerns(&event, &path) {
                        return;
                    }
                    match reload(&path, &last) {
                        Ok(Some(config)) => {
                            tracing::info!(path = ?path, "Config file changed, reloading");
                            let _ = tx.send(config);
                        }
                        Ok(None) => tracing::debug!(path = ?path, "Config file unchanged"),
                        Err(e) => tracing::error!(
                            path = ?path,
                            error = %e,
                            "Failed to read changed config. Keeping current configuration."
                        ),
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            NotifyConfig::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// True if the event touches the watched file.
fn concerns(event: &Event, path: &Path) -> bool {
    let name = path.file_name();
    event
        .paths
        .iter()
        .any(|changed| changed == path || (name.is_some() && changed.file_name() == name))
}

/// Decode the file if its content differs from the last document sent.
fn reload(path: &Path, last: &Mutex<Option<String>>) -> Result<Option<Config>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut last = last.lock();
    if last.as_deref() == Some(content.as_str()) {
        return Ok(None);
    }
    let config = parse_config(&content, Format::from_path(path))?;
    *last = Some(content);
    Ok(Some(config))
}
