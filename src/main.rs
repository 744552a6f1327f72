//! Module runtime host.
//!
//! Loads a configuration document, optionally reloads it when the file
//! changes, and tears everything down on Ctrl-C.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use module_runtime::config::{load_config, Config, ConfigWatcher};
use module_runtime::logging::SinkWriter;
use module_runtime::{Registry, Runtime};

#[derive(Parser)]
#[command(name = "module-runtime")]
#[command(about = "Run a module configuration", long_about = None)]
struct Cli {
    /// Configuration file (JSON, or TOML by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the configuration when the file changes
    #[arg(short, long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "module_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(SinkWriter))
        .init();

    let cli = Cli::parse();
    tracing::info!("module-runtime v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };

    let runtime = Runtime::new(Registry::global());
    runtime.load(config)?;

    // Keep the watcher alive for the lifetime of the process.
    let (_watcher, mut updates) = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), Some(updates))
        }
        _ => (None, None),
    };

    loop {
        tokio::select! {
            Some(config) = next_update(&mut updates) => {
                if let Err(e) = runtime.load(config) {
                    tracing::error!(error = %e, "Reload failed. Keeping current configuration.");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    runtime.stop();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn next_update(
    updates: &mut Option<tokio::sync::mpsc::UnboundedReceiver<Config>>,
) -> Option<Config> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
