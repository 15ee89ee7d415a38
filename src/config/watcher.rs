//! Configuration file watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Delay before re-reading, so editors can finish writing
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches the config file and yields each valid new version
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load `config_path` and start watching it
    pub async fn new(config_path: String) -> Result<(Self, Arc<AppConfig>)> {
        let (tx, rx) = mpsc::channel(10);

        let initial_config = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;
        let initial_config = Arc::new(initial_config);

        let watched_path = config_path.clone();

        // notify callbacks run on their own OS thread
        let runtime_handle = tokio::runtime::Handle::current();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) => {
                debug!("Config file changed: {:?}", event.paths);

                let config_path = watched_path.clone();
                let tx = tx.clone();

                runtime_handle.spawn(async move {
                    tokio::time::sleep(DEBOUNCE).await;

                    match AppConfig::load(&config_path).await {
                        Ok(new_config) => {
                            info!("Configuration reloaded");
                            if let Err(e) = tx.send(new_config).await {
                                error!("Failed to send config update: {}", e);
                            }
                        }
                        Err(e) => {
                            warn!("Failed to reload config (keeping old config): {:#}", e);
                        }
                    }
                });
            }
            Ok(_) => {}
            Err(e) => error!("Watch error: {}", e),
        })?;

        watcher
            .watch(Path::new(&config_path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path))?;

        info!("Watching config file: {}", config_path);

        Ok((Self { _watcher: watcher, rx }, initial_config))
    }

    /// Wait for the next valid config; None once the watcher is gone
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}
