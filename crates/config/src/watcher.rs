//! Hot-reload configuration watcher

use crate::{validate_config, AppConfig, ConfigError, ConfigLoader, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Watches a config file and publishes every valid revision.
///
/// Subscribers get a `watch::Receiver<AppConfig>`; a file that fails to parse
/// or validate is logged and the previous configuration stays in effect.
pub struct ConfigWatcher {
    config: Arc<watch::Sender<AppConfig>>,
    path: PathBuf,
    env_prefix: String,
}

impl ConfigWatcher {
    /// Load and validate the initial configuration
    pub fn new(path: PathBuf, env_prefix: impl Into<String>) -> Result<Self> {
        let env_prefix = env_prefix.into();
        let config = ConfigLoader::from_file_with_env(&path, &env_prefix)?;
        validate_config(&config)?;

        let (tx, _rx) = watch::channel(config);
        Ok(Self {
            config: Arc::new(tx),
            path,
            env_prefix,
        })
    }

    /// Current configuration
    pub fn get_config(&self) -> AppConfig {
        self.config.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AppConfig> {
        self.config.subscribe()
    }

    /// Re-read the file now; returns whether a new configuration was published
    pub fn reload(&self) -> Result<bool> {
        reload(&self.config, &self.path, &self.env_prefix)
    }

    /// Start watching the config file for changes
    ///
    /// Returns a join handle for the watcher task.
    pub fn start_watching(&self) -> Result<JoinHandle<()>> {
        let config = Arc::clone(&self.config);
        let path = self.path.clone();
        let env_prefix = self.env_prefix.clone();

        let (tx, mut rx) = mpsc::channel(100);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if let Err(e) = tx.blocking_send(event) {
                        error!("Failed to send file event: {}", e);
                    }
                }
                Err(e) => error!("File watch error: {}", e),
            },
            notify::Config::default().with_poll_interval(Duration::from_secs(2)),
        )
        .map_err(|e| ConfigError::WatchError(e.to_string()))?;

        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::WatchError(e.to_string()))?;

        info!(path = %path.display(), "Started watching config file");

        let handle = tokio::spawn(async move {
            // dropping the watcher stops the events
            let _watcher = watcher;

            while let Some(event) = rx.recv().await {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    continue;
                }

                debug!("Config file changed, reloading");
                if let Err(e) = reload(&config, &path, &env_prefix) {
                    warn!(error = %e, "Failed to reload config, keeping the previous one");
                }
            }

            debug!("Config watcher task stopped");
        });

        Ok(handle)
    }

    /// Create a watcher and start watching immediately
    pub fn watch(path: PathBuf, env_prefix: impl Into<String>) -> Result<(Self, JoinHandle<()>)> {
        let watcher = Self::new(path, env_prefix)?;
        let handle = watcher.start_watching()?;
        Ok((watcher, handle))
    }
}

fn reload(config: &watch::Sender<AppConfig>, path: &Path, env_prefix: &str) -> Result<bool> {
    let next = ConfigLoader::from_file_with_env(path, env_prefix)?;
    validate_config(&next)?;

    let changed = config.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });

    if changed {
        info!("Config reloaded");
    }
    Ok(changed)
}
