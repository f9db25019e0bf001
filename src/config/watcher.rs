//! Hot reload of per-host settings.
//!
//! Only the `[hosts]` table is live. Buffer and io sizing stay as the
//! transport was built, so a reload publishes the host table alone, and
//! only when it differs from the last table published.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::HostSettings;

/// Host-pattern table as it appears under `[hosts]`.
pub type HostTable = HashMap<String, HostSettings>;

/// Watches a config file and publishes changed host tables.
pub struct HostSettingsWatcher {
    path: PathBuf,
    published: Mutex<Option<HostTable>>,
    updates: mpsc::UnboundedSender<HostTable>,
}

impl HostSettingsWatcher {
    /// Returns the watcher and the receiving end of its host table updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<HostTable>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            published: Mutex::new(None),
            updates,
        };
        (watcher, rx)
    }

    /// Load the file and publish its host table if it changed.
    ///
    /// A file that fails to load or validate is logged and skipped; the
    /// settings in force stay untouched. Returns whether a table was sent.
    pub fn reload(&self) -> bool {
        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Config reload rejected, keeping current host settings");
                return false;
            }
        };

        let mut published = self.published.lock().expect("published host table mutex poisoned");
        if published.as_ref() == Some(&config.hosts) {
            tracing::debug!(path = ?self.path, "Config changed without host settings changes");
            return false;
        }
        *published = Some(config.hosts.clone());
        drop(published);

        tracing::info!(path = ?self.path, patterns = config.hosts.len(), "Host settings reload published");
        self.updates.send(config.hosts).is_ok()
    }

    /// Start watching. Notify delivers events on its own thread.
    ///
    /// The returned watcher must be kept alive for reloads to keep flowing.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) => {
                    self.reload();
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Watching config for host settings changes");
        Ok(watcher)
    }
}
