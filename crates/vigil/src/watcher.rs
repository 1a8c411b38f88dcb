//! Server-side ruleset file watching
//!
//! Clients normally watch ruleset files themselves when asked with
//! `vigil/startWatcher`. With `--watch-rulesets` the server also watches them
//! and treats a change like a `workspace/didChangeWatchedFiles` event.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use eyre::{Result, WrapErr};
use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Default debounce before a burst of file events is reported
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

struct Inner {
    debouncer: Debouncer<RecommendedWatcher>,
    watched: BTreeSet<PathBuf>,
}

/// Watches individual ruleset files and reports changed paths on a channel
pub struct RulesetWatcher {
    inner: Mutex<Inner>,
}

impl RulesetWatcher {
    /// Create a watcher that sends each debounced batch of changed paths to
    /// `changes`. Nothing is watched until [`RulesetWatcher::watch`].
    pub fn new(debounce: Duration, changes: UnboundedSender<Vec<PathBuf>>) -> Result<Self> {
        let debouncer = new_debouncer(debounce, move |result: DebounceEventResult| match result {
            Ok(events) => {
                let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
                debug!("ruleset watcher saw {} change(s)", paths.len());
                if changes.send(paths).is_err() {
                    debug!("ruleset change receiver dropped");
                }
            }
            Err(e) => warn!("ruleset watcher error: {}", e),
        })
        .wrap_err("Failed to create file watcher")?;

        Ok(Self {
            inner: Mutex::new(Inner {
                debouncer,
                watched: BTreeSet::new(),
            }),
        })
    }

    /// Start watching `path`. Watching an already watched path is a no-op.
    pub fn watch(&self, path: &Path) -> Result<()> {
        let mut inner = self.inner();
        if inner.watched.contains(path) {
            return Ok(());
        }

        inner
            .debouncer
            .watcher()
            .watch(path, RecursiveMode::NonRecursive)
            .wrap_err_with(|| format!("Failed to watch ruleset file: {}", path.display()))?;
        info!("Watching ruleset file: {}", path.display());
        inner.watched.insert(path.to_path_buf());
        Ok(())
    }

    /// Stop watching everything
    pub fn unwatch_all(&self) {
        let mut inner = self.inner();
        let watched = std::mem::take(&mut inner.watched);
        for path in &watched {
            match inner.debouncer.watcher().unwatch(path) {
                Ok(()) => debug!("Stopped watching: {}", path.display()),
                Err(e) => {
                    // the file may be gone already
                    debug!("Failed to unwatch {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Currently watched paths, sorted
    pub fn watched(&self) -> Vec<PathBuf> {
        self.inner().watched.iter().cloned().collect()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
