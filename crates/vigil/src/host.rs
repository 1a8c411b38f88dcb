//! Everything the validation pipeline needs from the editor
//!
//! [`Host`] is the seam between the pipeline and the LSP connection: the
//! session and settings resolver only talk to a `Host`, so tests can drive
//! them with a recording implementation and no client at all.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_lsp::Client;
use tower_lsp::lsp_types::notification::Notification;
use tower_lsp::lsp_types::{ConfigurationItem, MessageType, PublishDiagnosticsParams, Url};
use tracing::{debug, warn};

use crate::watcher::RulesetWatcher;

/// Configuration section read from the client
pub const CONFIGURATION_SECTION: &str = "vigil";

#[async_trait]
pub trait Host: Send + Sync + 'static {
    /// The `vigil` configuration section for `scope`. `Ok(None)` means the
    /// client has nothing for us and defaults apply.
    async fn configuration(&self, scope: Option<&Url>) -> Result<Option<Value>>;

    async fn publish_diagnostics(&self, params: PublishDiagnosticsParams);

    /// Surface an error to the user
    async fn show_error(&self, message: String);

    /// Mirror a line to the client's log
    async fn log(&self, message: String);

    /// Ask for `path` to be watched; a change arrives as watched-files events
    async fn start_watcher(&self, path: &Path);

    async fn stop_watchers(&self);
}

/// Params of the `vigil/startWatcher` notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartWatcherParams {
    pub path: String,
}

pub enum StartWatcher {}

impl Notification for StartWatcher {
    type Params = StartWatcherParams;
    const METHOD: &'static str = "vigil/startWatcher";
}

/// [`Host`] over a tower-lsp [`Client`]
pub struct LspHost {
    client: Client,
    pull_configuration: AtomicBool,
    /// Last `didChangeConfiguration` payload, or the initialization options
    pushed: Mutex<Option<Value>>,
    watcher: Option<Arc<RulesetWatcher>>,
}

impl LspHost {
    pub fn new(client: Client, watcher: Option<Arc<RulesetWatcher>>) -> Self {
        Self {
            client,
            pull_configuration: AtomicBool::new(false),
            pushed: Mutex::new(None),
            watcher,
        }
    }

    /// Whether the client answers `workspace/configuration`
    pub fn set_pull_configuration(&self, supported: bool) {
        self.pull_configuration.store(supported, Ordering::SeqCst);
    }

    /// Remember settings pushed by the client. Accepts both the bare section
    /// and an object wrapping it under `vigil`.
    pub fn set_pushed_configuration(&self, settings: Value) {
        let settings = match settings {
            Value::Object(mut map) if map.contains_key(CONFIGURATION_SECTION) => map
                .remove(CONFIGURATION_SECTION)
                .unwrap_or(Value::Null),
            other => other,
        };
        *self.pushed.lock().unwrap_or_else(PoisonError::into_inner) = Some(settings);
    }

    fn pushed_configuration(&self) -> Option<Value> {
        self.pushed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|v| !v.is_null())
    }
}

#[async_trait]
impl Host for LspHost {
    async fn configuration(&self, scope: Option<&Url>) -> Result<Option<Value>> {
        if !self.pull_configuration.load(Ordering::SeqCst) {
            return Ok(self.pushed_configuration());
        }

        let items = vec![ConfigurationItem {
            scope_uri: scope.cloned(),
            section: Some(CONFIGURATION_SECTION.to_string()),
        }];
        let mut values = self
            .client
            .configuration(items)
            .await
            .map_err(|e| eyre!("workspace/configuration failed: {}", e))?;

        match values.pop() {
            Some(Value::Null) | None => Ok(self.pushed_configuration()),
            Some(value) => Ok(Some(value)),
        }
    }

    async fn publish_diagnostics(&self, params: PublishDiagnosticsParams) {
        self.client
            .publish_diagnostics(params.uri, params.diagnostics, params.version)
            .await;
    }

    async fn show_error(&self, message: String) {
        self.client.show_message(MessageType::ERROR, message).await;
    }

    async fn log(&self, message: String) {
        self.client.log_message(MessageType::INFO, message).await;
    }

    async fn start_watcher(&self, path: &Path) {
        if let Some(watcher) = &self.watcher
            && let Err(e) = watcher.watch(path)
        {
            warn!("Failed to watch {}: {:#}", path.display(), e);
        }

        debug!("requesting client watch for {}", path.display());
        self.client
            .send_notification::<StartWatcher>(StartWatcherParams {
                path: path.display().to_string(),
            })
            .await;
    }

    async fn stop_watchers(&self) {
        if let Some(watcher) = &self.watcher {
            watcher.unwatch_all();
        }
    }
}

/// Paths from a list of watched-file URIs that are local files
pub fn local_paths<'a>(uris: impl IntoIterator<Item = &'a Url>) -> Vec<PathBuf> {
    uris.into_iter()
        .filter_map(|uri| uri.to_file_path().ok())
        .collect()
}
