//! Common test utilities.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tower_lsp::lsp_types::PublishDiagnosticsParams;
use url::Url;
use vigil::documents::TextDocument;
use vigil::host::Host;
use vigil::queue::ValidationQueue;
use vigil::session::Session;

/// Get the path to the test fixtures directory.
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Create a temporary workspace with a copy of the fixture files.
pub fn create_temp_workspace() -> tempfile::TempDir {
    let temp = tempfile::tempdir().expect("Failed to create temp dir");
    let fixtures = fixtures_dir().join("workspace");

    for name in [".vigil.yaml", "openapi.yaml", "info.yaml", "violating.yaml"] {
        std::fs::copy(fixtures.join(name), temp.path().join(name))
            .unwrap_or_else(|e| panic!("Failed to copy {}: {}", name, e));
    }

    temp
}

/// Host that records everything the server sends to the client.
#[derive(Default)]
pub struct RecordingHost {
    pub settings: Mutex<Option<Value>>,
    pub configuration_requests: AtomicUsize,
    pub published: Mutex<Vec<PublishDiagnosticsParams>>,
    pub errors: Mutex<Vec<String>>,
    pub watched: Mutex<Vec<PathBuf>>,
}

impl RecordingHost {
    pub fn with_settings(settings: Value) -> Self {
        Self {
            settings: Mutex::new(Some(settings)),
            ..Default::default()
        }
    }

    pub fn set_settings(&self, settings: Value) {
        *self.settings.lock().unwrap() = Some(settings);
    }

    /// Every diagnostics batch published for `uri`, oldest first.
    pub fn published_for(&self, uri: &Url) -> Vec<PublishDiagnosticsParams> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|p| &p.uri == uri)
            .cloned()
            .collect()
    }

    /// Latest diagnostics batch per document.
    pub fn latest(&self) -> HashMap<Url, PublishDiagnosticsParams> {
        let mut latest = HashMap::new();
        for params in self.published.lock().unwrap().iter() {
            latest.insert(params.uri.clone(), params.clone());
        }
        latest
    }

    /// Rule codes of the latest diagnostics for `uri`, sorted.
    pub fn latest_codes(&self, uri: &Url) -> Vec<String> {
        let mut codes: Vec<String> = self
            .latest()
            .get(uri)
            .map(|p| {
                p.diagnostics
                    .iter()
                    .filter_map(|d| match &d.code {
                        Some(tower_lsp::lsp_types::NumberOrString::String(code)) => {
                            Some(code.clone())
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        codes.sort();
        codes
    }
}

#[async_trait]
impl Host for RecordingHost {
    async fn configuration(&self, _scope: Option<&Url>) -> eyre::Result<Option<Value>> {
        self.configuration_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.settings.lock().unwrap().clone())
    }

    async fn publish_diagnostics(&self, params: PublishDiagnosticsParams) {
        self.published.lock().unwrap().push(params);
    }

    async fn show_error(&self, message: String) {
        self.errors.lock().unwrap().push(message);
    }

    async fn log(&self, _message: String) {}

    async fn start_watcher(&self, path: &Path) {
        self.watched.lock().unwrap().push(path.to_path_buf());
    }

    async fn stop_watchers(&self) {}
}

pub type TestQueue = ValidationQueue<Session<RecordingHost>>;

/// A session over a recording host, wired to its queue.
pub fn create_session(host: RecordingHost) -> (Arc<RecordingHost>, TestQueue) {
    let host = Arc::new(host);
    let queue = ValidationQueue::new(Arc::new(Session::new(host.clone())));
    (host, queue)
}

pub fn file_uri(dir: &Path, name: &str) -> Url {
    Url::from_file_path(dir.join(name)).expect("temp paths are absolute")
}

/// An open document with the current on-disk content of `dir/name`.
pub fn open_document(dir: &Path, name: &str, version: i32) -> TextDocument {
    TextDocument {
        uri: file_uri(dir, name),
        text: std::fs::read_to_string(dir.join(name))
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", name, e)),
        version,
        language_id: "yaml".to_string(),
    }
}
