//! Validation orchestration
//!
//! A [`Session`] owns everything one language-server connection needs to
//! validate documents: the open documents, per-document settings, the
//! fragment → root map and the linter. Editor events decide *whether* to
//! validate and enqueue work; the queue worker calls back into
//! [`MessageHandler::handle`] to do it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tower_lsp::lsp_types::PublishDiagnosticsParams;
use tracing::{debug, error, info, warn};
use url::Url;
use vigil_core::{DiskSource, LintTarget, Linter, OverlaySource};

use crate::dependencies::DependencyTracker;
use crate::diagnostics::make_publish_diagnostics_params;
use crate::documents::{DocumentStore, TextDocument};
use crate::host::Host;
use crate::queue::{MessageHandler, QueueMessage, ValidationQueue};
use crate::settings::{RunMode, SettingsResolver};

pub struct Session<H: Host> {
    host: Arc<H>,
    documents: Arc<DocumentStore>,
    settings: SettingsResolver<H>,
    dependencies: Mutex<DependencyTracker>,
    linter: tokio::sync::Mutex<Linter>,
}

impl<H: Host> Session<H> {
    pub fn new(host: Arc<H>) -> Self {
        let documents = Arc::new(DocumentStore::new());
        let source = OverlaySource::new(documents.clone(), Arc::new(DiskSource::new()));
        Self {
            settings: SettingsResolver::new(host.clone()),
            host,
            documents,
            dependencies: Mutex::new(DependencyTracker::new()),
            linter: tokio::sync::Mutex::new(Linter::new(Arc::new(source))),
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn settings(&self) -> &SettingsResolver<H> {
        &self.settings
    }

    /// The root `uri` is currently validated through
    pub fn find_root(&self, uri: &Url) -> Url {
        self.dependencies().find_root(uri)
    }

    pub async fn did_open(&self, queue: &ValidationQueue<Self>, document: TextDocument) {
        let uri = document.uri.clone();
        let version = document.version;
        let language_id = document.language_id.clone();
        self.documents.open(document);

        let settings = self.settings.resolve(&uri, &language_id).await;
        if settings.validate {
            queue.enqueue(QueueMessage::Validate(uri), Some(version));
        }
    }

    pub async fn did_change(
        &self,
        queue: &ValidationQueue<Self>,
        uri: &Url,
        text: String,
        version: i32,
    ) {
        if !self.documents.update(uri, text, version) {
            return;
        }
        let Some(document) = self.documents.get(uri) else {
            return;
        };

        let settings = self.settings.resolve(uri, &document.language_id).await;
        if settings.validate && settings.run == RunMode::OnType {
            queue.enqueue(QueueMessage::Validate(uri.clone()), Some(document.version));
        }
    }

    pub async fn did_save(&self, queue: &ValidationQueue<Self>, uri: &Url) {
        let Some(document) = self.documents.get(uri) else {
            return;
        };

        let settings = self.settings.resolve(uri, &document.language_id).await;
        if settings.validate && settings.run == RunMode::OnSave {
            queue.enqueue(QueueMessage::Validate(uri.clone()), Some(document.version));
        }
    }

    /// Forget everything about a closed document and clear its diagnostics.
    /// Pending validations for it are dropped by the queue.
    ///
    /// Closing a root also clears the fragments published through it. Open
    /// fragments are revalidated on their own.
    pub async fn did_close(&self, queue: &ValidationQueue<Self>, uri: &Url) {
        self.documents.close(uri);
        self.settings.invalidate(uri);
        let (previous_root, orphans) = {
            let mut dependencies = self.dependencies();
            let previous_root = dependencies.forget(uri);
            let orphans = dependencies.dependents_of(uri);
            for orphan in &orphans {
                dependencies.forget(orphan);
            }
            (previous_root, orphans)
        };
        if let Some(root) = previous_root {
            debug!("closed {} (was validated through {})", uri, root);
        }

        self.host
            .publish_diagnostics(PublishDiagnosticsParams::new(uri.clone(), Vec::new(), None))
            .await;

        for orphan in orphans {
            debug!("clearing {} after its root {} closed", orphan, uri);
            self.host
                .publish_diagnostics(PublishDiagnosticsParams::new(
                    orphan.clone(),
                    Vec::new(),
                    None,
                ))
                .await;

            let Some(document) = self.documents.get(&orphan) else {
                continue;
            };
            let settings = self.settings.resolve(&orphan, &document.language_id).await;
            if settings.validate {
                queue.enqueue(QueueMessage::Validate(orphan), Some(document.version));
            }
        }
    }

    fn dependencies(&self) -> MutexGuard<'_, DependencyTracker> {
        self.dependencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Lint the root of `uri` and publish diagnostics for it and every
    /// document it pulled problems from
    async fn validate(&self, uri: &Url) {
        let Some(document) = self.documents.get(uri) else {
            debug!("{} closed before validation", uri);
            return;
        };

        let mut settings = self.settings.resolve(uri, &document.language_id).await;
        if !settings.validate {
            return;
        }

        let mut root = self.find_root(uri);
        let mut root_document = document;
        if root != *uri {
            match self.documents.get(&root) {
                Some(open_root) => {
                    let root_settings = self
                        .settings
                        .resolve(&root, &open_root.language_id)
                        .await;
                    if root_settings.validate {
                        settings = root_settings;
                        root_document = open_root;
                    } else {
                        debug!("root {} is not validated, linting {} alone", root, uri);
                        self.dependencies().forget(uri);
                        root = uri.clone();
                    }
                }
                None => {
                    warn!(
                        "Root {} of {} is no longer open, validating it on its own",
                        root, uri
                    );
                    self.dependencies().forget(uri);
                    root = uri.clone();
                }
            }
        }

        let known = self.dependencies().dependents_of(&root);
        let target = LintTarget::new(root.clone(), root_document.text);

        let result = {
            let mut linter = self.linter.lock().await;
            linter.lint(&target, settings.ruleset.clone()).await
        };

        let problems = match result {
            Ok(problems) => problems,
            Err(e) => {
                error!("Failed to validate {}: {:#}", root, e);
                self.host
                    .show_error(format!("Failed to validate {root}: {e:#}"))
                    .await;
                return;
            }
        };
        debug!("{} problem(s) linting {}", problems.len(), root);

        let sources: Vec<Url> = problems.iter().filter_map(|p| p.source.clone()).collect();
        self.dependencies()
            .record_dependencies(&root, sources.iter().chain(known.iter()));

        for params in make_publish_diagnostics_params(&root, &known, &problems) {
            self.host.publish_diagnostics(params).await;
        }
    }

    /// Configuration, workspace folders or a watched ruleset changed: start
    /// over from a clean slate and revalidate every open document
    async fn reset_environment(&self, queue: &ValidationQueue<Self>, reason: &QueueMessage) {
        info!("{:?}: revalidating open documents", reason);
        self.host
            .log(format!("Environment changed ({reason:?}), revalidating"))
            .await;

        self.settings.clear();
        self.dependencies().reset();
        self.host.stop_watchers().await;

        for uri in self.documents.uris() {
            self.host
                .publish_diagnostics(PublishDiagnosticsParams::new(uri.clone(), Vec::new(), None))
                .await;
            if let Some(version) = self.documents.version(&uri) {
                queue.enqueue(QueueMessage::Validate(uri), Some(version));
            }
        }
    }
}

#[async_trait]
impl<H: Host> MessageHandler for Session<H> {
    async fn handle(&self, message: QueueMessage, queue: ValidationQueue<Self>) {
        match &message {
            QueueMessage::Validate(uri) => self.validate(uri).await,
            QueueMessage::ConfigurationChanged
            | QueueMessage::WorkspaceFoldersChanged
            | QueueMessage::WatchedFilesChanged => self.reset_environment(&queue, &message).await,
        }
    }

    fn current_version(&self, message: &QueueMessage) -> Option<i32> {
        message.document().and_then(|uri| self.documents.version(uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::RecordingHost;
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::Ordering;

    const BROKEN_INFO: &str = "openapi: 3.0.0\ninfo:\n  $ref: ./info.yaml\npaths: {}\n";

    fn setup(dir: &Path) -> (Arc<RecordingHost>, ValidationQueue<Session<RecordingHost>>) {
        std::fs::write(
            dir.join(".vigil.yaml"),
            "rules:\n  info-title:\n    given: $.info\n    severity: error\n    then:\n      field: title\n      function: truthy\n",
        )
        .unwrap();
        let host = Arc::new(RecordingHost::with_settings(json!({})));
        let queue = ValidationQueue::new(Arc::new(Session::new(host.clone())));
        (host, queue)
    }

    fn open(path: &Path, text: &str, version: i32) -> TextDocument {
        TextDocument {
            uri: Url::from_file_path(path).unwrap(),
            text: text.to_string(),
            version,
            language_id: "yaml".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fragment_problems_record_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let (host, queue) = setup(dir.path());
        let session = queue.handler().clone();
        std::fs::write(dir.path().join("info.yaml"), "version: 1.0.0\n").unwrap();

        let root = open(&dir.path().join("openapi.yaml"), BROKEN_INFO, 1);
        let root_uri = root.uri.clone();
        let info_uri = Url::from_file_path(dir.path().join("info.yaml")).unwrap();
        session.did_open(&queue, root).await;
        queue.wait_idle().await;

        assert_eq!(session.find_root(&info_uri), root_uri);
        let latest = host.latest();
        assert_eq!(latest[&info_uri].diagnostics.len(), 1);
        assert!(latest[&root_uri].diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_missing_root_falls_back_to_self() {
        let dir = tempfile::tempdir().unwrap();
        let (host, queue) = setup(dir.path());
        let session = queue.handler().clone();

        let fragment = open(&dir.path().join("info.yaml"), "version: 1.0.0\n", 1);
        let fragment_uri = fragment.uri.clone();
        let gone = Url::from_file_path(dir.path().join("gone.yaml")).unwrap();
        session
            .dependencies()
            .record_dependencies(&gone, [&fragment_uri]);

        session.did_open(&queue, fragment).await;
        queue.wait_idle().await;

        assert_eq!(session.find_root(&fragment_uri), fragment_uri);
        assert!(
            host.latest().contains_key(&fragment_uri),
            "fragment should be linted as its own root"
        );
        assert!(host.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_environment_change_resets_state() {
        let dir = tempfile::tempdir().unwrap();
        let (host, queue) = setup(dir.path());
        let session = queue.handler().clone();
        std::fs::write(dir.path().join("info.yaml"), "version: 1.0.0\n").unwrap();

        let root = open(&dir.path().join("openapi.yaml"), BROKEN_INFO, 1);
        let root_uri = root.uri.clone();
        session.did_open(&queue, root).await;
        queue.wait_idle().await;
        let before = host.published.lock().unwrap().len();

        queue.enqueue(QueueMessage::ConfigurationChanged, None);
        queue.wait_idle().await;

        assert_eq!(host.stop_requests.load(Ordering::SeqCst), 1);
        let published = host.published.lock().unwrap();
        // cleared first, then republished by the revalidation
        assert_eq!(published[before].uri, root_uri);
        assert!(published[before].diagnostics.is_empty());
        assert!(published.len() > before + 1);
    }
}
