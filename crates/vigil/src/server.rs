//! tower-lsp backend
//!
//! Translates LSP notifications into [`Session`] events and queue messages.
//! Everything stateful lives in the session; the backend only keeps what it
//! needs to talk to the client.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::Result;
use serde_json::json;
use tokio::sync::mpsc;
use tower_lsp::jsonrpc::Result as LspResult;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService, Server};
use tracing::{debug, info, warn};

use crate::documents::TextDocument;
use crate::host::{LspHost, local_paths};
use crate::queue::{QueueMessage, ValidationQueue};
use crate::session::Session;
use crate::watcher::{DEFAULT_DEBOUNCE, RulesetWatcher};

/// Ruleset files the client is asked to watch
const RULESET_GLOB: &str = "**/.vigil.{yaml,yml,json}";

/// How long shutdown waits for in-flight validation
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Watch ruleset files from the server as well as asking the client to
    pub watch_rulesets: bool,
}

/// Run the language server over stdio until the client disconnects
pub async fn run(options: ServerOptions) -> Result<()> {
    let (watcher, changes) = if options.watch_rulesets {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = RulesetWatcher::new(DEFAULT_DEBOUNCE, tx)?;
        (Some(Arc::new(watcher)), Some(rx))
    } else {
        (None, None)
    };

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(move |client| {
        let host = Arc::new(LspHost::new(client.clone(), watcher));
        let queue = ValidationQueue::new(Arc::new(Session::new(host)));

        if let Some(mut changes) = changes {
            let queue = queue.clone();
            tokio::spawn(async move {
                while let Some(paths) = changes.recv().await {
                    debug!("ruleset files changed: {:?}", paths);
                    queue.enqueue(QueueMessage::WatchedFilesChanged, None);
                }
            });
        }

        Backend::new(client, queue)
    });
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}

pub struct Backend {
    client: Client,
    queue: ValidationQueue<Session<LspHost>>,
    dynamic_registration: AtomicBool,
}

impl Backend {
    pub fn new(client: Client, queue: ValidationQueue<Session<LspHost>>) -> Self {
        Self {
            client,
            queue,
            dynamic_registration: AtomicBool::new(false),
        }
    }

    fn session(&self) -> &Session<LspHost> {
        self.queue.handler()
    }

    async fn register_notifications(&self) {
        let watchers = DidChangeWatchedFilesRegistrationOptions {
            watchers: vec![FileSystemWatcher {
                glob_pattern: GlobPattern::String(RULESET_GLOB.to_string()),
                kind: None,
            }],
        };
        let registrations = vec![
            Registration {
                id: "vigil-configuration".to_string(),
                method: "workspace/didChangeConfiguration".to_string(),
                register_options: None,
            },
            Registration {
                id: "vigil-watched-files".to_string(),
                method: "workspace/didChangeWatchedFiles".to_string(),
                register_options: Some(json!(watchers)),
            },
        ];

        if let Err(e) = self.client.register_capability(registrations).await {
            warn!("Failed to register notifications: {}", e);
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> LspResult<InitializeResult> {
        let workspace = params.capabilities.workspace.as_ref();
        let pull_configuration = workspace.and_then(|w| w.configuration).unwrap_or(false);
        let dynamic_registration = workspace
            .and_then(|w| w.did_change_configuration.as_ref())
            .and_then(|c| c.dynamic_registration)
            .unwrap_or(false);
        self.dynamic_registration
            .store(dynamic_registration, Ordering::SeqCst);

        let host = self.session().host();
        host.set_pull_configuration(pull_configuration);
        if let Some(options) = params.initialization_options {
            host.set_pushed_configuration(options);
        }

        #[allow(deprecated)]
        let folders = match (&params.workspace_folders, &params.root_uri) {
            (Some(folders), _) => local_paths(folders.iter().map(|f| &f.uri)),
            (None, Some(root)) => local_paths([root]),
            (None, None) => Vec::new(),
        };
        self.session().settings().set_workspace_folders(folders);

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::FULL),
                        save: Some(TextDocumentSyncSaveOptions::Supported(true)),
                        ..Default::default()
                    },
                )),
                workspace: Some(WorkspaceServerCapabilities {
                    workspace_folders: Some(WorkspaceFoldersServerCapabilities {
                        supported: Some(true),
                        change_notifications: Some(OneOf::Left(true)),
                    }),
                    file_operations: None,
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "vigil".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        if self.dynamic_registration.load(Ordering::SeqCst) {
            self.register_notifications().await;
        }
        info!("vigil language server initialized");
        self.client
            .log_message(MessageType::INFO, "vigil language server initialized")
            .await;
    }

    async fn shutdown(&self) -> LspResult<()> {
        if tokio::time::timeout(SHUTDOWN_GRACE, self.queue.wait_idle())
            .await
            .is_err()
        {
            warn!("Shutting down with validation still in progress");
        }
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = params.text_document;
        self.session()
            .did_open(
                &self.queue,
                TextDocument {
                    uri: document.uri,
                    text: document.text,
                    version: document.version,
                    language_id: document.language_id,
                },
            )
            .await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        // full sync: the last change carries the whole text
        let Some(change) = params.content_changes.into_iter().last() else {
            return;
        };
        let document = params.text_document;
        self.session()
            .did_change(&self.queue, &document.uri, change.text, document.version)
            .await;
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        self.session()
            .did_save(&self.queue, &params.text_document.uri)
            .await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        self.session()
            .did_close(&self.queue, &params.text_document.uri)
            .await;
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        self.session()
            .host()
            .set_pushed_configuration(params.settings);
        self.queue.enqueue(QueueMessage::ConfigurationChanged, None);
    }

    async fn did_change_workspace_folders(&self, params: DidChangeWorkspaceFoldersParams) {
        let added = local_paths(params.event.added.iter().map(|f| &f.uri));
        let removed = local_paths(params.event.removed.iter().map(|f| &f.uri));
        self.session()
            .settings()
            .change_workspace_folders(added, &removed);
        self.queue.enqueue(QueueMessage::WorkspaceFoldersChanged, None);
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        let paths = local_paths(params.changes.iter().map(|c| &c.uri));
        debug!("watched files changed: {:?}", paths);
        self.queue.enqueue(QueueMessage::WatchedFilesChanged, None);
    }
}
