//! Staleness-aware validation queue
//!
//! Editor events are turned into [`QueueMessage`]s and processed one at a
//! time by a single worker task. A message tagged with a document version is
//! dropped when the document has moved on (or closed) by the time it reaches
//! the front of the queue, so superseded content is never linted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, error};
use url::Url;

/// Work items for the validation worker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueueMessage {
    /// Validate a document (through its root, if it is a fragment)
    Validate(Url),
    ConfigurationChanged,
    WorkspaceFoldersChanged,
    WatchedFilesChanged,
}

impl QueueMessage {
    /// Document the message is about, if any
    pub fn document(&self) -> Option<&Url> {
        match self {
            Self::Validate(uri) => Some(uri),
            _ => None,
        }
    }
}

/// A message waiting in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queued {
    pub message: QueueMessage,
    /// Version of the document when the message was enqueued
    pub document_version: Option<i32>,
}

/// Processes queue messages.
///
/// `handle` dispatches on the message kind; `current_version` reports the
/// live version of the message's document (`None` for kinds without one, or
/// for documents that are no longer open).
#[async_trait]
pub trait MessageHandler: Sized + Send + Sync + 'static {
    async fn handle(&self, message: QueueMessage, queue: ValidationQueue<Self>);

    fn current_version(&self, message: &QueueMessage) -> Option<i32>;
}

struct State {
    pending: VecDeque<Queued>,
    running: bool,
}

struct Shared<H> {
    handler: Arc<H>,
    state: Mutex<State>,
    idle: Notify,
}

/// FIFO of validation work with a single logical worker
pub struct ValidationQueue<H: MessageHandler> {
    shared: Arc<Shared<H>>,
}

impl<H: MessageHandler> Clone for ValidationQueue<H> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<H: MessageHandler> ValidationQueue<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            shared: Arc::new(Shared {
                handler,
                state: Mutex::new(State {
                    pending: VecDeque::new(),
                    running: false,
                }),
                idle: Notify::new(),
            }),
        }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.shared.handler
    }

    /// Append a message. Never blocks; starts the worker if it is idle.
    pub fn enqueue(&self, message: QueueMessage, document_version: Option<i32>) {
        let mut state = self.state();
        debug!("enqueue {:?} (version {:?})", message, document_version);
        state.pending.push_back(Queued {
            message,
            document_version,
        });

        if !state.running {
            state.running = true;
            drop(state);
            let queue = self.clone();
            tokio::spawn(async move { queue.run_worker().await });
        }
    }

    /// Number of messages waiting (not counting one being handled)
    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once nothing is queued and no handler is running
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = std::pin::pin!(self.shared.idle.notified());
            notified.as_mut().enable();

            {
                let state = self.state();
                if !state.running && state.pending.is_empty() {
                    return;
                }
            }

            notified.await;
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_worker(self) {
        loop {
            let next = {
                let mut state = self.state();
                match state.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        state.running = false;
                        drop(state);
                        self.shared.idle.notify_waiters();
                        return;
                    }
                }
            };

            if let Some(version) = next.document_version {
                let current = self.shared.handler.current_version(&next.message);
                if current != Some(version) {
                    debug!(
                        "dropping stale {:?} (queued at version {}, now {:?})",
                        next.message, version, current
                    );
                    continue;
                }
            }

            // Each message runs in its own task so a panicking handler does
            // not take the worker down with it
            let handler = self.shared.handler.clone();
            let queue = self.clone();
            let message = next.message.clone();
            let result = tokio::spawn(async move { handler.handle(message, queue).await }).await;
            if let Err(e) = result {
                error!("handler for {:?} failed: {}", next.message, e);
            }

            tokio::task::yield_now().await;
        }
    }
}
