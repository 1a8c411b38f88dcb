//! Open document store

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;
use url::Url;
use vigil_core::Overlay;

/// An open text document as last reported by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    pub uri: Url,
    pub text: String,
    pub version: i32,
    pub language_id: String,
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: RwLock<HashMap<Url, TextDocument>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, document: TextDocument) {
        debug!("open {} v{}", document.uri, document.version);
        self.write().insert(document.uri.clone(), document);
    }

    /// Replace the text of an open document. Returns `false` (and changes
    /// nothing) when the document is unknown or `version` is not newer.
    pub fn update(&self, uri: &Url, text: String, version: i32) -> bool {
        let mut documents = self.write();
        let Some(document) = documents.get_mut(uri) else {
            debug!("change for unopened document {}", uri);
            return false;
        };
        if version <= document.version {
            debug!(
                "ignoring out-of-order change for {} (v{} <= v{})",
                uri, version, document.version
            );
            return false;
        }
        document.text = text;
        document.version = version;
        true
    }

    pub fn close(&self, uri: &Url) -> Option<TextDocument> {
        self.write().remove(uri)
    }

    pub fn get(&self, uri: &Url) -> Option<TextDocument> {
        self.read().get(uri).cloned()
    }

    pub fn version(&self, uri: &Url) -> Option<i32> {
        self.read().get(uri).map(|d| d.version)
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.read().contains_key(uri)
    }

    /// Every open document's URI, sorted
    pub fn uris(&self) -> Vec<Url> {
        let mut uris: Vec<Url> = self.read().keys().cloned().collect();
        uris.sort();
        uris
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Url, TextDocument>> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Url, TextDocument>> {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Overlay for DocumentStore {
    fn text(&self, uri: &Url) -> Option<String> {
        self.read().get(uri).map(|d| d.text.clone())
    }
}
