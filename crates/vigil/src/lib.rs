//! vigil library - Language server that lints YAML/JSON API descriptions
//!
//! The server validates open documents against a ruleset and publishes
//! diagnostics. Fragments pulled in through `$ref` are validated through the
//! root document that referenced them, so their diagnostics carry the root's
//! context.
//!
//! This library exposes the pieces of the server for testing and embedding:
//! - [`queue`] - staleness-aware validation queue with a single worker
//! - [`dependencies`] - fragment → root tracking
//! - [`diagnostics`] - problem grouping and LSP conversion
//! - [`settings`] - per-document settings resolution and caching
//! - [`session`] - the validation pipeline behind a [`host::Host`]
//! - [`server`] - the tower-lsp backend

pub mod dependencies;
pub mod diagnostics;
pub mod documents;
pub mod host;
pub mod queue;
pub mod server;
pub mod session;
pub mod settings;
pub mod watcher;
