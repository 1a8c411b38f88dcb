//! vigil-core - Lint engine for YAML/JSON API descriptions
//!
//! This crate provides the building blocks for:
//! - Parsing documents and locating values in their source text
//! - Following `$ref` links across documents, preferring in-memory content
//! - Loading rulesets (local files, URLs, built-ins) with `extends`
//! - Running rules and reporting problems attributed to the document that
//!   produced them
//!
//! # Features
//!
//! - `fetch` - Resolve `http(s)` references and remote rulesets (brings in `reqwest`)
//!
//! # Linting a document
//!
//! ```ignore
//! use std::sync::Arc;
//! use vigil_core::{DiskSource, LintTarget, Linter, RulesetLoader, RulesetLocation};
//!
//! let source = Arc::new(DiskSource::new());
//! let loaded = RulesetLoader::new(source.clone())
//!     .load(&RulesetLocation::Builtin("vigil:recommended".into()))
//!     .await?;
//!
//! let mut linter = Linter::new(source);
//! let target = LintTarget::new(uri, std::fs::read_to_string(path)?);
//! for problem in linter.lint(&target, Some(loaded.ruleset)).await? {
//!     println!("{}: {}", problem.code, problem.message);
//! }
//! ```
//!
//! # In-Memory Sources (for testing)
//!
//! Use [`MemorySource`] when you don't want to hit the filesystem:
//!
//! ```
//! use vigil_core::{DocumentSource, MemorySource};
//! use url::Url;
//!
//! let uri = Url::parse("file:///api/pet.yaml").unwrap();
//! let source = MemorySource::new().add(uri.clone(), "Pet:\n  type: object\n");
//! let text = tokio::runtime::Builder::new_current_thread()
//!     .build()
//!     .unwrap()
//!     .block_on(source.read(&uri))
//!     .unwrap();
//! assert!(text.starts_with("Pet:"));
//! ```

pub mod document;
mod engine;
pub mod formats;
pub mod functions;
mod loader;
pub mod node;
pub mod path;
pub mod resolver;
pub mod ruleset;
mod sources;

pub use document::{Position, Range, SourceMap};
pub use engine::{INVALID_REF_CODE, LintTarget, Linter, PARSER_CODE, Problem};
pub use formats::Format;
pub use loader::{FALLBACK_RULESET, LoadedRuleset, RulesetLoader, RulesetLocation, builtin};
pub use path::JsonPath;
pub use ruleset::{Rule, Ruleset, Severity};
pub use sources::{
    DEFAULT_FETCH_TIMEOUT, DiskSource, DocumentSource, MemorySource, Overlay, OverlaySource,
};
