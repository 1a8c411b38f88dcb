//! Ruleset loading
//!
//! A ruleset comes from a local file, a remote URL or one of the built-in
//! names (`vigil:oas`, `vigil:asyncapi`, `vigil:recommended`). `extends` is
//! followed recursively; the loader reports every local file it read along
//! the way so callers can watch them.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use eyre::{Result, WrapErr, bail, eyre};
use tracing::debug;
use url::Url;

use crate::ruleset::{Rule, RuleEntry, Ruleset, RulesetDefinition};
use crate::sources::DocumentSource;

/// Name of the ruleset used when none is configured
pub const FALLBACK_RULESET: &str = "vigil:recommended";

const BUILTIN_PREFIX: &str = "vigil:";

/// Text of a built-in ruleset
pub fn builtin(name: &str) -> Option<&'static str> {
    match name {
        "vigil:oas" => Some(include_str!("../rulesets/oas.yaml")),
        "vigil:asyncapi" => Some(include_str!("../rulesets/asyncapi.yaml")),
        "vigil:recommended" => Some(include_str!("../rulesets/recommended.yaml")),
        _ => None,
    }
}

/// Where a ruleset is read from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RulesetLocation {
    Path(PathBuf),
    Url(Url),
    Builtin(String),
}

impl RulesetLocation {
    /// Interpret a ruleset reference. Relative paths are resolved against
    /// `base_dir` when given.
    pub fn parse(reference: &str, base_dir: Option<&Path>) -> Self {
        if reference.starts_with(BUILTIN_PREFIX) {
            return Self::Builtin(reference.to_string());
        }
        if (reference.starts_with("http://") || reference.starts_with("https://"))
            && let Ok(url) = Url::parse(reference)
        {
            return Self::Url(url);
        }
        if reference.starts_with("file://")
            && let Ok(path) = Url::parse(reference).and_then(|u| {
                u.to_file_path().map_err(|_| url::ParseError::RelativeUrlWithoutBase)
            })
        {
            return Self::Path(path);
        }

        let path = Path::new(reference);
        match base_dir {
            Some(base) if path.is_relative() => Self::Path(base.join(path)),
            _ => Self::Path(path.to_path_buf()),
        }
    }

    /// Resolve a reference found in the `extends` of the ruleset at `self`
    fn resolve(&self, reference: &str) -> Result<Self> {
        if reference.starts_with(BUILTIN_PREFIX) {
            return Ok(Self::Builtin(reference.to_string()));
        }
        match self {
            Self::Path(path) => Ok(Self::parse(reference, path.parent())),
            Self::Url(url) => url
                .join(reference)
                .map(Self::Url)
                .wrap_err_with(|| format!("invalid ruleset reference '{reference}'")),
            Self::Builtin(name) => match Self::parse(reference, None) {
                Self::Path(path) if path.is_relative() => {
                    bail!("{name} cannot extend relative path '{reference}'")
                }
                other => Ok(other),
            },
        }
    }

    fn uri(&self) -> Result<Url> {
        match self {
            Self::Path(path) => Url::from_file_path(path)
                .map_err(|_| eyre!("ruleset path must be absolute: {}", path.display())),
            Self::Url(url) => Ok(url.clone()),
            Self::Builtin(name) => bail!("{name} has no URI"),
        }
    }
}

impl std::fmt::Display for RulesetLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Url(url) => write!(f, "{url}"),
            Self::Builtin(name) => f.write_str(name),
        }
    }
}

/// A compiled ruleset and the local files it was built from
#[derive(Debug, Clone)]
pub struct LoadedRuleset {
    pub ruleset: Arc<Ruleset>,
    /// Absolute paths of extended ruleset files (not the entry file itself)
    pub dependencies: Vec<PathBuf>,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Reads and compiles rulesets
#[derive(Clone)]
pub struct RulesetLoader {
    source: Arc<dyn DocumentSource>,
}

impl RulesetLoader {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }

    pub async fn load(&self, location: &RulesetLocation) -> Result<LoadedRuleset> {
        let mut chain = Vec::new();
        let mut dependencies = Vec::new();
        let ruleset = self
            .load_location(location.clone(), &mut chain, &mut dependencies)
            .await
            .wrap_err_with(|| format!("Failed to load ruleset {location}"))?;

        if let RulesetLocation::Path(entry) = location {
            dependencies.retain(|p| p != entry);
        }
        dependencies.sort();
        dependencies.dedup();

        Ok(LoadedRuleset {
            ruleset: Arc::new(ruleset),
            dependencies,
        })
    }

    fn load_location<'a>(
        &'a self,
        location: RulesetLocation,
        chain: &'a mut Vec<RulesetLocation>,
        dependencies: &'a mut Vec<PathBuf>,
    ) -> BoxFuture<'a, Result<Ruleset>> {
        Box::pin(async move {
            if chain.contains(&location) {
                bail!("circular extends through {location}");
            }

            debug!("loading ruleset {}", location);
            let text = match &location {
                RulesetLocation::Builtin(name) => builtin(name)
                    .ok_or_else(|| eyre!("unknown built-in ruleset '{name}'"))?
                    .to_string(),
                other => {
                    let uri = other.uri()?;
                    if let RulesetLocation::Path(path) = other {
                        dependencies.push(path.clone());
                    }
                    self.source.read(&uri).await?
                }
            };

            let definition = RulesetDefinition::parse(&text)
                .wrap_err_with(|| format!("Failed to parse ruleset {location}"))?;

            let mut ruleset = Ruleset::empty();

            chain.push(location.clone());
            for (reference, mode) in definition.extends.iter().flat_map(|e| e.entries()) {
                let target = location.resolve(&reference)?;
                let extended = self.load_location(target, chain, dependencies).await?;
                ruleset.extend_from(extended, mode);
            }
            chain.pop();

            for (name, entry) in &definition.rules {
                if let RuleEntry::Definition(rule) = entry {
                    ruleset.insert(Rule::compile(name, rule, definition.formats.as_ref())?);
                }
            }
            for (name, entry) in &definition.rules {
                if !matches!(entry, RuleEntry::Definition(_)) {
                    ruleset.apply_override(name, entry)?;
                }
            }

            Ok(ruleset)
        })
    }
}
