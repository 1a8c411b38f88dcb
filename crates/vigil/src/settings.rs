//! Per-document validation settings
//!
//! Settings are resolved lazily, once per document, and cached as a shared
//! pending computation: concurrent callers for the same URI wait on the same
//! resolution instead of each asking the client for configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use eyre::{Result, WrapErr};
use globset::GlobBuilder;
use serde::{Deserialize, Deserializer};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use url::Url;
use vigil_core::{DiskSource, FALLBACK_RULESET, RulesetLoader, RulesetLocation, Ruleset};

use crate::host::Host;

/// Ruleset files probed for when `rulesetFile` is not configured
pub const DEFAULT_RULESET_FILES: &[&str] = &[".vigil.yaml", ".vigil.yml", ".vigil.json"];

/// When validation is triggered by edits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunMode {
    #[default]
    OnType,
    OnSave,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkspaceFolderSetting {
    pub name: String,
    pub uri: Url,
}

/// The `vigil` configuration section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtensionSettings {
    pub enable: bool,
    pub ruleset_file: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub run: RunMode,
    /// Globs a document must match; `!` negates. `None` matches every file.
    pub validate_files: Option<Vec<String>>,
    /// `None` validates every language
    pub validate_languages: Option<Vec<String>>,
    pub workspace_folder: Option<WorkspaceFolderSetting>,
}

/// Treat an explicit `null` like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Default for ExtensionSettings {
    fn default() -> Self {
        Self {
            enable: true,
            ruleset_file: None,
            run: RunMode::OnType,
            validate_files: None,
            validate_languages: Some(vec!["json".to_string(), "yaml".to_string()]),
            workspace_folder: None,
        }
    }
}

/// Resolved settings for one document
#[derive(Debug, Clone, Default)]
pub struct DocumentSettings {
    pub validate: bool,
    pub run: RunMode,
    /// `None` lints with no rules
    pub ruleset: Option<Arc<Ruleset>>,
}

impl DocumentSettings {
    fn skip(run: RunMode) -> Self {
        Self {
            validate: false,
            run,
            ruleset: None,
        }
    }
}

type Pending = Arc<OnceCell<Arc<DocumentSettings>>>;

pub struct SettingsResolver<H: Host> {
    host: Arc<H>,
    loader: RulesetLoader,
    workspace_folders: RwLock<Vec<PathBuf>>,
    cache: Mutex<HashMap<Url, Pending>>,
}

impl<H: Host> SettingsResolver<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self {
            host,
            loader: RulesetLoader::new(Arc::new(DiskSource::new())),
            workspace_folders: RwLock::new(Vec::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Folders announced by the client, used when the configuration does not
    /// name a workspace folder
    pub fn set_workspace_folders(&self, folders: Vec<PathBuf>) {
        debug!("workspace folders: {:?}", folders);
        *self
            .workspace_folders
            .write()
            .unwrap_or_else(PoisonError::into_inner) = folders;
    }

    /// Apply a `didChangeWorkspaceFolders` delta
    pub fn change_workspace_folders(&self, added: Vec<PathBuf>, removed: &[PathBuf]) {
        let mut folders = self
            .workspace_folders
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        folders.retain(|f| !removed.contains(f));
        for folder in added {
            if !folders.contains(&folder) {
                folders.push(folder);
            }
        }
        debug!("workspace folders: {:?}", *folders);
    }

    /// Settings for `uri`, resolving them on first use
    pub async fn resolve(&self, uri: &Url, language_id: &str) -> Arc<DocumentSettings> {
        let pending = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(uri.clone())
            .or_default()
            .clone();

        pending
            .get_or_init(|| async { Arc::new(self.compute(uri, language_id).await) })
            .await
            .clone()
    }

    /// Drop the cached settings for one document
    pub fn invalidate(&self, uri: &Url) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri);
    }

    /// Drop every cached setting
    pub fn clear(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    async fn compute(&self, uri: &Url, language_id: &str) -> DocumentSettings {
        let config = match self.configuration(uri).await {
            Ok(config) => config,
            Err(e) => {
                warn!("Not validating {}: {:#}", uri, e);
                return DocumentSettings::skip(RunMode::default());
            }
        };
        let run = config.run;

        if !config.enable {
            debug!("validation disabled for {}", uri);
            return DocumentSettings::skip(run);
        }

        if let Some(languages) = &config.validate_languages
            && !languages.is_empty()
            && !languages.iter().any(|l| l == language_id)
        {
            debug!("language {} of {} is not validated", language_id, uri);
            return DocumentSettings::skip(run);
        }

        let Some(path) = local_path(uri) else {
            return DocumentSettings {
                validate: true,
                run,
                ruleset: None,
            };
        };

        let folder = self.workspace_folder(&config, &path);

        if let Some(patterns) = &config.validate_files
            && !patterns.is_empty()
        {
            let relative = folder
                .as_deref()
                .and_then(|f| path.strip_prefix(f).ok())
                .unwrap_or(&path);
            match matches_files(patterns, relative) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("{} is excluded by validateFiles", uri);
                    return DocumentSettings::skip(run);
                }
                Err(e) => {
                    warn!("Not validating {}: {:#}", uri, e);
                    return DocumentSettings::skip(run);
                }
            }
        }

        let location = self.ruleset_location(&config, folder.as_deref(), &path).await;

        if let RulesetLocation::Path(ruleset_path) = &location {
            if same_file(ruleset_path, &path).await {
                debug!("{} is the ruleset itself", uri);
                return DocumentSettings::skip(run);
            }
            self.host.start_watcher(ruleset_path).await;
        }

        let ruleset = match self.loader.load(&location).await {
            Ok(loaded) => {
                for dependency in &loaded.dependencies {
                    self.host.start_watcher(dependency).await;
                }
                info!("Using ruleset {} for {}", location, uri);
                Some(loaded.ruleset)
            }
            Err(e) => {
                error!("Failed to load ruleset {}: {:#}", location, e);
                self.host
                    .show_error(format!("Failed to load ruleset {location}: {e:#}"))
                    .await;
                None
            }
        };

        DocumentSettings {
            validate: true,
            run,
            ruleset,
        }
    }

    async fn configuration(&self, uri: &Url) -> Result<ExtensionSettings> {
        match self.host.configuration(Some(uri)).await? {
            Some(value) => {
                serde_json::from_value(value).wrap_err("invalid vigil configuration")
            }
            None => Ok(ExtensionSettings::default()),
        }
    }

    /// The configured workspace folder, or the longest announced folder
    /// containing `path`
    fn workspace_folder(&self, config: &ExtensionSettings, path: &Path) -> Option<PathBuf> {
        if let Some(folder) = &config.workspace_folder
            && let Ok(folder_path) = folder.uri.to_file_path()
        {
            return Some(folder_path);
        }

        self.workspace_folders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|folder| path.starts_with(folder))
            .max_by_key(|folder| folder.components().count())
            .cloned()
    }

    async fn ruleset_location(
        &self,
        config: &ExtensionSettings,
        folder: Option<&Path>,
        document: &Path,
    ) -> RulesetLocation {
        let base_dir = folder.or_else(|| document.parent());

        let configured = config
            .ruleset_file
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let location = match configured {
            Some(reference) => RulesetLocation::parse(reference, base_dir),
            None => match self.probe(base_dir).await {
                Some(path) => RulesetLocation::Path(path),
                None => {
                    debug!("no ruleset file found, using {}", FALLBACK_RULESET);
                    return RulesetLocation::Builtin(FALLBACK_RULESET.to_string());
                }
            },
        };

        if let RulesetLocation::Path(path) = &location
            && !tokio::fs::try_exists(path).await.unwrap_or(false)
        {
            info!(
                "Ruleset file {} not found, using {}",
                path.display(),
                FALLBACK_RULESET
            );
            return RulesetLocation::Builtin(FALLBACK_RULESET.to_string());
        }
        location
    }

    async fn probe(&self, dir: Option<&Path>) -> Option<PathBuf> {
        let dir = dir?;
        for name in DEFAULT_RULESET_FILES {
            let candidate = dir.join(name);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Some(candidate);
            }
        }
        None
    }
}

fn local_path(uri: &Url) -> Option<PathBuf> {
    if uri.scheme() != "file" {
        return None;
    }
    uri.to_file_path().ok()
}

async fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (
        tokio::fs::canonicalize(a).await,
        tokio::fs::canonicalize(b).await,
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Whether `path` passes the `validateFiles` globs.
///
/// Each leading `!` toggles negation. Patterns without a `/` are matched
/// against the file name only. A path must match at least one positive
/// pattern (if there are any) and no negative one.
pub fn matches_files(patterns: &[String], path: &Path) -> Result<bool> {
    let file_name = path.file_name().map(Path::new).unwrap_or(path);
    let mut any_positive = false;
    let mut matched_positive = false;

    for raw in patterns {
        let mut pattern = raw.as_str();
        let mut negated = false;
        while let Some(rest) = pattern.strip_prefix('!') {
            negated = !negated;
            pattern = rest;
        }

        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .wrap_err_with(|| format!("invalid validateFiles pattern '{raw}'"))?
            .compile_matcher();

        let candidate = if pattern.contains('/') { path } else { file_name };
        let is_match = matcher.is_match(candidate);

        if negated {
            if is_match {
                return Ok(false);
            }
        } else {
            any_positive = true;
            matched_positive |= is_match;
        }
    }

    Ok(!any_positive || matched_positive)
}
