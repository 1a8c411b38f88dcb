//! Document sources for reference resolution
//!
//! The engine never touches the filesystem directly: every document it reads
//! (the root's `$ref` targets, remote rulesets) goes through a
//! [`DocumentSource`]. The language server layers its open documents over the
//! disk with [`OverlaySource`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, WrapErr, bail};
use url::Url;

/// Something that can produce the text of a document by URI
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn read(&self, uri: &Url) -> Result<String>;
}

/// How long a remote document may take before the read fails
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Reads `file:` URIs from disk and, with the `fetch` feature, `http(s):` URIs
/// over the network
#[derive(Debug, Clone)]
pub struct DiskSource {
    #[cfg(feature = "fetch")]
    client: reqwest::Client,
    #[cfg_attr(not(feature = "fetch"), allow(dead_code))]
    timeout: Duration,
}

impl Default for DiskSource {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }
}

impl DiskSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose remote reads fail after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            #[cfg(feature = "fetch")]
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl DocumentSource for DiskSource {
    async fn read(&self, uri: &Url) -> Result<String> {
        match uri.scheme() {
            "file" => {
                let Ok(path) = uri.to_file_path() else {
                    bail!("not a local file path: {uri}");
                };
                tokio::fs::read_to_string(&path)
                    .await
                    .wrap_err_with(|| format!("Failed to read {}", path.display()))
            }
            #[cfg(feature = "fetch")]
            "http" | "https" => {
                let response = self
                    .client
                    .get(uri.as_str())
                    .timeout(self.timeout)
                    .send()
                    .await
                    .wrap_err_with(|| format!("Failed to fetch {uri}"))?
                    .error_for_status()
                    .wrap_err_with(|| format!("Failed to fetch {uri}"))?;
                response
                    .text()
                    .await
                    .wrap_err_with(|| format!("Failed to read response body from {uri}"))
            }
            scheme => bail!("unsupported URI scheme '{scheme}' for {uri}"),
        }
    }
}

/// In-memory sources (useful for testing)
#[derive(Debug, Clone, Default)]
pub struct MemorySource(HashMap<Url, String>);

impl MemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document with content
    pub fn add(mut self, uri: Url, content: impl Into<String>) -> Self {
        self.0.insert(uri, content.into());
        self
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn read(&self, uri: &Url) -> Result<String> {
        match self.0.get(uri) {
            Some(text) => Ok(text.clone()),
            None => bail!("document not found: {uri}"),
        }
    }
}

/// In-memory content that shadows the underlying source
pub trait Overlay: Send + Sync {
    /// Current text for `uri`, if it is held in memory
    fn text(&self, uri: &Url) -> Option<String>;
}

/// Serves documents from an [`Overlay`] first and falls back to another source
#[derive(Clone)]
pub struct OverlaySource {
    overlay: Arc<dyn Overlay>,
    fallback: Arc<dyn DocumentSource>,
}

impl OverlaySource {
    pub fn new(overlay: Arc<dyn Overlay>, fallback: Arc<dyn DocumentSource>) -> Self {
        Self { overlay, fallback }
    }
}

#[async_trait]
impl DocumentSource for OverlaySource {
    async fn read(&self, uri: &Url) -> Result<String> {
        if let Some(text) = self.overlay.text(uri) {
            return Ok(text);
        }
        self.fallback.read(uri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OneDocument(Url, &'static str);

    impl Overlay for OneDocument {
        fn text(&self, uri: &Url) -> Option<String> {
            (uri == &self.0).then(|| self.1.to_string())
        }
    }

    #[tokio::test]
    async fn overlay_shadows_fallback() {
        let a = Url::parse("file:///a.yaml").unwrap();
        let b = Url::parse("file:///b.yaml").unwrap();
        let fallback = MemorySource::new()
            .add(a.clone(), "on: disk")
            .add(b.clone(), "b: disk");
        let source = OverlaySource::new(
            Arc::new(OneDocument(a.clone(), "in: memory")),
            Arc::new(fallback),
        );

        assert_eq!(source.read(&a).await.unwrap(), "in: memory");
        assert_eq!(source.read(&b).await.unwrap(), "b: disk");
        assert!(source.read(&Url::parse("file:///c.yaml").unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn disk_source_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.yaml");
        std::fs::write(&path, "hello: world\n").unwrap();

        let uri = Url::from_file_path(&path).unwrap();
        let text = DiskSource::new().read(&uri).await.unwrap();
        assert_eq!(text, "hello: world\n");

        let missing = Url::from_file_path(dir.path().join("missing.yaml")).unwrap();
        assert!(DiskSource::new().read(&missing).await.is_err());
    }

    #[tokio::test]
    async fn disk_source_rejects_unknown_schemes() {
        let uri = Url::parse("untitled:Untitled-1").unwrap();
        assert!(DiskSource::new().read(&uri).await.is_err());
    }

    #[cfg(feature = "fetch")]
    #[tokio::test]
    async fn unresponsive_server_times_out() {
        // the kernel completes the handshake; nothing ever answers
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let uri = Url::parse(&format!("http://{address}/ruleset.yaml")).unwrap();

        let source = DiskSource::with_timeout(Duration::from_millis(200));
        let result = tokio::time::timeout(Duration::from_secs(10), source.read(&uri))
            .await
            .expect("the read should give up on its own");
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to fetch"), "{err:#}");
        drop(listener);
    }
}
