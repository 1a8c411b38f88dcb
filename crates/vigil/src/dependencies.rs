//! Fragment to root tracking
//!
//! When linting a root document produces problems in a referenced fragment,
//! the fragment is recorded as a dependent of that root. Validating the
//! fragment later re-lints the root instead, so its diagnostics stay owned by
//! the document that gave them context.

use std::collections::HashMap;

use tracing::debug;
use url::Url;

/// Flat dependent → root map. Lookups are one level deep, so chains and
/// loops are impossible.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    roots: HashMap<Url, Url>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded root for `uri`, or `uri` itself
    pub fn find_root(&self, uri: &Url) -> Url {
        self.roots.get(uri).unwrap_or(uri).clone()
    }

    /// Record every source other than `root` as a dependent of `root`.
    ///
    /// `root` was just linted as a root, so any edge it had is dropped, and
    /// documents that depended on a newly recorded source move to `root`.
    /// This keeps every mapped root unmapped itself, which is what makes
    /// [`DependencyTracker::find_root`] idempotent.
    pub fn record_dependencies<'a>(
        &mut self,
        root: &Url,
        sources: impl IntoIterator<Item = &'a Url>,
    ) {
        if let Some(previous) = self.roots.remove(root) {
            debug!("{} is a root again (was under {})", root, previous);
        }

        for source in sources {
            if source == root {
                continue;
            }
            if self.roots.get(source) != Some(root) {
                debug!("{} now depends on root {}", source, root);
            }
            self.roots.insert(source.clone(), root.clone());

            for mapped in self.roots.values_mut() {
                if mapped == source {
                    *mapped = root.clone();
                }
            }
        }
    }

    /// Dependents currently mapped to `root`, sorted
    pub fn dependents_of(&self, root: &Url) -> Vec<Url> {
        let mut dependents: Vec<Url> = self
            .roots
            .iter()
            .filter(|(_, r)| *r == root)
            .map(|(dependent, _)| dependent.clone())
            .collect();
        dependents.sort();
        dependents
    }

    /// Remove the edge for `uri`. Returns the root it pointed at.
    pub fn forget(&mut self, uri: &Url) -> Option<Url> {
        self.roots.remove(uri)
    }

    /// Clear every edge
    pub fn reset(&mut self) {
        self.roots.clear();
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(name: &str) -> Url {
        Url::parse(&format!("file:///ws/{name}")).unwrap()
    }

    #[test]
    fn test_unknown_documents_are_their_own_root() {
        let tracker = DependencyTracker::new();
        assert_eq!(tracker.find_root(&url("a.yaml")), url("a.yaml"));
    }

    #[test]
    fn test_record_skips_the_root_itself() {
        let mut tracker = DependencyTracker::new();
        let root = url("root.yaml");
        tracker.record_dependencies(&root, [&root, &url("frag.yaml")]);

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.find_root(&url("frag.yaml")), root);
        assert_eq!(tracker.find_root(&root), root);
    }

    #[test]
    fn test_find_root_is_idempotent() {
        let mut tracker = DependencyTracker::new();
        // frag -> mid, then mid is itself recorded under root
        tracker.record_dependencies(&url("mid.yaml"), [&url("frag.yaml")]);
        tracker.record_dependencies(&url("root.yaml"), [&url("mid.yaml")]);

        for name in ["frag.yaml", "mid.yaml", "root.yaml", "other.yaml"] {
            let once = tracker.find_root(&url(name));
            assert_eq!(tracker.find_root(&once), once, "find_root not idempotent for {name}");
        }
        assert_eq!(tracker.find_root(&url("frag.yaml")), url("root.yaml"));
    }

    #[test]
    fn test_linting_a_dependent_as_root_drops_its_edge() {
        let mut tracker = DependencyTracker::new();
        tracker.record_dependencies(&url("root.yaml"), [&url("frag.yaml")]);
        tracker.record_dependencies(&url("frag.yaml"), [&url("leaf.yaml")]);

        assert_eq!(tracker.find_root(&url("frag.yaml")), url("frag.yaml"));
        assert_eq!(tracker.find_root(&url("leaf.yaml")), url("frag.yaml"));
    }

    #[test]
    fn test_newer_lint_results_overwrite_edges() {
        let mut tracker = DependencyTracker::new();
        tracker.record_dependencies(&url("a.yaml"), [&url("shared.yaml")]);
        tracker.record_dependencies(&url("b.yaml"), [&url("shared.yaml")]);

        assert_eq!(tracker.find_root(&url("shared.yaml")), url("b.yaml"));
        assert!(tracker.dependents_of(&url("a.yaml")).is_empty());
        assert_eq!(tracker.dependents_of(&url("b.yaml")), vec![url("shared.yaml")]);
    }

    #[test]
    fn test_forget_and_reset() {
        let mut tracker = DependencyTracker::new();
        tracker.record_dependencies(&url("root.yaml"), [&url("x.yaml"), &url("y.yaml")]);
        assert_eq!(
            tracker.dependents_of(&url("root.yaml")),
            vec![url("x.yaml"), url("y.yaml")]
        );

        assert_eq!(tracker.forget(&url("x.yaml")), Some(url("root.yaml")));
        assert_eq!(tracker.find_root(&url("x.yaml")), url("x.yaml"));

        tracker.reset();
        assert!(tracker.is_empty());
    }
}
