//! `$ref` resolution
//!
//! Resolution runs in two phases. [`DocumentGraph::load`] reads every document
//! reachable through `$ref` from the root (asynchronously, through a
//! [`DocumentSource`]). [`TreeBuilder`] then builds the resolved [`Node`] tree
//! synchronously from the loaded documents, recording references that could
//! not be followed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use eyre::{Result, bail};
use serde_yaml::Value;
use tracing::debug;
use url::Url;

use crate::document::{ParseError, SourceMap, parse_document};
use crate::node::{Node, NodeValue, key_to_string};
use crate::path::{JsonPath, Segment};
use crate::sources::DocumentSource;

/// Maximum number of nested `$ref` hops followed along one branch
const MAX_REF_DEPTH: usize = 64;

/// Maximum number of nodes in one resolved tree
const MAX_NODES: usize = 500_000;

/// A parsed document taking part in a lint run
#[derive(Debug)]
pub struct LoadedDocument {
    pub uri: Arc<Url>,
    pub value: Value,
    pub source_map: SourceMap,
}

impl LoadedDocument {
    pub fn parse(uri: Url, text: &str) -> Result<Self, ParseError> {
        let value = parse_document(text)?;
        Ok(Self {
            uri: Arc::new(uri),
            value,
            source_map: SourceMap::new(text),
        })
    }
}

/// Every document reachable from a root, keyed by URI without fragment
#[derive(Debug, Default)]
pub struct DocumentGraph {
    documents: HashMap<Url, Result<Arc<LoadedDocument>, String>>,
}

impl DocumentGraph {
    /// Load `root` and everything it references, breadth first
    pub async fn load(root: LoadedDocument, source: &dyn DocumentSource) -> Self {
        let mut graph = Self::default();
        let mut queue = VecDeque::new();

        let root = Arc::new(root);
        queue.push_back(root.clone());
        graph.documents.insert((*root.uri).clone(), Ok(root));

        while let Some(document) = queue.pop_front() {
            let mut refs = Vec::new();
            collect_refs(&document.value, &mut refs);

            for reference in refs {
                let Ok((target, _)) = split_reference(&document.uri, &reference) else {
                    continue;
                };
                if graph.documents.contains_key(&target) {
                    continue;
                }

                debug!("loading referenced document {}", target);
                let entry = match source.read(&target).await {
                    Ok(text) => match LoadedDocument::parse(target.clone(), &text) {
                        Ok(loaded) => {
                            let loaded = Arc::new(loaded);
                            queue.push_back(loaded.clone());
                            Ok(loaded)
                        }
                        Err(e) => Err(format!("failed to parse {target}: {}", e.message)),
                    },
                    Err(e) => Err(format!("{e:#}")),
                };
                graph.documents.insert(target, entry);
            }
        }

        graph
    }

    pub fn get(&self, uri: &Url) -> Option<&Arc<LoadedDocument>> {
        self.documents.get(uri).and_then(|entry| entry.as_ref().ok())
    }

    fn lookup(&self, uri: &Url) -> Result<&Arc<LoadedDocument>, String> {
        match self.documents.get(uri) {
            Some(Ok(doc)) => Ok(doc),
            Some(Err(e)) => Err(e.clone()),
            None => Err(format!("document {uri} was not loaded")),
        }
    }
}

/// A `$ref` that could not be followed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefIssue {
    /// Document containing the `$ref`
    pub document: Arc<Url>,
    /// Path of the `$ref` key inside that document
    pub path: JsonPath,
    pub message: String,
}

/// Builds the resolved tree for a root document
pub struct TreeBuilder<'g> {
    graph: &'g DocumentGraph,
    resolve: bool,
    /// `(document, pointer)` pairs currently being expanded
    stack: Vec<(Url, String)>,
    issues: Vec<RefIssue>,
    seen_issues: HashSet<(Url, JsonPath)>,
    nodes: usize,
}

impl<'g> TreeBuilder<'g> {
    pub fn new(graph: &'g DocumentGraph, resolve: bool) -> Self {
        Self {
            graph,
            resolve,
            stack: Vec::new(),
            issues: Vec::new(),
            seen_issues: HashSet::new(),
            nodes: 0,
        }
    }

    /// Build the tree for `document`. Errors only when the tree grows past the
    /// node budget.
    pub fn build(mut self, document: &LoadedDocument) -> Result<(Node, Vec<RefIssue>)> {
        let node = self.build_value(&document.value, &document.uri, &JsonPath::root())?;
        Ok((node, self.issues))
    }

    fn build_value(&mut self, value: &Value, document: &Arc<Url>, path: &JsonPath) -> Result<Node> {
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            bail!("resolved document exceeds {MAX_NODES} nodes");
        }

        if self.resolve
            && let Value::Mapping(map) = value
            && let Some(Value::String(reference)) = map.get("$ref")
            && let Some(node) = self.follow(reference, document, path)?
        {
            return Ok(node);
        }

        let node_value = match value {
            Value::Null => NodeValue::Null,
            Value::Bool(b) => NodeValue::Bool(*b),
            Value::Number(n) => NodeValue::Number(n.clone()),
            Value::String(s) => NodeValue::String(s.clone()),
            Value::Sequence(items) => {
                let mut children = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    children.push(self.build_value(item, document, &path.join_index(i))?);
                }
                NodeValue::Sequence(children)
            }
            Value::Mapping(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (k, v) in map {
                    let key = key_to_string(k);
                    let child = self.build_value(v, document, &path.join_key(key.clone()))?;
                    entries.push((key, child));
                }
                NodeValue::Mapping(entries)
            }
            Value::Tagged(tagged) => return self.build_value(&tagged.value, document, path),
        };

        Ok(Node {
            value: node_value,
            document: document.clone(),
            path: path.clone(),
        })
    }

    /// Expand a `$ref`. `None` leaves the reference in place (cycles and
    /// failures).
    fn follow(
        &mut self,
        reference: &str,
        document: &Arc<Url>,
        path: &JsonPath,
    ) -> Result<Option<Node>> {
        let ref_path = path.join_key("$ref");

        let (target_uri, pointer) = match split_reference(document, reference) {
            Ok(split) => split,
            Err(message) => {
                self.issue(document, ref_path, message);
                return Ok(None);
            }
        };

        let key = (target_uri.clone(), pointer.clone());
        if self.stack.contains(&key) {
            debug!("circular reference {} in {}", reference, document);
            return Ok(None);
        }
        if self.stack.len() >= MAX_REF_DEPTH {
            self.issue(
                document,
                ref_path,
                format!("'{reference}' exceeds the maximum reference depth"),
            );
            return Ok(None);
        }

        let target = match self.graph.lookup(&target_uri) {
            Ok(target) => target.clone(),
            Err(e) => {
                self.issue(document, ref_path, format!("'{reference}' cannot be resolved: {e}"));
                return Ok(None);
            }
        };

        let target_path = match JsonPath::from_pointer(&pointer) {
            Ok(p) => p,
            Err(e) => {
                self.issue(document, ref_path, format!("'{reference}' is invalid: {e}"));
                return Ok(None);
            }
        };

        let Some(value) = value_at(&target.value, &target_path) else {
            self.issue(
                document,
                ref_path,
                format!("'{reference}' does not exist"),
            );
            return Ok(None);
        };

        self.stack.push(key);
        let node = self.build_value(value, &target.uri, &target_path);
        self.stack.pop();
        node.map(Some)
    }

    fn issue(&mut self, document: &Arc<Url>, path: JsonPath, message: String) {
        if self.seen_issues.insert(((**document).clone(), path.clone())) {
            self.issues.push(RefIssue {
                document: document.clone(),
                path,
                message,
            });
        }
    }
}

/// Split a reference into the target document (without fragment) and the
/// JSON pointer inside it
pub fn split_reference(base: &Url, reference: &str) -> Result<(Url, String), String> {
    let (location, fragment) = match reference.split_once('#') {
        Some((location, fragment)) => (location, fragment),
        None => (reference, ""),
    };

    let mut target = if location.is_empty() {
        base.clone()
    } else {
        base.join(location)
            .map_err(|e| format!("'{reference}' is not a valid reference: {e}"))?
    };
    target.set_fragment(None);

    Ok((target, fragment.to_string()))
}

/// Value at `path`, tolerating numeric keys in mappings
pub fn value_at<'v>(root: &'v Value, path: &JsonPath) -> Option<&'v Value> {
    let mut current = root;
    for segment in path.segments() {
        while let Value::Tagged(tagged) = current {
            current = &tagged.value;
        }
        current = match (current, segment) {
            (Value::Mapping(map), Segment::Key(key)) => map.get(key.as_str())?,
            (Value::Mapping(map), Segment::Index(index)) => map
                .get(index.to_string().as_str())
                .or_else(|| map.get(Value::Number((*index as u64).into())))?,
            (Value::Sequence(items), Segment::Index(index)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

fn collect_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Mapping(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                out.push(reference.clone());
            }
            for (_, v) in map {
                collect_refs(v, out);
            }
        }
        Value::Sequence(items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        Value::Tagged(tagged) => collect_refs(&tagged.value, out),
        _ => {}
    }
}
