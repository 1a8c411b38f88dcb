//! Document parsing and source locations
//!
//! Documents are parsed as YAML (JSON is accepted as YAML). Rule evaluation
//! works on the parsed value; positions are recovered afterwards from a
//! [`SourceMap`] built from the tree-sitter syntax tree of the same text.

use arborium::tree_sitter::{Language, Node, Parser, Tree};
use serde_yaml::Value;
use tracing::warn;

use crate::node::key_to_string;
use crate::path::{JsonPath, Segment};

/// Zero-based line/character position
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Half-open range between two positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Range covering `len` characters of a single line
    pub fn on_line(line: u32, character: u32, len: u32) -> Self {
        Self {
            start: Position::new(line, character),
            end: Position::new(line, character + len),
        }
    }
}

/// Syntax error reported by the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub position: Position,
}

/// Parse document text. Empty (or whitespace-only) text is an empty document.
pub fn parse_document(text: &str) -> Result<Value, ParseError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_yaml::from_str::<Value>(text).map_err(|e| {
        // serde_yaml reports 1-indexed locations
        let position = e
            .location()
            .map(|loc| {
                Position::new(
                    loc.line().saturating_sub(1) as u32,
                    loc.column().saturating_sub(1) as u32,
                )
            })
            .unwrap_or_default();
        ParseError {
            message: e.to_string(),
            position,
        }
    })
}

// ============================================================================
// Source map
// ============================================================================

/// Wrapper nodes whose first meaningful child carries the content
const WRAPPER_KINDS: &[&str] = &["stream", "document", "block_node", "flow_node"];

/// Nodes that decorate a value without being one
const DECORATION_KINDS: &[&str] = &["comment", "anchor", "tag"];

#[derive(Debug, Clone, Default)]
enum Children {
    #[default]
    Leaf,
    Mapping(Vec<(String, Located)>),
    Sequence(Vec<Located>),
}

/// A node of the syntax tree, reduced to what positions need
#[derive(Debug, Clone, Default)]
struct Located {
    /// Range to highlight: the key of a mapping entry, or the whole item of a
    /// sequence
    range: Range,
    children: Children,
}

/// Maps JSON paths to ranges in a document's text.
///
/// Built from the tree-sitter YAML grammar. Text that looks like JSON is
/// parsed with the JSON grammar first and falls back to YAML if that fails.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    root: Located,
}

impl SourceMap {
    pub fn new(text: &str) -> Self {
        let trimmed = text.trim_start();
        let tree = if trimmed.starts_with('{') || trimmed.starts_with('[') {
            parse_tree(text, Grammar::Json)
                .filter(|tree| !tree.root_node().has_error())
                .or_else(|| parse_tree(text, Grammar::Yaml))
        } else {
            parse_tree(text, Grammar::Yaml)
        };

        let Some(tree) = tree else {
            return Self::default();
        };

        let lines = LineIndex::new(text);
        let root = content_node(tree.root_node())
            .map(|node| Located {
                range: Range::default(),
                children: children_of(node, text, &lines),
            })
            .unwrap_or_default();

        Self { root }
    }

    /// Locate the node at `path`.
    ///
    /// Returns the range of the deepest segment that could be found. The
    /// empty path (and any path whose first segment is missing) maps to the
    /// start of the document.
    pub fn locate(&self, path: &JsonPath) -> Range {
        let mut found = Range::default();
        let mut node = &self.root;

        for segment in path.segments() {
            let next = match (segment, &node.children) {
                (Segment::Key(wanted), Children::Mapping(entries)) => entries
                    .iter()
                    .find(|(key, _)| key == wanted)
                    .map(|(_, child)| child),
                (Segment::Index(index), Children::Sequence(items)) => items.get(*index),
                _ => None,
            };
            let Some(next) = next else {
                break;
            };
            found = next.range;
            node = next;
        }

        found
    }
}

#[derive(Debug, Clone, Copy)]
enum Grammar {
    Json,
    Yaml,
}

fn parse_tree(text: &str, grammar: Grammar) -> Option<Tree> {
    let mut parser = Parser::new();
    let language: Language = match grammar {
        Grammar::Json => arborium_json::language().into(),
        Grammar::Yaml => arborium_yaml::language().into(),
    };
    if let Err(e) = parser.set_language(&language) {
        warn!("Failed to load {:?} grammar: {}", grammar, e);
        return None;
    }
    parser.parse(text, None)
}

/// Skip wrapper and decoration nodes down to the node holding the value
fn content_node(node: Node<'_>) -> Option<Node<'_>> {
    let mut node = node;
    while WRAPPER_KINDS.contains(&node.kind()) {
        let mut cursor = node.walk();
        let inner = node.named_children(&mut cursor).find(|child| {
            !DECORATION_KINDS.contains(&child.kind()) && !child.kind().ends_with("_directive")
        })?;
        node = inner;
    }
    Some(node)
}

fn children_of(node: Node<'_>, text: &str, lines: &LineIndex) -> Children {
    let mut cursor = node.walk();
    match node.kind() {
        "block_mapping" | "flow_mapping" | "object" => {
            let mut entries = Vec::new();
            for entry in node.named_children(&mut cursor) {
                let (key, value) = match entry.kind() {
                    "block_mapping_pair" | "flow_pair" | "pair" => (
                        entry.child_by_field_name("key"),
                        entry.child_by_field_name("value"),
                    ),
                    // `{a}`: a key with no value
                    "flow_node" => (Some(entry), None),
                    _ => continue,
                };
                let Some(key) = key else {
                    continue;
                };
                let name = key_text(key, text);
                // the first occurrence wins, like the parsed value
                if entries.iter().any(|(existing, _)| *existing == name) {
                    continue;
                }
                let children = value
                    .and_then(content_node)
                    .map(|value| children_of(value, text, lines))
                    .unwrap_or_default();
                entries.push((
                    name,
                    Located {
                        range: lines.range(key),
                        children,
                    },
                ));
            }
            Children::Mapping(entries)
        }
        "block_sequence" => Children::Sequence(
            node.named_children(&mut cursor)
                .filter(|item| item.kind() == "block_sequence_item")
                .map(|item| {
                    let mut item_cursor = item.walk();
                    let children = item
                        .named_children(&mut item_cursor)
                        .find(|child| child.kind() != "comment")
                        .and_then(content_node)
                        .map(|value| children_of(value, text, lines))
                        .unwrap_or_default();
                    Located {
                        range: lines.range(item),
                        children,
                    }
                })
                .collect(),
        ),
        "flow_sequence" | "array" => Children::Sequence(
            node.named_children(&mut cursor)
                .filter(|item| item.kind() != "comment")
                .map(|item| Located {
                    range: lines.range(item),
                    children: content_node(item)
                        .map(|value| children_of(value, text, lines))
                        .unwrap_or_default(),
                })
                .collect(),
        ),
        _ => Children::Leaf,
    }
}

/// Decoded text of a mapping key, matching how parsed keys are named
fn key_text(key: Node<'_>, text: &str) -> String {
    let raw = text.get(key.start_byte()..key.end_byte()).unwrap_or_default();
    match serde_yaml::from_str::<Value>(raw.trim()) {
        Ok(value) => key_to_string(&value),
        Err(_) => raw.trim().to_string(),
    }
}

/// Byte offset to LSP position conversion (UTF-16 characters)
struct LineIndex<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { text, line_starts }
    }

    fn position(&self, byte: usize) -> Position {
        let line = self.line_starts.partition_point(|start| *start <= byte) - 1;
        let start = self.line_starts[line];
        let character = self
            .text
            .get(start..byte)
            .map(|prefix| prefix.encode_utf16().count())
            .unwrap_or_default();
        Position::new(line as u32, character as u32)
    }

    fn range(&self, node: Node<'_>) -> Range {
        Range::new(self.position(node.start_byte()), self.position(node.end_byte()))
    }
}
