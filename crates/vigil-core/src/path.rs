//! Document paths and `given` expressions
//!
//! [`JsonPath`] is a concrete location inside a document (a list of keys and
//! indices). [`GivenPath`] is the small JSON-path dialect rules use to select
//! nodes: `$`, `.key`, `['key']`, `[n]`, `[*]`, `.*`, `..key`, `..*` and
//! `['a','b']` unions.

use std::fmt;

use eyre::{Result, bail};

use crate::node::{Node, NodeValue};

/// One step in a document path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Concrete location of a node inside one document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct JsonPath(Vec<Segment>);

impl JsonPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn join_key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Key(key.into()));
        Self(segments)
    }

    pub fn join_index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Index(index));
        Self(segments)
    }

    /// Last key of the path, or the index rendered as text
    pub fn last_name(&self) -> Option<String> {
        self.0.last().map(|s| match s {
            Segment::Key(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
        })
    }

    /// Parse a JSON pointer (`/a/b~1c/0`). Numeric tokens become indices.
    pub fn from_pointer(pointer: &str) -> Result<Self> {
        if pointer.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = pointer.strip_prefix('/') else {
            bail!("JSON pointer must start with '/': {pointer}");
        };

        let segments = rest
            .split('/')
            .map(|token| {
                let token = percent_decode(token).replace("~1", "/").replace("~0", "~");
                match token.parse::<usize>() {
                    Ok(index) if !token.starts_with('+') => Segment::Index(index),
                    _ => Segment::Key(token),
                }
            })
            .collect();
        Ok(Self(segments))
    }

    /// Render as a JSON pointer
    pub fn to_pointer(&self) -> String {
        let mut out = String::new();
        for segment in &self.0 {
            out.push('/');
            match segment {
                Segment::Key(k) => out.push_str(&k.replace('~', "~0").replace('/', "~1")),
                Segment::Index(i) => out.push_str(&i.to_string()),
            }
        }
        out
    }
}

impl fmt::Display for JsonPath {
    /// Dotted form used in messages: `paths./users.get.responses`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                Segment::Key(k) => f.write_str(k)?,
                Segment::Index(idx) => write!(f, "{idx}")?,
            }
        }
        Ok(())
    }
}

fn percent_decode(token: &str) -> String {
    if !token.contains('%') {
        return token.to_string();
    }
    let bytes = token.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
            && let Ok(byte) = u8::from_str_radix(&token[i + 1..i + 3], 16)
        {
            out.push(byte);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ============================================================================
// Given expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Selector {
    Child(String),
    Index(usize),
    Wildcard,
    Descendant(String),
    DescendantWildcard,
    Union(Vec<String>),
}

/// Parsed `given` expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GivenPath {
    source: String,
    selectors: Vec<Selector>,
}

/// A node picked by a [`GivenPath`], with the logical path that reached it
#[derive(Debug, Clone)]
pub struct Selected<'a> {
    pub path: JsonPath,
    pub node: &'a Node,
}

impl GivenPath {
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let Some(mut rest) = trimmed.strip_prefix('$') else {
            bail!("given path must start with '$': {expression}");
        };

        let mut selectors = Vec::new();
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix("..") {
                if let Some(after_star) = after.strip_prefix('*') {
                    selectors.push(Selector::DescendantWildcard);
                    rest = after_star;
                } else if after.starts_with('[') {
                    let (inner, after_bracket) = take_bracket(after, expression)?;
                    match parse_bracket(inner, expression)? {
                        Selector::Child(name) => selectors.push(Selector::Descendant(name)),
                        Selector::Wildcard => selectors.push(Selector::DescendantWildcard),
                        other => bail!("unsupported descendant selector {other:?} in {expression}"),
                    }
                    rest = after_bracket;
                } else {
                    let (name, after_name) = take_name(after);
                    if name.is_empty() {
                        bail!("empty descendant name in {expression}");
                    }
                    selectors.push(Selector::Descendant(name.to_string()));
                    rest = after_name;
                }
            } else if let Some(after) = rest.strip_prefix('.') {
                if let Some(after_star) = after.strip_prefix('*') {
                    selectors.push(Selector::Wildcard);
                    rest = after_star;
                } else {
                    let (name, after_name) = take_name(after);
                    if name.is_empty() {
                        bail!("empty key in {expression}");
                    }
                    selectors.push(Selector::Child(name.to_string()));
                    rest = after_name;
                }
            } else if rest.starts_with('[') {
                let (inner, after_bracket) = take_bracket(rest, expression)?;
                selectors.push(parse_bracket(inner, expression)?);
                rest = after_bracket;
            } else {
                bail!("unexpected '{rest}' in given path {expression}");
            }
        }

        Ok(Self {
            source: trimmed.to_string(),
            selectors,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate against `root`, returning matches in document order
    pub fn select<'a>(&self, root: &'a Node) -> Vec<Selected<'a>> {
        let mut current = vec![Selected {
            path: JsonPath::root(),
            node: root,
        }];

        for selector in &self.selectors {
            let mut next = Vec::new();
            for selected in &current {
                apply(selector, selected, &mut next);
            }
            current = next;
        }

        current
    }
}

fn apply<'a>(selector: &Selector, selected: &Selected<'a>, out: &mut Vec<Selected<'a>>) {
    match selector {
        Selector::Child(name) => {
            if let Some(child) = selected.node.get(name) {
                out.push(Selected {
                    path: selected.path.join_key(name),
                    node: child,
                });
            }
        }
        Selector::Index(index) => {
            if let NodeValue::Sequence(items) = &selected.node.value
                && let Some(item) = items.get(*index)
            {
                out.push(Selected {
                    path: selected.path.join_index(*index),
                    node: item,
                });
            }
        }
        Selector::Union(names) => {
            for name in names {
                apply(&Selector::Child(name.clone()), selected, out);
            }
        }
        Selector::Wildcard => push_children(selected, out),
        Selector::Descendant(name) => {
            let mut all = Vec::new();
            collect_descendants(selected, &mut all);
            for candidate in &all {
                apply(&Selector::Child(name.clone()), candidate, out);
            }
        }
        Selector::DescendantWildcard => {
            let mut all = Vec::new();
            collect_descendants(selected, &mut all);
            for candidate in &all {
                push_children(candidate, out);
            }
        }
    }
}

fn push_children<'a>(selected: &Selected<'a>, out: &mut Vec<Selected<'a>>) {
    match &selected.node.value {
        NodeValue::Mapping(entries) => {
            for (key, child) in entries {
                out.push(Selected {
                    path: selected.path.join_key(key),
                    node: child,
                });
            }
        }
        NodeValue::Sequence(items) => {
            for (index, child) in items.iter().enumerate() {
                out.push(Selected {
                    path: selected.path.join_index(index),
                    node: child,
                });
            }
        }
        _ => {}
    }
}

/// `selected` and every node below it, pre-order
fn collect_descendants<'a>(selected: &Selected<'a>, out: &mut Vec<Selected<'a>>) {
    out.push(selected.clone());
    let mut children = Vec::new();
    push_children(selected, &mut children);
    for child in &children {
        collect_descendants(child, out);
    }
}

fn take_name(input: &str) -> (&str, &str) {
    let end = input.find(['.', '[']).unwrap_or(input.len());
    input.split_at(end)
}

fn take_bracket<'a>(input: &'a str, expression: &str) -> Result<(&'a str, &'a str)> {
    let body = &input[1..];
    let mut quote = None;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, ']') => return Ok((&body[..i], &body[i + 1..])),
            _ => {}
        }
    }
    bail!("unterminated '[' in given path {expression}")
}

fn parse_bracket(inner: &str, expression: &str) -> Result<Selector> {
    let inner = inner.trim();
    if inner == "*" {
        return Ok(Selector::Wildcard);
    }
    if let Ok(index) = inner.parse::<usize>() {
        return Ok(Selector::Index(index));
    }

    let mut names = Vec::new();
    for part in split_union(inner) {
        let part = part.trim();
        let unquoted = part
            .strip_prefix('\'')
            .and_then(|p| p.strip_suffix('\''))
            .or_else(|| part.strip_prefix('"').and_then(|p| p.strip_suffix('"')));
        match unquoted {
            Some(name) => names.push(name.to_string()),
            None => bail!("unsupported selector [{inner}] in given path {expression}"),
        }
    }

    match names.len() {
        0 => bail!("empty selector in given path {expression}"),
        1 => Ok(Selector::Child(names.remove(0))),
        _ => Ok(Selector::Union(names)),
    }
}

fn split_union(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote = None;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, ',') => {
                parts.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&inner[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use url::Url;

    fn node(yaml: &str) -> Node {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let uri = Arc::new(Url::parse("file:///doc.yaml").unwrap());
        Node::from_value(&value, &uri, &JsonPath::root())
    }

    fn paths(given: &str, yaml: &str) -> Vec<String> {
        let root = node(yaml);
        GivenPath::parse(given)
            .unwrap()
            .select(&root)
            .into_iter()
            .map(|s| s.path.to_string())
            .collect()
    }

    #[test]
    fn pointer_escapes() {
        let path = JsonPath::from_pointer("/paths/~1users~1{id}/get/0").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("paths".into()),
                Segment::Key("/users/{id}".into()),
                Segment::Key("get".into()),
                Segment::Index(0),
            ]
        );
        assert_eq!(path.to_pointer(), "/paths/~1users~1{id}/get/0");
        assert!(JsonPath::from_pointer("").unwrap().is_root());
        assert!(JsonPath::from_pointer("nope").is_err());
    }

    #[test]
    fn child_and_bracket_selectors() {
        let yaml = "info:\n  title: t\n  contact:\n    name: n\n";
        assert_eq!(paths("$.info.title", yaml), vec!["info.title"]);
        assert_eq!(paths("$['info']['contact'].name", yaml), vec!["info.contact.name"]);
        assert_eq!(paths("$", yaml), vec![""]);
        assert!(paths("$.missing", yaml).is_empty());
    }

    #[test]
    fn wildcards_and_indices() {
        let yaml = "paths:\n  /a:\n    get: {}\n  /b:\n    post: {}\ntags:\n  - x\n  - y\n";
        assert_eq!(paths("$.paths.*", yaml), vec!["paths./a", "paths./b"]);
        assert_eq!(paths("$.paths[*][*]", yaml), vec!["paths./a.get", "paths./b.post"]);
        assert_eq!(paths("$.tags[1]", yaml), vec!["tags.1"]);
    }

    #[test]
    fn descendant_and_union() {
        let yaml = "a:\n  name: 1\n  b:\n    name: 2\nname: 0\n";
        assert_eq!(paths("$..name", yaml), vec!["name", "a.name", "a.b.name"]);
        let yaml = "paths:\n  /a:\n    get: {}\n    post: {}\n    x-ext: {}\n";
        assert_eq!(
            paths("$.paths.*['get','post']", yaml),
            vec!["paths./a.get", "paths./a.post"]
        );
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(GivenPath::parse("info.title").is_err());
        assert!(GivenPath::parse("$.info[").is_err());
        assert!(GivenPath::parse("$[?(@.x)]").is_err());
    }
}
