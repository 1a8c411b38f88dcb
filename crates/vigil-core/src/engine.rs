//! The lint engine
//!
//! [`Linter::lint`] parses a root document, follows its `$ref`s, runs every
//! applicable rule and returns [`Problem`]s located in the document that
//! produced them.

use std::collections::HashSet;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use tracing::debug;
use url::Url;

use crate::document::Range;
use crate::formats;
use crate::functions::Input;
use crate::node::{Node, NodeValue};
use crate::path::{JsonPath, Selected};
use crate::resolver::{DocumentGraph, LoadedDocument, RefIssue, TreeBuilder};
use crate::ruleset::{Rule, Ruleset, Severity, Then};
use crate::sources::DocumentSource;

/// Rule code for documents that fail to parse
pub const PARSER_CODE: &str = "parser";

/// Rule code for `$ref`s that cannot be followed
pub const INVALID_REF_CODE: &str = "invalid-ref";

/// The document to lint
#[derive(Debug, Clone)]
pub struct LintTarget {
    pub uri: Url,
    pub text: String,
}

impl LintTarget {
    pub fn new(uri: Url, text: impl Into<String>) -> Self {
        Self {
            uri,
            text: text.into(),
        }
    }
}

/// A rule violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    /// Rule name (or [`PARSER_CODE`] / [`INVALID_REF_CODE`])
    pub code: String,
    pub message: String,
    pub severity: Severity,
    /// Location in the document the offending value came from
    pub range: Range,
    /// Path of the offending value in the resolved root document
    pub path: JsonPath,
    /// Document the problem belongs to; `None` is the root document
    pub source: Option<Url>,
}

/// Runs rulesets against documents
pub struct Linter {
    source: Arc<dyn DocumentSource>,
    ruleset: Arc<Ruleset>,
}

impl Linter {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self {
            source,
            ruleset: Arc::new(Ruleset::empty()),
        }
    }

    /// Lint `target` with `ruleset`. The ruleset replaces whatever the previous
    /// call used; `None` lints with no rules at all.
    pub async fn lint(
        &mut self,
        target: &LintTarget,
        ruleset: Option<Arc<Ruleset>>,
    ) -> Result<Vec<Problem>> {
        self.ruleset = ruleset.unwrap_or_else(|| Arc::new(Ruleset::empty()));
        if self.ruleset.is_empty() {
            debug!("no rules to run for {}", target.uri);
            return Ok(Vec::new());
        }

        let root = match LoadedDocument::parse(target.uri.clone(), &target.text) {
            Ok(root) => root,
            Err(e) => {
                return Ok(vec![Problem {
                    code: PARSER_CODE.to_string(),
                    message: e.message,
                    severity: Severity::Error,
                    range: Range::new(e.position, e.position),
                    path: JsonPath::root(),
                    source: None,
                }]);
            }
        };

        let formats = formats::detect(&root.value);
        let rules: Vec<&Rule> = self
            .ruleset
            .rules()
            .filter(|rule| rule.applies_to(&formats))
            .collect();
        debug!(
            "linting {} with {} rules (formats: {:?})",
            target.uri,
            rules.len(),
            formats
        );

        // the cache of referenced documents lives for one call only
        let graph = DocumentGraph::load(root, self.source.as_ref()).await;
        let Some(root) = graph.get(&target.uri).cloned() else {
            return Ok(Vec::new());
        };

        let (resolved, issues) = TreeBuilder::new(&graph, true)
            .build(&root)
            .wrap_err_with(|| format!("Failed to resolve {}", target.uri))?;
        let unresolved = if rules.iter().any(|r| !r.resolved) {
            let (tree, _) = TreeBuilder::new(&graph, false)
                .build(&root)
                .wrap_err_with(|| format!("Failed to build {}", target.uri))?;
            Some(tree)
        } else {
            None
        };

        let run = Run {
            graph: &graph,
            root: &target.uri,
        };

        let mut problems: Vec<Problem> = issues.iter().map(|issue| run.ref_problem(issue)).collect();
        for rule in rules {
            let tree = match (&unresolved, rule.resolved) {
                (Some(tree), false) => tree,
                _ => &resolved,
            };
            run.apply_rule(rule, tree, &mut problems);
        }

        let mut seen = HashSet::new();
        problems.retain(|p| {
            seen.insert((
                p.code.clone(),
                p.source.clone(),
                p.range,
                p.message.clone(),
            ))
        });
        problems.sort_by(|a, b| {
            (&a.source, a.range, &a.code).cmp(&(&b.source, b.range, &b.code))
        });

        Ok(problems)
    }
}

/// State shared by every rule in one lint call
struct Run<'a> {
    graph: &'a DocumentGraph,
    root: &'a Url,
}

impl Run<'_> {
    fn apply_rule(&self, rule: &Rule, tree: &Node, out: &mut Vec<Problem>) {
        for given in &rule.given {
            for selected in given.select(tree) {
                for then in &rule.then {
                    self.apply_then(rule, then, &selected, out);
                }
            }
        }
    }

    fn apply_then(&self, rule: &Rule, then: &Then, selected: &Selected<'_>, out: &mut Vec<Problem>) {
        match then.field.as_deref() {
            None => {
                let property = selected.path.last_name().unwrap_or_default();
                let messages = then.function.evaluate(Input::Node(selected.node), &property);
                self.report(rule, messages, &property, &selected.path, Some(selected.node), selected.node, out);
            }
            Some("@key") => {
                if let NodeValue::Mapping(entries) = &selected.node.value {
                    for (key, child) in entries {
                        let messages = then.function.evaluate(Input::Key(key), key);
                        let path = selected.path.join_key(key.clone());
                        self.report(rule, messages, key, &path, Some(child), child, out);
                    }
                }
            }
            Some(field) => {
                let property = field.rsplit('.').next().unwrap_or(field).to_string();
                let mut path = selected.path.clone();
                for part in field.split('.') {
                    path = match part.parse::<usize>() {
                        Ok(index) if matches!(selected.node.value, NodeValue::Sequence(_)) => {
                            path.join_index(index)
                        }
                        _ => path.join_key(part),
                    };
                }
                match selected.node.get_field(field) {
                    Some(child) => {
                        let messages = then.function.evaluate(Input::Node(child), &property);
                        self.report(rule, messages, &property, &path, Some(child), child, out);
                    }
                    None => {
                        let messages = then.function.evaluate(Input::Missing, &property);
                        // a missing field is reported on its parent
                        self.report(rule, messages, &property, &path, None, selected.node, out);
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        rule: &Rule,
        messages: Vec<String>,
        property: &str,
        path: &JsonPath,
        value: Option<&Node>,
        location: &Node,
        out: &mut Vec<Problem>,
    ) {
        for error in messages {
            let message = render_message(rule, &error, property, path, value);
            out.push(Problem {
                code: rule.name.clone(),
                message,
                severity: rule.severity,
                range: self.locate(&location.document, &location.path),
                path: path.clone(),
                source: self.source_of(&location.document),
            });
        }
    }

    fn ref_problem(&self, issue: &RefIssue) -> Problem {
        Problem {
            code: INVALID_REF_CODE.to_string(),
            message: issue.message.clone(),
            severity: Severity::Error,
            range: self.locate(&issue.document, &issue.path),
            path: issue.path.clone(),
            source: self.source_of(&issue.document),
        }
    }

    fn locate(&self, document: &Url, path: &JsonPath) -> Range {
        self.graph
            .get(document)
            .map(|doc| doc.source_map.locate(path))
            .unwrap_or_default()
    }

    fn source_of(&self, document: &Url) -> Option<Url> {
        (document != self.root).then(|| document.clone())
    }
}

fn render_message(
    rule: &Rule,
    error: &str,
    property: &str,
    path: &JsonPath,
    value: Option<&Node>,
) -> String {
    let template = rule.message.as_deref().unwrap_or("{{error}}");
    let rendered = template
        .replace("{{error}}", error)
        .replace("{{property}}", property)
        .replace("{{path}}", &path.to_string())
        .replace("{{description}}", rule.description.as_deref().unwrap_or(""))
        .replace(
            "{{value}}",
            &value.map(|v| v.to_string()).unwrap_or_default(),
        );
    if rendered.trim().is_empty() {
        error.to_string()
    } else {
        rendered
    }
}
