//! Core rule functions
//!
//! A rule's `then` clause names one of these functions plus its options.
//! Options are validated when the ruleset is built, so evaluation itself
//! cannot fail: it returns the list of violation messages (empty when the
//! target passes).

use eyre::{Result, WrapErr, bail, eyre};
use regex::Regex;
use serde_json::Value as JsonValue;
use serde_yaml::Value;

use crate::node::{Node, NodeValue};

/// Supported `casing` styles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasingType {
    Flat,
    Camel,
    Pascal,
    Kebab,
    Cobol,
    Snake,
    Macro,
}

impl CasingType {
    fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "flat" => Self::Flat,
            "camel" => Self::Camel,
            "pascal" => Self::Pascal,
            "kebab" => Self::Kebab,
            "cobol" => Self::Cobol,
            "snake" => Self::Snake,
            "macro" => Self::Macro,
            other => bail!("unknown casing type '{other}'"),
        })
    }

    fn pattern(self, disallow_digits: bool) -> String {
        let d = if disallow_digits { "" } else { "0-9" };
        match self {
            Self::Flat => format!("^[a-z][a-z{d}]*$"),
            Self::Camel => format!("^[a-z][a-z{d}]*(?:[A-Z{d}](?:[a-z{d}]+|$))*$"),
            Self::Pascal => format!("^[A-Z][a-z{d}]*(?:[A-Z{d}](?:[a-z{d}]+|$))*$"),
            Self::Kebab => format!("^[a-z][a-z{d}]*(?:-[a-z{d}]+)*$"),
            Self::Cobol => format!("^[A-Z][A-Z{d}]*(?:-[A-Z{d}]+)*$"),
            Self::Snake => format!("^[a-z][a-z{d}]*(?:_[a-z{d}]+)*$"),
            Self::Macro => format!("^[A-Z][A-Z{d}]*(?:_[A-Z{d}]+)*$"),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Camel => "camel",
            Self::Pascal => "pascal",
            Self::Kebab => "kebab",
            Self::Cobol => "cobol",
            Self::Snake => "snake",
            Self::Macro => "macro",
        }
    }
}

/// A compiled rule function
#[derive(Debug, Clone)]
pub enum RuleFunction {
    Truthy,
    Falsy,
    Defined,
    Undefined,
    Pattern {
        matches: Option<Regex>,
        not_matches: Option<Regex>,
    },
    Enumeration {
        values: Vec<Value>,
    },
    Length {
        min: Option<f64>,
        max: Option<f64>,
    },
    Casing {
        kind: CasingType,
        regex: Regex,
    },
    Alphabetical {
        keyed_by: Option<String>,
    },
}

/// What the function is applied to
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    /// The targeted field does not exist
    Missing,
    Node(&'a Node),
    /// A mapping key (`field: "@key"`)
    Key(&'a str),
}

impl RuleFunction {
    /// Build a function from its name and `functionOptions`
    pub fn from_definition(name: &str, options: Option<&JsonValue>) -> Result<Self> {
        let option_str = |key: &str| -> Result<Option<String>> {
            match options.and_then(|o| o.get(key)) {
                None | Some(JsonValue::Null) => Ok(None),
                Some(JsonValue::String(s)) => Ok(Some(s.clone())),
                Some(other) => Err(eyre!("option '{key}' of {name} must be a string, got {other}")),
            }
        };
        let option_f64 = |key: &str| -> Result<Option<f64>> {
            match options.and_then(|o| o.get(key)) {
                None | Some(JsonValue::Null) => Ok(None),
                Some(v) => v
                    .as_f64()
                    .map(Some)
                    .ok_or_else(|| eyre!("option '{key}' of {name} must be a number, got {v}")),
            }
        };

        Ok(match name {
            "truthy" => Self::Truthy,
            "falsy" => Self::Falsy,
            "defined" => Self::Defined,
            "undefined" => Self::Undefined,
            "pattern" => {
                let matches = option_str("match")?
                    .map(|p| compile_pattern(&p))
                    .transpose()?;
                let not_matches = option_str("notMatch")?
                    .map(|p| compile_pattern(&p))
                    .transpose()?;
                if matches.is_none() && not_matches.is_none() {
                    bail!("pattern requires 'match' or 'notMatch'");
                }
                Self::Pattern {
                    matches,
                    not_matches,
                }
            }
            "enumeration" => {
                let Some(JsonValue::Array(values)) = options.and_then(|o| o.get("values")) else {
                    bail!("enumeration requires a 'values' list");
                };
                let values = values
                    .iter()
                    .map(|v| serde_yaml::to_value(v).wrap_err("invalid enumeration value"))
                    .collect::<Result<Vec<_>>>()?;
                Self::Enumeration { values }
            }
            "length" => {
                let min = option_f64("min")?;
                let max = option_f64("max")?;
                if min.is_none() && max.is_none() {
                    bail!("length requires 'min' or 'max'");
                }
                Self::Length { min, max }
            }
            "casing" => {
                let Some(kind) = option_str("type")? else {
                    bail!("casing requires a 'type'");
                };
                let kind = CasingType::parse(&kind)?;
                let disallow_digits = options
                    .and_then(|o| o.get("disallowDigits"))
                    .and_then(JsonValue::as_bool)
                    .unwrap_or(false);
                let regex = Regex::new(&kind.pattern(disallow_digits))
                    .wrap_err("failed to build casing pattern")?;
                Self::Casing { kind, regex }
            }
            "alphabetical" => Self::Alphabetical {
                keyed_by: option_str("keyedBy")?,
            },
            other => bail!("unknown function '{other}'"),
        })
    }

    /// Evaluate against `input`. `property` names the target in messages.
    pub fn evaluate(&self, input: Input<'_>, property: &str) -> Vec<String> {
        let fail = |message: String| vec![message];

        match (self, input) {
            (Self::Defined, Input::Missing) => fail(format!("\"{property}\" property must be defined")),
            (Self::Defined, _) => vec![],
            (Self::Undefined, Input::Missing) => vec![],
            (Self::Undefined, _) => fail(format!("\"{property}\" property must be undefined")),

            (Self::Truthy, Input::Missing) => fail(format!("\"{property}\" property must be truthy")),
            (Self::Truthy, Input::Node(node)) if !node.is_truthy() => {
                fail(format!("\"{property}\" property must be truthy"))
            }
            (Self::Truthy, Input::Key(key)) if key.is_empty() => {
                fail(format!("\"{property}\" property must be truthy"))
            }
            (Self::Truthy, _) => vec![],

            (Self::Falsy, Input::Node(node)) if node.is_truthy() => {
                fail(format!("\"{property}\" property must be falsy"))
            }
            (Self::Falsy, Input::Key(key)) if !key.is_empty() => {
                fail(format!("\"{property}\" property must be falsy"))
            }
            (Self::Falsy, _) => vec![],

            // remaining functions only look at values that exist
            (_, Input::Missing) => vec![],

            (
                Self::Pattern {
                    matches,
                    not_matches,
                },
                input,
            ) => {
                let Some(text) = scalar_text(input) else {
                    return vec![];
                };
                let mut messages = Vec::new();
                if let Some(re) = matches
                    && !re.is_match(&text)
                {
                    messages.push(format!("\"{text}\" must match the pattern \"{}\"", re.as_str()));
                }
                if let Some(re) = not_matches
                    && re.is_match(&text)
                {
                    messages.push(format!(
                        "\"{text}\" must not match the pattern \"{}\"",
                        re.as_str()
                    ));
                }
                messages
            }

            (Self::Enumeration { values }, input) => {
                let allowed = match input {
                    Input::Node(node) => {
                        if matches!(node.value, NodeValue::Sequence(_) | NodeValue::Mapping(_)) {
                            return vec![];
                        }
                        values.iter().any(|v| node.same_scalar(v))
                    }
                    Input::Key(key) => values.iter().any(|v| v.as_str() == Some(key)),
                    Input::Missing => true,
                };
                if allowed {
                    vec![]
                } else {
                    let shown = scalar_text(input).unwrap_or_default();
                    let options: Vec<String> = values.iter().map(render_value).collect();
                    fail(format!(
                        "\"{shown}\" must be equal to one of the allowed values: {}",
                        options
                            .iter()
                            .map(|o| format!("\"{o}\""))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ))
                }
            }

            (Self::Length { min, max }, input) => {
                let size = match input {
                    Input::Key(key) => key.chars().count() as f64,
                    Input::Node(node) => match &node.value {
                        NodeValue::String(s) => s.chars().count() as f64,
                        NodeValue::Sequence(items) => items.len() as f64,
                        NodeValue::Mapping(entries) => entries.len() as f64,
                        NodeValue::Number(n) => n.as_f64().unwrap_or_default(),
                        _ => return vec![],
                    },
                    Input::Missing => return vec![],
                };
                let mut messages = Vec::new();
                if let Some(min) = min
                    && size < *min
                {
                    messages.push(format!("\"{property}\" must not be shorter than {min}"));
                }
                if let Some(max) = max
                    && size > *max
                {
                    messages.push(format!("\"{property}\" must not be longer than {max}"));
                }
                messages
            }

            (Self::Casing { kind, regex }, input) => {
                let Some(text) = scalar_text(input) else {
                    return vec![];
                };
                if text.is_empty() || regex.is_match(&text) {
                    vec![]
                } else {
                    fail(format!("\"{text}\" must be {} case", kind.name()))
                }
            }

            (Self::Alphabetical { keyed_by }, Input::Node(node)) => {
                let names: Vec<String> = match (&node.value, keyed_by) {
                    (NodeValue::Mapping(entries), _) => entries.iter().map(|(k, _)| k.clone()).collect(),
                    (NodeValue::Sequence(items), Some(field)) => items
                        .iter()
                        .filter_map(|item| item.get(field).map(|v| v.to_string()))
                        .collect(),
                    (NodeValue::Sequence(items), None) => {
                        items.iter().map(|item| item.to_string()).collect()
                    }
                    _ => return vec![],
                };
                match names.windows(2).find(|pair| pair[0] > pair[1]) {
                    Some(pair) => fail(format!(
                        "\"{property}\" should be in alphabetical order: \"{}\" should be placed after \"{}\"",
                        pair[0], pair[1]
                    )),
                    None => vec![],
                }
            }
            (Self::Alphabetical { .. }, _) => vec![],
        }
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    // accept /regex/flags notation
    let (body, flags) = match pattern.strip_prefix('/').and_then(|p| p.rsplit_once('/')) {
        Some((body, flags)) if flags.chars().all(|c| c.is_ascii_alphabetic()) => (body, flags),
        _ => (pattern, ""),
    };
    let source = if flags.contains('i') {
        format!("(?i){body}")
    } else {
        body.to_string()
    };
    Regex::new(&source).wrap_err_with(|| format!("invalid pattern '{pattern}'"))
}

fn scalar_text(input: Input<'_>) -> Option<String> {
    match input {
        Input::Key(key) => Some(key.to_string()),
        Input::Node(node) => match &node.value {
            NodeValue::String(s) => Some(s.clone()),
            NodeValue::Number(n) => Some(n.to_string()),
            NodeValue::Bool(b) => Some(b.to_string()),
            _ => None,
        },
        Input::Missing => None,
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
