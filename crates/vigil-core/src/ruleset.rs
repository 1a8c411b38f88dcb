//! Ruleset model
//!
//! Ruleset files are YAML or JSON:
//!
//! ```yaml
//! extends: [[vigil:oas, recommended]]
//! formats: [oas3]
//! rules:
//!   operation-description:
//!     description: Operations must have a description.
//!     severity: warn
//!     given: $.paths[*][*]
//!     then:
//!       field: description
//!       function: truthy
//!   info-contact: off
//! ```
//!
//! The `*Definition` types mirror the file format; [`Ruleset`] and [`Rule`]
//! are the compiled, validated form the engine runs.

use std::collections::BTreeMap;

use eyre::{Result, WrapErr, bail};
use serde::Deserialize;
use tracing::warn;

use crate::formats::Format;
use crate::functions::RuleFunction;
use crate::path::GivenPath;

/// Problem severity, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "information",
            Self::Hint => "hint",
        }
    }
}

// ============================================================================
// File format
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesetDefinition {
    #[serde(default)]
    pub extends: Option<ExtendsDefinition>,
    #[serde(default)]
    pub formats: Option<Vec<Format>>,
    #[serde(default)]
    pub rules: BTreeMap<String, RuleEntry>,
}

impl RulesetDefinition {
    /// Parse ruleset text. JSON is accepted since it is valid YAML.
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).wrap_err("invalid ruleset")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExtendsDefinition {
    One(String),
    Many(Vec<ExtendsEntry>),
}

impl ExtendsDefinition {
    pub fn entries(&self) -> Vec<(String, ExtendsMode)> {
        match self {
            Self::One(name) => vec![(name.clone(), ExtendsMode::Recommended)],
            Self::Many(entries) => entries
                .iter()
                .map(|entry| match entry {
                    ExtendsEntry::Name(name) => (name.clone(), ExtendsMode::Recommended),
                    ExtendsEntry::WithMode((name, mode)) => (name.clone(), *mode),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExtendsEntry {
    Name(String),
    WithMode((String, ExtendsMode)),
}

/// Which rules of an extended ruleset start enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtendsMode {
    All,
    Recommended,
    Off,
}

/// A `rules:` entry: a full definition or an override of an inherited rule
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RuleEntry {
    Definition(Box<RuleDefinition>),
    Toggle(bool),
    Severity(SeverityDefinition),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SeverityDefinition {
    Name(String),
    Code(i64),
}

impl SeverityDefinition {
    /// `None` means the rule is turned off
    pub fn resolve(&self) -> Result<Option<Severity>> {
        Ok(match self {
            Self::Name(name) => match name.as_str() {
                "error" => Some(Severity::Error),
                "warn" | "warning" => Some(Severity::Warning),
                "info" | "information" => Some(Severity::Information),
                "hint" => Some(Severity::Hint),
                "off" => None,
                other => bail!("unknown severity '{other}'"),
            },
            Self::Code(code) => match code {
                0 => Some(Severity::Error),
                1 => Some(Severity::Warning),
                2 => Some(Severity::Information),
                3 => Some(Severity::Hint),
                -1 => None,
                other => bail!("unknown severity code {other}"),
            },
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item.clone()],
            Self::Many(items) => items.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: Option<SeverityDefinition>,
    #[serde(default)]
    pub recommended: Option<bool>,
    #[serde(default)]
    pub formats: Option<Vec<Format>>,
    #[serde(default)]
    pub resolved: Option<bool>,
    pub given: OneOrMany<String>,
    pub then: OneOrMany<ThenDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThenDefinition {
    #[serde(default)]
    pub field: Option<String>,
    pub function: String,
    #[serde(default)]
    pub function_options: Option<serde_json::Value>,
}

// ============================================================================
// Compiled form
// ============================================================================

/// One `then` clause
#[derive(Debug, Clone)]
pub struct Then {
    /// `None` targets the given node itself, `@key` its key
    pub field: Option<String>,
    pub function: RuleFunction,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub description: Option<String>,
    pub message: Option<String>,
    /// Severity from the definition, used when an override re-enables the rule
    pub default_severity: Severity,
    pub severity: Severity,
    pub enabled: bool,
    pub recommended: bool,
    pub given: Vec<GivenPath>,
    pub then: Vec<Then>,
    /// `None` runs on every document
    pub formats: Option<Vec<Format>>,
    /// Evaluate on the tree with `$ref` followed
    pub resolved: bool,
}

impl Rule {
    /// Compile a definition. `inherited_formats` are the enclosing ruleset's.
    pub fn compile(
        name: &str,
        definition: &RuleDefinition,
        inherited_formats: Option<&Vec<Format>>,
    ) -> Result<Self> {
        let severity = match &definition.severity {
            Some(severity) => severity
                .resolve()
                .wrap_err_with(|| format!("rule '{name}'"))?,
            None => Some(Severity::Warning),
        };

        let given = definition
            .given
            .to_vec()
            .iter()
            .map(|g| GivenPath::parse(g))
            .collect::<Result<Vec<_>>>()
            .wrap_err_with(|| format!("rule '{name}'"))?;

        let then = definition
            .then
            .to_vec()
            .iter()
            .map(|t| {
                Ok(Then {
                    field: t.field.clone(),
                    function: RuleFunction::from_definition(
                        &t.function,
                        t.function_options.as_ref(),
                    )?,
                })
            })
            .collect::<Result<Vec<_>>>()
            .wrap_err_with(|| format!("rule '{name}'"))?;

        Ok(Self {
            name: name.to_string(),
            description: definition.description.clone(),
            message: definition.message.clone(),
            default_severity: severity.unwrap_or(Severity::Warning),
            severity: severity.unwrap_or(Severity::Warning),
            enabled: severity.is_some(),
            recommended: definition.recommended.unwrap_or(true),
            given,
            then,
            formats: definition.formats.clone().or_else(|| inherited_formats.cloned()),
            resolved: definition.resolved.unwrap_or(true),
        })
    }

    /// Whether the rule applies to a document of `formats`
    pub fn applies_to(&self, formats: &[Format]) -> bool {
        match &self.formats {
            None => true,
            Some(wanted) => wanted.iter().any(|f| formats.contains(f)),
        }
    }
}

/// A compiled set of rules
#[derive(Debug, Clone, Default)]
pub struct Ruleset {
    rules: BTreeMap<String, Rule>,
}

impl Ruleset {
    /// The ruleset with no rules
    pub fn empty() -> Self {
        Self::default()
    }

    /// Enabled rules, by name
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values().filter(|r| r.enabled)
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    /// True when no rule is enabled
    pub fn is_empty(&self) -> bool {
        self.rules().next().is_none()
    }

    /// Add (or replace) a rule
    pub fn insert(&mut self, rule: Rule) {
        self.rules.insert(rule.name.clone(), rule);
    }

    /// Merge the rules of an extended ruleset, enabling them per `mode`
    pub fn extend_from(&mut self, other: Ruleset, mode: ExtendsMode) {
        for (name, mut rule) in other.rules {
            match mode {
                ExtendsMode::All => {}
                ExtendsMode::Recommended => rule.enabled = rule.enabled && rule.recommended,
                ExtendsMode::Off => rule.enabled = false,
            }
            self.rules.insert(name, rule);
        }
    }

    /// Apply a severity/toggle override to an inherited rule
    pub fn apply_override(&mut self, name: &str, entry: &RuleEntry) -> Result<()> {
        let Some(rule) = self.rules.get_mut(name) else {
            warn!("ruleset overrides unknown rule '{}'", name);
            return Ok(());
        };

        match entry {
            RuleEntry::Toggle(enabled) => {
                rule.enabled = *enabled;
                if *enabled {
                    rule.severity = rule.default_severity;
                }
            }
            RuleEntry::Severity(severity) => match severity
                .resolve()
                .wrap_err_with(|| format!("rule '{name}'"))?
            {
                Some(severity) => {
                    rule.enabled = true;
                    rule.severity = severity;
                }
                None => rule.enabled = false,
            },
            RuleEntry::Definition(_) => bail!("'{name}' is a definition, not an override"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(yaml: &str) -> Ruleset {
        let definition = RulesetDefinition::parse(yaml).unwrap();
        let mut ruleset = Ruleset::empty();
        for (name, entry) in &definition.rules {
            if let RuleEntry::Definition(def) = entry {
                ruleset.insert(Rule::compile(name, def, definition.formats.as_ref()).unwrap());
            }
        }
        ruleset
    }

    #[test]
    fn parses_definitions_and_overrides() {
        let definition = RulesetDefinition::parse(
            r#"
extends: ['vigil:oas', ['./other.yaml', all]]
rules:
  no-x:
    given: $.x
    then:
      function: undefined
  info-contact: off
  info-description: false
  operation-tags: error
  oas3-api-servers: 1
"#,
        )
        .unwrap();

        let extends = definition.extends.unwrap().entries();
        assert_eq!(
            extends,
            vec![
                ("vigil:oas".to_string(), ExtendsMode::Recommended),
                ("./other.yaml".to_string(), ExtendsMode::All),
            ]
        );
        assert!(matches!(definition.rules["no-x"], RuleEntry::Definition(_)));
        assert!(matches!(definition.rules["info-contact"], RuleEntry::Severity(_)));
        assert!(matches!(definition.rules["info-description"], RuleEntry::Toggle(false)));
        assert!(matches!(definition.rules["oas3-api-servers"], RuleEntry::Severity(SeverityDefinition::Code(1))));
    }

    #[test]
    fn severity_names_and_codes() {
        let name = |s: &str| SeverityDefinition::Name(s.to_string()).resolve().unwrap();
        assert_eq!(name("error"), Some(Severity::Error));
        assert_eq!(name("warn"), Some(Severity::Warning));
        assert_eq!(name("info"), Some(Severity::Information));
        assert_eq!(name("hint"), Some(Severity::Hint));
        assert_eq!(name("off"), None);
        assert_eq!(SeverityDefinition::Code(-1).resolve().unwrap(), None);
        assert_eq!(SeverityDefinition::Code(0).resolve().unwrap(), Some(Severity::Error));
        assert!(SeverityDefinition::Name("loud".into()).resolve().is_err());
    }

    #[test]
    fn rule_defaults() {
        let ruleset = compile("rules:\n  r:\n    given: $\n    then:\n      function: truthy\n");
        let rule = ruleset.get("r").unwrap();
        assert_eq!(rule.severity, Severity::Warning);
        assert!(rule.enabled);
        assert!(rule.recommended);
        assert!(rule.resolved);
        assert!(rule.formats.is_none());
    }

    #[test]
    fn ruleset_formats_are_inherited() {
        let ruleset = compile(
            "formats: [oas3]\nrules:\n  a:\n    given: $\n    then:\n      function: truthy\n  b:\n    formats: [oas2]\n    given: $\n    then:\n      function: truthy\n",
        );
        assert!(ruleset.get("a").unwrap().applies_to(&[Format::Oas3]));
        assert!(!ruleset.get("a").unwrap().applies_to(&[Format::Oas2]));
        assert!(ruleset.get("b").unwrap().applies_to(&[Format::Oas2]));
    }

    #[test]
    fn extends_modes_and_overrides() {
        let base = compile(
            "rules:\n  kept:\n    given: $\n    then:\n      function: truthy\n  optional:\n    recommended: false\n    given: $\n    then:\n      function: truthy\n",
        );

        let mut recommended = Ruleset::empty();
        recommended.extend_from(base.clone(), ExtendsMode::Recommended);
        assert_eq!(recommended.rules().count(), 1);

        let mut off = Ruleset::empty();
        off.extend_from(base.clone(), ExtendsMode::Off);
        assert!(off.is_empty());
        off.apply_override("optional", &RuleEntry::Severity(SeverityDefinition::Name("error".into())))
            .unwrap();
        assert_eq!(off.get("optional").unwrap().severity, Severity::Error);
        assert!(off.get("optional").unwrap().enabled);

        let mut all = Ruleset::empty();
        all.extend_from(base, ExtendsMode::All);
        assert_eq!(all.rules().count(), 2);
        all.apply_override("kept", &RuleEntry::Toggle(false)).unwrap();
        assert_eq!(all.rules().count(), 1);
        // unknown overrides are ignored
        all.apply_override("nope", &RuleEntry::Toggle(false)).unwrap();
    }

    #[test]
    fn invalid_rules_fail_to_compile() {
        let definition =
            RulesetDefinition::parse("rules:\n  r:\n    given: x\n    then:\n      function: truthy\n")
                .unwrap();
        let RuleEntry::Definition(def) = &definition.rules["r"] else {
            panic!("expected a definition");
        };
        assert!(Rule::compile("r", def, None).is_err());
    }
}
