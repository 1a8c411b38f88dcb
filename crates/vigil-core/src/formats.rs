//! Document format detection

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// Document families rules can be scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Format {
    #[serde(rename = "oas2")]
    Oas2,
    #[serde(rename = "oas3")]
    Oas3,
    #[serde(rename = "asyncapi2")]
    AsyncApi2,
    #[serde(rename = "json-schema")]
    JsonSchema,
}

impl Format {
    pub const ALL: [Format; 4] = [Self::Oas2, Self::Oas3, Self::AsyncApi2, Self::JsonSchema];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Oas2 => "oas2",
            Self::Oas3 => "oas3",
            Self::AsyncApi2 => "asyncapi2",
            Self::JsonSchema => "json-schema",
        }
    }

    /// Whether `document` belongs to this format
    pub fn matches(self, document: &Value) -> bool {
        let version = |key: &str| document.get(key).and_then(version_text);
        match self {
            Self::Oas2 => version("swagger").is_some_and(|v| v.starts_with("2.0")),
            Self::Oas3 => version("openapi").is_some_and(|v| v.starts_with('3')),
            Self::AsyncApi2 => version("asyncapi").is_some_and(|v| v.starts_with("2.")),
            Self::JsonSchema => document
                .get("$schema")
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains("json-schema.org")),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All formats `document` belongs to
pub fn detect(document: &Value) -> Vec<Format> {
    Format::ALL
        .into_iter()
        .filter(|format| format.matches(document))
        .collect()
}

// `swagger: 2.0` parses as a number
fn version_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats(yaml: &str) -> Vec<Format> {
        detect(&serde_yaml::from_str(yaml).unwrap())
    }

    #[test]
    fn detects_api_description_formats() {
        assert_eq!(formats("openapi: 3.1.0\n"), vec![Format::Oas3]);
        assert_eq!(formats("swagger: '2.0'\n"), vec![Format::Oas2]);
        assert_eq!(formats("swagger: 2.0\n"), vec![Format::Oas2]);
        assert_eq!(formats("asyncapi: 2.6.0\n"), vec![Format::AsyncApi2]);
        assert_eq!(
            formats("$schema: https://json-schema.org/draft/2020-12/schema\n"),
            vec![Format::JsonSchema]
        );
        assert!(formats("name: not-an-api\n").is_empty());
        assert!(formats("~").is_empty());
    }

    #[test]
    fn format_names_round_trip_through_serde() {
        let parsed: Vec<Format> = serde_yaml::from_str("[oas2, oas3, asyncapi2, json-schema]").unwrap();
        assert_eq!(parsed, Format::ALL.to_vec());
    }
}
