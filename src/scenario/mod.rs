//! # Scenarios
//!
//! A scenario is a YAML document describing one policy under test, the
//! guardrails it runs inside, and the decisions expected for a list of
//! actions.
//!
//! ```yaml
//! extends: ../base.yml
//! vars:
//!   BUCKET: reports
//! policy_template: policies/reader.json
//! guardrail_policies:
//!   - ../scp/*.json
//! caller_arn: arn:aws:iam::111122223333:role/reader
//! tests:
//!   - name: can read reports
//!     action: s3:GetObject
//!     resource: arn:aws:s3:::${BUCKET}/*
//!     expect: allowed
//!   - actions: [s3:PutObject, s3:DeleteObject]
//!     resources: ["arn:aws:s3:::<BUCKET>/*"]
//!     expect: implicitDeny
//! ```
//!
//! [`loader::ScenarioLoader`] resolves the `extends` chain and produces the
//! effective [`Scenario`].

pub mod document;
pub mod loader;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::template::Bindings;

pub use document::{ScenarioDocument, ScenarioLayer, TestCaseDocument};
pub use loader::ScenarioLoader;

// ============================================================================
// Policy sources
// ============================================================================

/// Where a policy comes from: a template to render, or a finished document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySpec {
    /// Rendered against the scenario variables before use.
    Template(PathBuf),
    /// Used as written.
    Document(PathBuf),
}

impl PolicySpec {
    pub fn path(&self) -> &Path {
        match self {
            Self::Template(path) | Self::Document(path) => path,
        }
    }

    pub fn is_template(&self) -> bool {
        matches!(self, Self::Template(_))
    }
}

impl fmt::Display for PolicySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(path) => write!(f, "template {}", path.display()),
            Self::Document(path) => write!(f, "document {}", path.display()),
        }
    }
}

// ============================================================================
// Context entries
// ============================================================================

/// Value type of a condition-context entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "stringList", alias = "string_list")]
    StringList,
    #[serde(rename = "numeric")]
    Numeric,
    #[serde(rename = "numericList", alias = "numeric_list")]
    NumericList,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "booleanList", alias = "boolean_list")]
    BooleanList,
}

impl ContextType {
    /// The simulator's spelling of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::StringList => "stringList",
            Self::Numeric => "numeric",
            Self::NumericList => "numericList",
            Self::Boolean => "boolean",
            Self::BooleanList => "booleanList",
        }
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One condition-context key supplied to the simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextEntry {
    pub key: String,
    #[serde(deserialize_with = "scalar_or_list")]
    pub values: Vec<String>,
    #[serde(rename = "type")]
    pub value_type: ContextType,
}

impl fmt::Display for ContextEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=[{}] ({})", self.key, self.values.join(", "), self.value_type)
    }
}

/// Accept `values: x` as well as `values: [x, y]`, stringifying scalars.
fn scalar_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    match value {
        serde_yaml::Value::Sequence(items) => items
            .iter()
            .map(|item| scalar_to_string(item).ok_or_else(|| serde::de::Error::custom("context values must be scalars")))
            .collect(),
        other => scalar_to_string(&other)
            .map(|s| vec![s])
            .ok_or_else(|| serde::de::Error::custom("context values must be scalars")),
    }
}

/// Render a YAML scalar as text; `None` for sequences and mappings.
pub(crate) fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        serde_yaml::Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        serde_yaml::Value::Sequence(_) | serde_yaml::Value::Mapping(_) => None,
    }
}

// ============================================================================
// Test cases
// ============================================================================

/// One declared test, as authored, after variable substitution.
///
/// Single and plural forms are kept apart here; [`crate::expansion`] checks
/// that exactly one of each pair is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: Option<String>,
    pub action: Option<String>,
    pub actions: Option<Vec<String>>,
    pub resource: Option<String>,
    pub resources: Option<Vec<String>>,
    pub context: Vec<ContextEntry>,
    pub caller_arn: Option<String>,
    pub resource_owner: Option<String>,
    pub resource_policy: Option<PolicySpec>,
    pub expect: String,
}

impl TestCase {
    /// Display label: the authored name, else the position in the scenario.
    pub fn label(&self, index: usize) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("test #{}", index + 1),
        }
    }
}

// ============================================================================
// Scenario
// ============================================================================

/// A glob pattern together with the directory it is relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    pub base: PathBuf,
    pub pattern: String,
}

impl PathPattern {
    pub fn new(base: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            pattern: pattern.into(),
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base.join(&self.pattern).display())
    }
}

/// The effective, fully merged test configuration.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// The document the scenario was loaded from.
    pub path: PathBuf,
    /// Resolved `vars_file`, if any layer declared one.
    pub vars_file: Option<PathBuf>,
    /// Effective bindings (vars file overlaid by inline `vars`).
    pub vars: Bindings,
    pub policy: PolicySpec,
    pub resource_policy: Option<PolicySpec>,
    /// Path patterns of permission-boundary fragments.
    pub guardrail_policies: Vec<PathPattern>,
    pub context: Vec<ContextEntry>,
    pub caller_arn: Option<String>,
    pub resource_owner: Option<String>,
    pub tests: Vec<TestCase>,
}

impl Scenario {
    /// Directory that relative paths of this scenario were resolved against.
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}
