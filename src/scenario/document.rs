//! Scenario documents as authored, and the inheritance merge.
//!
//! A [`ScenarioDocument`] is parsed straight from YAML. It is then lowered into
//! a [`ScenarioLayer`]: relative paths are resolved against the directory of
//! the document that declared them, empty scalars become "not set", and each
//! mutually exclusive policy pair collapses into one `Option<PolicySpec>`.
//! Layers merge parent-first with [`ScenarioLayer::merge`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{scalar_to_string, ContextEntry, PathPattern, PolicySpec, TestCase};
use crate::error::{Result, TesterError};
use crate::template::Bindings;
use crate::utilities::FileSystem;

// ============================================================================
// Authored form
// ============================================================================

/// A scenario document exactly as written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioDocument {
    /// Parent scenario, relative to this document's directory.
    pub extends: Option<String>,
    /// YAML mapping of additional variables.
    pub vars_file: Option<String>,
    pub vars: BTreeMap<String, serde_yaml::Value>,

    pub policy_template: Option<String>,
    pub policy_json: Option<String>,
    pub resource_policy_template: Option<String>,
    pub resource_policy_json: Option<String>,

    /// Path patterns of permission-boundary fragments.
    pub guardrail_policies: Option<Vec<String>>,
    pub context: Option<Vec<ContextEntry>>,

    pub caller_arn: Option<String>,
    pub resource_owner: Option<String>,

    /// Matrix shorthand: one test per action, all sharing `resources`.
    pub actions: Option<Vec<String>>,
    pub resources: Option<Vec<String>>,
    /// Expected decision per matrix action.
    pub expect: BTreeMap<String, String>,

    pub tests: Option<Vec<TestCaseDocument>>,
}

impl ScenarioDocument {
    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}

/// One entry of a scenario's `tests` list as written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestCaseDocument {
    pub name: Option<String>,
    pub action: Option<String>,
    pub actions: Option<Vec<String>>,
    pub resource: Option<String>,
    pub resources: Option<Vec<String>>,
    pub context: Vec<ContextEntry>,
    pub caller_arn: Option<String>,
    pub resource_owner: Option<String>,
    pub resource_policy_template: Option<String>,
    pub resource_policy_json: Option<String>,
    pub expect: Option<String>,
}

// ============================================================================
// Mergeable form
// ============================================================================

/// One level of an inheritance chain, ready to merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioLayer {
    pub vars_file: Option<PathBuf>,
    pub vars: Bindings,
    pub policy: Option<PolicySpec>,
    pub resource_policy: Option<PolicySpec>,
    pub guardrail_policies: Option<Vec<PathPattern>>,
    pub context: Option<Vec<ContextEntry>>,
    pub caller_arn: Option<String>,
    pub resource_owner: Option<String>,
    pub actions: Option<Vec<String>>,
    pub resources: Option<Vec<String>>,
    pub expect: BTreeMap<String, String>,
    pub tests: Option<Vec<TestCase>>,
}

impl ScenarioLayer {
    /// Lower a parsed document declared at `path`.
    pub fn from_document(
        doc: ScenarioDocument,
        path: &Path,
        fs: &dyn FileSystem,
    ) -> Result<Self> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let resolve = |p: String| fs.absolute(Path::new(&p), dir);

        let policy = policy_pair(
            path,
            ("policy_template", non_empty(doc.policy_template).map(&resolve)),
            ("policy_json", non_empty(doc.policy_json).map(&resolve)),
        )?;
        let resource_policy = policy_pair(
            path,
            (
                "resource_policy_template",
                non_empty(doc.resource_policy_template).map(&resolve),
            ),
            (
                "resource_policy_json",
                non_empty(doc.resource_policy_json).map(&resolve),
            ),
        )?;

        let mut vars = Bindings::new();
        for (name, value) in doc.vars {
            vars.insert(name, yaml_var_to_string(&value));
        }

        let pattern_base = fs.absolute(Path::new("."), dir);
        let guardrail_policies = doc.guardrail_policies.map(|patterns| {
            patterns
                .into_iter()
                .map(|p| PathPattern::new(pattern_base.clone(), p))
                .collect()
        });

        let tests = match doc.tests {
            Some(docs) => Some(
                docs.into_iter()
                    .enumerate()
                    .map(|(i, t)| lower_test(t, i, path, &resolve))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };

        Ok(Self {
            vars_file: non_empty(doc.vars_file).map(&resolve),
            vars,
            policy,
            resource_policy,
            guardrail_policies,
            context: doc.context,
            caller_arn: non_empty(doc.caller_arn),
            resource_owner: non_empty(doc.resource_owner),
            actions: doc.actions,
            resources: doc.resources,
            expect: doc.expect,
            tests,
        })
    }

    /// Merge `child` over `self` (the parent).
    ///
    /// - scalars: the child's value when set, else the parent's;
    /// - `vars` and `expect`: key-by-key, child wins;
    /// - lists: the child's list wholesale when present, else the parent's;
    /// - policy pairs: whichever member the child sets replaces the parent's
    ///   pair entirely, so template and document never coexist.
    pub fn merge(self, child: Self) -> Self {
        let mut vars = self.vars;
        vars.extend(child.vars);
        let mut expect = self.expect;
        expect.extend(child.expect);

        Self {
            vars_file: child.vars_file.or(self.vars_file),
            vars,
            policy: child.policy.or(self.policy),
            resource_policy: child.resource_policy.or(self.resource_policy),
            guardrail_policies: child.guardrail_policies.or(self.guardrail_policies),
            context: child.context.or(self.context),
            caller_arn: child.caller_arn.or(self.caller_arn),
            resource_owner: child.resource_owner.or(self.resource_owner),
            actions: child.actions.or(self.actions),
            resources: child.resources.or(self.resources),
            expect,
            tests: child.tests.or(self.tests),
        }
    }
}

fn lower_test(
    doc: TestCaseDocument,
    index: usize,
    scenario: &Path,
    resolve: &dyn Fn(String) -> PathBuf,
) -> Result<TestCase> {
    let resource_policy = policy_pair(
        scenario,
        (
            "resource_policy_template",
            non_empty(doc.resource_policy_template).map(resolve),
        ),
        (
            "resource_policy_json",
            non_empty(doc.resource_policy_json).map(resolve),
        ),
    )?;
    let expect = non_empty(doc.expect).ok_or_else(|| {
        TesterError::configuration(scenario, format!("tests[{}]: 'expect' is required", index))
    })?;

    Ok(TestCase {
        name: non_empty(doc.name),
        action: non_empty(doc.action),
        actions: doc.actions,
        resource: non_empty(doc.resource),
        resources: doc.resources,
        context: doc.context,
        caller_arn: non_empty(doc.caller_arn),
        resource_owner: non_empty(doc.resource_owner),
        resource_policy,
        expect,
    })
}

/// Collapse a template/document field pair; both set is a configuration error.
fn policy_pair(
    document: &Path,
    template: (&str, Option<PathBuf>),
    json: (&str, Option<PathBuf>),
) -> Result<Option<PolicySpec>> {
    match (template.1, json.1) {
        (Some(_), Some(_)) => Err(TesterError::configuration(
            document,
            format!("'{}' and '{}' are mutually exclusive", template.0, json.0),
        )),
        (Some(path), None) => Ok(Some(PolicySpec::Template(path))),
        (None, Some(path)) => Ok(Some(PolicySpec::Document(path))),
        (None, None) => Ok(None),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Scalars render as text; sequences and mappings as compact JSON so they can
/// be spliced into policy documents.
pub(crate) fn yaml_var_to_string(value: &serde_yaml::Value) -> String {
    scalar_to_string(value).unwrap_or_else(|| {
        serde_json::to_string(value).unwrap_or_default()
    })
}
