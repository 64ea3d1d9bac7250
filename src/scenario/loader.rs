//! Scenario loader: resolves `extends` chains into one effective [`Scenario`].
//!
//! Loading happens in three steps:
//! 1. Parse the document and lower it into a [`ScenarioLayer`]
//! 2. If it declares `extends`, resolve the parent (relative to this
//!    document's directory) and merge this layer over it
//! 3. Bind variables, substitute them into every string field, expand the
//!    action matrix, and validate the result

use std::path::{Path, PathBuf};

use super::document::{yaml_var_to_string, ScenarioDocument, ScenarioLayer};
use super::{ContextEntry, Scenario, TestCase};
use crate::error::{Result, TesterError};
use crate::template::{Bindings, Substitution};
use crate::utilities::FileSystem;

/// Loads scenario documents through a [`FileSystem`].
pub struct ScenarioLoader<'a> {
    fs: &'a dyn FileSystem,
}

impl<'a> ScenarioLoader<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self { fs }
    }

    /// Load the scenario at `path` with its full inheritance chain applied.
    pub fn load(&self, path: &Path) -> Result<Scenario> {
        let path = self.fs.absolute(path, Path::new(""));
        let layer = self.load_layer(&path)?;
        self.finish(path, layer)
    }

    /// Resolve `path` and its ancestors into one merged layer, without binding
    /// variables.
    pub fn load_layer(&self, path: &Path) -> Result<ScenarioLayer> {
        self.resolve(path, &mut Vec::new())
    }

    fn resolve(&self, path: &Path, in_progress: &mut Vec<PathBuf>) -> Result<ScenarioLayer> {
        if in_progress.iter().any(|p| p == path) {
            let mut chain = in_progress.clone();
            chain.push(path.to_path_buf());
            return Err(TesterError::CyclicInheritance { chain });
        }
        in_progress.push(path.to_path_buf());

        let text = self.fs.read_to_string(path)?;
        let doc = ScenarioDocument::from_yaml(&text).map_err(|error| TesterError::Yaml {
            path: path.to_path_buf(),
            error,
        })?;
        let extends = doc.extends.clone().filter(|e| !e.trim().is_empty());
        let layer = ScenarioLayer::from_document(doc, path, self.fs)?;

        let resolved = match extends {
            Some(parent) => {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let parent_path = self.fs.absolute(Path::new(&parent), dir);
                log::debug!(
                    "Scenario {} extends {}",
                    path.display(),
                    parent_path.display()
                );
                let base = self.resolve(&parent_path, in_progress)?;
                base.merge(layer)
            }
            None => layer,
        };

        in_progress.pop();
        Ok(resolved)
    }

    /// Bind variables and validate the merged layer.
    fn finish(&self, path: PathBuf, layer: ScenarioLayer) -> Result<Scenario> {
        let mut vars = match &layer.vars_file {
            Some(file) => self.load_vars_file(file)?,
            None => Bindings::new(),
        };
        vars.extend(layer.vars.clone());
        let sub = Substitution::new(vars);

        let policy = layer.policy.clone().ok_or_else(|| {
            TesterError::configuration(
                &path,
                "exactly one of 'policy_template' or 'policy_json' is required",
            )
        })?;

        let origin = |field: &str| format!("{} ({})", path.display(), field);

        let caller_arn = substitute_opt(&sub, &origin("caller_arn"), &layer.caller_arn)?;
        let resource_owner = substitute_opt(&sub, &origin("resource_owner"), &layer.resource_owner)?;
        let context = substitute_context(&sub, &origin("context"), layer.context.as_deref().unwrap_or_default())?;

        let mut tests = Vec::new();
        for (i, case) in layer.tests.iter().flatten().enumerate() {
            tests.push(substitute_test(&sub, &origin(&format!("tests[{}]", i)), case)?);
        }
        tests.extend(self.matrix_tests(&path, &layer, &sub)?);

        if tests.is_empty() {
            return Err(TesterError::configuration(&path, "scenario declares no tests"));
        }

        let guardrail_policies = layer.guardrail_policies.clone().unwrap_or_default();

        log::debug!(
            "Resolved scenario {}: {} test(s), {} guardrail pattern(s)",
            path.display(),
            tests.len(),
            guardrail_policies.len()
        );

        Ok(Scenario {
            path,
            vars_file: layer.vars_file,
            vars: sub.bindings().clone(),
            policy,
            resource_policy: layer.resource_policy,
            guardrail_policies,
            context,
            caller_arn,
            resource_owner,
            tests,
        })
    }

    /// One test per matrix action, sharing the matrix resources.
    fn matrix_tests(
        &self,
        path: &Path,
        layer: &ScenarioLayer,
        sub: &Substitution,
    ) -> Result<Vec<TestCase>> {
        let Some(actions) = &layer.actions else {
            if !layer.expect.is_empty() {
                log::warn!(
                    "Scenario {} declares 'expect' without 'actions'; ignoring it",
                    path.display()
                );
            }
            return Ok(Vec::new());
        };
        let resources = layer.resources.clone().ok_or_else(|| {
            TesterError::configuration(path, "'actions' requires a 'resources' list")
        })?;
        let origin = format!("{} (actions)", path.display());
        let resources = sub.all(&origin, &resources)?;

        for key in layer.expect.keys() {
            if !actions.contains(key) {
                log::warn!(
                    "Scenario {}: expectation for '{}' has no matching action",
                    path.display(),
                    key
                );
            }
        }

        actions
            .iter()
            .map(|action| {
                let expect = layer.expect.get(action).cloned().ok_or_else(|| {
                    TesterError::configuration(
                        path,
                        format!("no expected decision in 'expect' for action '{}'", action),
                    )
                })?;
                let action = sub.text(&origin, action)?;
                Ok(TestCase {
                    name: Some(action.clone()),
                    action: Some(action),
                    actions: None,
                    resource: None,
                    resources: Some(resources.clone()),
                    context: Vec::new(),
                    caller_arn: None,
                    resource_owner: None,
                    resource_policy: None,
                    expect,
                })
            })
            .collect()
    }

    fn load_vars_file(&self, path: &Path) -> Result<Bindings> {
        let text = self.fs.read_to_string(path)?;
        let values: std::collections::BTreeMap<String, serde_yaml::Value> =
            serde_yaml::from_str(&text).map_err(|error| TesterError::Yaml {
                path: path.to_path_buf(),
                error,
            })?;
        Ok(values
            .iter()
            .map(|(name, value)| (name.clone(), yaml_var_to_string(value)))
            .collect())
    }
}

fn substitute_opt(sub: &Substitution, origin: &str, value: &Option<String>) -> Result<Option<String>> {
    value.as_deref().map(|v| sub.text(origin, v)).transpose()
}

fn substitute_context(
    sub: &Substitution,
    origin: &str,
    entries: &[ContextEntry],
) -> Result<Vec<ContextEntry>> {
    entries
        .iter()
        .map(|entry| {
            Ok(ContextEntry {
                key: sub.text(origin, &entry.key)?,
                values: sub.all(origin, &entry.values)?,
                value_type: entry.value_type,
            })
        })
        .collect()
}

fn substitute_test(sub: &Substitution, origin: &str, case: &TestCase) -> Result<TestCase> {
    Ok(TestCase {
        name: substitute_opt(sub, origin, &case.name)?,
        action: substitute_opt(sub, origin, &case.action)?,
        actions: case.actions.as_deref().map(|a| sub.all(origin, a)).transpose()?,
        resource: substitute_opt(sub, origin, &case.resource)?,
        resources: case.resources.as_deref().map(|r| sub.all(origin, r)).transpose()?,
        context: substitute_context(sub, origin, &case.context)?,
        caller_arn: substitute_opt(sub, origin, &case.caller_arn)?,
        resource_owner: substitute_opt(sub, origin, &case.resource_owner)?,
        resource_policy: case.resource_policy.clone(),
        expect: sub.text(origin, &case.expect)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::PolicySpec;
    use crate::utilities::LocalFileSystem;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_simple_scenario_with_substitution() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "s.yml",
            r#"
vars:
  BUCKET: reports
policy_json: policy.json
caller_arn: arn:aws:iam::1:role/<BUCKET>-reader
tests:
  - name: read $BUCKET
    action: s3:GetObject
    resource: arn:aws:s3:::${BUCKET}/*
    expect: allowed
"#,
        );
        let fs = LocalFileSystem::new();
        let scenario = ScenarioLoader::new(&fs).load(&path).unwrap();

        assert!(matches!(scenario.policy, PolicySpec::Document(_)));
        assert!(scenario.policy.path().ends_with("policy.json"));
        assert_eq!(scenario.caller_arn.as_deref(), Some("arn:aws:iam::1:role/reports-reader"));
        assert_eq!(scenario.tests.len(), 1);
        assert_eq!(scenario.tests[0].name.as_deref(), Some("read reports"));
        assert_eq!(scenario.tests[0].resource.as_deref(), Some("arn:aws:s3:::reports/*"));
    }

    #[test]
    fn test_parent_resolved_relative_to_child_and_vars_file_inherited() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "base/vars.yml", "ACCOUNT: '111122223333'\nREGION: eu-west-1\n");
        write(
            dir.path(),
            "base/base.yml",
            "vars_file: vars.yml\npolicy_template: policy.json\nvars:\n  REGION: us-east-1\n",
        );
        let child = write(
            dir.path(),
            "team/child.yml",
            r#"
extends: ../base/base.yml
vars_file: ""
tests:
  - action: ec2:RunInstances
    resource: arn:aws:ec2:{{.REGION}}:{{.ACCOUNT}}:instance/*
    expect: allowed
"#,
        );

        let fs = LocalFileSystem::new();
        let scenario = ScenarioLoader::new(&fs).load(&child).unwrap();
        assert!(scenario.vars_file.as_ref().unwrap().ends_with("base/vars.yml"));
        assert!(scenario.policy.is_template());
        assert!(scenario.policy.path().ends_with("base/policy.json"));
        assert_eq!(
            scenario.tests[0].resource.as_deref(),
            Some("arn:aws:ec2:us-east-1:111122223333:instance/*")
        );
    }

    #[test]
    fn test_three_level_chain_matches_stepwise_merge() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yml", "policy_json: p.json\nvars: {A: a, B: a}\ncaller_arn: arn:a\n");
        write(dir.path(), "b.yml", "extends: a.yml\nvars: {B: b}\nresource_owner: '2'\n");
        let c = write(dir.path(), "c.yml", "extends: b.yml\nvars: {C: c}\nactions: [x:Y]\nresources: ['*']\nexpect: {'x:Y': allowed}\n");

        let fs = LocalFileSystem::new();
        let loader = ScenarioLoader::new(&fs);
        let direct = loader.load_layer(&c).unwrap();

        let lower = |name: &str| {
            let path = fs.absolute(Path::new(name), dir.path());
            let doc = ScenarioDocument::from_yaml(&std::fs::read_to_string(&path).unwrap()).unwrap();
            ScenarioLayer::from_document(doc, &path, &fs).unwrap()
        };
        let stepwise = lower("a.yml").merge(lower("b.yml")).merge(lower("c.yml"));
        assert_eq!(direct, stepwise);
    }

    #[test]
    fn test_cyclic_inheritance_detected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yml", "extends: b.yml\n");
        let b = write(dir.path(), "b.yml", "extends: a.yml\n");

        let fs = LocalFileSystem::new();
        let err = ScenarioLoader::new(&fs).load(&b).unwrap_err();
        match err {
            TesterError::CyclicInheritance { chain } => {
                assert_eq!(chain.len(), 3);
                assert_eq!(chain.first(), chain.last());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_extension_detected() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.yml", "extends: ./a.yml\n");
        let fs = LocalFileSystem::new();
        assert!(matches!(
            ScenarioLoader::new(&fs).load(&a),
            Err(TesterError::CyclicInheritance { .. })
        ));
    }

    #[test]
    fn test_missing_parent_is_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.yml", "extends: nowhere.yml\n");
        let fs = LocalFileSystem::new();
        assert!(matches!(
            ScenarioLoader::new(&fs).load(&a),
            Err(TesterError::SourceNotFound { .. })
        ));
    }

    #[test]
    fn test_no_policy_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(
            dir.path(),
            "a.yml",
            "tests:\n  - action: s3:GetObject\n    resource: '*'\n    expect: allowed\n",
        );
        let fs = LocalFileSystem::new();
        let err = ScenarioLoader::new(&fs).load(&a).unwrap_err();
        assert!(err.to_string().contains("policy_template"));
    }

    #[test]
    fn test_no_tests_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.yml", "policy_json: p.json\ntests: []\n");
        let fs = LocalFileSystem::new();
        let err = ScenarioLoader::new(&fs).load(&a).unwrap_err();
        assert!(err.to_string().contains("no tests"));
    }

    #[test]
    fn test_matrix_expands_with_expectations() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(
            dir.path(),
            "a.yml",
            "policy_json: p.json\nvars: {B: logs}\nactions: [s3:GetObject, s3:PutObject]\nresources: ['arn:aws:s3:::$B/*']\nexpect:\n  s3:GetObject: allowed\n  s3:PutObject: explicitDeny\n",
        );
        let fs = LocalFileSystem::new();
        let scenario = ScenarioLoader::new(&fs).load(&a).unwrap();
        assert_eq!(scenario.tests.len(), 2);
        assert_eq!(scenario.tests[1].action.as_deref(), Some("s3:PutObject"));
        assert_eq!(scenario.tests[1].expect, "explicitDeny");
        assert_eq!(
            scenario.tests[0].resources,
            Some(vec!["arn:aws:s3:::logs/*".to_string()])
        );
    }

    #[test]
    fn test_matrix_action_without_expectation_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(
            dir.path(),
            "a.yml",
            "policy_json: p.json\nactions: [s3:GetObject]\nresources: ['*']\n",
        );
        let fs = LocalFileSystem::new();
        assert!(matches!(
            ScenarioLoader::new(&fs).load(&a),
            Err(TesterError::Configuration { .. })
        ));
    }

    #[test]
    fn test_undefined_variable_in_test_fails() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(
            dir.path(),
            "a.yml",
            "policy_json: p.json\ntests:\n  - action: s3:GetObject\n    resource: '{{.NOPE}}'\n    expect: allowed\n",
        );
        let fs = LocalFileSystem::new();
        assert!(matches!(
            ScenarioLoader::new(&fs).load(&a),
            Err(TesterError::MissingVariable { .. })
        ));
    }
}
