//! Test expansion.
//!
//! A declared test may name several actions. The simulator evaluates one
//! action per call, so each action becomes its own [`AtomicExecution`]
//! carrying the test's full resource list. Resources are never split.

use serde::Serialize;

use crate::error::{Result, TesterError};
use crate::scenario::{ContextEntry, PolicySpec, Scenario, TestCase};

/// One action evaluated against one resource set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AtomicExecution {
    /// Position of the declaring test in the scenario.
    pub test_index: usize,
    pub name: String,
    pub action: String,
    pub resources: Vec<String>,
    /// Scenario context followed by test context.
    pub context: Vec<ContextEntry>,
    pub caller_arn: Option<String>,
    pub resource_owner: Option<String>,
    pub resource_policy: Option<PolicySpec>,
    pub expected: String,
}

/// Expands the tests of one scenario.
pub struct TestExpander<'a> {
    scenario: &'a Scenario,
}

impl<'a> TestExpander<'a> {
    pub fn new(scenario: &'a Scenario) -> Self {
        Self { scenario }
    }

    /// Expand every test, in declaration order.
    pub fn expand_all(&self) -> Result<Vec<AtomicExecution>> {
        let mut executions = Vec::new();
        for (index, case) in self.scenario.tests.iter().enumerate() {
            executions.extend(self.expand(index, case)?);
        }
        log::debug!(
            "Expanded {} test(s) into {} execution(s)",
            self.scenario.tests.len(),
            executions.len()
        );
        Ok(executions)
    }

    /// Expand the test at `index`.
    pub fn expand(&self, index: usize, case: &TestCase) -> Result<Vec<AtomicExecution>> {
        let name = case.label(index);
        let actions = self.one_of(&name, ("action", &case.action), ("actions", &case.actions))?;
        let resources = self.one_of(
            &name,
            ("resource", &case.resource),
            ("resources", &case.resources),
        )?;

        let mut context = self.scenario.context.clone();
        context.extend(case.context.iter().cloned());

        let caller_arn = case.caller_arn.clone().or_else(|| self.scenario.caller_arn.clone());
        let resource_owner = case
            .resource_owner
            .clone()
            .or_else(|| self.scenario.resource_owner.clone());
        let resource_policy = case
            .resource_policy
            .clone()
            .or_else(|| self.scenario.resource_policy.clone());

        Ok(actions
            .into_iter()
            .map(|action| AtomicExecution {
                test_index: index,
                name: name.clone(),
                action,
                resources: resources.clone(),
                context: context.clone(),
                caller_arn: caller_arn.clone(),
                resource_owner: resource_owner.clone(),
                resource_policy: resource_policy.clone(),
                expected: case.expect.clone(),
            })
            .collect())
    }

    /// Normalize a singular/plural field pair into a non-empty list.
    fn one_of(
        &self,
        test: &str,
        single: (&str, &Option<String>),
        plural: (&str, &Option<Vec<String>>),
    ) -> Result<Vec<String>> {
        let error = |message: String| {
            TesterError::configuration(&self.scenario.path, format!("test '{}': {}", test, message))
        };
        let (field, values) = match (single.1, plural.1) {
            (Some(_), Some(_)) => {
                return Err(error(format!(
                    "'{}' and '{}' are mutually exclusive",
                    single.0, plural.0
                )))
            }
            (Some(value), None) => (single.0, vec![value.clone()]),
            (None, Some(values)) if values.is_empty() => {
                return Err(error(format!("'{}' must not be empty", plural.0)))
            }
            (None, Some(values)) => (plural.0, values.clone()),
            (None, None) => {
                return Err(error(format!(
                    "one of '{}' or '{}' is required",
                    single.0, plural.0
                )))
            }
        };
        if values.iter().any(|v| v.trim().is_empty()) {
            return Err(error(format!("'{}' must not contain blank entries", field)));
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ContextType;
    use crate::template::Bindings;
    use std::path::PathBuf;

    fn case() -> TestCase {
        TestCase {
            name: Some("fan out".into()),
            action: None,
            actions: Some(vec!["a:X".into(), "a:Y".into()]),
            resource: Some("r1".into()),
            resources: None,
            context: vec![],
            caller_arn: None,
            resource_owner: None,
            resource_policy: None,
            expect: "allowed".into(),
        }
    }

    fn scenario(tests: Vec<TestCase>) -> Scenario {
        Scenario {
            path: PathBuf::from("/repo/scenario.yml"),
            vars_file: None,
            vars: Bindings::new(),
            policy: PolicySpec::Document(PathBuf::from("/repo/p.json")),
            resource_policy: None,
            guardrail_policies: vec![],
            context: vec![],
            caller_arn: None,
            resource_owner: None,
            tests,
        }
    }

    fn entry(key: &str) -> ContextEntry {
        ContextEntry {
            key: key.into(),
            values: vec!["v".into()],
            value_type: ContextType::String,
        }
    }

    #[test]
    fn test_actions_fan_out_with_full_resource_list() {
        let scenario = scenario(vec![case()]);
        let executions = TestExpander::new(&scenario).expand_all().unwrap();
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[0].action, "a:X");
        assert_eq!(executions[1].action, "a:Y");
        for execution in &executions {
            assert_eq!(execution.resources, vec!["r1".to_string()]);
            assert_eq!(execution.name, "fan out");
            assert_eq!(execution.test_index, 0);
        }
    }

    #[test]
    fn test_resources_are_not_split() {
        let mut c = case();
        c.actions = None;
        c.action = Some("s3:GetObject".into());
        c.resource = None;
        c.resources = Some(vec!["r1".into(), "r2".into(), "r3".into()]);
        let scenario = scenario(vec![c]);
        let executions = TestExpander::new(&scenario).expand_all().unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].resources.len(), 3);
    }

    #[test]
    fn test_action_and_actions_is_configuration_error() {
        let mut c = case();
        c.action = Some("a:Z".into());
        let scenario = scenario(vec![c]);
        let err = TestExpander::new(&scenario).expand_all().unwrap_err();
        assert!(matches!(err, TesterError::Configuration { .. }));
        assert!(err.to_string().contains("'action' and 'actions' are mutually exclusive"));
    }

    #[test]
    fn test_resource_and_resources_is_configuration_error() {
        let mut c = case();
        c.resources = Some(vec!["r2".into()]);
        let scenario = scenario(vec![c]);
        assert!(matches!(
            TestExpander::new(&scenario).expand_all(),
            Err(TesterError::Configuration { .. })
        ));
    }

    #[test]
    fn test_missing_or_empty_lists_rejected() {
        let mut none = case();
        none.actions = None;
        let scenario_a = scenario(vec![none]);
        assert!(TestExpander::new(&scenario_a).expand_all().is_err());

        let mut empty = case();
        empty.actions = Some(vec![]);
        let scenario_b = scenario(vec![empty]);
        let err = TestExpander::new(&scenario_b).expand_all().unwrap_err();
        assert!(err.to_string().contains("'actions' must not be empty"));
    }

    #[test]
    fn test_blank_action_or_resource_rejected() {
        let mut blank = case();
        blank.actions = None;
        blank.action = Some(String::new());
        blank.resource = Some(String::new());
        let scenario_a = scenario(vec![blank]);
        let err = TestExpander::new(&scenario_a).expand_all().unwrap_err();
        assert!(matches!(err, TesterError::Configuration { .. }));
        assert!(err.to_string().contains("'action' must not contain blank entries"));

        let mut padded = case();
        padded.resource = None;
        padded.resources = Some(vec!["r1".into(), "  ".into()]);
        let scenario_b = scenario(vec![padded]);
        let err = TestExpander::new(&scenario_b).expand_all().unwrap_err();
        assert!(err.to_string().contains("'resources' must not contain blank entries"));
    }

    #[test]
    fn test_context_is_unioned_scenario_first() {
        let mut c = case();
        c.context = vec![entry("test:key")];
        let mut scenario = scenario(vec![c]);
        scenario.context = vec![entry("scenario:key")];
        let executions = TestExpander::new(&scenario).expand_all().unwrap();
        let keys: Vec<&str> = executions[0].context.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["scenario:key", "test:key"]);
    }

    #[test]
    fn test_overrides_resolve_independently() {
        let mut c = case();
        c.caller_arn = Some("arn:aws:iam::222233334444:user/test".into());
        let mut scenario = scenario(vec![c]);
        scenario.caller_arn = Some("arn:aws:iam::111122223333:user/default".into());
        scenario.resource_owner = Some("arn:aws:iam::111122223333:root".into());
        scenario.resource_policy = Some(PolicySpec::Template(PathBuf::from("/repo/bucket.json")));

        let execution = &TestExpander::new(&scenario).expand_all().unwrap()[0];
        assert_eq!(
            execution.caller_arn.as_deref(),
            Some("arn:aws:iam::222233334444:user/test")
        );
        assert_eq!(
            execution.resource_owner.as_deref(),
            Some("arn:aws:iam::111122223333:root")
        );
        assert!(execution.resource_policy.is_some());
    }

    #[test]
    fn test_unnamed_test_uses_position_label() {
        let mut c = case();
        c.name = None;
        let scenario = scenario(vec![case(), c]);
        let executions = TestExpander::new(&scenario).expand_all().unwrap();
        assert_eq!(executions[2].name, "test #2");
        assert_eq!(executions[2].test_index, 1);
    }
}
