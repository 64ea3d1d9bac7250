//! # Policy bundle
//!
//! Every document a scenario run submits, prepared once up front:
//!
//! - the identity policy under test, rendered and token-tracked;
//! - the permission boundary, merged from all guardrail fragments;
//! - each resource policy referenced by the scenario or one of its tests,
//!   rendered but not tracked.
//!
//! All rendering happens in [`PolicyBundle::build`], so a missing variable or
//! malformed document fails the run before the simulator is ever called.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, TesterError};
use crate::expansion::AtomicExecution;
use crate::provenance::{
    FragmentMerger, MergedDocument, PolicyProvenanceTracker, PolicySourceMap, TrackedPolicy,
};
use crate::scenario::{PolicySpec, Scenario};
use crate::simulator::SimulationRequest;
use crate::template::{minify_json, Substitution};
use crate::utilities::FileSystem;

/// The prepared documents of one scenario.
#[derive(Debug, Clone)]
pub struct PolicyBundle {
    /// The identity policy under test, tokens injected.
    pub identity: TrackedPolicy,
    /// The merged guardrail fragments, if the scenario declares any.
    pub boundary: Option<MergedDocument>,
    resource_policies: BTreeMap<PolicySpec, String>,
    sources: PolicySourceMap,
}

impl PolicyBundle {
    /// Render, track and merge every document `scenario` refers to.
    pub fn build(scenario: &Scenario, fs: &dyn FileSystem) -> Result<Self> {
        let sub = Substitution::new(scenario.vars.clone());
        let tracker = PolicyProvenanceTracker::with_base_dir(scenario.base_dir());

        let (raw, rendered) = render(fs, &sub, &scenario.policy)?;
        let identity = tracker.track(scenario.policy.path(), &raw, &rendered)?;
        log::info!(
            "Identity policy {}: {} statement(s) tracked",
            scenario.policy.path().display(),
            identity.sources.len()
        );

        let boundary = if scenario.guardrail_policies.is_empty() {
            None
        } else {
            let fragments = expand_patterns(fs, scenario)?;
            let merged = FragmentMerger::new(fs, &tracker)
                .with_substitution(&sub)
                .merge(&fragments)?;
            log::info!(
                "Permission boundary: {} statement(s) from {} fragment(s)",
                merged.statements().len(),
                merged.fragments.len()
            );
            Some(merged)
        };

        let mut resource_policies = BTreeMap::new();
        let specs = scenario
            .resource_policy
            .iter()
            .chain(scenario.tests.iter().filter_map(|t| t.resource_policy.as_ref()));
        for spec in specs {
            if resource_policies.contains_key(spec) {
                continue;
            }
            let (_, rendered) = render(fs, &sub, spec)?;
            resource_policies.insert(spec.clone(), rendered);
        }

        let mut sources = PolicySourceMap::new();
        sources.extend(identity.sources.clone());
        if let Some(merged) = &boundary {
            for token in merged.sources.keys() {
                if identity.sources.contains_key(token) {
                    return Err(TesterError::configuration(
                        &scenario.path,
                        format!(
                            "tracking token '{}' is produced by both the policy and a guardrail fragment",
                            token
                        ),
                    ));
                }
            }
            sources.extend(merged.sources.clone());
            sources.boundary_policy = Some(merged.text());
        }
        sources.identity_policy = identity.text();
        sources.resource_policy = scenario
            .resource_policy
            .as_ref()
            .and_then(|spec| resource_policies.get(spec).cloned());
        log::debug!("{} tracking token(s) in the source map", sources.len());

        Ok(Self {
            identity,
            boundary,
            resource_policies,
            sources,
        })
    }

    /// Token → provenance for every tracked statement.
    pub fn sources(&self) -> &PolicySourceMap {
        &self.sources
    }

    /// Rendered text of a resource policy referenced by the scenario.
    pub fn resource_policy(&self, spec: &PolicySpec) -> Option<&str> {
        self.resource_policies.get(spec).map(String::as_str)
    }

    /// The simulator request for one atomic execution.
    pub fn request_for(&self, execution: &AtomicExecution) -> Result<SimulationRequest> {
        let resource_policy = match &execution.resource_policy {
            Some(spec) => Some(
                self.resource_policy(spec)
                    .ok_or_else(|| {
                        TesterError::configuration(
                            spec.path(),
                            format!("resource policy for '{}' was not prepared", execution.name),
                        )
                    })?
                    .to_string(),
            ),
            None => None,
        };

        Ok(SimulationRequest {
            policy_documents: vec![self.identity.text()],
            boundary_documents: self.boundary.iter().map(MergedDocument::text).collect(),
            resource_policy,
            action: execution.action.clone(),
            resource_arns: execution.resources.clone(),
            context: execution.context.clone(),
            caller_arn: execution.caller_arn.clone(),
            resource_owner: execution.resource_owner.clone(),
        })
    }

    /// Every token-injected document, labelled, for display.
    pub fn documents(&self) -> Vec<(String, String)> {
        let mut documents = vec![(
            format!("policy ({})", self.identity.path.display()),
            pretty(&self.identity.document),
        )];
        if let Some(merged) = &self.boundary {
            documents.push((
                format!("permission boundary ({} fragment(s))", merged.fragments.len()),
                pretty(&merged.document),
            ));
        }
        for (spec, text) in &self.resource_policies {
            let document = serde_json::from_str(text).unwrap_or(serde_json::Value::String(text.clone()));
            documents.push((format!("resource policy ({})", spec.path().display()), pretty(&document)));
        }
        documents
    }
}

/// Read `spec` and return its raw text and its rendered, minified JSON.
fn render(fs: &dyn FileSystem, sub: &Substitution, spec: &PolicySpec) -> Result<(String, String)> {
    let raw = fs.read_to_string(spec.path())?;
    let origin = spec.path().display().to_string();
    let rendered = match spec {
        PolicySpec::Template(_) => sub.json(&origin, &raw)?,
        PolicySpec::Document(_) => minify_json(&origin, &raw)?,
    };
    Ok((raw, rendered))
}

/// Expand the guardrail patterns into fragment paths.
fn expand_patterns(fs: &dyn FileSystem, scenario: &Scenario) -> Result<Vec<PathBuf>> {
    let mut fragments = Vec::new();
    for pattern in &scenario.guardrail_policies {
        let matched = fs.glob(&pattern.pattern, &pattern.base)?;
        log::debug!("Guardrail pattern {} matched {} file(s)", pattern, matched.len());
        fragments.extend(matched);
    }
    Ok(fragments)
}

fn pretty(document: &serde_json::Value) -> String {
    serde_json::to_string_pretty(document).unwrap_or_else(|_| document.to_string())
}

/// Convenience for callers holding only a path to a scenario file.
pub fn build_for_path(path: &Path, fs: &dyn FileSystem) -> Result<(Scenario, PolicyBundle)> {
    let scenario = crate::scenario::ScenarioLoader::new(fs).load(path)?;
    let bundle = PolicyBundle::build(&scenario, fs)?;
    Ok((scenario, bundle))
}
