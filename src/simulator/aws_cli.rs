//! [`PolicySimulator`] backed by `aws iam simulate-custom-policy`.
//!
//! IAM only accepts alphanumeric `Sid`s, so tracking tokens cannot travel
//! inside the submitted documents. Instead each document is submitted
//! pretty-printed with its token stripped, and the `StartPosition` of every
//! matched statement in the response is mapped back to the statement it
//! falls in, and from there to the token.

use std::process::Command;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{restrictiveness, PolicySimulator, SimulationOutcome, SimulationRequest, SimulatorError};
use crate::provenance::{scan_statements, LineIndex, StatementLayout, LABEL_KEY};
use crate::scenario::ContextEntry;

/// Default executable name.
pub const DEFAULT_PROGRAM: &str = "aws";

/// Runs the AWS CLI once per simulation.
#[derive(Debug, Clone)]
pub struct AwsCliSimulator {
    program: String,
    profile: Option<String>,
    region: Option<String>,
}

impl Default for AwsCliSimulator {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl AwsCliSimulator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            profile: None,
            region: None,
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    fn command(&self, request: &SimulationRequest, prepared: &PreparedRequest) -> Command {
        let mut command = Command::new(&self.program);
        command.args(["iam", "simulate-custom-policy", "--output", "json"]);
        command
            .arg("--policy-input-list")
            .args(prepared.policies.iter().map(|d| d.text.as_str()));
        command.arg("--action-names").arg(&request.action);
        if !request.resource_arns.is_empty() {
            command.arg("--resource-arns").args(&request.resource_arns);
        }
        if !prepared.boundaries.is_empty() {
            command
                .arg("--permissions-boundary-policy-input-list")
                .args(prepared.boundaries.iter().map(|d| d.text.as_str()));
        }
        if let Some(resource) = &prepared.resource {
            command.arg("--resource-policy").arg(&resource.text);
        }
        if let Some(caller) = &request.caller_arn {
            command.arg("--caller-arn").arg(caller);
        }
        if let Some(owner) = &request.resource_owner {
            command.arg("--resource-owner").arg(owner);
        }
        if !request.context.is_empty() {
            command.arg("--context-entries").arg(context_entries(&request.context).to_string());
        }
        if let Some(profile) = &self.profile {
            command.arg("--profile").arg(profile);
        }
        if let Some(region) = &self.region {
            command.arg("--region").arg(region);
        }
        command
    }
}

impl PolicySimulator for AwsCliSimulator {
    fn simulate(&self, request: &SimulationRequest) -> Result<SimulationOutcome, SimulatorError> {
        let prepared = PreparedRequest::new(request)?;
        log::debug!("Simulating {} against {:?}", request.action, request.resource_arns);

        let output = self
            .command(request, &prepared)
            .output()
            .map_err(|error| SimulatorError::Spawn {
                program: self.program.clone(),
                error,
            })?;

        if !output.status.success() {
            return Err(SimulatorError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let raw: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| SimulatorError::Decode(e.to_string()))?;
        prepared.outcome(raw)
    }
}

/// `--context-entries` in the CLI's JSON form.
fn context_entries(entries: &[ContextEntry]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|entry| {
                json!({
                    "ContextKeyName": entry.key,
                    "ContextKeyValues": entry.values,
                    "ContextKeyType": entry.value_type.as_str(),
                })
            })
            .collect(),
    )
}

// ============================================================================
// Submitted documents
// ============================================================================

/// One document as submitted, with enough layout to map positions back.
#[derive(Debug)]
struct PreparedDocument {
    text: String,
    layout: StatementLayout,
    lines: LineIndex,
    /// Original `Sid` of each statement, in order.
    labels: Vec<Option<String>>,
}

impl PreparedDocument {
    fn new(minified: &str) -> Result<Self, SimulatorError> {
        let mut document: Value = serde_json::from_str(minified)
            .map_err(|e| SimulatorError::InvalidRequest(e.to_string()))?;
        let labels = strip_labels(&mut document);
        let text = serde_json::to_string_pretty(&document)
            .map_err(|e| SimulatorError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            layout: scan_statements(&text),
            lines: LineIndex::new(&text),
            text,
            labels,
        })
    }

    /// Index of the statement at a reported position.
    fn statement_at(&self, position: &Position) -> Option<usize> {
        if self.layout.is_empty() {
            return (self.labels.len() == 1).then_some(0);
        }
        let spans = (0..self.layout.len()).filter_map(|i| self.layout.span(i).map(|s| (i, s)));
        if let Some(offset) = self.lines.offset_of(position.line, position.column) {
            if let Some((i, _)) = spans.clone().find(|(_, span)| span.contains(offset)) {
                return Some(i);
            }
        }
        // Columns may be counted from zero; pretty-printed statements never
        // share a line, so the line alone decides.
        spans
            .filter(|(_, span)| span.start_line <= position.line && position.line <= span.end_line)
            .map(|(i, _)| i)
            .next()
    }

    fn label_at(&self, source_id: &str, position: Option<&Position>) -> String {
        let Some(index) = position.and_then(|p| self.statement_at(p)) else {
            return source_id.to_string();
        };
        self.labels
            .get(index)
            .cloned()
            .flatten()
            .unwrap_or_else(|| format!("{}#stmt:{}", source_id, index + 1))
    }
}

/// Take each statement's label, removing it when IAM would reject it.
fn strip_labels(document: &mut Value) -> Vec<Option<String>> {
    match document.get("Statement") {
        Some(Value::Array(_)) | Some(Value::Object(_)) => {}
        _ => return vec![take_label(document)],
    }
    match document.get_mut("Statement") {
        Some(Value::Array(statements)) => statements.iter_mut().map(take_label).collect(),
        Some(statement) => vec![take_label(statement)],
        None => Vec::new(),
    }
}

fn take_label(statement: &mut Value) -> Option<String> {
    let object = statement.as_object_mut()?;
    let label = object.get(LABEL_KEY).and_then(Value::as_str).map(str::to_string);
    if let Some(sid) = &label {
        if !sid.chars().all(|c| c.is_ascii_alphanumeric()) {
            object.remove(LABEL_KEY);
        }
    }
    label
}

/// All documents of one request.
#[derive(Debug)]
struct PreparedRequest {
    policies: Vec<PreparedDocument>,
    boundaries: Vec<PreparedDocument>,
    resource: Option<PreparedDocument>,
}

impl PreparedRequest {
    fn new(request: &SimulationRequest) -> Result<Self, SimulatorError> {
        if request.policy_documents.is_empty() {
            return Err(SimulatorError::InvalidRequest(
                "at least one policy document is required".to_string(),
            ));
        }
        Ok(Self {
            policies: prepare_all(&request.policy_documents)?,
            boundaries: prepare_all(&request.boundary_documents)?,
            resource: request
                .resource_policy
                .as_deref()
                .map(PreparedDocument::new)
                .transpose()?,
        })
    }

    /// The submitted document a `SourcePolicyId` refers to.
    fn document(&self, source_id: &str) -> Option<&PreparedDocument> {
        let indexed = |list: &[PreparedDocument], n: &str| -> Option<usize> {
            let index = n.parse::<usize>().ok()?.checked_sub(1)?;
            (index < list.len()).then_some(index)
        };
        if let Some(n) = source_id.strip_prefix("PolicyInputList.") {
            indexed(&self.policies, n).map(|i| &self.policies[i])
        } else if let Some(n) = source_id.strip_prefix("PermissionsBoundaryPolicyInputList.") {
            indexed(&self.boundaries, n).map(|i| &self.boundaries[i])
        } else if source_id == "ResourcePolicy" {
            self.resource.as_ref()
        } else {
            None
        }
    }

    /// Fold a `simulate-custom-policy` response into one outcome.
    fn outcome(&self, raw: Value) -> Result<SimulationOutcome, SimulatorError> {
        let response: SimulationResponse = serde_json::from_value(raw.clone())
            .map_err(|e| SimulatorError::Decode(e.to_string()))?;

        let mut decision: Option<String> = None;
        let mut matched = Vec::new();
        for result in &response.evaluation_results {
            let more_restrictive = decision
                .as_deref()
                .map_or(true, |d| restrictiveness(&result.eval_decision) > restrictiveness(d));
            if more_restrictive {
                decision = Some(result.eval_decision.clone());
            }

            let statements = result
                .matched_statements
                .iter()
                .chain(result.resource_specific_results.iter().flat_map(|r| &r.matched_statements));
            for statement in statements {
                let source_id = statement.source_policy_id.as_deref().unwrap_or("unknown");
                let label = match self.document(source_id) {
                    Some(document) => document.label_at(source_id, statement.start_position.as_ref()),
                    None => source_id.to_string(),
                };
                if !matched.contains(&label) {
                    matched.push(label);
                }
            }
        }

        let decision = decision
            .ok_or_else(|| SimulatorError::Decode("response has no evaluation results".to_string()))?;
        Ok(SimulationOutcome {
            decision,
            matched_statements: matched,
            raw: Some(raw),
        })
    }
}

fn prepare_all(documents: &[String]) -> Result<Vec<PreparedDocument>, SimulatorError> {
    documents.iter().map(|d| PreparedDocument::new(d)).collect()
}

// ============================================================================
// Response shape
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SimulationResponse {
    #[serde(default)]
    evaluation_results: Vec<EvaluationResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EvaluationResult {
    eval_decision: String,
    #[serde(default)]
    matched_statements: Vec<MatchedStatement>,
    #[serde(default)]
    resource_specific_results: Vec<ResourceSpecificResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResourceSpecificResult {
    #[serde(default)]
    matched_statements: Vec<MatchedStatement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MatchedStatement {
    source_policy_id: Option<String>,
    start_position: Option<Position>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Position {
    line: usize,
    column: usize,
}
