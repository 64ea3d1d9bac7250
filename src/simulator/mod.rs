//! # Policy simulation
//!
//! The engine never evaluates policies itself. Each atomic execution is
//! handed to a [`PolicySimulator`], which returns the decision and the
//! tracking tokens of the statements that produced it.

pub mod aws_cli;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::scenario::ContextEntry;

pub use aws_cli::AwsCliSimulator;

/// Everything one simulator call needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationRequest {
    /// Identity policies, minified JSON with tokens injected.
    pub policy_documents: Vec<String>,
    /// Permission boundary documents.
    pub boundary_documents: Vec<String>,
    pub resource_policy: Option<String>,
    pub action: String,
    pub resource_arns: Vec<String>,
    pub context: Vec<ContextEntry>,
    pub caller_arn: Option<String>,
    pub resource_owner: Option<String>,
}

/// What the simulator decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    /// `allowed`, `explicitDeny` or `implicitDeny`.
    pub decision: String,
    /// Tokens (or labels) of the statements that matched, in report order.
    pub matched_statements: Vec<String>,
    /// The simulator's raw response, kept for `--save-response`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl SimulationOutcome {
    pub fn new(decision: impl Into<String>, matched_statements: Vec<String>) -> Self {
        Self {
            decision: decision.into(),
            matched_statements,
            raw: None,
        }
    }
}

/// Failures of the simulator collaborator. Never retried.
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("failed to start simulator '{program}': {error}")]
    Spawn {
        program: String,
        #[source]
        error: std::io::Error,
    },

    #[error("simulator exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("could not decode simulator response: {0}")]
    Decode(String),

    #[error("simulator request rejected: {0}")]
    InvalidRequest(String),
}

/// Evaluates one atomic execution.
pub trait PolicySimulator {
    fn simulate(&self, request: &SimulationRequest) -> Result<SimulationOutcome, SimulatorError>;
}

/// Rank of a decision; higher is more restrictive.
pub fn restrictiveness(decision: &str) -> u8 {
    if decision.eq_ignore_ascii_case("explicitDeny") {
        2
    } else if decision.eq_ignore_ascii_case("allowed") {
        0
    } else {
        1
    }
}
