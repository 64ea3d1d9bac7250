//! # Runner
//!
//! Drives one scenario end to end: expand the tests, build every simulator
//! request, call the simulator once per execution in order, and grade each
//! outcome. Requests are built before the first call so configuration errors
//! never leave a run half done.

pub mod report;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Result, TesterError};
use crate::evaluation::ExpectationEvaluator;
use crate::expansion::{AtomicExecution, TestExpander};
use crate::policy::PolicyBundle;
use crate::scenario::Scenario;
use crate::simulator::{PolicySimulator, SimulationOutcome, SimulationRequest};
use crate::utilities::FileSystem;

pub use report::{escalate_mismatches, print_documents, ExecutionResult, RunReport};

/// Caller-controlled run behaviour.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Escalate expectation mismatches into a failing outcome.
    pub fail_on_mismatch: bool,
    /// Write each request and response under this directory.
    pub save_response_dir: Option<PathBuf>,
    /// Print the token-injected documents before running.
    pub show_policy: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fail_on_mismatch(mut self, enabled: bool) -> Self {
        self.fail_on_mismatch = enabled;
        self
    }

    pub fn with_save_response_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_response_dir = Some(dir.into());
        self
    }

    pub fn with_show_policy(mut self, enabled: bool) -> Self {
        self.show_policy = enabled;
        self
    }
}

/// What `--save-response` writes for one execution.
#[derive(Debug, Serialize)]
struct SavedResponse<'a> {
    scenario: &'a Path,
    test: &'a str,
    request: &'a SimulationRequest,
    decision: &'a str,
    matched_statements: &'a [String],
    response: Option<&'a Value>,
    recorded_at: DateTime<Utc>,
    /// SHA-256 over every submitted document.
    documents_sha256: String,
}

/// Runs scenarios against a simulator.
pub struct Runner<'a> {
    simulator: &'a dyn PolicySimulator,
    fs: &'a dyn FileSystem,
    options: RunOptions,
}

impl<'a> Runner<'a> {
    pub fn new(simulator: &'a dyn PolicySimulator, fs: &'a dyn FileSystem) -> Self {
        Self {
            simulator,
            fs,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Run every test of `scenario`.
    ///
    /// Mismatches are recorded in the report, never raised here; see
    /// [`RunReport::check`]. Simulator errors abort the run unchanged.
    pub fn run(&self, scenario: &Scenario, bundle: &PolicyBundle) -> Result<RunReport> {
        let executions = TestExpander::new(scenario).expand_all()?;
        let requests = executions
            .iter()
            .map(|e| bundle.request_for(e))
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "Running {} execution(s) from {}",
            executions.len(),
            scenario.path.display()
        );

        let evaluator = ExpectationEvaluator::new(bundle.sources(), self.fs);
        let mut results = Vec::with_capacity(executions.len());

        for (index, (execution, request)) in executions.into_iter().zip(&requests).enumerate() {
            let outcome = self.simulator.simulate(request)?;
            log::debug!(
                "{} / {}: {} (matched {:?})",
                execution.name,
                execution.action,
                outcome.decision,
                outcome.matched_statements
            );

            if let Some(dir) = &self.options.save_response_dir {
                self.save_response(dir, scenario, index, &execution, request, &outcome)?;
            }

            let verdict = evaluator.evaluate(&execution, &outcome);
            if !verdict.passed {
                log::warn!(
                    "{} / {}: expected {}, got {}",
                    execution.name,
                    execution.action,
                    verdict.expected,
                    verdict.actual
                );
            }
            results.push(ExecutionResult {
                execution,
                verdict,
                matched_statements: outcome.matched_statements,
            });
        }

        Ok(RunReport {
            scenario: scenario.path.clone(),
            results,
        })
    }

    fn save_response(
        &self,
        dir: &Path,
        scenario: &Scenario,
        index: usize,
        execution: &AtomicExecution,
        request: &SimulationRequest,
        outcome: &SimulationOutcome,
    ) -> Result<()> {
        let stem = scenario
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scenario".to_string());
        let target_dir = dir.join(sanitize(&stem));
        std::fs::create_dir_all(&target_dir).map_err(|e| TesterError::io(&target_dir, e))?;

        let path = target_dir.join(format!("{:03}-{}.json", index + 1, sanitize(&execution.action)));
        let saved = SavedResponse {
            scenario: &scenario.path,
            test: &execution.name,
            request,
            decision: &outcome.decision,
            matched_statements: &outcome.matched_statements,
            response: outcome.raw.as_ref(),
            recorded_at: Utc::now(),
            documents_sha256: documents_digest(request),
        };
        let text = serde_json::to_string_pretty(&saved).map_err(|error| TesterError::Json {
            path: path.clone(),
            error,
        })?;
        std::fs::write(&path, text).map_err(|e| TesterError::io(&path, e))?;
        log::debug!("Saved response to {}", path.display());
        Ok(())
    }
}

/// Hex SHA-256 of every document in `request`, in submission order.
pub fn documents_digest(request: &SimulationRequest) -> String {
    let mut hasher = Sha256::new();
    let documents = request
        .policy_documents
        .iter()
        .chain(&request.boundary_documents)
        .chain(&request.resource_policy);
    for document in documents {
        hasher.update(document.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
