//! # iam-policy-tester
//!
//! Declarative tests for IAM policies.
//!
//! A scenario names a policy under test, the guardrail fragments that bound
//! it, and the decisions expected for a list of actions. The crate resolves
//! scenario inheritance, substitutes variables in any of four notations,
//! merges guardrail fragments while remembering where every statement came
//! from, fans tests out into single-action simulator calls, and grades the
//! simulator's decisions with diagnostics that quote the original source
//! lines.
//!
//! ```text
//! ScenarioLoader ─▶ PolicyBundle ─▶ TestExpander ─▶ PolicySimulator ─▶ ExpectationEvaluator
//! ```

pub mod cli;
pub mod error;
pub mod evaluation;
pub mod expansion;
pub mod policy;
pub mod provenance;
pub mod runner;
pub mod scenario;
pub mod simulator;
pub mod template;
pub mod utilities;

pub use error::{Result, TesterError};
pub use evaluation::{ExpectationEvaluator, Verdict};
pub use expansion::{AtomicExecution, TestExpander};
pub use policy::PolicyBundle;
pub use provenance::{FragmentMerger, PolicyProvenanceTracker, PolicySource, PolicySourceMap};
pub use runner::{RunOptions, RunReport, Runner};
pub use scenario::{Scenario, ScenarioLoader};
pub use simulator::{AwsCliSimulator, PolicySimulator, SimulationOutcome, SimulationRequest};
pub use template::{Substitution, TemplateRenderer, VariableNotationNormalizer};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
