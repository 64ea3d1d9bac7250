//! Expectation grading.
//!
//! Decisions are compared case-insensitively. A mismatch produces a
//! diagnostic that walks each matched statement back to its source file and
//! prints the lines it spans, read from disk at the time of the failure.

use std::fmt::Write as _;

use serde::Serialize;

use crate::expansion::AtomicExecution;
use crate::provenance::{PolicySource, PolicySourceMap};
use crate::simulator::SimulationOutcome;
use crate::utilities::FileSystem;

/// The graded result of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub passed: bool,
    pub expected: String,
    pub actual: String,
    /// Present only when `passed` is false.
    pub diagnostic: Option<String>,
}

/// Whether two decision strings name the same decision.
pub fn decisions_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

/// Grades executions against simulator outcomes.
pub struct ExpectationEvaluator<'a> {
    sources: &'a PolicySourceMap,
    fs: &'a dyn FileSystem,
}

impl<'a> ExpectationEvaluator<'a> {
    pub fn new(sources: &'a PolicySourceMap, fs: &'a dyn FileSystem) -> Self {
        Self { sources, fs }
    }

    pub fn evaluate(&self, execution: &AtomicExecution, outcome: &SimulationOutcome) -> Verdict {
        let passed = decisions_match(&execution.expected, &outcome.decision);
        Verdict {
            passed,
            expected: execution.expected.clone(),
            actual: outcome.decision.clone(),
            diagnostic: (!passed).then(|| self.diagnostic(execution, outcome)),
        }
    }

    /// Render the mismatch report for one execution.
    pub fn diagnostic(&self, execution: &AtomicExecution, outcome: &SimulationOutcome) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "action:    {}", execution.action);
        let _ = writeln!(out, "resources: {}", execution.resources.join(", "));
        if !execution.context.is_empty() {
            let _ = writeln!(out, "context:");
            for entry in &execution.context {
                let _ = writeln!(out, "  {}", entry);
            }
        }
        let _ = writeln!(out, "expected:  {}", execution.expected);
        let _ = writeln!(out, "actual:    {}", outcome.decision);

        if outcome.matched_statements.is_empty() {
            let _ = writeln!(out, "matched statements: none");
            return out;
        }
        let _ = writeln!(out, "matched statements:");
        for token in &outcome.matched_statements {
            match self.sources.get(token) {
                Some(source) => self.describe(&mut out, source),
                None => {
                    let _ = writeln!(out, "  {}", token);
                }
            }
        }
        out
    }

    fn describe(&self, out: &mut String, source: &PolicySource) {
        let label = source.label.as_deref().unwrap_or("(no Sid)");
        let _ = writeln!(out, "  {} at {}", label, source.location());
        match self.excerpt(source) {
            Ok(lines) => {
                for (number, line) in lines {
                    let _ = writeln!(out, "    {:>4} | {}", number, line);
                }
            }
            Err(e) => {
                log::warn!("Cannot read {}: {}", source.file.display(), e);
                let _ = writeln!(out, "    (source unavailable: {})", e);
            }
        }
    }

    /// The numbered lines of `source`, read fresh from disk.
    fn excerpt(&self, source: &PolicySource) -> crate::error::Result<Vec<(usize, String)>> {
        let text = self.fs.read_to_string(&source.file)?;
        Ok(text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line))
            .filter(|(n, _)| *n >= source.start_line && *n <= source.end_line)
            .map(|(n, line)| (n, line.to_string()))
            .collect())
    }
}
