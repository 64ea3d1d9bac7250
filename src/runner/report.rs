//! Run results and their console rendering.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Result, TesterError};
use crate::evaluation::Verdict;
use crate::expansion::AtomicExecution;
use crate::policy::PolicyBundle;
use crate::utilities::{ColoredText, Printer, PrinterColor};

/// One graded execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution: AtomicExecution,
    pub verdict: Verdict,
    /// Tokens reported by the simulator.
    pub matched_statements: Vec<String>,
}

/// All results of one scenario, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scenario: PathBuf,
    pub results: Vec<ExecutionResult>,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.verdict.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter().filter(|r| !r.verdict.passed)
    }

    /// Escalate this report's mismatches; see [`escalate_mismatches`].
    pub fn check(&self, fail_on_mismatch: bool) -> Result<()> {
        escalate_mismatches(fail_on_mismatch, self.failed(), self.total())
    }

    /// Console lines for this report.
    pub fn render(&self, printer: &Printer) -> Vec<String> {
        let mut lines = vec![printer.paint(
            &format!("Scenario {}", self.scenario.display()),
            PrinterColor::BoldWhite,
        )];

        for result in &self.results {
            let execution = &result.execution;
            if result.verdict.passed {
                lines.push(format!(
                    "  {}  {}  {}  {}",
                    printer.paint("PASS", PrinterColor::BoldGreen),
                    execution.name,
                    execution.action,
                    result.verdict.actual
                ));
            } else {
                lines.push(format!(
                    "  {}  {}  {}  expected {}, got {}",
                    printer.paint("FAIL", PrinterColor::BoldRed),
                    execution.name,
                    execution.action,
                    result.verdict.expected,
                    printer.paint(&result.verdict.actual, PrinterColor::Red)
                ));
                if let Some(diagnostic) = &result.verdict.diagnostic {
                    lines.extend(diagnostic.lines().map(|l| format!("        {}", l)));
                }
            }
        }

        let summary = format!(
            "{} passed, {} failed, {} total",
            self.passed(),
            self.failed(),
            self.total()
        );
        let color = if self.is_success() {
            PrinterColor::Green
        } else {
            PrinterColor::Red
        };
        lines.push(printer.paint(&summary, color));
        lines
    }

    pub fn print(&self, printer: &Printer) {
        for line in self.render(printer) {
            println!("{}", line);
        }
    }
}

/// Turn `failed` mismatches into [`TesterError::AssertionFailures`] when
/// `fail_on_mismatch` is set. Without it mismatches are only reported.
pub fn escalate_mismatches(fail_on_mismatch: bool, failed: usize, total: usize) -> Result<()> {
    if fail_on_mismatch && failed > 0 {
        return Err(TesterError::AssertionFailures { failed, total });
    }
    Ok(())
}

/// Print every token-injected document of `bundle`.
pub fn print_documents(printer: &Printer, bundle: &PolicyBundle) {
    for (title, text) in bundle.documents() {
        printer.print_colored(&[
            ColoredText::new("== ", PrinterColor::Cyan),
            ColoredText::new(title, PrinterColor::BoldCyan),
        ]);
        println!("{}", text);
    }
}
