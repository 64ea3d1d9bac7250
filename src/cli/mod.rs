//! Command-line interface.
//!
//! ```text
//! iam-policy-tester [OPTIONS] <SCENARIO>...
//! ```
//!
//! Each scenario is loaded, its documents prepared, and its tests run in
//! order. Mismatches only fail the process with `--fail-on-mismatch`.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use crate::policy::PolicyBundle;
use crate::runner::{escalate_mismatches, print_documents, RunOptions, Runner};
use crate::scenario::ScenarioLoader;
use crate::simulator::{AwsCliSimulator, PolicySimulator};
use crate::utilities::{FileSystem, Printer, PrinterColor};

/// Test IAM policies against declarative scenarios.
#[derive(Parser, Debug, Clone)]
#[command(name = "iam-policy-tester")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Scenario files to run.
    #[arg(required = true)]
    pub scenarios: Vec<PathBuf>,

    /// Exit non-zero when any decision differs from its expectation.
    #[arg(short, long, default_value_t = false)]
    pub fail_on_mismatch: bool,

    /// Save each request and response as JSON under this directory.
    #[arg(long, value_name = "DIR")]
    pub save_response: Option<PathBuf>,

    /// Print the token-injected documents before running.
    #[arg(long, default_value_t = false)]
    pub show_policy: bool,

    /// AWS CLI executable.
    #[arg(long, value_name = "PATH", env = "IAM_POLICY_TESTER_AWS_CLI", default_value = "aws")]
    pub aws_cli: String,

    /// AWS CLI profile.
    #[arg(long)]
    pub profile: Option<String>,

    /// AWS region.
    #[arg(long)]
    pub region: Option<String>,

    /// Debug logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    pub fn run_options(&self) -> RunOptions {
        let mut options = RunOptions::new()
            .with_fail_on_mismatch(self.fail_on_mismatch)
            .with_show_policy(self.show_policy);
        if let Some(dir) = &self.save_response {
            options = options.with_save_response_dir(dir);
        }
        options
    }

    pub fn simulator(&self) -> AwsCliSimulator {
        let mut simulator = AwsCliSimulator::new(&self.aws_cli);
        if let Some(profile) = &self.profile {
            simulator = simulator.with_profile(profile);
        }
        if let Some(region) = &self.region {
            simulator = simulator.with_region(region);
        }
        simulator
    }

    /// Log filter used when `RUST_LOG` is unset.
    pub fn default_log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "warn,iam_policy_tester=info"
        }
    }
}

/// Totals across every scenario of one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.passed + self.failed
    }
}

/// Run every scenario named on the command line.
pub fn execute(
    cli: &Cli,
    simulator: &dyn PolicySimulator,
    fs: &dyn FileSystem,
    printer: &Printer,
) -> anyhow::Result<Summary> {
    let options = cli.run_options();
    let runner = Runner::new(simulator, fs).with_options(options.clone());
    let mut summary = Summary::default();

    for path in &cli.scenarios {
        let scenario = ScenarioLoader::new(fs)
            .load(path)
            .with_context(|| format!("loading scenario {}", path.display()))?;
        let bundle = PolicyBundle::build(&scenario, fs)
            .with_context(|| format!("preparing policies for {}", path.display()))?;

        if options.show_policy {
            print_documents(printer, &bundle);
        }

        let report = runner
            .run(&scenario, &bundle)
            .with_context(|| format!("running scenario {}", path.display()))?;
        report.print(printer);
        summary.passed += report.passed();
        summary.failed += report.failed();
    }

    if cli.scenarios.len() > 1 {
        let color = if summary.failed == 0 {
            PrinterColor::BoldGreen
        } else {
            PrinterColor::BoldRed
        };
        printer.print(
            &format!(
                "All scenarios: {} passed, {} failed, {} total",
                summary.passed,
                summary.failed,
                summary.total()
            ),
            color,
        );
    }

    escalate_mismatches(options.fail_on_mismatch, summary.failed, summary.total())?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TesterError;
    use crate::simulator::{SimulationOutcome, SimulationRequest, SimulatorError};
    use crate::utilities::LocalFileSystem;
    use std::path::Path;

    /// Denies everything.
    struct DenyAll;

    impl PolicySimulator for DenyAll {
        fn simulate(&self, _: &SimulationRequest) -> Result<SimulationOutcome, SimulatorError> {
            Ok(SimulationOutcome::new("implicitDeny", vec![]))
        }
    }

    fn scenario(dir: &Path, expect: &str) -> PathBuf {
        std::fs::write(dir.join("p.json"), r#"{"Statement":[]}"#).unwrap();
        let path = dir.join("s.yml");
        std::fs::write(
            &path,
            format!(
                "policy_json: p.json\ntests:\n  - action: s3:GetObject\n    resource: '*'\n    expect: {}\n",
                expect
            ),
        )
        .unwrap();
        path
    }

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::try_parse_from([
            "iam-policy-tester",
            "-f",
            "--save-response",
            "out",
            "--profile",
            "audit",
            "a.yml",
            "b.yml",
        ])
        .unwrap();
        assert!(cli.fail_on_mismatch);
        assert_eq!(cli.scenarios.len(), 2);
        assert_eq!(cli.run_options().save_response_dir, Some(PathBuf::from("out")));
        assert!(!cli.run_options().show_policy);
        assert_eq!(cli.profile.as_deref(), Some("audit"));
        assert_eq!(cli.default_log_filter(), "warn,iam_policy_tester=info");
    }

    #[test]
    fn test_verbose_raises_log_filter_to_debug() {
        let cli = Cli::try_parse_from(["iam-policy-tester", "-v", "a.yml"]).unwrap();
        assert_eq!(cli.default_log_filter(), "debug");
    }

    #[test]
    fn test_scenario_argument_required() {
        assert!(Cli::try_parse_from(["iam-policy-tester"]).is_err());
    }

    #[test]
    fn test_mismatch_only_fails_when_escalated() {
        let dir = tempfile::tempdir().unwrap();
        let path = scenario(dir.path(), "allowed");
        let fs = LocalFileSystem::new();
        let printer = Printer::plain();

        let lenient = Cli::try_parse_from(["iam-policy-tester", path.to_str().unwrap()]).unwrap();
        let summary = execute(&lenient, &DenyAll, &fs, &printer).unwrap();
        assert_eq!(summary, Summary { passed: 0, failed: 1 });

        let strict = Cli::try_parse_from(["iam-policy-tester", "-f", path.to_str().unwrap()]).unwrap();
        let err = execute(&strict, &DenyAll, &fs, &printer).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TesterError>(),
            Some(TesterError::AssertionFailures { failed: 1, total: 1 })
        ));
    }

    #[test]
    fn test_load_errors_carry_scenario_context() {
        let fs = LocalFileSystem::new();
        let cli = Cli::try_parse_from(["iam-policy-tester", "/no/such/scenario.yml"]).unwrap();
        let err = execute(&cli, &DenyAll, &fs, &Printer::plain()).unwrap_err();
        assert!(err.to_string().contains("loading scenario /no/such/scenario.yml"));
        assert!(matches!(
            err.root_cause().downcast_ref::<TesterError>(),
            Some(TesterError::SourceNotFound { .. })
        ));
    }
}
