//! iam-policy-tester binary.
//!
//! Runs scenario files against `aws iam simulate-custom-policy`.
//!
//! # Environment Variables
//!
//! - `IAM_POLICY_TESTER_AWS_CLI`: AWS CLI executable (default: `aws`)
//! - `RUST_LOG`: tracing filter (default: "warn,iam_policy_tester=info", or
//!   "debug" with `--verbose`)
//!
//! # Usage
//!
//! ```bash
//! iam-policy-tester --fail-on-mismatch scenarios/*.yml
//! ```

use std::process::ExitCode;

use clap::Parser;
use iam_policy_tester::cli::{self, Cli};
use iam_policy_tester::utilities::{LocalFileSystem, Printer, PrinterColor};
use iam_policy_tester::VERSION;

fn main() -> ExitCode {
    let args = Cli::parse();

    // Initialize tracing; `log` records from the library are captured too.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.default_log_filter().into()),
        )
        .with_writer(std::io::stderr)
        .init();
    tracing::debug!("iam-policy-tester {}", VERSION);

    let printer = Printer::new();
    let simulator = args.simulator();

    match cli::execute(&args, &simulator, &LocalFileSystem::new(), &printer) {
        Ok(summary) => {
            tracing::debug!("{} execution(s) completed", summary.total());
            ExitCode::SUCCESS
        }
        Err(e) => {
            printer.print(&format!("Error: {:#}", e), PrinterColor::BoldRed);
            ExitCode::FAILURE
        }
    }
}
