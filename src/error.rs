//! Error taxonomy for scenario loading, policy composition, and test runs.

use std::path::PathBuf;

use thiserror::Error;

use crate::simulator::SimulatorError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TesterError>;

/// Errors raised while composing policies and running scenario tests.
///
/// Everything except [`TesterError::AssertionFailures`] is fatal and aborts
/// the run before (or at) the first simulator call it would affect.
#[derive(Debug, Error)]
pub enum TesterError {
    /// Mutually exclusive fields both set, a required field absent, or no tests.
    #[error("configuration error in {}: {message}", document.display())]
    Configuration { document: PathBuf, message: String },

    /// A template referenced a variable that is not bound.
    #[error("variable '{name}' referenced in {origin} is not defined")]
    MissingVariable { name: String, origin: String },

    /// Rendered output was expected to be JSON but did not parse.
    #[error("rendered output of {origin} is not valid JSON: {message}")]
    MalformedOutput { origin: String, message: String },

    /// Scenario, fragment, vars or policy file is missing.
    #[error("source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// An `extends` chain revisits a document that is still being resolved.
    #[error("cyclic scenario inheritance: {}", format_chain(chain))]
    CyclicInheritance { chain: Vec<PathBuf> },

    /// YAML parsing failed.
    #[error("YAML error in {}: {error}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        error: serde_yaml::Error,
    },

    /// JSON parsing of a policy document failed.
    #[error("JSON error in {}: {error}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        error: serde_json::Error,
    },

    /// File I/O error.
    #[error("IO error on {}: {error}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// The simulator collaborator failed; never retried.
    #[error(transparent)]
    Simulator(#[from] SimulatorError),

    /// Expectation mismatches escalated to a failing outcome.
    #[error("{failed} of {total} test executions did not match their expected decision")]
    AssertionFailures { failed: usize, total: usize },
}

impl TesterError {
    /// Build a configuration error for the given document.
    pub fn configuration(document: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Configuration {
            document: document.into(),
            message: message.into(),
        }
    }

    /// Wrap an I/O error, mapping `NotFound` to [`TesterError::SourceNotFound`].
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        let path = path.into();
        if error.kind() == std::io::ErrorKind::NotFound {
            Self::SourceNotFound { path }
        } else {
            Self::Io { path, error }
        }
    }
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_maps_to_source_not_found() {
        let err = TesterError::io(
            "/missing/scenario.yml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, TesterError::SourceNotFound { .. }));
        assert_eq!(err.to_string(), "source not found: /missing/scenario.yml");
    }

    #[test]
    fn test_cyclic_chain_display() {
        let err = TesterError::CyclicInheritance {
            chain: vec![PathBuf::from("/a.yml"), PathBuf::from("/b.yml"), PathBuf::from("/a.yml")],
        };
        assert_eq!(
            err.to_string(),
            "cyclic scenario inheritance: /a.yml -> /b.yml -> /a.yml"
        );
    }
}
