//! Policy provenance.
//!
//! Maps the tracking tokens injected into submitted documents back to the
//! files and line ranges they came from.

pub mod merger;
pub mod scanner;
pub mod tracker;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

pub use merger::{FragmentMerger, MergedDocument, POLICY_VERSION};
pub use scanner::{scan_statements, LineIndex, StatementLayout, StatementSpan};
pub use tracker::{DocumentShape, PolicyProvenanceTracker, TrackedPolicy, LABEL_KEY};

/// Where one submitted statement came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySource {
    pub file: PathBuf,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    /// The statement's original `Sid`, if it had one.
    pub label: Option<String>,
}

impl PolicySource {
    /// `file:start-end`
    pub fn location(&self) -> String {
        format!("{}:{}-{}", self.file.display(), self.start_line, self.end_line)
    }
}

/// Every token known for one scenario run, plus the documents they were
/// injected into.
#[derive(Debug, Clone, Default)]
pub struct PolicySourceMap {
    sources: BTreeMap<String, PolicySource>,
    /// Token-injected identity policy text.
    pub identity_policy: String,
    /// Token-injected, fragment-merged permission boundary text.
    pub boundary_policy: Option<String>,
    /// Scenario-level resource policy text. Not token-tracked.
    pub resource_policy: Option<String>,
}

impl PolicySourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &str) -> Option<&PolicySource> {
        self.sources.get(token)
    }

    /// Add the provenance of another tracked document. Later entries replace
    /// earlier ones with the same token.
    pub fn extend(&mut self, sources: impl IntoIterator<Item = (String, PolicySource)>) {
        self.sources.extend(sources);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_map_lookup() {
        let mut map = PolicySourceMap::new();
        assert!(map.is_empty());
        map.extend([(
            "app.json#stmt:1".to_string(),
            PolicySource {
                file: PathBuf::from("/repo/app.json"),
                start_line: 4,
                end_line: 9,
                label: Some("AllowRead".to_string()),
            },
        )]);
        assert_eq!(map.len(), 1);
        let source = map.get("app.json#stmt:1").unwrap();
        assert_eq!(source.location(), "/repo/app.json:4-9");
        assert!(map.get("app.json#stmt:2").is_none());
    }
}
