//! Fragment merging for permission boundaries.
//!
//! Guardrail fragments are written independently (one file per control) and
//! evaluated together as one boundary document. Merging concatenates their
//! statements in path order, tracking each fragment on the way in.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{json, Value};

use super::tracker::{DocumentShape, PolicyProvenanceTracker};
use super::PolicySource;
use crate::error::{Result, TesterError};
use crate::template::{minify_json, Substitution};
use crate::utilities::FileSystem;

/// Version marker of every merged envelope.
pub const POLICY_VERSION: &str = "2012-10-17";

/// The union of all fragment statements in one policy envelope.
#[derive(Debug, Clone)]
pub struct MergedDocument {
    /// Fragment paths in merge order.
    pub fragments: Vec<PathBuf>,
    /// `{"Version": ..., "Statement": [...]}`
    pub document: Value,
    /// Token → provenance across all fragments.
    pub sources: BTreeMap<String, PolicySource>,
}

impl MergedDocument {
    pub fn statements(&self) -> &[Value] {
        self.document
            .get("Statement")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Minified text of the merged document.
    pub fn text(&self) -> String {
        self.document.to_string()
    }
}

/// Merges fragment files into one [`MergedDocument`].
pub struct FragmentMerger<'a> {
    fs: &'a dyn FileSystem,
    tracker: &'a PolicyProvenanceTracker,
    substitution: Option<&'a Substitution>,
}

impl<'a> FragmentMerger<'a> {
    pub fn new(fs: &'a dyn FileSystem, tracker: &'a PolicyProvenanceTracker) -> Self {
        Self {
            fs,
            tracker,
            substitution: None,
        }
    }

    /// Substitute scenario variables into each fragment before merging.
    pub fn with_substitution(mut self, substitution: &'a Substitution) -> Self {
        self.substitution = Some(substitution);
        self
    }

    /// Merge the fragments at `paths`.
    ///
    /// Paths are deduplicated and sorted first, so the result does not depend
    /// on the order patterns were declared or the filesystem listed them.
    pub fn merge(&self, paths: &[PathBuf]) -> Result<MergedDocument> {
        let mut fragments = paths.to_vec();
        fragments.sort();
        fragments.dedup();

        let mut statements = Vec::new();
        let mut sources = BTreeMap::new();

        for path in &fragments {
            let raw = self.fs.read_to_string(path)?;
            let origin = path.display().to_string();
            let rendered = match self.substitution {
                Some(sub) => sub.json(&origin, &raw)?,
                None => minify_json(&origin, &raw)?,
            };
            let tracked = self.tracker.track(path, &raw, &rendered)?;

            if tracked.shape == DocumentShape::Opaque {
                log::warn!("Fragment {} has no Statement key; merged verbatim", origin);
            }
            let fragment_statements = tracked.statements();
            log::debug!(
                "Fragment {} contributes {} statement(s)",
                origin,
                fragment_statements.len()
            );
            statements.extend(fragment_statements);

            for (token, source) in tracked.sources {
                if sources.contains_key(&token) {
                    return Err(TesterError::configuration(
                        path,
                        format!("tracking token '{}' is produced by more than one fragment", token),
                    ));
                }
                sources.insert(token, source);
            }
        }

        Ok(MergedDocument {
            fragments,
            document: json!({
                "Version": POLICY_VERSION,
                "Statement": statements,
            }),
            sources,
        })
    }
}
