//! Statement-level provenance tracking.
//!
//! The simulator only reports *which* statements matched, by label. Before a
//! document is submitted, every statement's `Sid` is replaced by a tracking
//! token (`<source>#stmt:<ordinal>`), and the token is recorded against the
//! statement's file, line range and original `Sid`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::scanner::{scan_statements, StatementLayout};
use super::PolicySource;
use crate::error::{Result, TesterError};

/// The key whose value a tracking token replaces.
pub const LABEL_KEY: &str = "Sid";

/// How a document carries its statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentShape {
    /// `{"Statement": [ ... ]}`
    StatementArray,
    /// `{"Statement": { ... }}`
    SingleStatement,
    /// Anything else; treated as one opaque statement.
    Opaque,
}

/// A document with tokens injected, plus the provenance of each token.
#[derive(Debug, Clone)]
pub struct TrackedPolicy {
    pub path: PathBuf,
    pub shape: DocumentShape,
    /// The rewritten document.
    pub document: Value,
    /// Token → provenance, for every statement that could carry a token.
    pub sources: BTreeMap<String, PolicySource>,
}

impl TrackedPolicy {
    /// Minified text of the rewritten document.
    pub fn text(&self) -> String {
        self.document.to_string()
    }

    /// The rewritten statements, in document order.
    pub fn statements(&self) -> Vec<Value> {
        match self.shape {
            DocumentShape::StatementArray => self
                .document
                .get("Statement")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            DocumentShape::SingleStatement => self
                .document
                .get("Statement")
                .cloned()
                .into_iter()
                .collect(),
            DocumentShape::Opaque => vec![self.document.clone()],
        }
    }
}

/// Injects tracking tokens and records where each statement came from.
#[derive(Debug, Clone, Default)]
pub struct PolicyProvenanceTracker {
    base_dir: Option<PathBuf>,
}

impl PolicyProvenanceTracker {
    /// Tokens use the file's base name.
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    /// Tokens use paths relative to `dir` (or the full path outside it).
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
        }
    }

    /// The source identity embedded in tokens for `path`.
    pub fn token_prefix(&self, path: &Path) -> String {
        match &self.base_dir {
            Some(base) => match path.strip_prefix(base) {
                Ok(relative) => relative.to_string_lossy().into_owned(),
                Err(_) => path.to_string_lossy().into_owned(),
            },
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
        }
    }

    /// Track a document whose source text is also its effective text.
    pub fn track_text(&self, path: &Path, text: &str) -> Result<TrackedPolicy> {
        self.track(path, text, text)
    }

    /// Track the document `rendered`, whose original text is `source_text`.
    ///
    /// Line ranges come from `source_text`; structure and labels come from
    /// `rendered`.
    pub fn track(&self, path: &Path, source_text: &str, rendered: &str) -> Result<TrackedPolicy> {
        let mut document: Value =
            serde_json::from_str(rendered).map_err(|error| TesterError::Json {
                path: path.to_path_buf(),
                error,
            })?;
        let layout = scan_statements(source_text);
        let whole_file = (1, source_text.lines().count().max(1));
        let prefix = self.token_prefix(path);
        let mut sources = BTreeMap::new();

        let mut record = |ordinal: usize, statement: &mut Value, lines: (usize, usize)| {
            let Some(object) = statement.as_object_mut() else {
                log::warn!(
                    "{}: statement {} is not an object; it cannot carry a tracking token",
                    path.display(),
                    ordinal
                );
                return;
            };
            let token = format!("{}#stmt:{}", prefix, ordinal);
            let label = object
                .get(LABEL_KEY)
                .and_then(Value::as_str)
                .map(str::to_string);
            object.insert(LABEL_KEY.to_string(), Value::String(token.clone()));
            log::debug!("{} -> {}:{}-{}", token, path.display(), lines.0, lines.1);
            sources.insert(
                token,
                PolicySource {
                    file: path.to_path_buf(),
                    start_line: lines.0,
                    end_line: lines.1,
                    label,
                },
            );
        };

        let shape = match document.get_mut("Statement") {
            Some(Value::Array(statements)) => {
                if layout.len() != statements.len() {
                    log::warn!(
                        "{}: located {} statement(s) in the source text but the document has {}; unmatched statements cover the whole file",
                        path.display(),
                        layout.len(),
                        statements.len()
                    );
                }
                for (i, statement) in statements.iter_mut().enumerate() {
                    let lines = layout
                        .span(i)
                        .filter(|_| matches!(layout, StatementLayout::Array(_)))
                        .map(|s| (s.start_line, s.end_line))
                        .unwrap_or(whole_file);
                    record(i + 1, statement, lines);
                }
                DocumentShape::StatementArray
            }
            Some(statement) if statement.is_object() => {
                let lines = match &layout {
                    StatementLayout::Single(s) => (s.start_line, s.end_line),
                    _ => whole_file,
                };
                record(1, statement, lines);
                DocumentShape::SingleStatement
            }
            _ => {
                log::warn!(
                    "{}: no statement list found; treating the document as one opaque statement",
                    path.display()
                );
                record(1, &mut document, whole_file);
                DocumentShape::Opaque
            }
        };

        Ok(TrackedPolicy {
            path: path.to_path_buf(),
            shape,
            document,
            sources,
        })
    }
}
