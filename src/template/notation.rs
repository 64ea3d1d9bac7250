//! Inline-variable notation normalization.
//!
//! Scenario authors reference variables in whichever spelling their source
//! material already uses. Four spellings are recognized for a variable `NAME`:
//!
//! | Form              | Example         |
//! |-------------------|-----------------|
//! | canonical         | `{{.NAME}}`     |
//! | brace-wrapped     | `${NAME}`       |
//! | bare dollar       | `$NAME`         |
//! | angle bracket     | `<NAME>`        |
//!
//! Only references to *known* names are rewritten; everything else, including
//! IAM policy variables such as `${aws:username}`, passes through untouched.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

// A bare-dollar identifier is matched greedily, so `$BUCKET_NAME` is always
// seen whole and never split at a shorter known name like `BUCKET`.
static ANY_NOTATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}",
        r"|\$\{([A-Za-z_][A-Za-z0-9_]*)\}",
        r"|<([A-Za-z_][A-Za-z0-9_]*)>",
        r"|\$([A-Za-z_][A-Za-z0-9_]*)",
    ))
    .unwrap()
});

/// Rewrites every supported notation for a known variable into `{{.NAME}}`.
#[derive(Debug, Clone, Default)]
pub struct VariableNotationNormalizer {
    known: BTreeSet<String>,
}

impl VariableNotationNormalizer {
    /// Create a normalizer for the given variable names (case-sensitive).
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Normalize `text`, leaving unknown references and other text as-is.
    pub fn normalize(&self, text: &str) -> String {
        if self.known.is_empty() {
            return text.to_string();
        }
        ANY_NOTATION
            .replace_all(text, |caps: &Captures<'_>| {
                let name = (1..=4)
                    .find_map(|i| caps.get(i))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                if self.known.contains(name) {
                    canonical(name)
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned()
    }
}

/// The canonical spelling of a reference to `name`.
pub fn canonical(name: &str) -> String {
    format!("{{{{.{}}}}}", name)
}
