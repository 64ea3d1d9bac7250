//! # Variable substitution
//!
//! Two stages turn authored text into its effective form:
//!
//! 1. [`VariableNotationNormalizer`] rewrites the four accepted spellings of a
//!    known variable into the canonical `{{.NAME}}` form.
//! 2. [`TemplateRenderer`] executes the canonical text against the binding
//!    table, failing on any unbound reference.
//!
//! [`Substitution`] pairs the two for a single binding table.

pub mod notation;
pub mod renderer;

use std::collections::BTreeMap;

pub use notation::VariableNotationNormalizer;
pub use renderer::{minify_json, TemplateRenderer};

use crate::error::Result;

/// Variable name → rendered value.
pub type Bindings = BTreeMap<String, String>;

/// Normalize-then-render over one binding table.
#[derive(Debug, Clone)]
pub struct Substitution {
    bindings: Bindings,
    normalizer: VariableNotationNormalizer,
}

impl Substitution {
    pub fn new(bindings: Bindings) -> Self {
        let normalizer = VariableNotationNormalizer::new(bindings.keys().cloned());
        Self {
            bindings,
            normalizer,
        }
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Substitute variables in plain text.
    pub fn text(&self, origin: &str, text: &str) -> Result<String> {
        let canonical = self.normalizer.normalize(text);
        TemplateRenderer::new(&self.bindings).render(origin, &canonical)
    }

    /// Substitute variables in a JSON document and return it minified.
    pub fn json(&self, origin: &str, text: &str) -> Result<String> {
        let canonical = self.normalizer.normalize(text);
        TemplateRenderer::new(&self.bindings).render_json(origin, &canonical)
    }

    /// Substitute every string in `values`.
    pub fn all(&self, origin: &str, values: &[String]) -> Result<Vec<String>> {
        values.iter().map(|v| self.text(origin, v)).collect()
    }
}

impl Default for Substitution {
    fn default() -> Self {
        Self::new(Bindings::new())
    }
}
