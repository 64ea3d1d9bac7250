//! Strict rendering of canonical `{{.NAME}}` templates.
//!
//! Rendering never substitutes an empty string for an unbound variable: an
//! unbound reference is a [`TesterError::MissingVariable`]. Literal text is
//! shielded from the template engine, so policy text that happens to contain
//! `{%` or `{#` renders verbatim.

use std::error::Error as _;

use once_cell::sync::Lazy;
use regex::Regex;
use tera::{Context, Tera};

use super::Bindings;
use crate::error::{Result, TesterError};

/// Context key holding every binding; references index into it so a name
/// like `true` is never read as a Tera literal.
const BINDINGS_KEY: &str = "bindings";

static REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

/// Executes canonical-syntax text against a variable binding table.
#[derive(Debug, Clone, Copy)]
pub struct TemplateRenderer<'a> {
    bindings: &'a Bindings,
}

impl<'a> TemplateRenderer<'a> {
    pub fn new(bindings: &'a Bindings) -> Self {
        Self { bindings }
    }

    /// Names referenced by `text`, in order of first appearance.
    pub fn references(text: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in REFERENCE.captures_iter(text) {
            let name = caps[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Render `text`; `origin` names the source in error messages.
    pub fn render(&self, origin: &str, text: &str) -> Result<String> {
        if !REFERENCE.is_match(text) {
            return Ok(text.to_string());
        }

        if let Some(name) = Self::references(text)
            .into_iter()
            .find(|name| !self.bindings.contains_key(name))
        {
            return Err(TesterError::MissingVariable {
                name,
                origin: origin.to_string(),
            });
        }

        let mut context = Context::new();
        context.insert(BINDINGS_KEY, self.bindings);

        Tera::one_off(&to_tera_source(text), &context, false).map_err(|e| {
            TesterError::MalformedOutput {
                origin: origin.to_string(),
                message: error_chain(&e),
            }
        })
    }

    /// Render `text`, require the output to be JSON, and return it minified.
    pub fn render_json(&self, origin: &str, text: &str) -> Result<String> {
        let rendered = self.render(origin, text)?;
        minify_json(origin, &rendered)
    }
}

/// Parse `text` as JSON and re-serialize it without insignificant whitespace.
///
/// Key order is preserved, so minifying already-minified output is a no-op.
pub fn minify_json(origin: &str, text: &str) -> Result<String> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| TesterError::MalformedOutput {
            origin: origin.to_string(),
            message: e.to_string(),
        })?;
    serde_json::to_string(&value).map_err(|e| TesterError::MalformedOutput {
        origin: origin.to_string(),
        message: e.to_string(),
    })
}

/// Translate canonical references into Tera expressions, wrapping every
/// literal segment in a raw block.
fn to_tera_source(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 32);
    let mut last = 0;
    for caps in REFERENCE.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        push_literal(&mut out, &text[last..whole.start()]);
        out.push_str(&format!("{{{{ {}[\"{}\"] }}}}", BINDINGS_KEY, &caps[1]));
        last = whole.end();
    }
    push_literal(&mut out, &text[last..]);
    out
}

fn push_literal(out: &mut String, literal: &str) {
    if literal.is_empty() {
        return;
    }
    out.push_str("{% raw %}");
    out.push_str(literal);
    out.push_str("{% endraw %}");
}

fn error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::VariableNotationNormalizer;

    fn bindings() -> Bindings {
        let mut b = Bindings::new();
        b.insert("BUCKET".to_string(), "my-bucket".to_string());
        b.insert("ACCOUNT".to_string(), "123456789012".to_string());
        b
    }

    #[test]
    fn test_render_substitutes_bound_variables() {
        let b = bindings();
        let out = TemplateRenderer::new(&b)
            .render("inline", "arn:aws:s3:::{{.BUCKET}}/{{ .ACCOUNT }}")
            .unwrap();
        assert_eq!(out, "arn:aws:s3:::my-bucket/123456789012");
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let b = bindings();
        let err = TemplateRenderer::new(&b)
            .render("policy.json", "arn:aws:s3:::{{.NOPE}}")
            .unwrap_err();
        match err {
            TesterError::MissingVariable { name, origin } => {
                assert_eq!(name, "NOPE");
                assert_eq!(origin, "policy.json");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_names_that_are_tera_keywords_render_their_binding() {
        let mut b = Bindings::new();
        for name in ["true", "false", "True", "False", "not", "and", "loop"] {
            b.insert(name.to_string(), format!("<{}>", name.to_lowercase()));
        }
        let out = TemplateRenderer::new(&b)
            .render("inline", "a-{{.true}}-{{.False}}-{{.not}}-{{.and}}-{{.loop}}")
            .unwrap();
        assert_eq!(out, "a-<true>-<false>-<not>-<and>-<loop>");
    }

    #[test]
    fn test_literal_template_syntax_passes_through() {
        let b = bindings();
        let out = TemplateRenderer::new(&b)
            .render("inline", "{% if %} {# note #} {{.BUCKET}} {")
            .unwrap();
        assert_eq!(out, "{% if %} {# note #} my-bucket {");
    }

    #[test]
    fn test_render_json_minifies_and_preserves_key_order() {
        let b = bindings();
        let text = "{\n  \"Version\": \"2012-10-17\",\n  \"Statement\": [\n    {\"Effect\": \"Allow\", \"Resource\": \"arn:aws:s3:::{{.BUCKET}}\"}\n  ]\n}";
        let out = TemplateRenderer::new(&b).render_json("p.json", text).unwrap();
        assert_eq!(
            out,
            r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Resource":"arn:aws:s3:::my-bucket"}]}"#
        );
        assert_eq!(minify_json("p.json", &out).unwrap(), out);
    }

    #[test]
    fn test_render_json_rejects_malformed_output() {
        let b = bindings();
        let err = TemplateRenderer::new(&b)
            .render_json("p.json", "{\"Resource\": {{.BUCKET}}}")
            .unwrap_err();
        assert!(matches!(err, TesterError::MalformedOutput { .. }));
    }

    #[test]
    fn test_every_notation_renders_identically() {
        let b = bindings();
        let normalizer = VariableNotationNormalizer::new(b.keys().cloned());
        let renderer = TemplateRenderer::new(&b);
        let outputs: Vec<String> = ["x-{{.BUCKET}}-y", "x-${BUCKET}-y", "x-$BUCKET-y", "x-<BUCKET>-y"]
            .iter()
            .map(|t| renderer.render("inline", &normalizer.normalize(t)).unwrap())
            .collect();
        assert!(outputs.iter().all(|o| o == "x-my-bucket-y"));
    }
}
