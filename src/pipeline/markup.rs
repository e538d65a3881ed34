//! Markup templating: logic-less `{{…}}` substitution over HTML templates.
//!
//! Handlebars does the heavy lifting: dot-path lookup (`{{client.name}}`)
//! is resolved by the engine itself, and substituted values are
//! HTML-escaped by default, which blocks injection through the data
//! payload. Missing values render as empty strings — unlike the
//! structured-document renderer there is no strict policy here, because
//! the field-contract validator has already run and markup output for
//! untrusted callers passes through the sanitizer afterwards.
//!
//! Malformed template syntax is the one failure mode: handlebars cannot
//! render a template it cannot parse, so a parse failure surfaces as a
//! [`MergeError::TemplateParse`] with a single diagnostic.

use crate::error::{MergeError, TemplateDiagnostic};
use handlebars::Handlebars;
use serde_json::Value;

/// Merge `data` into an HTML template.
pub fn render(template: &[u8], data: &Value) -> Result<Vec<u8>, MergeError> {
    let source = String::from_utf8_lossy(template);
    let handlebars = Handlebars::new();

    let rendered = handlebars
        .render_template(&source, data)
        .map_err(|e| MergeError::TemplateParse {
            diagnostics: vec![TemplateDiagnostic::new(
                "markup_syntax",
                e.to_string(),
                "",
                "template",
                0,
            )],
        })?;

    Ok(rendered.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_variables() {
        let out = render(b"<h1>{{title}}</h1>", &json!({ "title": "Report" })).unwrap();
        assert_eq!(out, b"<h1>Report</h1>");
    }

    #[test]
    fn resolves_dot_paths() {
        let out = render(
            b"<p>{{client.name}}</p>",
            &json!({ "client": { "name": "ACME" } }),
        )
        .unwrap();
        assert_eq!(out, b"<p>ACME</p>");
    }

    #[test]
    fn escapes_substituted_markup() {
        let out = render(b"<p>{{x}}</p>", &json!({ "x": "<script>bad()</script>" })).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("<script>"));
        assert!(text.contains("&lt;script&gt;"));
    }

    #[test]
    fn missing_values_render_empty() {
        let out = render(b"<p>{{absent}}</p>", &json!({})).unwrap();
        assert_eq!(out, b"<p></p>");
    }

    #[test]
    fn parse_failure_yields_template_parse_error() {
        let err = render(b"<p>{{#if x}}</p>", &json!({})).unwrap_err();
        match err {
            MergeError::TemplateParse { diagnostics } => {
                assert_eq!(diagnostics.len(), 1);
                assert_eq!(diagnostics[0].id, "markup_syntax");
            }
            other => panic!("expected TemplateParse, got {other:?}"),
        }
    }
}
