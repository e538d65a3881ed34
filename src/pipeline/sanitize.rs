//! Markup sanitization: strip code-execution vectors from untrusted HTML.
//!
//! ## Sanitization vs. linting
//!
//! This module removes what can *execute*: script-bearing and
//! cross-origin-embedding elements, `on*` event-handler attributes, and
//! script-scheme URLs in `href`/`src`. It deliberately leaves remote
//! resource references (a non-script `src` pointing off-host) alone —
//! remote fetches are an availability/determinism risk, not a
//! code-execution risk once the script vectors are gone, and flagging
//! them is a linting concern for upload tooling.
//!
//! ## Why a streaming rewriter?
//!
//! `lol_html` rewrites the byte stream in place instead of round-tripping
//! through a DOM, so markup the rules don't touch comes back byte-for-byte
//! identical. That is what makes the operation idempotent:
//! `sanitize(sanitize(x)) == sanitize(x)`.
//!
//! Never fails: a rewriter error (practically unreachable with default
//! limits) degrades to fully-escaped text, which executes nothing.

use lol_html::html_content::Element;
use lol_html::{element, HtmlRewriter, Settings};
use tracing::warn;

/// Elements removed outright: script execution and cross-origin embedding.
const DISALLOWED_TAGS: &[&str] = &[
    "script", "iframe", "object", "embed", "applet", "frame", "frameset",
];

/// URL attributes checked for script schemes.
const URL_ATTRIBUTES: &[&str] = &["href", "src"];

/// Rewrite an HTML document to remove script vectors.
///
/// Pure and deterministic; the output always begins with a standard
/// doctype declaration.
pub fn sanitize(input: &[u8]) -> Vec<u8> {
    match rewrite(input) {
        Ok(output) => ensure_doctype(output),
        Err(detail) => {
            warn!("HTML rewriter failed ({detail}); degrading to escaped text");
            ensure_doctype(handlebars::html_escape(&String::from_utf8_lossy(input)).into_bytes())
        }
    }
}

fn rewrite(input: &[u8]) -> Result<Vec<u8>, String> {
    let mut output = Vec::with_capacity(input.len());

    let mut handlers = Vec::new();
    for tag in DISALLOWED_TAGS {
        handlers.push(element!(*tag, |el| {
            el.remove();
            Ok(())
        }));
    }
    handlers.push(element!("*", |el| {
        strip_event_handlers(el);
        strip_script_urls(el);
        Ok(())
    }));

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: handlers,
            ..Settings::default()
        },
        |chunk: &[u8]| output.extend_from_slice(chunk),
    );

    rewriter.write(input).map_err(|e| e.to_string())?;
    rewriter.end().map_err(|e| e.to_string())?;
    Ok(output)
}

/// Drop every attribute whose name starts with `on` (case-insensitive):
/// `onclick`, `ONLOAD`, `onmouseover`, ….
fn strip_event_handlers(el: &mut Element) {
    let doomed: Vec<String> = el
        .attributes()
        .iter()
        .map(|a| a.name())
        .filter(|name| name.to_ascii_lowercase().starts_with("on"))
        .collect();
    for name in doomed {
        el.remove_attribute(&name);
    }
}

/// Drop `href`/`src` attributes whose value is a script-scheme URL.
fn strip_script_urls(el: &mut Element) {
    for attr in URL_ATTRIBUTES {
        if let Some(value) = el.get_attribute(attr) {
            if is_script_scheme(&value) {
                el.remove_attribute(attr);
            }
        }
    }
}

/// Case-insensitive scheme check, tolerating leading whitespace
/// (`" JavaScript:alert(1)"` is still a script URL).
fn is_script_scheme(value: &str) -> bool {
    let normalised = value.trim_start().to_ascii_lowercase();
    normalised.starts_with("javascript:") || normalised.starts_with("vbscript:")
}

const DOCTYPE: &str = "<!DOCTYPE html>";

fn ensure_doctype(output: Vec<u8>) -> Vec<u8> {
    // Probe starts at the first non-whitespace byte; arbitrarily long
    // leading whitespace must not hide an existing declaration.
    let body = output
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(output.len());
    let head = String::from_utf8_lossy(&output[body..output.len().min(body + 16)])
        .to_ascii_lowercase();
    if head.starts_with("<!doctype") {
        return output;
    }
    let mut with_doctype = Vec::with_capacity(output.len() + DOCTYPE.len() + 1);
    with_doctype.extend_from_slice(DOCTYPE.as_bytes());
    with_doctype.push(b'\n');
    with_doctype.extend_from_slice(&output);
    with_doctype
}
