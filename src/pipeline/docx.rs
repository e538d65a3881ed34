//! Structured-document templating: open a DOCX container, substitute
//! placeholders in its XML parts, re-serialize.
//!
//! ## Why spawn_blocking?
//!
//! Container rewriting is pure CPU work over in-memory buffers (inflate,
//! scan, deflate). Running it on the blocking pool keeps Tokio worker
//! threads responsive under concurrent merges.
//!
//! ## Delimiters and split runs
//!
//! Placeholders use `{{name}}` / `{{#items}}…{{/items}}` syntax. A word
//! processor freely splits typed text across `<w:r>` runs, so the literal
//! `{{client.name}}` may arrive as `{{cli</w:t></w:r><w:r><w:t>ent.name}}`,
//! and even a delimiter itself may be split (`{</w:t>…<w:t>{`). The
//! scanner therefore skips XML markup both while matching a delimiter pair
//! and while reading the tag body, and replaces the whole raw span —
//! markup included — with the substituted value. The markup dropped this
//! way is a balanced run boundary, so the part stays well-formed.
//!
//! ## Diagnostics, not exceptions
//!
//! Every structural defect (unclosed delimiter, stray close, empty tag,
//! mismatched loop) and, in strict mode, every unresolved tag becomes one
//! [`TemplateDiagnostic`]. Defects from all parts of the container are
//! flattened into a single list, so callers see one error shape whether the
//! template has one bad tag or thirty.

use crate::error::{MergeError, TemplateDiagnostic};
use serde_json::Value;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// What to do when a tag resolves to no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingTagPolicy {
    /// Production renders: an unresolved tag is a diagnostic.
    Fail,
    /// Lint mode: substitute the empty string, report structure only.
    Empty,
}

/// Merge `data` into a DOCX template with the strict unresolved-tag policy.
///
/// Any diagnostic — structural or unresolved — fails the render with
/// [`MergeError::TemplateParse`]; there is no silent empty-substitution in
/// production output.
pub async fn render(template: Vec<u8>, data: Value) -> Result<Vec<u8>, MergeError> {
    let (bytes, diagnostics) = tokio::task::spawn_blocking(move || {
        merge_container(&template, &data, MissingTagPolicy::Fail)
    })
    .await
    .map_err(|e| MergeError::Internal(format!("Docx render task panicked: {e}")))??;

    if diagnostics.is_empty() {
        Ok(bytes)
    } else {
        Err(MergeError::TemplateParse { diagnostics })
    }
}

/// Lint a DOCX template for structural defects at upload time.
///
/// Identical pipeline to [`render`], but unresolved tags substitute empty
/// strings instead of failing — this isolates structural template errors
/// from data-availability errors, which the field-contract validator
/// already covers at merge time. Returns an empty list on success.
pub async fn lint(template: Vec<u8>) -> Result<Vec<TemplateDiagnostic>, MergeError> {
    let (_, diagnostics) = tokio::task::spawn_blocking(move || {
        merge_container(
            &template,
            &Value::Object(serde_json::Map::new()),
            MissingTagPolicy::Empty,
        )
    })
    .await
    .map_err(|e| MergeError::Internal(format!("Docx lint task panicked: {e}")))??;
    Ok(diagnostics)
}

/// Parts eligible for substitution: the document body plus headers and
/// footers. Everything else (content types, relationships, styles, media)
/// is copied through verbatim.
fn is_merge_part(name: &str) -> bool {
    name.starts_with("word/") && name.ends_with(".xml")
}

fn merge_container(
    template: &[u8],
    data: &Value,
    policy: MissingTagPolicy,
) -> Result<(Vec<u8>, Vec<TemplateDiagnostic>), MergeError> {
    let mut archive = match ZipArchive::new(Cursor::new(template)) {
        Ok(a) => a,
        Err(e) => {
            // Not a template-data problem and not ours either: the stored
            // file is not a readable archive container.
            return Ok((
                Vec::new(),
                vec![TemplateDiagnostic::new(
                    "invalid_container",
                    format!("template is not a valid archive: {e}"),
                    "",
                    "",
                    0,
                )],
            ));
        }
    };

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut diagnostics = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| MergeError::Internal(format!("archive entry {i}: {e}")))?;
        let name = entry.name().to_string();

        if entry.is_dir() {
            continue;
        }

        let mut raw = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut raw)
            .map_err(|e| MergeError::Internal(format!("reading '{name}': {e}")))?;

        writer
            .start_file(name.as_str(), options)
            .map_err(|e| MergeError::Internal(format!("writing '{name}': {e}")))?;

        if is_merge_part(&name) {
            let xml = String::from_utf8_lossy(&raw);
            let merged = merge_part(&name, &xml, data, policy, &mut diagnostics);
            writer
                .write_all(merged.as_bytes())
                .map_err(|e| MergeError::Internal(format!("writing '{name}': {e}")))?;
        } else {
            writer
                .write_all(&raw)
                .map_err(|e| MergeError::Internal(format!("writing '{name}': {e}")))?;
        }
    }

    let cursor = writer
        .finish()
        .map_err(|e| MergeError::Internal(format!("finalising archive: {e}")))?;
    Ok((cursor.into_inner(), diagnostics))
}

// ── Tokenizer ────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Token {
    /// Raw XML passed through verbatim (byte range into the part).
    Text(std::ops::Range<usize>),
    /// A complete `{{…}}` tag; `name` has markup and whitespace stripped.
    Tag {
        name: String,
        raw: String,
        offset: usize,
    },
}

/// Scan one XML part into text and tag tokens.
///
/// Delimiters are only recognised in text content, never inside `<…>`
/// markup. Both the delimiter pair and the tag body tolerate interleaved
/// markup (split-run handling); the token's raw span covers everything
/// between and including the braces.
fn tokenize(
    part: &str,
    xml: &str,
    diagnostics: &mut Vec<TemplateDiagnostic>,
) -> Vec<Token> {
    let b = xml.as_bytes();
    let len = b.len();
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut text_start = 0;

    while pos < len {
        if b[pos] == b'<' {
            pos = skip_markup(b, pos);
            continue;
        }

        if let Some(after) = split_delim(b, pos, b'}') {
            diagnostics.push(TemplateDiagnostic::new(
                "unopened_tag",
                "closing delimiter '}}' has no matching '{{'",
                "}}",
                part,
                pos,
            ));
            pos = after;
            continue;
        }

        let Some(open_end) = split_delim(b, pos, b'{') else {
            pos += 1;
            continue;
        };

        // Tag open. Collect name bytes until '}}', skipping run boundaries.
        let start = pos;
        let mut j = open_end;
        let mut name_bytes: Vec<u8> = Vec::new();
        let mut closed = false;
        let mut reopened = false;

        while j < len {
            if b[j] == b'<' {
                j = skip_markup(b, j);
                continue;
            }
            if let Some(after) = split_delim(b, j, b'}') {
                j = after;
                closed = true;
                break;
            }
            if split_delim(b, j, b'{').is_some() {
                diagnostics.push(TemplateDiagnostic::new(
                    "duplicate_open_tag",
                    "opening delimiter '{{' repeated before the tag was closed",
                    &xml[start..j],
                    part,
                    start,
                ));
                reopened = true;
                break;
            }
            name_bytes.push(b[j]);
            j += 1;
        }

        if reopened {
            // Resync at the inner open; the defective span stays as text.
            pos = j;
            continue;
        }

        if !closed {
            diagnostics.push(TemplateDiagnostic::new(
                "unclosed_tag",
                "opening delimiter '{{' is never closed",
                snippet(&xml[start..]),
                part,
                start,
            ));
            pos = len;
            continue;
        }

        let name = String::from_utf8_lossy(&name_bytes).trim().to_string();
        if name.is_empty() {
            diagnostics.push(TemplateDiagnostic::new(
                "empty_tag",
                "tag has no name",
                &xml[start..j],
                part,
                start,
            ));
            pos = j;
            continue;
        }

        tokens.push(Token::Text(text_start..start));
        tokens.push(Token::Tag {
            name,
            raw: xml[start..j].to_string(),
            offset: start,
        });
        text_start = j;
        pos = j;
    }

    tokens.push(Token::Text(text_start..len));
    tokens
}

/// Match a doubled delimiter byte at `pos`, tolerating run-boundary
/// markup between the two halves. Returns the position just past the
/// second byte.
fn split_delim(b: &[u8], pos: usize, delim: u8) -> Option<usize> {
    if b.get(pos) != Some(&delim) {
        return None;
    }
    let mut j = pos + 1;
    while j < b.len() && b[j] == b'<' {
        j = skip_markup(b, j);
    }
    if b.get(j) == Some(&delim) {
        Some(j + 1)
    } else {
        None
    }
}

/// Advance past one `<…>` construct (or to end of input if unterminated).
fn skip_markup(b: &[u8], from: usize) -> usize {
    match b[from..].iter().position(|&c| c == b'>') {
        Some(rel) => from + rel + 1,
        None => b.len(),
    }
}

fn snippet(s: &str) -> String {
    let mut end = s.len().min(40);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

// ── Template tree ────────────────────────────────────────────────────────

#[derive(Debug)]
enum Node {
    Text(String),
    Var {
        path: String,
        raw: String,
        offset: usize,
    },
    Block {
        path: String,
        raw: String,
        offset: usize,
        children: Vec<Node>,
    },
}

fn build_tree(
    part: &str,
    xml: &str,
    tokens: Vec<Token>,
    diagnostics: &mut Vec<TemplateDiagnostic>,
) -> Vec<Node> {
    struct Frame {
        path: String,
        raw: String,
        offset: usize,
        children: Vec<Node>,
    }

    let mut root: Vec<Node> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    fn current<'a>(root: &'a mut Vec<Node>, stack: &'a mut Vec<Frame>) -> &'a mut Vec<Node> {
        match stack.last_mut() {
            Some(frame) => &mut frame.children,
            None => root,
        }
    }

    for token in tokens {
        match token {
            Token::Text(range) => {
                if !range.is_empty() {
                    current(&mut root, &mut stack).push(Node::Text(xml[range].to_string()));
                }
            }
            Token::Tag { name, raw, offset } => {
                if let Some(path) = name.strip_prefix('#') {
                    stack.push(Frame {
                        path: path.trim().to_string(),
                        raw,
                        offset,
                        children: Vec::new(),
                    });
                } else if let Some(path) = name.strip_prefix('/') {
                    let path = path.trim();
                    let top_matches = stack.last().is_some_and(|f| f.path == path);
                    if top_matches {
                        let frame = stack.pop().expect("frame checked above");
                        current(&mut root, &mut stack).push(Node::Block {
                            path: frame.path,
                            raw: frame.raw,
                            offset: frame.offset,
                            children: frame.children,
                        });
                    } else {
                        diagnostics.push(TemplateDiagnostic::new(
                            "unopened_loop",
                            format!("loop close '{{{{/{path}}}}}' has no matching open"),
                            raw,
                            part,
                            offset,
                        ));
                    }
                } else {
                    current(&mut root, &mut stack).push(Node::Var {
                        path: name,
                        raw,
                        offset,
                    });
                }
            }
        }
    }

    // Any frame still open is a structural defect; keep its children so
    // lint output reflects everything found, not just the first problem.
    while let Some(frame) = stack.pop() {
        diagnostics.push(TemplateDiagnostic::new(
            "unclosed_loop",
            format!("loop '{{{{#{}}}}}' is never closed", frame.path),
            frame.raw,
            part,
            frame.offset,
        ));
        let mut children = frame.children;
        current(&mut root, &mut stack).append(&mut children);
    }

    root
}

// ── Rendering ────────────────────────────────────────────────────────────

fn merge_part(
    part: &str,
    xml: &str,
    data: &Value,
    policy: MissingTagPolicy,
    diagnostics: &mut Vec<TemplateDiagnostic>,
) -> String {
    let tokens = tokenize(part, xml, diagnostics);
    let tree = build_tree(part, xml, tokens, diagnostics);

    let mut out = String::with_capacity(xml.len());
    let mut scopes: Vec<&Value> = vec![data];
    render_nodes(part, &tree, &mut scopes, policy, diagnostics, &mut out);
    out
}

fn render_nodes(
    part: &str,
    nodes: &[Node],
    scopes: &mut Vec<&Value>,
    policy: MissingTagPolicy,
    diagnostics: &mut Vec<TemplateDiagnostic>,
    out: &mut String,
) {
    for node in nodes {
        match node {
            Node::Text(raw) => out.push_str(raw),
            Node::Var { path, raw, offset } => match resolve(scopes, path) {
                Some(value) if is_scalar(value) => out.push_str(&format_scalar(value)),
                Some(Value::Null) | None => {
                    if policy == MissingTagPolicy::Fail {
                        diagnostics.push(TemplateDiagnostic::new(
                            "unresolved_tag",
                            format!("tag '{path}' resolved to no value"),
                            raw.clone(),
                            part,
                            *offset,
                        ));
                    }
                }
                Some(_) => {
                    if policy == MissingTagPolicy::Fail {
                        diagnostics.push(TemplateDiagnostic::new(
                            "non_scalar_tag",
                            format!("tag '{path}' resolved to a mapping or array"),
                            raw.clone(),
                            part,
                            *offset,
                        ));
                    }
                }
            },
            Node::Block {
                path,
                raw,
                offset,
                children,
            } => match resolve(scopes, path) {
                Some(Value::Array(items)) => {
                    for item in items {
                        scopes.push(item);
                        render_nodes(part, children, scopes, policy, diagnostics, out);
                        scopes.pop();
                    }
                }
                Some(Value::Bool(false)) | Some(Value::Null) => {}
                Some(value @ Value::Object(_)) => {
                    scopes.push(value);
                    render_nodes(part, children, scopes, policy, diagnostics, out);
                    scopes.pop();
                }
                Some(_) => {
                    // Truthy scalar: conditional block, rendered once.
                    render_nodes(part, children, scopes, policy, diagnostics, out);
                }
                None => {
                    if policy == MissingTagPolicy::Fail {
                        diagnostics.push(TemplateDiagnostic::new(
                            "unresolved_tag",
                            format!("loop '{path}' resolved to no value"),
                            raw.clone(),
                            part,
                            *offset,
                        ));
                    }
                }
            },
        }
    }
}

/// Resolve a dot-path against the scope stack, innermost scope first.
///
/// `.` addresses the innermost scope value itself (scalar loop items).
fn resolve<'a>(scopes: &[&'a Value], path: &str) -> Option<&'a Value> {
    if path == "." {
        return scopes.last().copied();
    }
    for scope in scopes.iter().rev() {
        if let Some(found) = resolve_in(scope, path) {
            return Some(found);
        }
    }
    None
}

fn resolve_in<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = scope;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    // Null is returned as-is: for a conditional block an explicit null
    // suppresses the block, while for a variable tag it renders no text
    // and so counts as unresolved under the strict policy.
    Some(current)
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::String(_) | Value::Number(_) | Value::Bool(_)
    )
}

/// Escape a scalar for XML text content and convert embedded newlines to
/// document-native line breaks. Substitution points sit inside `<w:t>`
/// runs, so a break is expressed by closing the text run, emitting
/// `<w:br/>`, and reopening it.
fn format_scalar(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let normalised = text.replace("\r\n", "\n").replace('\r', "\n");
    let escaped = quick_xml::escape::escape(normalised.as_str()).into_owned();
    escaped.replace('\n', "</w:t><w:br/><w:t>")
}
