//! Error types for the docmerge library.
//!
//! The taxonomy follows who has to act on the failure:
//!
//! * **Input-contract errors** — the caller sent a bad request (unknown
//!   template, illegal output format, missing required fields). Never
//!   retried; the caller must fix the request.
//!
//! * **Template-content errors** — the template itself is defective
//!   (malformed delimiters, unresolved tags at merge time). Carried as a
//!   machine-readable [`TemplateDiagnostic`] list so upload tooling can
//!   point at the offending tag.
//!
//! * **External-tool errors** — soffice exited nonzero, the intermediate
//!   artifact never appeared, the browser print failed. Diagnostic text
//!   includes captured tool output where available. The core does not
//!   retry these; retry policy belongs to the calling layer.
//!
//! [`MergeError::class`] collapses the variants into a closed
//! [`ErrorClass`] so HTTP collaborators can map failures to a
//! 422-equivalent vs. a generic response without string matching.

use crate::model::{OutputFormat, TemplateFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the docmerge library.
#[derive(Debug, Error)]
pub enum MergeError {
    // ── Input-contract errors ─────────────────────────────────────────────
    /// No template exists under the given identity.
    #[error("Template not found: '{id}'")]
    TemplateNotFound { id: String },

    /// The stored template name carries an extension the pipeline does not
    /// recognise as a structured-document or markup format.
    #[error("Unsupported template type: '{name}' (expected .docx, .html or .htm)")]
    UnsupportedTemplateType { name: String },

    /// The requested output format is not reachable from the detected
    /// template format (see the conversion table in `pipeline::convert`).
    #[error("Cannot produce {requested} output from a {template} template")]
    IllegalOutputFormat {
        template: TemplateFormat,
        requested: OutputFormat,
    },

    /// The payload is missing placeholders the template declares.
    #[error("Missing required fields: {}", fields.join(", "))]
    MissingFields { fields: Vec<String> },

    // ── Template-content errors ───────────────────────────────────────────
    /// The template markup is malformed or a tag could not be resolved.
    ///
    /// Each entry in `diagnostics` identifies one defective tag. The
    /// underlying engine may surface one error or a batch; both shapes are
    /// normalised into this single flat list.
    #[error("Template rendering failed with {} diagnostic(s): {}", diagnostics.len(), summarise(diagnostics))]
    TemplateParse {
        diagnostics: Vec<TemplateDiagnostic>,
    },

    // ── External-tool errors ──────────────────────────────────────────────
    /// The conversion tool could not be started (typically: not installed).
    #[error("Converter '{tool}' could not be started: {detail}\nInstall LibreOffice or set SOFFICE_PATH.")]
    ConverterUnavailable { tool: String, detail: String },

    /// The conversion tool ran but exited nonzero.
    #[error("Conversion stage '{stage}' failed (exit code {code:?}): {output}")]
    ConversionFailed {
        stage: String,
        code: Option<i32>,
        output: String,
    },

    /// A stage reported success but its expected output file never appeared.
    #[error("Conversion stage '{stage}' produced no output at '{path}'")]
    StageOutputMissing { stage: String, path: PathBuf },

    /// A conversion stage exceeded the configured timeout.
    #[error("Conversion stage '{stage}' timed out after {secs}s")]
    ConversionTimeout { stage: String, secs: u64 },

    /// The headless browser failed to render or print the markup.
    #[error("Browser PDF render failed: {detail}")]
    BrowserRender { detail: String },

    // ── Storage / persistence errors ──────────────────────────────────────
    /// The template bytes could not be fetched from blob storage.
    #[error("Failed to fetch template bytes for '{name}': {detail}")]
    TemplateFetchFailed { name: String, detail: String },

    /// The merged output could not be written.
    #[error("Failed to write output '{location}': {detail}")]
    OutputWriteFailed { location: String, detail: String },

    /// The job record could not be persisted after a successful write.
    #[error("Failed to persist job record: {detail}")]
    JobPersistFailed { detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Closed classification of [`MergeError`] for response mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// The caller's request is defective — 422-equivalent, structured detail.
    InvalidRequest,
    /// The template itself is defective — 422-equivalent, diagnostics array.
    TemplateContent,
    /// Everything else — generic 4xx/5xx-equivalent, message text only.
    Internal,
}

impl MergeError {
    /// Classify this error for a client-facing response.
    pub fn class(&self) -> ErrorClass {
        match self {
            MergeError::TemplateNotFound { .. }
            | MergeError::UnsupportedTemplateType { .. }
            | MergeError::IllegalOutputFormat { .. }
            | MergeError::MissingFields { .. } => ErrorClass::InvalidRequest,
            MergeError::TemplateParse { .. } => ErrorClass::TemplateContent,
            _ => ErrorClass::Internal,
        }
    }
}

/// One defective tag in a template, in machine-readable form.
///
/// `part` names the archive entry (e.g. `word/document.xml`) for DOCX
/// templates, or `template` for single-file markup; `offset` is the byte
/// offset of the tag within that part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDiagnostic {
    /// Stable machine identifier, e.g. `unclosed_tag`, `unresolved_tag`.
    pub id: String,
    /// Human-readable explanation.
    pub explanation: String,
    /// The offending tag text as it appears in the template.
    pub tag: String,
    /// Source part the tag was found in.
    pub part: String,
    /// Byte offset of the tag within `part`.
    pub offset: usize,
}

impl TemplateDiagnostic {
    pub fn new(
        id: impl Into<String>,
        explanation: impl Into<String>,
        tag: impl Into<String>,
        part: impl Into<String>,
        offset: usize,
    ) -> Self {
        Self {
            id: id.into(),
            explanation: explanation.into(),
            tag: tag.into(),
            part: part.into(),
            offset,
        }
    }
}

fn summarise(diagnostics: &[TemplateDiagnostic]) -> String {
    diagnostics
        .iter()
        .take(3)
        .map(|d| format!("[{}] {}", d.id, d.explanation))
        .collect::<Vec<_>>()
        .join("; ")
}
