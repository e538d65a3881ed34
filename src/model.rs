//! Core data shapes: formats, templates, merge requests, artifacts, jobs.
//!
//! A template's format is never stored — it is derived from the extension
//! of the stored file name, so the upload collaborator and the merge
//! pipeline cannot disagree about what a template is.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Format of a stored template, detected from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateFormat {
    /// Structured document: a ZIP archive of XML parts (`.docx`).
    Docx,
    /// Markup document (`.html` / `.htm`).
    Html,
}

impl TemplateFormat {
    /// Detect the template format from a stored file name.
    ///
    /// Returns `None` for any extension outside the supported set, which
    /// the orchestrator turns into an unsupported-type failure.
    pub fn detect(stored_name: &str) -> Option<Self> {
        let ext = Path::new(stored_name)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        match ext.as_str() {
            "docx" => Some(TemplateFormat::Docx),
            "html" | "htm" => Some(TemplateFormat::Html),
            _ => None,
        }
    }

    /// The output format a rendered artifact starts in, before conversion.
    pub fn native_output(self) -> OutputFormat {
        match self {
            TemplateFormat::Docx => OutputFormat::Docx,
            TemplateFormat::Html => OutputFormat::Html,
        }
    }

    /// Whether `requested` is a legal output format for this template type.
    ///
    /// DOCX templates cannot become HTML (there is no faithful reverse
    /// conversion); HTML templates can become anything.
    pub fn accepts(self, requested: OutputFormat) -> bool {
        match self {
            TemplateFormat::Docx => matches!(requested, OutputFormat::Docx | OutputFormat::Pdf),
            TemplateFormat::Html => true,
        }
    }
}

impl fmt::Display for TemplateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateFormat::Docx => write!(f, "docx"),
            TemplateFormat::Html => write!(f, "html"),
        }
    }
}

/// Requested output format of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Docx,
    Html,
    Pdf,
}

impl OutputFormat {
    /// File extension for the output artifact (no leading dot).
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Docx => "docx",
            OutputFormat::Html => "html",
            OutputFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// A stored template, as returned by the [`crate::store::TemplateStore`]
/// collaborator. Read-only to the pipeline.
///
/// Invariant (enforced at upload time): `fields` entries are unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    /// Stored file name; its extension determines the template format.
    pub stored_name: String,
    /// Declared placeholder names as dot-paths, e.g. `client.name`.
    pub fields: Vec<String>,
}

/// One merge attempt. Transient — never persisted by the pipeline.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub template_id: String,
    /// Arbitrarily nested mapping of string keys to scalars/mappings/arrays.
    pub data: serde_json::Value,
    pub output: OutputFormat,
    /// Owning identity, when the caller authenticated with a bearer token.
    pub owner: Option<String>,
    /// Set by the authentication collaborator for external (HMAC-signed)
    /// callers; triggers sanitization of markup output.
    pub untrusted: bool,
}

/// A merged document in flight through the pipeline.
///
/// The orchestrator owns the buffer for the artifact's full lifetime
/// (render → convert → sanitize → write); stages consume and return it.
#[derive(Debug)]
pub struct MergedArtifact {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
}

/// Terminal status of a merge job.
///
/// The pipeline only ever records `Succeeded`; `Failed` exists in the
/// shape for the async collaborator that owns queued/processing states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Succeeded,
    Failed,
}

/// Shape of a persisted merge job, written through
/// [`crate::store::JobRepository`] exactly once per successful attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeJob {
    pub template_id: String,
    /// Copy of the input payload, kept for replay and audit.
    pub data: serde_json::Value,
    pub output: OutputFormat,
    pub status: JobStatus,
    pub output_location: String,
    pub error: Option<String>,
    /// Absent for non-identity (signature-authenticated) callers.
    pub owner: Option<String>,
}

/// What the caller gets back from a successful merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub job_id: String,
    pub output_location: String,
}
