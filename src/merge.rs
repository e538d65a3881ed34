//! Merge orchestration: one entry point tying template lookup, validation,
//! rendering, sanitization, conversion and persistence together.
//!
//! The orchestrator enforces the ordering contract the stages rely on:
//! cheap input-contract checks run before any bytes are fetched, the
//! field contract is validated before rendering, sanitization happens
//! before format conversion so converted artifacts never embed script
//! vectors, and the job record is written only after the output bytes are
//! durably stored. A failure at any step leaves no artifact and no job
//! row behind.

use crate::config::MergeConfig;
use crate::error::MergeError;
use crate::model::{
    JobStatus, MergeJob, MergeOutcome, MergeRequest, MergedArtifact, OutputFormat, TemplateFormat,
};
use crate::pipeline::{convert, docx, fields, markup, sanitize};
use crate::store::{BlobStore, JobRepository, TemplateStore};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// The merge pipeline with its injected collaborators.
///
/// Cheap to clone; hosts typically build one at startup and share it
/// across all request handlers.
#[derive(Clone)]
pub struct MergePipeline {
    templates: Arc<dyn TemplateStore>,
    blobs: Arc<dyn BlobStore>,
    jobs: Arc<dyn JobRepository>,
    config: MergeConfig,
}

impl MergePipeline {
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        blobs: Arc<dyn BlobStore>,
        jobs: Arc<dyn JobRepository>,
        config: MergeConfig,
    ) -> Self {
        Self {
            templates,
            blobs,
            jobs,
            config,
        }
    }

    /// Run one merge end to end.
    ///
    /// On success the merged artifact has been written to blob storage and
    /// exactly one job record persisted; the returned outcome carries both
    /// identifiers. On failure nothing has been written.
    pub async fn merge(&self, request: MergeRequest) -> Result<MergeOutcome, MergeError> {
        info!(
            "Merging template '{}' to {} output",
            request.template_id, request.output
        );

        // ── Step 1: Template lookup ──────────────────────────────────────
        let template = self
            .templates
            .find(&request.template_id)
            .await
            .map_err(|e| MergeError::Internal(format!("template lookup: {e}")))?
            .ok_or_else(|| MergeError::TemplateNotFound {
                id: request.template_id.clone(),
            })?;

        // ── Step 2: Format detection ─────────────────────────────────────
        let format = TemplateFormat::detect(&template.stored_name).ok_or_else(|| {
            MergeError::UnsupportedTemplateType {
                name: template.stored_name.clone(),
            }
        })?;

        // ── Step 3: Conversion planning (fails fast on illegal pairs) ────
        let path = convert::plan(format, request.output)?;
        debug!("Template format {format}, conversion path {path:?}");

        // ── Step 4: Field-contract validation ────────────────────────────
        fields::check_fields(&template.fields, &request.data)?;

        // ── Step 5: Fetch template bytes ─────────────────────────────────
        let template_bytes = self
            .blobs
            .fetch(&template.stored_name)
            .await
            .map_err(|e| MergeError::TemplateFetchFailed {
                name: template.stored_name.clone(),
                detail: e.to_string(),
            })?;

        // ── Step 6: Render ───────────────────────────────────────────────
        let rendered = match format {
            TemplateFormat::Docx => docx::render(template_bytes, request.data.clone()).await?,
            TemplateFormat::Html => markup::render(&template_bytes, &request.data)?,
        };

        // ── Step 7: Sanitize untrusted markup ────────────────────────────
        let rendered = if format == TemplateFormat::Html && request.untrusted {
            let before = rendered.len();
            let cleaned = sanitize::sanitize(&rendered);
            if cleaned.len() != before {
                warn!(
                    "Sanitizer altered untrusted markup for template '{}' ({} → {} bytes)",
                    template.id,
                    before,
                    cleaned.len()
                );
            }
            cleaned
        } else {
            rendered
        };

        let artifact = MergedArtifact {
            bytes: rendered,
            format: format.native_output(),
        };

        // ── Step 8: Convert ──────────────────────────────────────────────
        let artifact = convert::execute(path, artifact, &self.config).await?;
        debug_assert_eq!(artifact.format, request.output);

        // ── Step 9: Write output, then record the job ────────────────────
        let name = output_name(
            &self.config.output_prefix,
            &template.stored_name,
            artifact.format,
        );
        let location = self
            .blobs
            .store(&name, &artifact.bytes)
            .await
            .map_err(|e| MergeError::OutputWriteFailed {
                location: name.clone(),
                detail: e.to_string(),
            })?;

        let job = MergeJob {
            template_id: template.id.clone(),
            data: request.data,
            output: request.output,
            status: JobStatus::Succeeded,
            output_location: location.clone(),
            error: None,
            owner: request.owner,
        };
        let job_id = self
            .jobs
            .create(&job)
            .await
            .map_err(|e| MergeError::JobPersistFailed {
                detail: e.to_string(),
            })?;

        info!(
            "Merge succeeded: job '{}', {} bytes at '{}'",
            job_id,
            artifact.bytes.len(),
            location
        );
        Ok(MergeOutcome {
            job_id,
            output_location: location,
        })
    }
}

/// Validate an uploaded template without merging it.
///
/// Runs the structured-document scanner in lint mode (unresolvable tags
/// are expected before data exists, so only structural defects are
/// reported). Markup templates are parsed lazily at merge time and have
/// no structural lint; they return an empty list.
pub async fn lint_template(
    stored_name: &str,
    bytes: Vec<u8>,
) -> Result<Vec<crate::error::TemplateDiagnostic>, MergeError> {
    match TemplateFormat::detect(stored_name) {
        Some(TemplateFormat::Docx) => docx::lint(bytes).await,
        Some(TemplateFormat::Html) => Ok(Vec::new()),
        None => Err(MergeError::UnsupportedTemplateType {
            name: stored_name.to_string(),
        }),
    }
}

static UNSAFE_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.\- ]+").expect("static pattern compiles"));

/// Derive a collision-proof storage name for a merged artifact.
///
/// The template's base name (directory components and final extension
/// stripped, unsafe characters replaced) is combined with the epoch
/// timestamp in milliseconds and a short random token, then the output
/// format's extension:
///
/// `merges/invoice_1735689600000_3fa4b2c1.pdf`
fn output_name(prefix: &str, stored_name: &str, format: OutputFormat) -> String {
    let base = Path::new(stored_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output");
    let stem = Path::new(base)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let stem = UNSAFE_NAME_CHARS.replace_all(stem, "_");

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let token = &uuid::Uuid::new_v4().simple().to_string()[..8];

    format!("{prefix}/{stem}_{millis}_{token}.{}", format.extension())
}
