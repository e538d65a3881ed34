//! # docmerge
//!
//! Merge JSON data into stored document templates and convert the result
//! to the requested format.
//!
//! ## Why this crate?
//!
//! Template merging looks simple until the formats multiply: DOCX
//! templates split placeholders across XML runs mid-tag, HTML from
//! external callers carries script vectors, and format conversion leans
//! on external tools (LibreOffice, a headless browser) that fail in
//! tool-specific ways. This crate owns that whole path behind one async
//! entry point, with storage abstracted behind traits so hosts bring
//! their own database and object store.
//!
//! ## Pipeline Overview
//!
//! ```text
//! merge request (template id + JSON payload + output format)
//!  │
//!  ├─ 1. Lookup    template metadata, format detection from extension
//!  ├─ 2. Plan      conversion path, illegal pairs rejected up front
//!  ├─ 3. Validate  payload leaves vs. declared field contract
//!  ├─ 4. Render    DOCX tag scanner / handlebars for markup
//!  ├─ 5. Sanitize  script vectors stripped from untrusted markup
//!  ├─ 6. Convert   soffice stages or headless-browser print
//!  └─ 7. Persist   artifact written, then exactly one job record
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docmerge::store::memory::{
//!     InMemoryBlobStore, InMemoryJobRepository, InMemoryTemplateStore,
//! };
//! use docmerge::{MergeConfig, MergePipeline, MergeRequest, OutputFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let templates = Arc::new(InMemoryTemplateStore::new());
//!     let blobs = Arc::new(InMemoryBlobStore::new());
//!     let jobs = Arc::new(InMemoryJobRepository::new());
//!
//!     let pipeline = MergePipeline::new(templates, blobs, jobs, MergeConfig::default());
//!     let outcome = pipeline
//!         .merge(MergeRequest {
//!             template_id: "invoice".into(),
//!             data: serde_json::json!({ "client": { "name": "ACME" } }),
//!             output: OutputFormat::Pdf,
//!             owner: None,
//!             untrusted: false,
//!         })
//!         .await?;
//!     println!("stored at {}", outcome.output_location);
//!     Ok(())
//! }
//! ```
//!
//! ## External tools
//!
//! | Output path | Tool | Resolution |
//! |-------------|------|------------|
//! | DOCX → PDF, HTML → DOCX | LibreOffice `soffice` | config → `SOFFICE_PATH` → install path → `$PATH` |
//! | HTML → PDF | headless Chromium | `headless_chrome` crate |
//!
//! Passthrough merges (DOCX → DOCX, HTML → HTML) need no external tools.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{MergeConfig, MergeConfigBuilder};
pub use error::{ErrorClass, MergeError, TemplateDiagnostic};
pub use merge::{lint_template, MergePipeline};
pub use model::{
    JobStatus, MergeJob, MergeOutcome, MergeRequest, MergedArtifact, OutputFormat, Template,
    TemplateFormat,
};
pub use store::{BlobStore, JobRepository, StoreError, TemplateStore};
