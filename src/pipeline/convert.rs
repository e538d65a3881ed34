//! Conversion chain: turn a rendered artifact into the requested output
//! format.
//!
//! Four independent paths, keyed by (template format, requested output):
//!
//! ```text
//! docx → docx   passthrough
//! docx → pdf    soffice --convert-to pdf            (one stage)
//! html → html   passthrough
//! html → pdf    headless Chromium print             (spawn_blocking)
//! html → docx   soffice, two stages via ODT         (import-markup, export-docx)
//! ```
//!
//! Every soffice invocation gets its own temporary working directory,
//! removed best-effort when the `TempDir` drops — success or failure. The
//! two-stage path verifies the intermediate ODT exists before the second
//! stage runs, so a silently no-op'd first stage fails fast and is
//! attributable to its stage name instead of surfacing as a confusing
//! second-stage error.
//!
//! ## Binary resolution
//!
//! `soffice` is resolved once per invocation: explicit config path, then
//! the `SOFFICE_PATH` environment variable, then a platform well-known
//! install path probed by existence, then the bare command name on `$PATH`.

use crate::config::{MergeConfig, SOFFICE_PATH_ENV};
use crate::error::MergeError;
use crate::model::{MergedArtifact, OutputFormat, TemplateFormat};
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

/// One of the four ways from a rendered artifact to the requested format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionPath {
    /// Requested format equals the template's native format.
    Passthrough,
    /// DOCX → PDF via a single soffice stage.
    DocToPdf,
    /// HTML → PDF via a headless Chromium print.
    MarkupToPdf,
    /// HTML → DOCX via two soffice stages through ODT.
    MarkupToDoc,
}

/// Select the conversion path for a (template, requested) pair.
///
/// Called before rendering so an illegal combination fails fast as an
/// input-contract error.
pub fn plan(
    template: TemplateFormat,
    requested: OutputFormat,
) -> Result<ConversionPath, MergeError> {
    if !template.accepts(requested) {
        return Err(MergeError::IllegalOutputFormat {
            template,
            requested,
        });
    }
    Ok(match (template, requested) {
        (TemplateFormat::Docx, OutputFormat::Docx) | (TemplateFormat::Html, OutputFormat::Html) => {
            ConversionPath::Passthrough
        }
        (TemplateFormat::Docx, OutputFormat::Pdf) => ConversionPath::DocToPdf,
        (TemplateFormat::Html, OutputFormat::Pdf) => ConversionPath::MarkupToPdf,
        (TemplateFormat::Html, OutputFormat::Docx) => ConversionPath::MarkupToDoc,
        (TemplateFormat::Docx, OutputFormat::Html) => unreachable!("rejected by accepts()"),
    })
}

/// Run the selected conversion path over the artifact.
///
/// Passthrough returns the artifact unchanged; every other path replaces
/// the buffer and stamps the requested format.
pub async fn execute(
    path: ConversionPath,
    artifact: MergedArtifact,
    config: &MergeConfig,
) -> Result<MergedArtifact, MergeError> {
    match path {
        ConversionPath::Passthrough => Ok(artifact),
        ConversionPath::DocToPdf => {
            let bytes = doc_to_pdf(&artifact.bytes, config).await?;
            Ok(MergedArtifact {
                bytes,
                format: OutputFormat::Pdf,
            })
        }
        ConversionPath::MarkupToPdf => {
            let bytes = markup_to_pdf(artifact.bytes, config).await?;
            Ok(MergedArtifact {
                bytes,
                format: OutputFormat::Pdf,
            })
        }
        ConversionPath::MarkupToDoc => {
            let bytes = markup_to_doc(&artifact.bytes, config).await?;
            Ok(MergedArtifact {
                bytes,
                format: OutputFormat::Docx,
            })
        }
    }
}

// ── soffice paths ────────────────────────────────────────────────────────

/// Resolve the LibreOffice binary (see module docs for the order).
fn soffice_binary(config: &MergeConfig) -> PathBuf {
    if let Some(ref path) = config.soffice_path {
        return path.clone();
    }
    if let Ok(path) = std::env::var(SOFFICE_PATH_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    let well_known = well_known_soffice_path();
    if well_known.exists() {
        return well_known;
    }
    PathBuf::from("soffice")
}

#[cfg(target_os = "macos")]
fn well_known_soffice_path() -> PathBuf {
    PathBuf::from("/Applications/LibreOffice.app/Contents/MacOS/soffice")
}

#[cfg(target_os = "windows")]
fn well_known_soffice_path() -> PathBuf {
    PathBuf::from(r"C:\Program Files\LibreOffice\program\soffice.exe")
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn well_known_soffice_path() -> PathBuf {
    PathBuf::from("/usr/bin/soffice")
}

/// One named soffice invocation with its expected output file.
struct Stage<'a> {
    name: &'a str,
    args: Vec<String>,
    expect: PathBuf,
}

/// Run one stage: spawn, capture both streams, enforce the timeout, and
/// verify the expected artifact exists afterwards.
async fn run_stage(stage: &Stage<'_>, config: &MergeConfig) -> Result<(), MergeError> {
    let binary = soffice_binary(config);
    debug!(
        "Stage '{}': {} {}",
        stage.name,
        binary.display(),
        stage.args.join(" ")
    );

    let child = Command::new(&binary)
        .args(&stage.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Reap the process if the timeout abandons the handle.
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| MergeError::ConverterUnavailable {
            tool: binary.display().to_string(),
            detail: e.to_string(),
        })?;

    let output = match config.convert_timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output())
            .await
            .map_err(|_| MergeError::ConversionTimeout {
                stage: stage.name.to_string(),
                secs,
            })?,
        None => child.wait_with_output().await,
    }
    .map_err(|e| MergeError::Internal(format!("stage '{}': {e}", stage.name)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let captured = if stderr.trim().is_empty() {
            stdout
        } else {
            stderr
        };
        return Err(MergeError::ConversionFailed {
            stage: stage.name.to_string(),
            code: output.status.code(),
            output: captured.trim().to_string(),
        });
    }

    if !stage.expect.exists() {
        return Err(MergeError::StageOutputMissing {
            stage: stage.name.to_string(),
            path: stage.expect.clone(),
        });
    }

    Ok(())
}

/// DOCX → PDF: a single soffice conversion stage.
async fn doc_to_pdf(input: &[u8], config: &MergeConfig) -> Result<Vec<u8>, MergeError> {
    let workdir = workdir()?;
    let input_path = workdir.path().join("input.docx");
    tokio::fs::write(&input_path, input)
        .await
        .map_err(|e| MergeError::Internal(format!("staging input: {e}")))?;

    let stage = Stage {
        name: "export-pdf",
        args: soffice_args(
            &["--convert-to", "pdf"],
            workdir.path(),
            &input_path,
        ),
        expect: workdir.path().join("input.pdf"),
    };
    run_stage(&stage, config).await?;

    read_artifact(&stage.expect).await
}

/// HTML → DOCX: two soffice stages through the ODT interchange format.
///
/// The first stage forces the HTML import filter so soffice cannot
/// misdetect the input; the second exports the intermediate ODT as DOCX.
/// Both write into the same working directory.
async fn markup_to_doc(input: &[u8], config: &MergeConfig) -> Result<Vec<u8>, MergeError> {
    let workdir = workdir()?;
    let input_path = workdir.path().join("input.html");
    tokio::fs::write(&input_path, input)
        .await
        .map_err(|e| MergeError::Internal(format!("staging input: {e}")))?;
    let intermediate = workdir.path().join("input.odt");

    let stages = [
        Stage {
            name: "import-markup",
            args: soffice_args(
                &["--infilter=HTML (StarWriter)", "--convert-to", "odt"],
                workdir.path(),
                &input_path,
            ),
            expect: intermediate.clone(),
        },
        Stage {
            name: "export-docx",
            args: soffice_args(&["--convert-to", "docx"], workdir.path(), &intermediate),
            expect: workdir.path().join("input.docx"),
        },
    ];

    for stage in &stages {
        run_stage(stage, config).await?;
    }

    let bytes = read_artifact(&stages[1].expect).await?;
    info!("Two-stage markup→doc conversion produced {} bytes", bytes.len());
    Ok(bytes)
}

fn workdir() -> Result<TempDir, MergeError> {
    TempDir::new().map_err(|e| MergeError::Internal(format!("creating working directory: {e}")))
}

fn soffice_args(conversion: &[&str], outdir: &Path, input: &Path) -> Vec<String> {
    let mut args = vec!["--headless".to_string()];
    args.extend(conversion.iter().map(|s| s.to_string()));
    args.push("--outdir".to_string());
    args.push(outdir.display().to_string());
    args.push(input.display().to_string());
    args
}

async fn read_artifact(path: &Path) -> Result<Vec<u8>, MergeError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| MergeError::Internal(format!("reading '{}': {e}", path.display())))?;
    if bytes.is_empty() {
        return Err(MergeError::StageOutputMissing {
            stage: "read-artifact".to_string(),
            path: path.to_path_buf(),
        });
    }
    Ok(bytes)
}

// ── Browser printing ─────────────────────────────────────────────────────

/// HTML → PDF via a headless Chromium print.
///
/// One isolated browser instance per conversion — never pooled — with
/// shared memory disabled (container /dev/shm defaults are tiny). The
/// browser handle is dropped inside the blocking task whether or not the
/// print succeeded. The `headless_chrome` API is synchronous, so the
/// whole interaction runs under `spawn_blocking`, like every other sync
/// engine in this pipeline.
async fn markup_to_pdf(input: Vec<u8>, config: &MergeConfig) -> Result<Vec<u8>, MergeError> {
    let print_background = config.print_background;
    let task =
        tokio::task::spawn_blocking(move || print_pdf_blocking(&input, print_background));

    match config.convert_timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), task)
            .await
            .map_err(|_| MergeError::ConversionTimeout {
                stage: "print-pdf".to_string(),
                secs,
            })?,
        None => task.await,
    }
    .map_err(|e| MergeError::Internal(format!("print task panicked: {e}")))?
}

fn print_pdf_blocking(input: &[u8], print_background: bool) -> Result<Vec<u8>, MergeError> {
    let browser_err = |e: &dyn std::fmt::Display| MergeError::BrowserRender {
        detail: e.to_string(),
    };

    // The page is loaded from a file:// URL: navigation waits for the load
    // event, which lets referenced remote assets finish before printing.
    let workdir = workdir()?;
    let page_path = workdir.path().join("page.html");
    std::fs::write(&page_path, input)
        .map_err(|e| MergeError::Internal(format!("staging page: {e}")))?;
    let url = format!("file://{}", page_path.display());

    let options = LaunchOptions::default_builder()
        .headless(true)
        .sandbox(true)
        .args(vec![OsStr::new("--disable-dev-shm-usage")])
        .build()
        .map_err(|e| browser_err(&e))?;

    let browser = Browser::new(options).map_err(|e| browser_err(&e))?;
    let tab = browser.new_tab().map_err(|e| browser_err(&e))?;
    tab.navigate_to(&url).map_err(|e| browser_err(&e))?;
    tab.wait_until_navigated().map_err(|e| browser_err(&e))?;

    let pdf = tab
        .print_to_pdf(Some(PrintToPdfOptions {
            print_background: Some(print_background),
            prefer_css_page_size: Some(true),
            ..Default::default()
        }))
        .map_err(|e| browser_err(&e))?;

    // `browser` drops here, releasing the instance unconditionally.
    Ok(pdf)
}
