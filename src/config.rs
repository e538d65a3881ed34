//! Configuration for the merge pipeline.
//!
//! All pipeline behaviour is controlled through [`MergeConfig`], built via
//! its [`MergeConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share a config across requests and to diff two runs to
//! understand why their outputs differ.

use crate::error::MergeError;
use std::path::PathBuf;

/// Environment variable consulted for the LibreOffice binary before the
/// platform-specific install paths are probed.
pub const SOFFICE_PATH_ENV: &str = "SOFFICE_PATH";

/// Configuration for merge-and-convert runs.
///
/// # Example
/// ```rust
/// use docmerge::MergeConfig;
///
/// let config = MergeConfig::builder()
///     .output_prefix("merges")
///     .convert_timeout_secs(Some(120))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Key prefix under which merged artifacts are written to the blob
    /// store. No path separators allowed. Default: `"merges"`.
    pub output_prefix: String,

    /// Explicit path to the LibreOffice binary. Takes precedence over the
    /// `SOFFICE_PATH` environment variable and the well-known install
    /// paths. Default: `None` (resolve at invocation time).
    pub soffice_path: Option<PathBuf>,

    /// Timeout applied to each external conversion stage (every soffice
    /// invocation and the browser print). Default: `Some(180)`.
    ///
    /// `None` disables the bound entirely, restoring unbounded waits.
    /// A hung soffice with no timeout blocks the request forever, so only
    /// disable this when an outer orchestration layer owns the deadline.
    pub convert_timeout_secs: Option<u64>,

    /// Print CSS backgrounds when rendering markup to PDF. Default: true.
    pub print_background: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            output_prefix: "merges".to_string(),
            soffice_path: None,
            convert_timeout_secs: Some(180),
            print_background: true,
        }
    }
}

impl MergeConfig {
    /// Create a new builder for `MergeConfig`.
    pub fn builder() -> MergeConfigBuilder {
        MergeConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`MergeConfig`].
#[derive(Debug)]
pub struct MergeConfigBuilder {
    config: MergeConfig,
}

impl MergeConfigBuilder {
    pub fn output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.output_prefix = prefix.into();
        self
    }

    pub fn soffice_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.soffice_path = Some(path.into());
        self
    }

    pub fn convert_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.convert_timeout_secs = secs;
        self
    }

    pub fn print_background(mut self, v: bool) -> Self {
        self.config.print_background = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<MergeConfig, MergeError> {
        let c = &self.config;
        if c.output_prefix.contains('/') || c.output_prefix.contains('\\') {
            return Err(MergeError::Internal(format!(
                "Invalid configuration: output_prefix must not contain path separators, got '{}'",
                c.output_prefix
            )));
        }
        if c.convert_timeout_secs == Some(0) {
            return Err(MergeError::Internal(
                "Invalid configuration: convert_timeout_secs must be ≥ 1 when set".into(),
            ));
        }
        Ok(self.config)
    }
}
