//! Unified error type hierarchy for kforge.
//!
//! Each pipeline stage has its own error enum; `PipelineError` collects them
//! so every stage can short-circuit the run with `?`. There is no retry or
//! partial-recovery path anywhere: the first failure aborts the pipeline.

use std::io;
use thiserror::Error;

/// Toolchain acquisition errors (download, extraction, clone).
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Archive extraction failed: {0}")]
    ExtractFailed(String),

    #[error("Toolchain clone failed: {0}")]
    CloneFailed(String),

    #[error("IO error during toolchain provisioning: {0}")]
    Io(#[from] io::Error),
}

/// Kernel source synchronization errors.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Clone failed: {0}")]
    CloneFailed(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Branch '{0}' not found on remote")]
    BranchNotFound(String),

    #[error("Local checkout has diverged from origin/{branch}: {detail}. \
             Remove the source directory or restore a clean checkout")]
    Diverged { branch: String, detail: String },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error during source sync: {0}")]
    Io(#[from] io::Error),
}

/// Build invocation errors (defconfig merge, make, dtbo image).
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Config fragment not found: {0}")]
    FragmentMissing(String),

    #[error("Defconfig merge failed: {0}")]
    MergeFailed(String),

    #[error("Configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Overlay image creation failed: {0}")]
    OverlayImageFailed(String),

    #[error("IO error during build: {0}")]
    Io(#[from] io::Error),
}

/// Artifact packaging errors.
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Flashing template clone failed: {0}")]
    TemplateCloneFailed(String),

    #[error("No kernel image found in {0} (looked for compressed and uncompressed)")]
    KernelImageMissing(String),

    #[error("Archive creation failed: {0}")]
    ArchiveFailed(String),

    #[error("IO error during packaging: {0}")]
    Io(#[from] io::Error),
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    Io(#[from] io::Error),
}

/// Top-level pipeline error. Any stage failure surfaces as one of these and
/// aborts the run with a non-zero exit; the exit code does not distinguish
/// failure kinds.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Toolchain provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Source synchronization failed: {0}")]
    Sync(#[from] SyncError),

    #[error("Build failed: {0}")]
    Build(#[from] BuildError),

    #[error("Packaging failed: {0}")]
    Package(#[from] PackageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid stage transition: {0}")]
    InvalidTransition(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Crate-wide result type: every fallible pipeline operation returns this.
pub type Result<T> = std::result::Result<T, PipelineError>;
