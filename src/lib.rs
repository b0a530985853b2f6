//! kforge: Android kernel build pipeline.
//!
//! Four ordered stages over one working root: toolchain provisioning
//! (download-once, cache-forever), kernel source synchronization at a
//! pinned branch, kbuild invocation with a merged defconfig, and flashable
//! packaging of the produced artifacts. Control flows strictly top to
//! bottom with fail-fast error propagation; the only parallelism is the
//! compiler's own job count.
//!
//! The system is organized into functional modules:
//! - **error**: per-stage error enums and the pipeline-wide result type
//! - **config**: JSON build configuration (remotes, branches, fragments)
//! - **workspace**: path registry for the working root
//! - **logging**: dual-writing build logger (stderr + build log file)
//! - **toolchain**: toolchain provisioner
//! - **source**: kernel source synchronizer
//! - **build**: defconfig merge, make invocation, conditional DTBO step
//! - **package**: flashing-template staging and archive creation
//! - **pipeline**: stage machine and sequential runner

pub mod error;

pub mod config;
pub mod workspace;

pub mod logging;

pub mod toolchain;
pub mod source;
pub mod build;
pub mod package;
pub mod pipeline;

// Re-export the log crate for macro usage
pub use log;

pub use config::BuildConfig;
pub use error::{
    BuildError, ConfigError, PackageError, PipelineError, ProvisionError, Result, SyncError,
};
pub use logging::BuildLogger;
pub use pipeline::{Pipeline, PipelineState, Stage};
pub use workspace::Workspace;
