//! Toolchain provisioning: download-once, cache-forever.
//!
//! Three toolchains are required: the Clang host toolchain (gzip tarball)
//! and the two prebuilt GCC trees (shallow git clones). Presence of the
//! target directory is the entire cache key. Known gap inherited from the
//! original orchestrator: no checksum or version verification is performed,
//! so a stale toolchain on disk is never detected.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use git2::build::RepoBuilder;

use crate::config::BuildConfig;
use crate::error::ProvisionError;
use crate::workspace::Workspace;

/// The three toolchains the kernel build needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toolchain {
    Clang,
    GccAarch64,
    GccArm,
}

impl Toolchain {
    /// Provisioning order is fixed; any failure aborts the pipeline before
    /// the next toolchain is attempted.
    pub fn all() -> [Toolchain; 3] {
        [Toolchain::Clang, Toolchain::GccAarch64, Toolchain::GccArm]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Toolchain::Clang => "clang",
            Toolchain::GccAarch64 => "gcc-aarch64",
            Toolchain::GccArm => "gcc-arm",
        }
    }

    /// Target directory inside the workspace.
    pub fn dir(&self, workspace: &Workspace) -> PathBuf {
        match self {
            Toolchain::Clang => workspace.clang_dir(),
            Toolchain::GccAarch64 => workspace.gcc_aarch64_dir(),
            Toolchain::GccArm => workspace.gcc_arm_dir(),
        }
    }
}

/// Ensures all three toolchain directories exist, acquiring the missing ones.
pub struct Provisioner<'a> {
    config: &'a BuildConfig,
    workspace: &'a Workspace,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a BuildConfig, workspace: &'a Workspace) -> Self {
        Provisioner { config, workspace }
    }

    /// Provision every toolchain, failing fast on the first error.
    pub async fn ensure_all(&self) -> Result<(), ProvisionError> {
        for toolchain in Toolchain::all() {
            self.ensure(toolchain).await?;
        }
        Ok(())
    }

    /// Ensure a single toolchain: no-op when its directory already exists.
    pub async fn ensure(&self, toolchain: Toolchain) -> Result<(), ProvisionError> {
        let dest = toolchain.dir(self.workspace);
        if dest.exists() {
            log::info!("Toolchain {} present at {}, skipping", toolchain.as_str(), dest.display());
            return Ok(());
        }

        log::info!("Acquiring toolchain {}", toolchain.as_str());
        match toolchain {
            Toolchain::Clang => {
                self.fetch_archive(&self.config.clang_archive_url, &dest).await
            }
            Toolchain::GccAarch64 => {
                shallow_clone(&self.config.gcc_aarch64_url, &self.config.gcc_branch, &dest)
            }
            Toolchain::GccArm => {
                shallow_clone(&self.config.gcc_arm_url, &self.config.gcc_branch, &dest)
            }
        }
    }

    /// Download a gzip tarball to a temp file beside the toolchains and
    /// unpack it into `dest`. A failed extraction removes the partial
    /// directory so the next run re-acquires from scratch.
    async fn fetch_archive(&self, url: &str, dest: &Path) -> Result<(), ProvisionError> {
        let toolchains_dir = self.workspace.toolchains_dir();
        std::fs::create_dir_all(&toolchains_dir)?;

        let mut archive = tempfile::NamedTempFile::new_in(&toolchains_dir)?;
        download(url, archive.as_file_mut()).await?;

        log::info!("Extracting {} into {}", url, dest.display());
        if let Err(e) = extract_tar_gz(archive.path(), dest) {
            // Leave no partial toolchain behind; presence means usable.
            let _ = std::fs::remove_dir_all(dest);
            return Err(e);
        }
        Ok(())
    }
}

/// Stream a URL into the given file.
async fn download(url: &str, file: &mut File) -> Result<(), ProvisionError> {
    let mut response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| ProvisionError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let mut received: u64 = 0;
    while let Some(chunk) = response.chunk().await.map_err(|e| ProvisionError::DownloadFailed {
        url: url.to_string(),
        reason: e.to_string(),
    })? {
        file.write_all(&chunk)?;
        received += chunk.len() as u64;
    }
    file.flush()?;

    log::info!("Downloaded {} ({} bytes)", url, received);
    Ok(())
}

/// Unpack a .tar.gz archive into `dest`, creating it first.
fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<(), ProvisionError> {
    std::fs::create_dir_all(dest)?;
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(dest)
        .map_err(|e| ProvisionError::ExtractFailed(format!("{}: {}", dest.display(), e)))
}

/// Shallow clone (depth 1) at a pinned branch, with full-clone fallback for
/// remotes that reject shallow fetches.
fn shallow_clone(url: &str, branch: &str, dest: &Path) -> Result<(), ProvisionError> {
    log::info!("Shallow cloning {} (branch {}) into {}", url, branch, dest.display());

    let mut fetch_options = git2::FetchOptions::new();
    fetch_options.depth(1);

    let mut builder = RepoBuilder::new();
    builder.branch(branch);
    builder.fetch_options(fetch_options);

    if builder.clone(url, dest).is_ok() {
        return Ok(());
    }

    log::warn!("Shallow clone failed for {}, falling back to full clone", url);
    let _ = std::fs::remove_dir_all(dest);

    let mut builder = RepoBuilder::new();
    builder.branch(branch);
    builder.clone(url, dest).map(|_| ()).map_err(|e| {
        let _ = std::fs::remove_dir_all(dest);
        ProvisionError::CloneFailed(format!("{} (branch {}): {}", url, branch, e))
    })
}
