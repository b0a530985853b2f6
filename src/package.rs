//! Artifact packaging: flashing-template staging, timestamped zip creation,
//! relocation into the releases directory.
//!
//! The flashing template's expected file layout and the archiver's
//! command-line shape are the only contracts this module knows; both tools
//! are otherwise opaque.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use git2::build::RepoBuilder;
use tokio::process::Command;

use crate::build::run_streamed;
use crate::config::BuildConfig;
use crate::error::PackageError;
use crate::logging::BuildLogger;
use crate::workspace::Workspace;

/// Archive name with build timestamp at minute granularity.
pub fn archive_name(prefix: &str, device: &str, time: DateTime<Local>) -> String {
    format!("{}-{}-{}.zip", prefix, device, time.format("%Y%m%d-%H%M"))
}

/// Remove version-control metadata and incidental files from a freshly
/// cloned template. One-time mutation, applied right after clone.
pub fn strip_template(dir: &Path) -> std::io::Result<()> {
    let git_dir = dir.join(".git");
    if git_dir.exists() {
        std::fs::remove_dir_all(&git_dir)?;
    }
    for incidental in ["README.md", "LICENSE"] {
        let path = dir.join(incidental);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Names of staged artifacts, for the completion log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifacts {
    pub kernel_image: String,
    pub dtb: bool,
    pub dtbo: bool,
}

/// Populates the flashing template and produces the final archive.
pub struct Packager<'a> {
    config: &'a BuildConfig,
    workspace: &'a Workspace,
    logger: BuildLogger,
}

impl<'a> Packager<'a> {
    pub fn new(config: &'a BuildConfig, workspace: &'a Workspace, logger: BuildLogger) -> Self {
        Packager {
            config,
            workspace,
            logger,
        }
    }

    /// Clone-once semantics for the template working copy. The stripped
    /// clone persists across runs and is never re-fetched.
    pub fn ensure_template(&self) -> Result<(), PackageError> {
        let dir = self.workspace.template_dir();
        if dir.exists() {
            log::info!("Flashing template present at {}, skipping clone", dir.display());
            return Ok(());
        }

        log::info!("Cloning flashing template {} into {}", self.config.template_url, dir.display());

        let mut fetch_options = git2::FetchOptions::new();
        fetch_options.depth(1);
        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_options);

        if builder.clone(&self.config.template_url, &dir).is_err() {
            let _ = std::fs::remove_dir_all(&dir);
            RepoBuilder::new()
                .clone(&self.config.template_url, &dir)
                .map_err(|e| {
                    let _ = std::fs::remove_dir_all(&dir);
                    PackageError::TemplateCloneFailed(format!(
                        "{}: {}",
                        self.config.template_url, e
                    ))
                })?;
        }

        strip_template(&dir)?;
        Ok(())
    }

    /// Copy the kernel image (compressed preferred) and the optional
    /// device-tree artifacts into the template.
    pub fn stage_artifacts(&self) -> Result<StagedArtifacts, PackageError> {
        let boot_dir = self.workspace.boot_dir(&self.config.arch);
        let template_dir = self.workspace.template_dir();

        let compressed = boot_dir.join("Image.gz");
        let uncompressed = boot_dir.join("Image");
        let image_src = if compressed.exists() {
            compressed
        } else if uncompressed.exists() {
            uncompressed
        } else {
            return Err(PackageError::KernelImageMissing(boot_dir.display().to_string()));
        };

        let image_dest = template_dir.join(&self.config.image_name);
        std::fs::copy(&image_src, &image_dest)?;
        log::info!(
            "Staged kernel image {} as {}",
            image_src.display(),
            self.config.image_name
        );

        let mut staged = StagedArtifacts {
            kernel_image: self.config.image_name.clone(),
            dtb: false,
            dtbo: false,
        };

        for (name, flag) in [("dtb.img", &mut staged.dtb), ("dtbo.img", &mut staged.dtbo)] {
            let src = boot_dir.join(name);
            if src.exists() {
                std::fs::copy(&src, template_dir.join(name))?;
                log::info!("Staged {}", name);
                *flag = true;
            }
        }

        Ok(staged)
    }

    /// Zip the template (excluding any pre-existing zips, and therefore the
    /// archive being written), then move it and a copy of the build log into
    /// the releases directory.
    pub async fn archive(&self) -> Result<PathBuf, PackageError> {
        let template_dir = self.workspace.template_dir();
        let name = archive_name(&self.config.zip_prefix, &self.config.device, Local::now());

        log::info!("Creating archive {}", name);
        let mut command = Command::new("zip");
        command.current_dir(&template_dir);
        command.arg("-r9");
        command.arg(&name);
        command.arg(".");
        command.arg("-x");
        command.arg("*.zip");

        run_streamed(command, &self.logger, "zip")
            .await
            .map_err(PackageError::ArchiveFailed)?;

        let releases_dir = self.workspace.releases_dir();
        std::fs::create_dir_all(&releases_dir)?;

        let src = template_dir.join(&name);
        let dest = releases_dir.join(&name);
        move_file(&src, &dest)?;

        let log_src = self.workspace.build_log_path();
        if log_src.exists() {
            std::fs::copy(&log_src, releases_dir.join("build.log"))?;
        }

        log::info!("Archive placed at {}", dest.display());
        Ok(dest)
    }
}

/// Rename with a copy+remove fallback for cross-device moves.
fn move_file(src: &Path, dest: &Path) -> std::io::Result<()> {
    if std::fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dest)?;
    std::fs::remove_file(src)
}
