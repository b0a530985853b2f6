//! Pipeline orchestration: the linear stage machine and the sequential
//! runner that drives provisioning, sync, build, and packaging.
//!
//! Control flows strictly top to bottom. The overlay-image stage is the one
//! conditional branch, taken if and only if the compile produced overlay
//! blobs. Any failure transitions to Failed and aborts the run; there are no
//! retries and no compensating actions.

use std::time::SystemTime;

use crate::build::BuildInvoker;
use crate::config::BuildConfig;
use crate::error::{PipelineError, Result};
use crate::logging::BuildLogger;
use crate::package::Packager;
use crate::source::SourceSync;
use crate::toolchain::Provisioner;
use crate::workspace::Workspace;

/// Discrete stages of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Toolchain acquisition (download-once, cache-forever).
    Provision,

    /// Kernel source clone or fast-forward pull.
    Sync,

    /// Defconfig fragment merge and make <defconfig>.
    Configure,

    /// Full kernel build.
    Compile,

    /// Conditional DTBO bundling, entered only when overlay blobs exist.
    OverlayImage,

    /// Flashing-template clone/strip and artifact staging.
    AssembleTemplate,

    /// Zip creation and relocation into the releases directory.
    Archive,

    /// Archive and log are in place; terminal.
    Completed,

    /// First failure landed here; terminal for the run.
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Provision => "provision",
            Stage::Sync => "sync",
            Stage::Configure => "configure",
            Stage::Compile => "compile",
            Stage::OverlayImage => "overlay-image",
            Stage::AssembleTemplate => "assemble-template",
            Stage::Archive => "archive",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }

    /// All valid transitions FROM this stage.
    pub fn valid_next_stages(&self) -> Vec<Stage> {
        match self {
            Stage::Provision => vec![Stage::Sync, Stage::Failed],
            Stage::Sync => vec![Stage::Configure, Stage::Failed],
            Stage::Configure => vec![Stage::Compile, Stage::Failed],
            // The overlay branch is runtime-discovered, so both exits are legal.
            Stage::Compile => vec![Stage::OverlayImage, Stage::AssembleTemplate, Stage::Failed],
            Stage::OverlayImage => vec![Stage::AssembleTemplate, Stage::Failed],
            Stage::AssembleTemplate => vec![Stage::Archive, Stage::Failed],
            Stage::Archive => vec![Stage::Completed, Stage::Failed],
            Stage::Completed => vec![],
            Stage::Failed => vec![],
        }
    }

    pub fn can_transition_to(&self, next: Stage) -> bool {
        self.valid_next_stages().contains(&next)
    }
}

/// Run-state snapshot: current stage, timing, first error.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub stage: Stage,
    pub start_time: SystemTime,
    pub last_update_time: SystemTime,
    pub error: Option<String>,
}

impl PipelineState {
    pub fn new() -> Self {
        let now = SystemTime::now();
        PipelineState {
            stage: Stage::Provision,
            start_time: now,
            last_update_time: now,
            error: None,
        }
    }

    /// Attempt a stage transition, rejecting anything the machine does not
    /// allow.
    pub fn transition_to(&mut self, next: Stage) -> Result<()> {
        if !self.stage.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition(format!(
                "{} -> {}",
                self.stage.as_str(),
                next.as_str()
            )));
        }
        self.stage = next;
        self.last_update_time = SystemTime::now();
        Ok(())
    }

    /// Record the first failure and land in Failed.
    pub fn record_error(&mut self, error: String) {
        self.error = Some(error);
        self.stage = Stage::Failed;
        self.last_update_time = SystemTime::now();
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

/// The whole build pipeline, wired over one workspace and one config.
pub struct Pipeline {
    config: BuildConfig,
    workspace: Workspace,
    logger: BuildLogger,
    clean: bool,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(config: BuildConfig, workspace: Workspace, logger: BuildLogger, clean: bool) -> Self {
        Pipeline {
            config,
            workspace,
            logger,
            clean,
            state: PipelineState::new(),
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Execute every stage in order, short-circuiting on the first failure.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.run_stages().await;
        if let Err(ref e) = result {
            let stage = self.state.stage;
            self.state.record_error(e.to_string());
            log::error!("Pipeline aborted during {}: {}", stage.as_str(), e);
        }
        result
    }

    async fn run_stages(&mut self) -> Result<()> {
        log::info!("==> Provisioning toolchains");
        Provisioner::new(&self.config, &self.workspace)
            .ensure_all()
            .await?;
        self.state.transition_to(Stage::Sync)?;

        log::info!("==> Synchronizing kernel source");
        SourceSync::new(
            &self.config.kernel_url,
            &self.config.kernel_branch,
            self.workspace.source_dir(),
        )
        .sync()?;
        self.state.transition_to(Stage::Configure)?;

        log::info!("==> Configuring");
        let invoker = BuildInvoker::new(&self.config, &self.workspace, self.logger.clone());
        invoker.configure(self.clean).await?;
        self.state.transition_to(Stage::Compile)?;

        log::info!("==> Compiling");
        invoker.compile().await?;

        // Conditional branch: overlay image only when blobs were produced.
        let blobs = invoker.find_overlay_blobs()?;
        if blobs.is_empty() {
            log::info!("No overlay blobs found, skipping DTBO image");
            self.state.transition_to(Stage::AssembleTemplate)?;
        } else {
            self.state.transition_to(Stage::OverlayImage)?;
            log::info!("==> Creating overlay image");
            invoker.make_overlay_image(&blobs).await?;
            self.state.transition_to(Stage::AssembleTemplate)?;
        }

        log::info!("==> Assembling flashing template");
        let packager = Packager::new(&self.config, &self.workspace, self.logger.clone());
        packager.ensure_template()?;
        let staged = packager.stage_artifacts()?;
        log::info!(
            "Staged artifacts: {} (dtb: {}, dtbo: {})",
            staged.kernel_image,
            staged.dtb,
            staged.dtbo
        );
        self.state.transition_to(Stage::Archive)?;

        log::info!("==> Archiving");
        let archive = packager.archive().await?;
        self.state.transition_to(Stage::Completed)?;

        log::info!("Build complete: {}", archive.display());
        Ok(())
    }
}
