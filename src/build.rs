//! Build invocation: defconfig fragment merge, cross-compile environment,
//! streamed `make` runs, and the conditional DTBO image step.
//!
//! External tools (`make`, `mkdtimg`) are opaque collaborators; this module
//! only knows their command-line shapes. All of their combined output is
//! teed line-by-line into the build log.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::logging::BuildLogger;
use crate::workspace::Workspace;

/// Merge the base defconfig fragment and the device overlay into the working
/// defconfig, base first, so later keys win on duplicate definitions.
///
/// Both fragments are named relative to `arch/<arch>/configs/`; the merged
/// file is written back there and overwritten on every configure. There is
/// no conflict detection between fragment keys: concatenation order is the
/// whole merge policy.
pub fn merge_defconfig(
    source_dir: &Path,
    config: &BuildConfig,
) -> Result<PathBuf, BuildError> {
    let configs_dir = source_dir
        .join("arch")
        .join(&config.arch)
        .join("configs");

    let base_path = configs_dir.join(&config.base_defconfig);
    let fragment_path = configs_dir.join(&config.device_fragment);

    let base = std::fs::read_to_string(&base_path)
        .map_err(|_| BuildError::FragmentMissing(base_path.display().to_string()))?;
    let fragment = std::fs::read_to_string(&fragment_path)
        .map_err(|_| BuildError::FragmentMissing(fragment_path.display().to_string()))?;

    let merged_path = configs_dir.join(&config.merged_defconfig);
    let mut merged = String::with_capacity(base.len() + fragment.len() + 1);
    merged.push_str(&base);
    if !merged.ends_with('\n') {
        merged.push('\n');
    }
    merged.push_str(&fragment);

    std::fs::write(&merged_path, &merged)
        .map_err(|e| BuildError::MergeFailed(format!("{}: {}", merged_path.display(), e)))?;

    log::info!(
        "Merged {} + {} -> {}",
        config.base_defconfig,
        config.device_fragment,
        config.merged_defconfig
    );
    Ok(merged_path)
}

/// The value kbuild will see for a config key in a concatenated defconfig:
/// the last occurrence wins. `# CONFIG_X is not set` reads as "n".
pub fn effective_option(merged: &str, key: &str) -> Option<String> {
    let mut value = None;
    let set_prefix = format!("{}=", key);
    let unset_line = format!("# {} is not set", key);

    for line in merged.lines() {
        let line = line.trim();
        if let Some(v) = line.strip_prefix(&set_prefix) {
            value = Some(v.to_string());
        } else if line == unset_line {
            value = Some("n".to_string());
        }
    }
    value
}

/// Cross-compilation environment handed to every make invocation: target
/// architecture, build-identity strings, and toolchain bin dirs prepended
/// to PATH.
pub fn kbuild_env(config: &BuildConfig, workspace: &Workspace) -> Vec<(String, String)> {
    let host_path = std::env::var("PATH").unwrap_or_default();
    let path = format!(
        "{}:{}:{}:{}",
        workspace.clang_dir().join("bin").display(),
        workspace.gcc_aarch64_dir().join("bin").display(),
        workspace.gcc_arm_dir().join("bin").display(),
        host_path
    );

    vec![
        ("ARCH".to_string(), config.arch.clone()),
        ("SUBARCH".to_string(), config.subarch.clone()),
        ("KBUILD_BUILD_USER".to_string(), config.build_user.clone()),
        ("KBUILD_BUILD_HOST".to_string(), config.build_host.clone()),
        ("PATH".to_string(), path),
        ("CROSS_COMPILE".to_string(), config.cross_compile.clone()),
        (
            "CROSS_COMPILE_ARM32".to_string(),
            config.cross_compile_arm32.clone(),
        ),
    ]
}

/// Compiler selection handed to make as command-line variable assignments.
/// The kernel's top Makefile sets `CC = $(CROSS_COMPILE)gcc` unconditionally,
/// so CC from the environment is ignored; only a make argument overrides it.
pub fn kbuild_overrides(config: &BuildConfig) -> Vec<String> {
    vec![
        format!("CC={}", config.cc),
        format!("CLANG_TRIPLE={}", config.clang_triple),
    ]
}

static STEP_PROGRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\[\s*(\d+)\s*/\s*(\d+)\s*\]").unwrap());
static PERCENT_PROGRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,3})%").unwrap());

/// Parse `[X/Y]` or `NN%` progress markers from build output.
pub fn parse_build_progress(line: &str) -> Option<u32> {
    if let Some(caps) = STEP_PROGRESS.captures(line) {
        let done: u64 = caps[1].parse().ok()?;
        let total: u64 = caps[2].parse().ok()?;
        if total > 0 {
            return Some(((done * 100) / total).min(100) as u32);
        }
    }
    if let Some(caps) = PERCENT_PROGRESS.captures(line) {
        let pct: u32 = caps[1].parse().ok()?;
        if pct <= 100 {
            return Some(pct);
        }
    }
    None
}

/// Spawn a command with piped output and stream both stdout and stderr into
/// the build log until the process exits. Returns an error string on spawn
/// failure or non-zero exit.
pub(crate) async fn run_streamed(
    mut command: Command,
    logger: &BuildLogger,
    label: &str,
) -> Result<(), String> {
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| format!("failed to spawn {}: {}", label, e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| format!("failed to capture {} stdout", label))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| format!("failed to capture {} stderr", label))?;

    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();

    let mut stdout_closed = false;
    let mut stderr_closed = false;
    let mut last_progress: Option<u32> = None;

    loop {
        if stdout_closed && stderr_closed {
            break;
        }

        tokio::select! {
            line = stdout_lines.next_line(), if !stdout_closed => {
                match line {
                    Ok(Some(line)) => {
                        eprintln!("{}", line);
                        logger.log_line(&line);
                        if let Some(pct) = parse_build_progress(&line) {
                            if last_progress != Some(pct) {
                                last_progress = Some(pct);
                                log::info!("{}: {}%", label, pct);
                            }
                        }
                    }
                    Ok(None) => stdout_closed = true,
                    Err(e) => {
                        logger.log_line(&format!("<stdout read error: {}>", e));
                        stdout_closed = true;
                    }
                }
            }
            line = stderr_lines.next_line(), if !stderr_closed => {
                match line {
                    Ok(Some(line)) => {
                        eprintln!("{}", line);
                        logger.log_line(&line);
                    }
                    Ok(None) => stderr_closed = true,
                    Err(e) => {
                        logger.log_line(&format!("<stderr read error: {}>", e));
                        stderr_closed = true;
                    }
                }
            }
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| format!("failed to wait for {}: {}", label, e))?;

    if status.success() {
        Ok(())
    } else {
        Err(format!("{} exited with {}", label, status))
    }
}

/// Drives configure, compile, and the conditional overlay-image step.
pub struct BuildInvoker<'a> {
    config: &'a BuildConfig,
    workspace: &'a Workspace,
    logger: BuildLogger,
}

impl<'a> BuildInvoker<'a> {
    pub fn new(config: &'a BuildConfig, workspace: &'a Workspace, logger: BuildLogger) -> Self {
        BuildInvoker {
            config,
            workspace,
            logger,
        }
    }

    /// Merge fragments and produce the working .config.
    ///
    /// A clean build removes the prior output tree first; the build log is
    /// attached (fresh) once the output tree exists again.
    pub async fn configure(&self, clean: bool) -> Result<(), BuildError> {
        let out_dir = self.workspace.out_dir();

        if clean && out_dir.exists() {
            log::info!("Clean build requested, removing {}", out_dir.display());
            std::fs::remove_dir_all(&out_dir)?;
        }
        std::fs::create_dir_all(&out_dir)?;
        self.logger.attach_file(&self.workspace.build_log_path())?;

        merge_defconfig(&self.workspace.source_dir(), self.config)?;

        log::info!("Configuring kernel ({})", self.config.merged_defconfig);
        let mut command = Command::new("make");
        command.current_dir(self.workspace.source_dir());
        command.arg("O=out");
        command.args(kbuild_overrides(self.config));
        command.arg(&self.config.merged_defconfig);
        command.envs(kbuild_env(self.config, self.workspace));

        run_streamed(command, &self.logger, "make defconfig")
            .await
            .map_err(BuildError::ConfigurationFailed)
    }

    /// Full build with job count equal to available CPU parallelism.
    pub async fn compile(&self) -> Result<(), BuildError> {
        let jobs = num_cpus::get();
        log::info!("Building kernel with -j{}", jobs);

        let mut command = Command::new("make");
        command.current_dir(self.workspace.source_dir());
        command.arg("O=out");
        command.arg(format!("-j{}", jobs));
        command.args(kbuild_overrides(self.config));
        command.envs(kbuild_env(self.config, self.workspace));

        run_streamed(command, &self.logger, "make")
            .await
            .map_err(BuildError::BuildFailed)
    }

    /// Runtime-discovered condition for the overlay-image step: every
    /// `*.dtbo` under the boot tree, sorted for a stable mkdtimg argument
    /// order. An empty result means the step is skipped, not failed.
    pub fn find_overlay_blobs(&self) -> Result<Vec<PathBuf>, BuildError> {
        let boot_dir = self.workspace.boot_dir(&self.config.arch);
        let mut blobs = Vec::new();
        if boot_dir.exists() {
            collect_dtbo_files(&boot_dir, &mut blobs)?;
        }
        blobs.sort();
        Ok(blobs)
    }

    /// Bundle the overlay blobs into a single dtbo.img via mkdtimg.
    pub async fn make_overlay_image(&self, blobs: &[PathBuf]) -> Result<PathBuf, BuildError> {
        let image = self.workspace.boot_dir(&self.config.arch).join("dtbo.img");
        log::info!("Creating {} from {} overlay blob(s)", image.display(), blobs.len());

        let mut command = Command::new("mkdtimg");
        command.arg("create");
        command.arg(&image);
        command.arg("--page_size=4096");
        for blob in blobs {
            command.arg(blob);
        }

        run_streamed(command, &self.logger, "mkdtimg")
            .await
            .map_err(BuildError::OverlayImageFailed)?;
        Ok(image)
    }
}

fn collect_dtbo_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_dtbo_files(&path, out)?;
        } else if path.extension().map_or(false, |ext| ext == "dtbo") {
            out.push(path);
        }
    }
    Ok(())
}
