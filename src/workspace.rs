//! Workspace layout: every path the pipeline touches, resolved from a single
//! working root.
//!
//! Directories are created lazily on first need and persist across runs; an
//! existing directory is the only cache key (no content or version
//! verification). Concurrent pipelines sharing a root are unsafe: nothing
//! here takes a lock.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Resolves all pipeline paths relative to one working root.
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Anchor a workspace at the given root, creating it if absent.
    pub fn at(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        // Canonicalize so every derived path is absolute and symlink-free.
        let root = root.canonicalize()?;
        Ok(Workspace { root })
    }

    /// The working root itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parent directory of the three toolchain subtrees.
    pub fn toolchains_dir(&self) -> PathBuf {
        self.root.join("toolchains")
    }

    /// Prebuilt Clang toolchain directory.
    pub fn clang_dir(&self) -> PathBuf {
        self.toolchains_dir().join("clang")
    }

    /// Prebuilt aarch64 GCC directory.
    pub fn gcc_aarch64_dir(&self) -> PathBuf {
        self.toolchains_dir().join("gcc-aarch64")
    }

    /// Prebuilt 32-bit arm GCC directory.
    pub fn gcc_arm_dir(&self) -> PathBuf {
        self.toolchains_dir().join("gcc-arm")
    }

    /// Kernel source checkout.
    pub fn source_dir(&self) -> PathBuf {
        self.root.join("kernel")
    }

    /// Kbuild output tree, nested inside the source checkout.
    pub fn out_dir(&self) -> PathBuf {
        self.source_dir().join("out")
    }

    /// Boot artifact directory inside the output tree for a given arch.
    pub fn boot_dir(&self, arch: &str) -> PathBuf {
        self.out_dir().join("arch").join(arch).join("boot")
    }

    /// Combined build log, teed from the make invocation.
    pub fn build_log_path(&self) -> PathBuf {
        self.out_dir().join("build.log")
    }

    /// Flashing template working copy.
    pub fn template_dir(&self) -> PathBuf {
        self.root.join("anykernel")
    }

    /// Final output directory for the archive and log copy.
    pub fn releases_dir(&self) -> PathBuf {
        self.root.join("releases")
    }
}
