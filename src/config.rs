//! Build configuration: remotes, branches, defconfig fragments, kbuild
//! identity strings. Loaded from JSON, every field has a default so a
//! missing config file is not an error.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Full pipeline configuration.
///
/// All remotes and branch names are fixed at configuration time and never
/// re-derived at runtime. The merged defconfig name is overwritten inside
/// the kernel tree on every configure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Gzip tarball of the prebuilt Clang host toolchain.
    pub clang_archive_url: String,

    /// Prebuilt aarch64 GCC repository (shallow-cloned).
    pub gcc_aarch64_url: String,

    /// Prebuilt 32-bit arm GCC repository (shallow-cloned).
    pub gcc_arm_url: String,

    /// Branch used for both GCC clones.
    pub gcc_branch: String,

    /// Kernel fork to build.
    pub kernel_url: String,

    /// Pinned kernel branch.
    pub kernel_branch: String,

    /// Base defconfig fragment, relative to `arch/<arch>/configs/`.
    pub base_defconfig: String,

    /// Device overlay fragment, relative to `arch/<arch>/configs/`.
    /// Concatenated after the base fragment, so its keys win on duplicates.
    pub device_fragment: String,

    /// Name of the merged working defconfig written into
    /// `arch/<arch>/configs/`.
    pub merged_defconfig: String,

    /// Target architecture (kbuild ARCH).
    pub arch: String,

    /// Target sub-architecture (kbuild SUBARCH).
    pub subarch: String,

    /// 64-bit cross compile prefix.
    pub cross_compile: String,

    /// 32-bit cross compile prefix (CROSS_COMPILE_ARM32).
    pub cross_compile_arm32: String,

    /// Clang target triple.
    pub clang_triple: String,

    /// Compiler selection flag passed to kbuild.
    pub cc: String,

    /// KBUILD_BUILD_USER identity string.
    pub build_user: String,

    /// KBUILD_BUILD_HOST identity string.
    pub build_host: String,

    /// Flashing template repository (AnyKernel-style).
    pub template_url: String,

    /// Fixed name the kernel image takes inside the template.
    pub image_name: String,

    /// Prefix of the produced flashable zip.
    pub zip_prefix: String,

    /// Device codename embedded in the zip name.
    pub device: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            clang_archive_url:
                "https://android.googlesource.com/platform/prebuilts/clang/host/linux-x86/+archive/refs/heads/master/clang-r416183b.tar.gz"
                    .to_string(),
            gcc_aarch64_url:
                "https://github.com/LineageOS/android_prebuilts_gcc_linux-x86_aarch64_aarch64-linux-android-4.9.git"
                    .to_string(),
            gcc_arm_url:
                "https://github.com/LineageOS/android_prebuilts_gcc_linux-x86_arm_arm-linux-androideabi-4.9.git"
                    .to_string(),
            gcc_branch: "lineage-19.1".to_string(),
            kernel_url: "https://github.com/kforge/android_kernel_xiaomi_sm6150.git".to_string(),
            kernel_branch: "thirteen".to_string(),
            base_defconfig: "vendor/sm6150-perf_defconfig".to_string(),
            device_fragment: "vendor/sweet.config".to_string(),
            merged_defconfig: "kforge_defconfig".to_string(),
            arch: "arm64".to_string(),
            subarch: "arm64".to_string(),
            cross_compile: "aarch64-linux-android-".to_string(),
            cross_compile_arm32: "arm-linux-androideabi-".to_string(),
            clang_triple: "aarch64-linux-gnu-".to_string(),
            cc: "clang".to_string(),
            build_user: "builder".to_string(),
            build_host: "kforge".to_string(),
            template_url: "https://github.com/osm0sis/AnyKernel3.git".to_string(),
            image_name: "Image.gz".to_string(),
            zip_prefix: "Kforge".to_string(),
            device: "sweet".to_string(),
        }
    }
}

/// Get the global config path: ~/.config/kforge/config.json
pub fn get_global_config_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine home directory".to_string())
    })?;

    Ok(home.join(".config/kforge").join("config.json"))
}

/// Load config from a JSON file.
pub fn load_config_from_file(path: &Path) -> Result<BuildConfig, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!(
                "Configuration file not found at: {}",
                path.display()
            ))
        } else {
            ConfigError::Io(e)
        }
    })?;

    let config: BuildConfig = serde_json::from_str(&content)?;
    Ok(config)
}

/// Save config to a JSON file, creating parent directories as needed.
pub fn save_config_to_file(config: &BuildConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json_content = serde_json::to_string_pretty(config)?;
    fs::write(path, json_content)?;
    Ok(())
}

/// Validate a config path (.json extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "json" => Ok(()),
        Some(ext) => Err(ConfigError::ValidationFailed(format!(
            "Configuration file must have .json extension, got .{}",
            ext.to_string_lossy()
        ))),
        None => Err(ConfigError::ValidationFailed(
            "Configuration file must have .json extension".to_string(),
        )),
    }
}

/// Resolve the effective config: `<root>/kforge.json` if present, else the
/// global config if present, else defaults. An explicit `--config` path must
/// exist and parse.
pub fn resolve_config(
    root: &Path,
    explicit: Option<&Path>,
) -> Result<BuildConfig, ConfigError> {
    let global = get_global_config_path().ok();
    resolve_config_from(root, explicit, global.as_deref())
}

fn resolve_config_from(
    root: &Path,
    explicit: Option<&Path>,
    global: Option<&Path>,
) -> Result<BuildConfig, ConfigError> {
    if let Some(path) = explicit {
        return load_config_from_file(path);
    }

    let local = root.join("kforge.json");
    if local.exists() {
        return load_config_from_file(&local);
    }

    if let Some(global) = global {
        if global.exists() {
            return load_config_from_file(global);
        }
    }

    Ok(BuildConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_complete() {
        let config = BuildConfig::default();
        assert_eq!(config.arch, "arm64");
        assert!(config.clang_archive_url.ends_with(".tar.gz"));
        assert!(!config.kernel_branch.is_empty());
    }

    #[test]
    fn test_config_round_trip() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("config.json");

        let mut config = BuildConfig::default();
        config.device = "alioth".to_string();
        config.kernel_branch = "fourteen".to_string();

        save_config_to_file(&config, &path).expect("save failed");
        let loaded = load_config_from_file(&path).expect("load failed");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"device": "surya"}"#).expect("write failed");

        let loaded = load_config_from_file(&path).expect("load failed");
        assert_eq!(loaded.device, "surya");
        assert_eq!(loaded.arch, BuildConfig::default().arch);
    }

    #[test]
    fn test_validate_config_path_rejects_non_json() {
        assert!(validate_config_path(Path::new("config.toml")).is_err());
        assert!(validate_config_path(Path::new("config")).is_err());
        assert!(validate_config_path(Path::new("config.json")).is_ok());
    }

    #[test]
    fn test_resolve_config_prefers_local_file() {
        let temp = tempdir().expect("Failed to create temp dir");
        let local = temp.path().join("kforge.json");
        std::fs::write(&local, r#"{"device": "local"}"#).expect("write failed");

        let config = resolve_config(temp.path(), None).expect("resolve failed");
        assert_eq!(config.device, "local");
    }

    #[test]
    fn test_resolve_config_falls_back_to_defaults() {
        let temp = tempdir().expect("Failed to create temp dir");
        // No local file and the injected global path does not exist, so the
        // defaults must come back exactly.
        let missing_global = temp.path().join("global.json");
        let config = resolve_config_from(temp.path(), None, Some(&missing_global))
            .expect("resolve failed");
        assert_eq!(config, BuildConfig::default());
    }

    #[test]
    fn test_resolve_config_uses_global_when_no_local() {
        let temp = tempdir().expect("Failed to create temp dir");
        let global = temp.path().join("global.json");
        std::fs::write(&global, r#"{"device": "global"}"#).expect("write failed");

        let config =
            resolve_config_from(temp.path(), None, Some(&global)).expect("resolve failed");
        assert_eq!(config.device, "global");
    }

    #[test]
    fn test_resolve_config_explicit_missing_is_error() {
        let temp = tempdir().expect("Failed to create temp dir");
        let missing = temp.path().join("nope.json");
        assert!(resolve_config(temp.path(), Some(&missing)).is_err());
    }
}
