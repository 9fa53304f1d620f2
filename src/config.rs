// ============================================================================
// RUN CONFIGURATION — defaults, environment overrides, CLI overrides
// ============================================================================

use std::path::PathBuf;

/// Environment variable naming an extra kernel directory (searched first).
pub const KERNEL_DIR_ENV: &str = "VKSHARPEN_KERNEL_DIR";
/// Environment variable enabling validation layers when set to `1`/`true`.
pub const VALIDATION_ENV: &str = "VKSHARPEN_VALIDATION";

/// Directories probed for the kernel binary when nothing else is configured.
pub const DEFAULT_KERNEL_DIRS: [&str; 3] = ["NIS", "../../../NIS", "."];

/// Which compilation of the NIS sharpen kernel to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelVariant {
    /// HLSL source compiled to SPIR-V (`nis_sharpen.spv`).
    #[default]
    Hlsl,
    /// GLSL source compiled to SPIR-V (`nis_sharpen_glsl.spv`).
    Glsl,
}

impl KernelVariant {
    pub fn file_name(self) -> &'static str {
        match self {
            KernelVariant::Hlsl => "nis_sharpen.spv",
            KernelVariant::Glsl => "nis_sharpen_glsl.spv",
        }
    }
}

/// Everything needed to build the GPU context and the sharpen pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SharpenConfig {
    /// Ordered kernel search path; the first directory holding the kernel wins.
    pub kernel_dirs: Vec<PathBuf>,
    pub kernel_variant: KernelVariant,
    /// Enable `VK_LAYER_KHRONOS_validation` and route its messages to the log.
    pub validation: bool,
}

impl Default for SharpenConfig {
    fn default() -> Self {
        Self {
            kernel_dirs: DEFAULT_KERNEL_DIRS.iter().map(PathBuf::from).collect(),
            kernel_variant: KernelVariant::default(),
            validation: false,
        }
    }
}

impl SharpenConfig {
    /// Defaults, then whatever the process environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply environment overrides through a lookup function so callers and
    /// tests don't depend on the real process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(KERNEL_DIR_ENV).filter(|d| !d.is_empty()) {
            self.kernel_dirs.insert(0, PathBuf::from(dir));
        }
        if let Some(flag) = lookup(VALIDATION_ENV) {
            self.validation = matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Prepend directories (CLI `--kernel-dir`), keeping their relative order.
    pub fn prepend_kernel_dirs(&mut self, dirs: &[PathBuf]) {
        for (i, dir) in dirs.iter().enumerate() {
            self.kernel_dirs.insert(i, dir.clone());
        }
    }
}
