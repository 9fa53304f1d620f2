// ============================================================================
// ERRORS — one taxonomy for every failure the sharpening run can hit
// ============================================================================
//
// Nothing here is retryable. Every variant propagates with `?` to the CLI,
// which aborts the run (or, with --keep-going, skips the current file).

use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SharpenError>;

#[derive(Debug, Error)]
pub enum SharpenError {
    #[error("failed to load the Vulkan loader: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("no Vulkan physical devices found")]
    NoPhysicalDevice,

    #[error("no physical device exposes a compute queue with RGBA8 storage support")]
    NoSuitableDevice,

    #[error("validation layer {0} requested but not available")]
    MissingLayer(String),

    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("no memory type matches bits {type_bits:#x} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("buffer is not mapped")]
    NotMapped,

    #[error("access of {len} bytes at offset {offset} exceeds {size}-byte buffer")]
    BufferOverflow { offset: u64, len: u64, size: u64 },

    #[error("pixel data: {0}")]
    PixelData(String),

    #[error("image has zero extent ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("unsupported layout transition {from:?} -> {to:?}")]
    UnsupportedTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },

    #[error("processing step {attempted} is not legal after {current}")]
    Sequence {
        current: &'static str,
        attempted: &'static str,
    },

    #[error("kernel binary {name} not found in {searched:?}")]
    KernelNotFound { name: String, searched: Vec<PathBuf> },

    #[error("kernel binary {path} is not valid SPIR-V: {source}")]
    KernelInvalid {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("sharpness {0} is outside 0..=100")]
    InvalidSharpness(f32),

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse failure class, used for log tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Initialization,
    Resource,
    Sequencing,
    Kernel,
    Input,
}

impl SharpenError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SharpenError::Loader(_)
            | SharpenError::NoPhysicalDevice
            | SharpenError::NoSuitableDevice
            | SharpenError::MissingLayer(_) => ErrorCategory::Initialization,
            SharpenError::Vulkan { .. }
            | SharpenError::NoMemoryType { .. }
            | SharpenError::NotMapped
            | SharpenError::BufferOverflow { .. }
            | SharpenError::PixelData(_)
            | SharpenError::EmptyImage { .. } => ErrorCategory::Resource,
            SharpenError::UnsupportedTransition { .. } | SharpenError::Sequence { .. } => {
                ErrorCategory::Sequencing
            }
            SharpenError::KernelNotFound { .. } | SharpenError::KernelInvalid { .. } => {
                ErrorCategory::Kernel
            }
            SharpenError::InvalidSharpness(_)
            | SharpenError::Decode { .. }
            | SharpenError::Encode { .. }
            | SharpenError::Io(_) => ErrorCategory::Input,
        }
    }
}

/// Attach the name of the failing Vulkan entry point to a raw `vk::Result`.
pub trait VkResultExt<T> {
    fn vk(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn vk(self, call: &'static str) -> Result<T> {
        self.map_err(|result| SharpenError::Vulkan { call, result })
    }
}
