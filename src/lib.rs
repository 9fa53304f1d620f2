//! GPU image sharpening with the NVIDIA Image Scaling (NIS) sharpen kernel,
//! dispatched on a Vulkan compute queue.
//!
//! The usual entry point is [`sharpen::Sharpener`] on top of a shared
//! [`gpu::GpuContext`]; [`cli`] wraps both for batch use.

pub mod cli;
pub mod config;
pub mod error;
pub mod gpu;
pub mod io;
pub mod logger;
pub mod sharpen;

pub use config::SharpenConfig;
pub use error::{Result, SharpenError};
pub use io::RgbaPixels;
pub use sharpen::{Sharpener, Sharpness};
