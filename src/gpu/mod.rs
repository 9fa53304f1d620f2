// ============================================================================
// GPU MODULE — Vulkan compute path for the NIS sharpen kernel
// ============================================================================
//
// Architecture:
//   context.rs — instance, device, compute queue, command/descriptor pools
//   buffer.rs  — aligned host-mappable buffers (config record, staging)
//   barrier.rs — supported image layout transitions
//   texture.rs — sampled/storage images, views, resource ledger
//   nis.rs     — NisConfig record and per-vendor block sizes
//   compute.rs — kernel loading, descriptor layout, dispatch recording
//   submit.rs  — reused command buffer + fence
// ============================================================================

pub mod barrier;
pub mod buffer;
pub mod compute;
pub mod context;
pub mod nis;
pub mod submit;
pub mod texture;

pub use compute::SharpenPipeline;
pub use context::GpuContext;
pub use submit::Submission;
pub use texture::{GpuImage, GpuImageView, LedgerSnapshot, TEXTURE_FORMAT};
