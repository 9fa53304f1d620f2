// ============================================================================
// LAYOUT TRANSITIONS — access masks and pipeline stages per layout pair
// ============================================================================
//
// Only the pairs the sharpen path actually walks through are listed.  Any
// other pair is a sequencing bug and is reported as such instead of being
// guessed at with a full-pipeline barrier.

use ash::vk;

use crate::error::{Result, SharpenError};

/// Access masks and stages for one image memory barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionInfo {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Every layout pair `transition_info` accepts.
pub const SUPPORTED_TRANSITIONS: [(vk::ImageLayout, vk::ImageLayout); 9] = [
    (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
    (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
    (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
    (vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
    (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
    (vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL),
    (vk::ImageLayout::GENERAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
    (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::ImageLayout::GENERAL),
    (vk::ImageLayout::UNDEFINED, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
];

/// Look up the barrier parameters for `from -> to`.
pub fn transition_info(from: vk::ImageLayout, to: vk::ImageLayout) -> Result<TransitionInfo> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let (src_access, dst_access, src_stage, dst_stage) = match (from, to) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
            (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER)
        }
        (L::UNDEFINED, L::TRANSFER_SRC_OPTIMAL) => {
            (A::empty(), A::TRANSFER_READ, S::TOP_OF_PIPE, S::TRANSFER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::SHADER_READ, S::TRANSFER, S::COMPUTE_SHADER)
        }
        (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_READ, A::SHADER_READ, S::TRANSFER, S::COMPUTE_SHADER)
        }
        (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => {
            (A::SHADER_READ, A::TRANSFER_READ, S::COMPUTE_SHADER, S::TRANSFER)
        }
        (L::UNDEFINED, L::GENERAL) => (
            A::empty(),
            A::SHADER_READ | A::SHADER_WRITE,
            S::TOP_OF_PIPE,
            S::COMPUTE_SHADER,
        ),
        (L::GENERAL, L::TRANSFER_SRC_OPTIMAL) => {
            (A::SHADER_WRITE, A::TRANSFER_READ, S::COMPUTE_SHADER, S::TRANSFER)
        }
        (L::SHADER_READ_ONLY_OPTIMAL, L::GENERAL) => (
            A::SHADER_READ,
            A::SHADER_READ | A::SHADER_WRITE,
            S::COMPUTE_SHADER,
            S::COMPUTE_SHADER,
        ),
        (L::UNDEFINED, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::empty(), A::SHADER_READ, S::TOP_OF_PIPE, S::COMPUTE_SHADER)
        }
        _ => return Err(SharpenError::UnsupportedTransition { from, to }),
    };

    Ok(TransitionInfo {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

/// Record a single-image, color-aspect layout barrier into `cmd`.
pub fn record_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    from: vk::ImageLayout,
    to: vk::ImageLayout,
) -> Result<()> {
    let info = transition_info(from, to)?;
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(from)
        .new_layout(to)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_subresource_range())
        .src_access_mask(info.src_access)
        .dst_access_mask(info.dst_access);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            info.src_stage,
            info.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
    Ok(())
}

/// Buffer barrier that makes a transfer write to `buffer` visible to host reads.
pub fn host_read_barrier(buffer: vk::Buffer, size: vk::DeviceSize) -> vk::BufferMemoryBarrier<'static> {
    vk::BufferMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::HOST_READ)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(size)
}

/// Record [`host_read_barrier`] from the transfer stage to the host stage.
pub fn record_host_read(device: &ash::Device, cmd: vk::CommandBuffer, buffer: vk::Buffer, size: vk::DeviceSize) {
    let barrier = host_read_barrier(buffer, size);
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::HOST,
            vk::DependencyFlags::empty(),
            &[],
            &[barrier],
            &[],
        );
    }
}

/// Mip 0, layer 0, color aspect.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
