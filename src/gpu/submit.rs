// ============================================================================
// SUBMISSION — the reused primary command buffer and its fence
// ============================================================================

use std::sync::Arc;

use ash::vk;

use super::context::GpuContext;
use crate::error::{Result, VkResultExt};

/// One primary command buffer plus a fence, reused for every image.
///
/// The fence starts signalled and is only reset right before a submit.
pub struct Submission {
    ctx: Arc<GpuContext>,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
    /// A submit went out and has not been waited on yet.
    in_flight: bool,
}

impl Submission {
    pub fn new(ctx: &Arc<GpuContext>) -> Result<Self> {
        let device = ctx.device();
        let alloc = vk::CommandBufferAllocateInfo::default()
            .command_pool(ctx.command_pool())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { device.allocate_command_buffers(&alloc) }.vk("vkAllocateCommandBuffers")?[0];

        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let fence = match unsafe { device.create_fence(&fence_info, None) }.vk("vkCreateFence") {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.free_command_buffers(ctx.command_pool(), &[cmd]) };
                return Err(e);
            }
        };

        Ok(Self {
            ctx: Arc::clone(ctx),
            cmd,
            fence,
            in_flight: false,
        })
    }

    /// Wait out any previous use, reset, and begin recording.
    pub fn begin(&mut self) -> Result<vk::CommandBuffer> {
        self.wait()?;
        let device = self.ctx.device();
        unsafe {
            device
                .reset_command_buffer(self.cmd, vk::CommandBufferResetFlags::empty())
                .vk("vkResetCommandBuffer")?;
            let begin = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(self.cmd, &begin)
                .vk("vkBeginCommandBuffer")?;
        }
        Ok(self.cmd)
    }

    /// End recording and submit; the fence is reset just before the submit.
    pub fn submit(&mut self) -> Result<()> {
        let device = self.ctx.device();
        unsafe {
            device.end_command_buffer(self.cmd).vk("vkEndCommandBuffer")?;
            device.reset_fences(&[self.fence]).vk("vkResetFences")?;
            let submit = vk::SubmitInfo::default().command_buffers(std::slice::from_ref(&self.cmd));
            device
                .queue_submit(self.ctx.queue(), &[submit], self.fence)
                .vk("vkQueueSubmit")?;
        }
        self.in_flight = true;
        Ok(())
    }

    /// Block on the fence, without a timeout, if a submit is outstanding.
    pub fn wait(&mut self) -> Result<()> {
        if self.in_flight {
            unsafe { self.ctx.device().wait_for_fences(&[self.fence], true, u64::MAX) }
                .vk("vkWaitForFences")?;
            self.in_flight = false;
        }
        Ok(())
    }
}

impl Drop for Submission {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            if self.in_flight {
                let _ = device.wait_for_fences(&[self.fence], true, u64::MAX);
            }
            device.destroy_fence(self.fence, None);
            device.free_command_buffers(self.ctx.command_pool(), &[self.cmd]);
        }
    }
}
