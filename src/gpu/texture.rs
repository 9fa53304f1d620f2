// ============================================================================
// GPU IMAGES — sampled input, storage output, views, layout tracking
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ash::vk;

use super::barrier::{color_subresource_range, record_host_read, record_transition};
use super::buffer::GpuBuffer;
use super::context::GpuContext;
use crate::error::{Result, SharpenError, VkResultExt};

/// Pixel format of every image the sharpen path touches.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Bytes per RGBA8 texel.
pub const BYTES_PER_PIXEL: u32 = 4;

// ============================================================================
// Resource ledger
// ============================================================================

/// Create/destroy counters for images and image views.
///
/// Lets callers (and tests) check that a run released everything it made.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    images_created: AtomicUsize,
    images_destroyed: AtomicUsize,
    views_created: AtomicUsize,
    views_destroyed: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerSnapshot {
    pub images_created: usize,
    pub images_destroyed: usize,
    pub views_created: usize,
    pub views_destroyed: usize,
}

impl LedgerSnapshot {
    pub fn live_images(&self) -> usize {
        self.images_created.saturating_sub(self.images_destroyed)
    }

    pub fn live_views(&self) -> usize {
        self.views_created.saturating_sub(self.views_destroyed)
    }
}

impl ResourceLedger {
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            images_created: self.images_created.load(Ordering::Relaxed),
            images_destroyed: self.images_destroyed.load(Ordering::Relaxed),
            views_created: self.views_created.load(Ordering::Relaxed),
            views_destroyed: self.views_destroyed.load(Ordering::Relaxed),
        }
    }

    fn image_created(&self) {
        self.images_created.fetch_add(1, Ordering::Relaxed);
    }

    fn image_destroyed(&self) {
        self.images_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    fn view_created(&self) {
        self.views_created.fetch_add(1, Ordering::Relaxed);
    }

    fn view_destroyed(&self) {
        self.views_destroyed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Minimum slice length for `height` rows of `width` texels at `row_pitch` bytes.
///
/// The last row only needs its texels, not the full pitch.
pub fn required_bytes(width: u32, height: u32, row_pitch: u32) -> Result<usize> {
    let row_bytes = width as usize * BYTES_PER_PIXEL as usize;
    if (row_pitch as usize) < row_bytes {
        return Err(SharpenError::PixelData(format!(
            "row pitch {} is smaller than one row ({} bytes)",
            row_pitch, row_bytes
        )));
    }
    if row_pitch % BYTES_PER_PIXEL != 0 {
        return Err(SharpenError::PixelData(format!(
            "row pitch {} is not a whole number of texels",
            row_pitch
        )));
    }
    if height == 0 {
        return Ok(0);
    }
    Ok(row_pitch as usize * (height as usize - 1) + row_bytes)
}

// ============================================================================
// GpuImage
// ============================================================================

/// A device-local 2D image with its own memory and a tracked layout.
pub struct GpuImage {
    ctx: Arc<GpuContext>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    format: vk::Format,
    width: u32,
    height: u32,
    layout: vk::ImageLayout,
}

impl GpuImage {
    /// Create a sampled image and fill it with `pixels`.
    ///
    /// The upload goes through a host-visible staging buffer in a single
    /// one-shot submission; the image ends in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn sampled(
        ctx: &Arc<GpuContext>,
        width: u32,
        height: u32,
        format: vk::Format,
        pixels: &[u8],
        row_pitch: u32,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(SharpenError::EmptyImage { width, height });
        }
        let needed = required_bytes(width, height, row_pitch)?;
        if pixels.len() < needed {
            return Err(SharpenError::PixelData(format!(
                "{}x{} image with pitch {} needs {} bytes, got {}",
                width,
                height,
                row_pitch,
                needed,
                pixels.len()
            )));
        }

        let mut staging = GpuBuffer::new(
            ctx,
            needed as vk::DeviceSize,
            1,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            0,
        )?;
        staging.map_whole()?;
        staging.write_whole(&pixels[..needed])?;
        staging.unmap();

        let mut image = Self::allocate(
            ctx,
            width,
            height,
            format,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
        )?;

        ctx.one_shot(|device, cmd| {
            image.transition(device, cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: row_pitch / BYTES_PER_PIXEL,
                buffer_image_height: 0,
                image_subresource: color_subresource_layers(),
                image_offset: vk::Offset3D::default(),
                image_extent: image.extent(),
            };
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer(),
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            image.transition(device, cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        })?;

        Ok(image)
    }

    /// Create a storage image for kernel output.  Left in `UNDEFINED`.
    pub fn storage(ctx: &Arc<GpuContext>, width: u32, height: u32, format: vk::Format) -> Result<Self> {
        Self::allocate(
            ctx,
            width,
            height,
            format,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::STORAGE,
        )
    }

    fn allocate(
        ctx: &Arc<GpuContext>,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(SharpenError::EmptyImage { width, height });
        }
        let device = ctx.device();
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&info, None) }.vk("vkCreateImage")?;

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = match ctx.allocate_memory(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) }.vk("vkBindImageMemory") {
            unsafe {
                device.free_memory(memory, None);
                device.destroy_image(image, None);
            }
            return Err(e);
        }

        ctx.ledger().image_created();
        Ok(Self {
            ctx: Arc::clone(ctx),
            image,
            memory,
            format,
            width,
            height,
            layout: vk::ImageLayout::UNDEFINED,
        })
    }

    /// 2D color view over the single mip and layer.
    pub fn create_view(&self) -> Result<GpuImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .subresource_range(color_subresource_range());
        let view = unsafe { self.ctx.device().create_image_view(&info, None) }
            .vk("vkCreateImageView")?;
        self.ctx.ledger().view_created();
        Ok(GpuImageView {
            ctx: Arc::clone(&self.ctx),
            view,
        })
    }

    /// Record a barrier into `cmd` moving this image to `to`.
    ///
    /// The tracked layout is updated at record time, so the command buffer
    /// must be submitted before the image is used in another submission.
    pub fn transition(&mut self, device: &ash::Device, cmd: vk::CommandBuffer, to: vk::ImageLayout) -> Result<()> {
        if self.layout == to {
            return Ok(());
        }
        record_transition(device, cmd, self.image, self.layout, to)?;
        self.layout = to;
        Ok(())
    }

    /// Record a copy of the whole image into `buffer` (tightly packed rows),
    /// followed by a barrier that releases the written bytes to host reads.
    pub fn copy_to_buffer(&self, device: &ash::Device, cmd: vk::CommandBuffer, buffer: &GpuBuffer) -> Result<()> {
        if self.layout != vk::ImageLayout::TRANSFER_SRC_OPTIMAL {
            return Err(SharpenError::Sequence {
                current: layout_name(self.layout),
                attempted: "copy_to_buffer",
            });
        }
        let needed = self.byte_size();
        if buffer.size() < needed {
            return Err(SharpenError::BufferOverflow {
                offset: 0,
                len: needed,
                size: buffer.size(),
            });
        }
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: color_subresource_layers(),
            image_offset: vk::Offset3D::default(),
            image_extent: self.extent(),
        };
        unsafe {
            device.cmd_copy_image_to_buffer(
                cmd,
                self.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                buffer.buffer(),
                &[region],
            );
        }
        record_host_read(device, cmd, buffer.buffer(), needed);
        Ok(())
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Tightly packed RGBA8 size.
    pub fn byte_size(&self) -> vk::DeviceSize {
        vk::DeviceSize::from(self.width) * vk::DeviceSize::from(self.height) * vk::DeviceSize::from(BYTES_PER_PIXEL)
    }

    fn extent(&self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: 1,
        }
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
        self.ctx.ledger().image_destroyed();
    }
}

/// An image view.  Must be dropped before the image it was created from.
pub struct GpuImageView {
    ctx: Arc<GpuContext>,
    view: vk::ImageView,
}

impl GpuImageView {
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for GpuImageView {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_image_view(self.view, None) };
        self.ctx.ledger().view_destroyed();
    }
}

fn color_subresource_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn layout_name(layout: vk::ImageLayout) -> &'static str {
    match layout {
        vk::ImageLayout::UNDEFINED => "UNDEFINED",
        vk::ImageLayout::GENERAL => "GENERAL",
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => "TRANSFER_SRC_OPTIMAL",
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => "TRANSFER_DST_OPTIMAL",
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => "SHADER_READ_ONLY_OPTIMAL",
        _ => "other layout",
    }
}
