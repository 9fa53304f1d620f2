// ============================================================================
// GPU BUFFER — fixed-size device buffer with per-instance alignment
// ============================================================================
//
// A buffer holds `instance_count` slots of `instance_size` bytes.  Each slot
// starts on a multiple of `alignment_size`, so a slot can be bound on its own
// as a uniform range.  Host access goes through an explicit map/unmap pair;
// every offset below is measured from the start of the buffer.

use std::sync::Arc;

use ash::vk;

use super::context::GpuContext;
use crate::error::{Result, SharpenError, VkResultExt};

/// Round `instance_size` up to the next multiple of `min_offset_alignment`.
///
/// Vulkan alignments are powers of two; zero means "no constraint".
pub fn aligned_size(instance_size: vk::DeviceSize, min_offset_alignment: vk::DeviceSize) -> vk::DeviceSize {
    if min_offset_alignment > 0 {
        (instance_size + min_offset_alignment - 1) & !(min_offset_alignment - 1)
    } else {
        instance_size
    }
}

/// Reject any access of `len` bytes at `offset` that runs past `size`.
pub fn check_range(offset: vk::DeviceSize, len: vk::DeviceSize, size: vk::DeviceSize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(SharpenError::BufferOverflow { offset, len, size }),
    }
}

struct Mapping {
    ptr: *mut u8,
    offset: vk::DeviceSize,
    len: vk::DeviceSize,
}

pub struct GpuBuffer {
    ctx: Arc<GpuContext>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapping: Option<Mapping>,
    buffer_size: vk::DeviceSize,
    instance_size: vk::DeviceSize,
    instance_count: u32,
    alignment_size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_flags: vk::MemoryPropertyFlags,
}

impl GpuBuffer {
    pub fn new(
        ctx: &Arc<GpuContext>,
        instance_size: vk::DeviceSize,
        instance_count: u32,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
        min_offset_alignment: vk::DeviceSize,
    ) -> Result<Self> {
        let alignment_size = aligned_size(instance_size, min_offset_alignment);
        let buffer_size = alignment_size * vk::DeviceSize::from(instance_count);
        let (buffer, memory) = ctx.create_buffer(buffer_size, usage, memory_flags)?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            buffer,
            memory,
            mapping: None,
            buffer_size,
            instance_size,
            instance_count,
            alignment_size,
            usage,
            memory_flags,
        })
    }

    /// Map `size` bytes starting at `offset`; `vk::WHOLE_SIZE` maps to the end.
    /// Any previous mapping is released first.
    pub fn map(&mut self, size: vk::DeviceSize, offset: vk::DeviceSize) -> Result<()> {
        let len = if size == vk::WHOLE_SIZE {
            self.buffer_size.saturating_sub(offset)
        } else {
            size
        };
        check_range(offset, len, self.buffer_size)?;
        self.unmap();

        let ptr = unsafe {
            self.ctx
                .device()
                .map_memory(self.memory, offset, size, vk::MemoryMapFlags::empty())
        }
        .vk("vkMapMemory")?;
        self.mapping = Some(Mapping {
            ptr: ptr.cast(),
            offset,
            len,
        });
        Ok(())
    }

    pub fn map_whole(&mut self) -> Result<()> {
        self.map(vk::WHOLE_SIZE, 0)
    }

    /// Safe to call when nothing is mapped.
    pub fn unmap(&mut self) {
        if self.mapping.take().is_some() {
            unsafe { self.ctx.device().unmap_memory(self.memory) };
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Host pointer for `len` bytes at buffer `offset`, inside the current mapping.
    fn mapped_ptr(&self, offset: vk::DeviceSize, len: vk::DeviceSize) -> Result<*mut u8> {
        let mapping = self.mapping.as_ref().ok_or(SharpenError::NotMapped)?;
        check_range(offset, len, self.buffer_size)?;
        if offset < mapping.offset {
            return Err(SharpenError::BufferOverflow {
                offset,
                len,
                size: self.buffer_size,
            });
        }
        check_range(offset - mapping.offset, len, mapping.len)?;
        Ok(unsafe { mapping.ptr.add((offset - mapping.offset) as usize) })
    }

    /// Copy `bytes` into mapped memory at buffer `offset`.
    pub fn write(&mut self, bytes: &[u8], offset: vk::DeviceSize) -> Result<()> {
        let dst = self.mapped_ptr(offset, bytes.len() as vk::DeviceSize)?;
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
        Ok(())
    }

    /// Write at offset 0; `bytes` may be shorter than the buffer.
    pub fn write_whole(&mut self, bytes: &[u8]) -> Result<()> {
        self.write(bytes, 0)
    }

    /// Write one instance into slot `index` (at `index * alignment_size`).
    pub fn write_to_index(&mut self, bytes: &[u8], index: u32) -> Result<()> {
        let slot = self.index_offset(index)?;
        if bytes.len() as vk::DeviceSize > self.instance_size {
            return Err(SharpenError::BufferOverflow {
                offset: slot,
                len: bytes.len() as vk::DeviceSize,
                size: self.buffer_size,
            });
        }
        self.write(bytes, slot)
    }

    /// Copy `len` bytes out of mapped memory at buffer `offset`.
    pub fn read(&self, offset: vk::DeviceSize, len: usize) -> Result<Vec<u8>> {
        let src = self.mapped_ptr(offset, len as vk::DeviceSize)?;
        let mut out = vec![0u8; len];
        unsafe { std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), len) };
        Ok(out)
    }

    /// Make host writes visible to the device.  Only needed without HOST_COHERENT.
    pub fn flush(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> Result<()> {
        let range = self.mapped_range(size, offset);
        unsafe { self.ctx.device().flush_mapped_memory_ranges(&[range]) }
            .vk("vkFlushMappedMemoryRanges")
    }

    /// Make device writes visible to the host.  Only needed without HOST_COHERENT.
    pub fn invalidate(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> Result<()> {
        let range = self.mapped_range(size, offset);
        unsafe { self.ctx.device().invalidate_mapped_memory_ranges(&[range]) }
            .vk("vkInvalidateMappedMemoryRanges")
    }

    pub fn flush_index(&self, index: u32) -> Result<()> {
        self.flush(self.alignment_size, self.index_offset(index)?)
    }

    pub fn invalidate_index(&self, index: u32) -> Result<()> {
        self.invalidate(self.alignment_size, self.index_offset(index)?)
    }

    fn mapped_range(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> vk::MappedMemoryRange<'static> {
        vk::MappedMemoryRange::default()
            .memory(self.memory)
            .offset(offset)
            .size(size)
    }

    pub fn descriptor_info(&self, range: vk::DeviceSize, offset: vk::DeviceSize) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset,
            range,
        }
    }

    pub fn descriptor_info_for_index(&self, index: u32) -> Result<vk::DescriptorBufferInfo> {
        Ok(self.descriptor_info(self.alignment_size, self.index_offset(index)?))
    }

    fn index_offset(&self, index: u32) -> Result<vk::DeviceSize> {
        if index >= self.instance_count {
            return Err(SharpenError::BufferOverflow {
                offset: vk::DeviceSize::from(index) * self.alignment_size,
                len: self.alignment_size,
                size: self.buffer_size,
            });
        }
        Ok(vk::DeviceSize::from(index) * self.alignment_size)
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.buffer_size
    }

    pub fn instance_size(&self) -> vk::DeviceSize {
        self.instance_size
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn alignment_size(&self) -> vk::DeviceSize {
        self.alignment_size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn memory_flags(&self) -> vk::MemoryPropertyFlags {
        self.memory_flags
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.unmap();
        let device = self.ctx.device();
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}
