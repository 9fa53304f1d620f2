// ============================================================================
// SHARPEN PIPELINE — kernel loading, descriptor layout, dispatch recording
// ============================================================================
//
// Binding contract with the NIS sharpen kernel (set 0, compute stage):
//   0  uniform buffer   NisConfig
//   1  sampler          immutable, linear, clamp-to-edge
//   2  sampled image    input,  SHADER_READ_ONLY_OPTIMAL
//   3  storage image    output, GENERAL

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;

use super::buffer::GpuBuffer;
use super::context::GpuContext;
use super::nis::{BlockSize, GpuArchitecture, HdrMode, NisConfig};
use crate::config::SharpenConfig;
use crate::error::{Result, SharpenError, VkResultExt};
use crate::log_info;

const CONFIG_BINDING: u32 = 0;
const SAMPLER_BINDING: u32 = 1;
const INPUT_BINDING: u32 = 2;
const OUTPUT_BINDING: u32 = 3;

/// Return the first `dir/name` that exists, in search order.
pub fn locate_kernel(dirs: &[PathBuf], name: &str) -> Result<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| SharpenError::KernelNotFound {
            name: name.to_string(),
            searched: dirs.to_vec(),
        })
}

/// Read a SPIR-V binary as words, checking size and magic number.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file = File::open(path)?;
    ash::util::read_spv(&mut file).map_err(|source| SharpenError::KernelInvalid {
        path: path.to_path_buf(),
        source,
    })
}

/// Workgroup counts covering a `width` x `height` output with `block`-sized tiles.
pub fn dispatch_grid(width: u32, height: u32, block: BlockSize) -> [u32; 3] {
    [width.div_ceil(block.width), height.div_ceil(block.height), 1]
}

/// The NIS sharpen compute pipeline and everything bound to it.
///
/// Built in one go by [`SharpenPipeline::new`]; if any step fails the
/// partially built pipeline is dropped and only the created handles are
/// destroyed.
pub struct SharpenPipeline {
    ctx: Arc<GpuContext>,
    shader_module: vk::ShaderModule,
    sampler: vk::Sampler,
    set_layout: vk::DescriptorSetLayout,
    descriptor_set: vk::DescriptorSet,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    config_buffer: Option<GpuBuffer>,
    config: NisConfig,
    block: BlockSize,
    output_width: u32,
    output_height: u32,
}

impl SharpenPipeline {
    pub fn new(ctx: &Arc<GpuContext>, config: &SharpenConfig) -> Result<Self> {
        let architecture = GpuArchitecture::from_vendor_id(ctx.properties().vendor_id);
        let block = architecture.sharpen_block();
        log_info!(
            "[GPU] NIS profile {:?}: block {}x{}, thread group {}",
            architecture,
            block.width,
            block.height,
            block.thread_group
        );

        let kernel_path = locate_kernel(&config.kernel_dirs, config.kernel_variant.file_name())?;
        let code = load_spirv(&kernel_path)?;
        log_info!("[GPU] sharpen kernel: {}", kernel_path.display());

        let mut pipeline = Self {
            ctx: Arc::clone(ctx),
            shader_module: vk::ShaderModule::null(),
            sampler: vk::Sampler::null(),
            set_layout: vk::DescriptorSetLayout::null(),
            descriptor_set: vk::DescriptorSet::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            config_buffer: None,
            config: NisConfig::default(),
            block,
            output_width: 1,
            output_height: 1,
        };
        let device = ctx.device();

        let module_info = vk::ShaderModuleCreateInfo::default().code(&code);
        pipeline.shader_module =
            unsafe { device.create_shader_module(&module_info, None) }.vk("vkCreateShaderModule")?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .min_lod(-1000.0)
            .max_lod(1000.0)
            .max_anisotropy(1.0);
        pipeline.sampler =
            unsafe { device.create_sampler(&sampler_info, None) }.vk("vkCreateSampler")?;

        let immutable_samplers = [pipeline.sampler];
        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(CONFIG_BINDING)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE),
            vk::DescriptorSetLayoutBinding::default()
                .binding(SAMPLER_BINDING)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .immutable_samplers(&immutable_samplers),
            vk::DescriptorSetLayoutBinding::default()
                .binding(INPUT_BINDING)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE),
            vk::DescriptorSetLayoutBinding::default()
                .binding(OUTPUT_BINDING)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE),
        ];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        pipeline.set_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .vk("vkCreateDescriptorSetLayout")?;

        let set_layouts = [pipeline.set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(ctx.descriptor_pool())
            .set_layouts(&set_layouts);
        pipeline.descriptor_set = unsafe { device.allocate_descriptor_sets(&alloc_info) }
            .vk("vkAllocateDescriptorSets")?[0];

        let mut config_buffer = GpuBuffer::new(
            ctx,
            std::mem::size_of::<NisConfig>() as vk::DeviceSize,
            1,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ctx.properties().limits.min_uniform_buffer_offset_alignment,
        )?;
        config_buffer.map_whole()?;
        let buffer_info = [config_buffer.descriptor_info_for_index(0)?];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(pipeline.descriptor_set)
            .dst_binding(CONFIG_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info);
        unsafe { device.update_descriptor_sets(&[write], &[]) };
        pipeline.config_buffer = Some(config_buffer);

        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        pipeline.pipeline_layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .vk("vkCreatePipelineLayout")?;

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(pipeline.shader_module)
            .name(c"main");
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(pipeline.pipeline_layout);
        pipeline.pipeline = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, result)| SharpenError::Vulkan {
            call: "vkCreateComputePipelines",
            result,
        })?[0];

        Ok(pipeline)
    }

    /// Recompute the kernel parameters for a full-image sharpen at
    /// `sharpness` (0.0..=1.0) and remember the output extent.
    pub fn update(&mut self, sharpness: f32, width: u32, height: u32) -> Result<()> {
        self.config = NisConfig::sharpen(sharpness, width, height, HdrMode::None)?;
        self.output_width = width;
        self.output_height = height;
        Ok(())
    }

    /// Upload the parameters, point bindings 2/3 at the given views and
    /// record the dispatch into `cmd`.
    ///
    /// The config buffer is written from the host immediately, so `cmd`
    /// must be submitted and completed before the next `record_dispatch`.
    pub fn record_dispatch(
        &mut self,
        cmd: vk::CommandBuffer,
        input_view: vk::ImageView,
        output_view: vk::ImageView,
    ) -> Result<()> {
        let buffer = self.config_buffer.as_mut().ok_or(SharpenError::NotMapped)?;
        buffer.write_to_index(self.config.as_bytes(), 0)?;

        let device = self.ctx.device();
        let input_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: input_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let output_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: output_view,
            image_layout: vk::ImageLayout::GENERAL,
        }];
        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(self.descriptor_set)
                .dst_binding(INPUT_BINDING)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .image_info(&input_info),
            vk::WriteDescriptorSet::default()
                .dst_set(self.descriptor_set)
                .dst_binding(OUTPUT_BINDING)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&output_info),
        ];

        let [gx, gy, gz] = dispatch_grid(self.output_width, self.output_height, self.block);
        unsafe {
            device.update_descriptor_sets(&writes, &[]);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline_layout,
                0,
                &[self.descriptor_set],
                &[],
            );
            device.cmd_dispatch(cmd, gx, gy, gz);
        }
        Ok(())
    }

    pub fn config(&self) -> &NisConfig {
        &self.config
    }

    pub fn block_size(&self) -> BlockSize {
        self.block
    }

    pub fn output_extent(&self) -> (u32, u32) {
        (self.output_width, self.output_height)
    }
}

impl Drop for SharpenPipeline {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            if self.descriptor_set != vk::DescriptorSet::null() {
                let _ = device.free_descriptor_sets(self.ctx.descriptor_pool(), &[self.descriptor_set]);
            }
            device.destroy_descriptor_set_layout(self.set_layout, None);
            device.destroy_sampler(self.sampler, None);
            device.destroy_shader_module(self.shader_module, None);
        }
        // config_buffer unmaps and frees itself.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: BlockSize = BlockSize {
        width: 32,
        height: 32,
        thread_group: 128,
    };

    #[test]
    fn grid_rounds_up() {
        assert_eq!(dispatch_grid(1, 1, BLOCK), [1, 1, 1]);
        assert_eq!(dispatch_grid(32, 32, BLOCK), [1, 1, 1]);
        assert_eq!(dispatch_grid(33, 64, BLOCK), [2, 2, 1]);
        assert_eq!(dispatch_grid(1920, 1080, BLOCK), [60, 34, 1]);
    }

    #[test]
    fn kernel_search_takes_first_hit() {
        let root = std::env::temp_dir().join(format!("vksharpen-locate-{}", std::process::id()));
        let first = root.join("first");
        let second = root.join("second");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        std::fs::write(second.join("k.spv"), [0u8; 4]).unwrap();

        let dirs = vec![first.clone(), second.clone()];
        assert_eq!(locate_kernel(&dirs, "k.spv").unwrap(), second.join("k.spv"));

        std::fs::write(first.join("k.spv"), [0u8; 4]).unwrap();
        assert_eq!(locate_kernel(&dirs, "k.spv").unwrap(), first.join("k.spv"));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_kernel_lists_search_path() {
        let dirs = vec![PathBuf::from("/nonexistent/a"), PathBuf::from("/nonexistent/b")];
        match locate_kernel(&dirs, "nis_sharpen.spv") {
            Err(SharpenError::KernelNotFound { name, searched }) => {
                assert_eq!(name, "nis_sharpen.spv");
                assert_eq!(searched, dirs);
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn spirv_magic_is_checked() {
        let path = std::env::temp_dir().join(format!("vksharpen-bad-{}.spv", std::process::id()));
        std::fs::write(&path, [1u8, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert!(matches!(load_spirv(&path), Err(SharpenError::KernelInvalid { .. })));

        // Truncated: not a multiple of four bytes.
        std::fs::write(&path, [0x03u8, 0x02, 0x23]).unwrap();
        assert!(matches!(load_spirv(&path), Err(SharpenError::KernelInvalid { .. })));

        let mut good = 0x0723_0203u32.to_le_bytes().to_vec();
        good.extend_from_slice(&[0u8; 16]);
        std::fs::write(&path, &good).unwrap();
        assert_eq!(load_spirv(&path).unwrap().len(), 5);
        std::fs::remove_file(&path).unwrap();
    }
}
