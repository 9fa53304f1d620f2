// ============================================================================
// GPU CONTEXT — Vulkan instance, device, compute queue, shared pools
// ============================================================================
//
// Created once per run and shared through `Arc`.  Every other GPU object
// (buffers, images, the pipeline, the submission handle) keeps an
// `Arc<GpuContext>`, so the device can never be destroyed while something
// allocated from it is still alive.

use std::ffi::{CStr, c_char, c_void};
use std::sync::Arc;

use ash::vk;

use super::texture::{ResourceLedger, TEXTURE_FORMAT};
use crate::config::SharpenConfig;
use crate::error::{Result, SharpenError, VkResultExt};
use crate::{log_err, log_info, log_warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Slots reserved per descriptor type in the shared pool.
const DESCRIPTOR_POOL_SLOTS: u32 = 1000;

const DESCRIPTOR_POOL_TYPES: [vk::DescriptorType; 11] = [
    vk::DescriptorType::SAMPLER,
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::DescriptorType::SAMPLED_IMAGE,
    vk::DescriptorType::STORAGE_IMAGE,
    vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
    vk::DescriptorType::STORAGE_TEXEL_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER,
    vk::DescriptorType::STORAGE_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
    vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
    vk::DescriptorType::INPUT_ATTACHMENT,
];

/// Format features the sharpen textures need with optimal tiling.
const REQUIRED_FORMAT_FEATURES: vk::FormatFeatureFlags = vk::FormatFeatureFlags::from_raw(
    vk::FormatFeatureFlags::SAMPLED_IMAGE.as_raw() | vk::FormatFeatureFlags::STORAGE_IMAGE.as_raw(),
);

/// Loader + instance (+ optional validation messenger).  Destroyed last.
struct InstanceHandle {
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Drop for InstanceHandle {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

struct DeviceHandle(ash::Device);

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        unsafe { self.0.destroy_device(None) };
    }
}

/// Holds the core Vulkan objects shared across the whole run.
pub struct GpuContext {
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    queue: vk::Queue,
    queue_family_index: u32,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device_name: String,
    ledger: ResourceLedger,
    // Declaration order is drop order: the device goes before the instance.
    device: DeviceHandle,
    instance: InstanceHandle,
}

impl GpuContext {
    /// Bring up Vulkan: instance, first compute-capable device, its queue,
    /// the command pool and the shared descriptor pool.
    ///
    /// Any failure is fatal for the run; whatever was already created is
    /// released before the error is returned.
    pub fn new(config: &SharpenConfig) -> Result<Arc<Self>> {
        let instance = create_instance(config)?;
        let (physical_device, queue_family_index) = select_physical_device(&instance.instance)?;

        let (properties, memory_properties) = unsafe {
            (
                instance.instance.get_physical_device_properties(physical_device),
                instance.instance.get_physical_device_memory_properties(physical_device),
            )
        };
        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown device".to_string());
        log_info!(
            "[GPU] physical device: {} (vendor {:#06x}, queue family {})",
            device_name,
            properties.vendor_id,
            queue_family_index
        );

        let device = create_logical_device(&instance.instance, physical_device, queue_family_index)?;
        let queue = unsafe { device.0.get_device_queue(queue_family_index, 0) };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool =
            unsafe { device.0.create_command_pool(&pool_info, None) }.vk("vkCreateCommandPool")?;

        let descriptor_pool = match create_descriptor_pool(&device.0) {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.0.destroy_command_pool(command_pool, None) };
                return Err(e);
            }
        };

        Ok(Arc::new(Self {
            command_pool,
            descriptor_pool,
            queue,
            queue_family_index,
            physical_device,
            properties,
            memory_properties,
            device_name,
            ledger: ResourceLedger::default(),
            device,
            instance,
        }))
    }

    pub fn device(&self) -> &ash::Device {
        &self.device.0
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.descriptor_pool
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Create/destroy counters for images and views.
    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// Index of the first memory type allowed by `type_bits` that has all of `flags`.
    pub fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Result<u32> {
        memory_type_index(&self.memory_properties, type_bits, flags)
            .ok_or(SharpenError::NoMemoryType { type_bits, flags })
    }

    /// Allocate memory satisfying `requirements` from a type with `flags`.
    pub fn allocate_memory(
        &self,
        requirements: vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        let index = self.find_memory_type(requirements.memory_type_bits, flags)?;
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(index);
        unsafe { self.device().allocate_memory(&info, None) }.vk("vkAllocateMemory")
    }

    /// Create a buffer with its own bound allocation.  Nothing leaks if a
    /// later step fails.
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let device = self.device();
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&info, None) }.vk("vkCreateBuffer")?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory = match self.allocate_memory(requirements, flags) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) }.vk("vkBindBufferMemory") {
            unsafe {
                device.free_memory(memory, None);
                device.destroy_buffer(buffer, None);
            }
            return Err(e);
        }

        Ok((buffer, memory))
    }

    /// Record, submit and wait for a throwaway command buffer.
    ///
    /// Used for transfer work outside the main dispatch (uploads, readback).
    /// Blocks on `vkQueueWaitIdle`; the command buffer is freed on every path.
    pub fn one_shot<T>(
        &self,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer) -> Result<T>,
    ) -> Result<T> {
        let device = self.device();
        let alloc = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { device.allocate_command_buffers(&alloc) }.vk("vkAllocateCommandBuffers")?[0];

        let result = self.record_and_wait(cmd, record);
        unsafe { device.free_command_buffers(self.command_pool, &[cmd]) };
        result
    }

    fn record_and_wait<T>(
        &self,
        cmd: vk::CommandBuffer,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer) -> Result<T>,
    ) -> Result<T> {
        let device = self.device();
        let begin = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(cmd, &begin) }.vk("vkBeginCommandBuffer")?;

        let value = record(device, cmd)?;

        unsafe { device.end_command_buffer(cmd) }.vk("vkEndCommandBuffer")?;
        let submit = vk::SubmitInfo::default().command_buffers(std::slice::from_ref(&cmd));
        unsafe {
            device
                .queue_submit(self.queue, &[submit], vk::Fence::null())
                .vk("vkQueueSubmit")?;
            device.queue_wait_idle(self.queue).vk("vkQueueWaitIdle")?;
        }
        Ok(value)
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        let device = &self.device.0;
        unsafe {
            if let Err(e) = device.device_wait_idle() {
                log_warn!("[GPU] vkDeviceWaitIdle during shutdown: {}", e);
            }
            device.destroy_command_pool(self.command_pool, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);
        }
        let snapshot = self.ledger.snapshot();
        if snapshot.live_images() != 0 || snapshot.live_views() != 0 {
            log_err!("[GPU] context destroyed with live resources: {:?}", snapshot);
        } else {
            log_info!("[GPU] context destroyed ({:?})", snapshot);
        }
    }
}

// ============================================================================
// Construction helpers
// ============================================================================

fn create_instance(config: &SharpenConfig) -> Result<InstanceHandle> {
    let entry = unsafe { ash::Entry::load() }?;

    let mut layers: Vec<*const c_char> = Vec::new();
    if config.validation {
        let available = unsafe { entry.enumerate_instance_layer_properties() }
            .vk("vkEnumerateInstanceLayerProperties")?;
        let present = available
            .iter()
            .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));
        if !present {
            return Err(SharpenError::MissingLayer(
                VALIDATION_LAYER.to_string_lossy().into_owned(),
            ));
        }
        layers.push(VALIDATION_LAYER.as_ptr());
    }

    let available_extensions = unsafe { entry.enumerate_instance_extension_properties(None) }
        .vk("vkEnumerateInstanceExtensionProperties")?;
    let has_extension = |wanted: &CStr| {
        available_extensions
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == wanted))
    };

    let mut extensions: Vec<*const c_char> = Vec::new();
    let mut flags = vk::InstanceCreateFlags::empty();
    if has_extension(ash::khr::portability_enumeration::NAME) {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        if has_extension(ash::khr::get_physical_device_properties2::NAME) {
            extensions.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
        }
    }
    if config.validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let app_info = vk::ApplicationInfo::default()
        .application_name(c"VkSharpen")
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(c"No Engine")
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_0);

    // Chained so instance creation and destruction are validated too.
    let mut instance_debug_info = debug_messenger_info();
    let mut create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .flags(flags);
    if config.validation {
        create_info = create_info.push_next(&mut instance_debug_info);
    }

    let instance = unsafe { entry.create_instance(&create_info, None) }.vk("vkCreateInstance")?;
    let mut handle = InstanceHandle {
        entry,
        instance,
        debug: None,
    };

    if config.validation {
        let loader = ash::ext::debug_utils::Instance::new(&handle.entry, &handle.instance);
        let messenger = unsafe { loader.create_debug_utils_messenger(&debug_messenger_info(), None) }
            .vk("vkCreateDebugUtilsMessengerEXT")?;
        handle.debug = Some((loader, messenger));
        log_info!("[GPU] validation layers enabled");
    }

    Ok(handle)
}

fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(validation_callback))
}

unsafe extern "system" fn validation_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = unsafe {
        if data.is_null() || (*data).p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr((*data).p_message).to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log_err!("[Validation] {}", message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log_warn!("[Validation] {}", message);
    } else {
        log_info!("[Validation] {}", message);
    }
    vk::FALSE
}

/// First device with a compute queue and RGBA8 sampled+storage support wins.
fn select_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32)> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.vk("vkEnumeratePhysicalDevices")?;
    if devices.is_empty() {
        return Err(SharpenError::NoPhysicalDevice);
    }
    log_info!("[GPU] device count: {}", devices.len());

    devices
        .into_iter()
        .find_map(|physical_device| {
            let families =
                unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
            let family = compute_queue_family(&families)?;
            let format = unsafe {
                instance.get_physical_device_format_properties(physical_device, TEXTURE_FORMAT)
            };
            format
                .optimal_tiling_features
                .contains(REQUIRED_FORMAT_FEATURES)
                .then_some((physical_device, family))
        })
        .ok_or(SharpenError::NoSuitableDevice)
}

/// Index of the first queue family that can run compute work.
pub fn compute_queue_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|f| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::COMPUTE))
        .map(|i| i as u32)
}

/// Index of the first memory type allowed by `type_bits` carrying every bit of `flags`.
pub fn memory_type_index(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..properties.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0
            && properties.memory_types[i as usize].property_flags.contains(flags)
    })
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family_index: u32,
) -> Result<DeviceHandle> {
    let priorities = [1.0f32];
    let queue_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family_index)
        .queue_priorities(&priorities);

    // Portability implementations (MoltenVK) require the subset extension to be enabled.
    let device_extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .vk("vkEnumerateDeviceExtensionProperties")?;
    let mut extensions: Vec<*const c_char> = Vec::new();
    if device_extensions.iter().any(|ext| {
        ext.extension_name_as_c_str()
            .is_ok_and(|name| name == ash::khr::portability_subset::NAME)
    }) {
        extensions.push(ash::khr::portability_subset::NAME.as_ptr());
    }

    let features = vk::PhysicalDeviceFeatures::default();
    let info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_info))
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &info, None) }.vk("vkCreateDevice")?;
    Ok(DeviceHandle(device))
}

fn create_descriptor_pool(device: &ash::Device) -> Result<vk::DescriptorPool> {
    let sizes = DESCRIPTOR_POOL_TYPES.map(|ty| vk::DescriptorPoolSize {
        ty,
        descriptor_count: DESCRIPTOR_POOL_SLOTS,
    });
    let info = vk::DescriptorPoolCreateInfo::default()
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .max_sets(DESCRIPTOR_POOL_SLOTS * sizes.len() as u32)
        .pool_sizes(&sizes);
    unsafe { device.create_descriptor_pool(&info, None) }.vk("vkCreateDescriptorPool")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn first_compute_family_wins() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::COMPUTE, 0),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::COMPUTE, 4),
        ];
        assert_eq!(compute_queue_family(&families), Some(2));
    }

    #[test]
    fn no_compute_family() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1), family(vk::QueueFlags::TRANSFER, 1)];
        assert_eq!(compute_queue_family(&families), None);
        assert_eq!(compute_queue_family(&[]), None);
    }

    #[test]
    fn memory_type_respects_bits_and_flags() {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        props.memory_types[2].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(memory_type_index(&props, 0b111, host), Some(2));
        assert_eq!(
            memory_type_index(&props, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(1)
        );
        assert_eq!(
            memory_type_index(&props, 0b110, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );
        // Bits beyond memory_type_count are ignored.
        assert_eq!(
            memory_type_index(&props, 0b1000, vk::MemoryPropertyFlags::empty()),
            None
        );
    }

    #[test]
    fn descriptor_pool_covers_every_type() {
        assert_eq!(DESCRIPTOR_POOL_TYPES.len(), 11);
        assert!(REQUIRED_FORMAT_FEATURES.contains(vk::FormatFeatureFlags::STORAGE_IMAGE));
        assert!(REQUIRED_FORMAT_FEATURES.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE));
    }
}
