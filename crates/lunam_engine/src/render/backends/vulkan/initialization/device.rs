//! Physical and logical device ownership
//!
//! [`Device`] is created once per context and shared as `Arc<Device>` by every
//! component that issues Vulkan calls (context, uploaders, render threads,
//! descriptor and pipeline caches). It owns, in drop order:
//!
//! 1. the GPU memory allocator (`vk-mem`)
//! 2. the logical device and its graphics/compute/transfer queues
//! 3. the instance and debug messenger
//!
//! # Queue family selection
//!
//! Compute prefers a family without graphics support and transfer prefers a
//! family with neither graphics nor compute, so uploads and async compute land
//! on dedicated hardware queues when they exist. When they don't, the indices
//! alias the graphics family and only one queue-create info is emitted per
//! unique family.
//!
//! # Depth format
//!
//! The first format from a fixed preference list that supports optimal-tiling
//! depth-stencil attachments is selected at boot and stays fixed for the
//! device's lifetime.

use std::collections::BTreeSet;
use std::ffi::{c_char, CStr};
use std::mem::ManuallyDrop;

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;

use super::instance::VulkanInstance;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Depth formats tried in order when stencil is required
const STENCIL_DEPTH_FORMATS: [vk::Format; 3] = [
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
];

/// Depth formats tried in order when stencil is optional
const DEPTH_FORMATS: [vk::Format; 5] = [
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// Queue family indices used by the engine (may alias)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Graphics (and present) family
    pub graphics: u32,
    /// Compute family, dedicated when available
    pub compute: u32,
    /// Transfer family, dedicated when available
    pub transfer: u32,
}

impl QueueFamilies {
    /// Resolve all three families from the physical device's family list
    pub fn select(families: &[vk::QueueFamilyProperties]) -> Option<Self> {
        Some(Self {
            graphics: queue_family_index(families, vk::QueueFlags::GRAPHICS)?,
            compute: queue_family_index(families, vk::QueueFlags::COMPUTE)?,
            transfer: queue_family_index(families, vk::QueueFlags::TRANSFER)?,
        })
    }

    /// Distinct family indices, one queue-create info each
    pub fn unique(&self) -> BTreeSet<u32> {
        [self.graphics, self.compute, self.transfer].into_iter().collect()
    }
}

/// Result of [`Device::is_image_format_supported`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatSupport {
    /// The format can be used for the requested image type/usage/tiling
    pub supported: bool,
    /// The format supports blit source and destination, needed for mip generation
    pub mip_generation: bool,
}

/// Owner of the Vulkan instance, physical and logical device, queues and allocator
pub struct Device {
    allocator: ManuallyDrop<vk_mem::Allocator>,
    logical: ash::Device,
    swapchain_loader: SwapchainLoader,
    surface_loader: Surface,
    physical: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    enabled_features: vk::PhysicalDeviceFeatures,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue_families: QueueFamilies,
    graphics_queue: vk::Queue,
    compute_queue: vk::Queue,
    transfer_queue: vk::Queue,
    depth_format: vk::Format,
    instance: VulkanInstance,
}

impl Device {
    /// Select a physical device, create the logical device, queues and allocator
    pub fn new(instance: VulkanInstance, require_stencil: bool) -> VulkanResult<Self> {
        log::info!("[DEVICE] Initializing Vulkan device...");
        let vk_instance = instance.instance();

        let physical = select_physical_device(vk_instance)?;
        let properties = unsafe { vk_instance.get_physical_device_properties(physical) };
        let available_features = unsafe { vk_instance.get_physical_device_features(physical) };
        let memory_properties = unsafe { vk_instance.get_physical_device_memory_properties(physical) };
        let family_properties = unsafe { vk_instance.get_physical_device_queue_family_properties(physical) };

        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();
        log::info!(
            "[DEVICE] Using {} ({:?}), API {}",
            device_name,
            properties.device_type,
            crate::render::backends::vulkan::api_version_string(properties.api_version)
        );
        dump_physical_device_limits(&properties.limits);
        dump_memory_properties(&memory_properties);

        let queue_families = QueueFamilies::select(&family_properties).ok_or_else(|| {
            VulkanError::InitializationFailed("Could not find a matching queue family index".to_string())
        })?;
        log::info!(
            "[DEVICE] Queue families: graphics {}, compute {}, transfer {}",
            queue_families.graphics,
            queue_families.compute,
            queue_families.transfer
        );

        let priorities = [0.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let supported_extensions = unsafe {
            vk_instance.enumerate_device_extension_properties(physical)
                .map_err(VulkanError::Api)?
        };
        let wanted_extensions: [&CStr; 2] = [SwapchainLoader::name(), vk::KhrMaintenance1Fn::name()];
        for ext in wanted_extensions {
            let supported = supported_extensions.iter().any(|props| {
                (unsafe { CStr::from_ptr(props.extension_name.as_ptr()) }) == ext
            });
            if !supported {
                return Err(VulkanError::InitializationFailed(format!(
                    "Device extension {ext:?} not supported"
                )));
            }
        }
        let extension_ptrs: Vec<*const c_char> = wanted_extensions.iter().map(|ext| ext.as_ptr()).collect();

        let enabled_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(available_features.sampler_anisotropy == vk::TRUE)
            .fill_mode_non_solid(available_features.fill_mode_non_solid == vk::TRUE)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&enabled_features);

        log::info!("[DEVICE] Creating Vulkan logical device...");
        let logical = unsafe {
            vk_instance.create_device(physical, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { logical.get_device_queue(queue_families.graphics, 0) };
        let compute_queue = unsafe { logical.get_device_queue(queue_families.compute, 0) };
        let transfer_queue = unsafe { logical.get_device_queue(queue_families.transfer, 0) };

        let allocator = {
            let create_info = vk_mem::AllocatorCreateInfo::new(vk_instance, &logical, physical);
            match unsafe { vk_mem::Allocator::new(create_info) } {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe { logical.destroy_device(None) };
                    return Err(VulkanError::Api(e));
                }
            }
        };

        let formats: &[vk::Format] = if require_stencil { &STENCIL_DEPTH_FORMATS } else { &DEPTH_FORMATS };
        let depth_format = select_depth_format(formats, |format| {
            let props = unsafe { vk_instance.get_physical_device_format_properties(physical, format) };
            props.optimal_tiling_features.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        });
        let Some(depth_format) = depth_format else {
            drop(allocator);
            unsafe { logical.destroy_device(None) };
            return Err(VulkanError::InitializationFailed("No supported depth format".to_string()));
        };
        log::info!("[DEVICE] Depth format: {:?}", depth_format);

        let surface_loader = Surface::new(instance.entry(), vk_instance);
        let swapchain_loader = SwapchainLoader::new(vk_instance, &logical);

        log::info!("[DEVICE] Vulkan device initialized");

        Ok(Self {
            allocator: ManuallyDrop::new(allocator),
            logical,
            swapchain_loader,
            surface_loader,
            physical,
            properties,
            enabled_features,
            memory_properties,
            queue_families,
            graphics_queue,
            compute_queue,
            transfer_queue,
            depth_format,
            instance,
        })
    }

    /// Logical device function table
    pub fn logical(&self) -> &ash::Device {
        &self.logical
    }

    /// Owning instance
    pub fn instance(&self) -> &VulkanInstance {
        &self.instance
    }

    /// Selected physical device
    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    /// Physical device properties and limits
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    /// Features enabled on the logical device
    pub fn enabled_features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.enabled_features
    }

    /// GPU memory allocator
    pub fn allocator(&self) -> &vk_mem::Allocator {
        &self.allocator
    }

    /// Surface extension loader
    pub fn surface_loader(&self) -> &Surface {
        &self.surface_loader
    }

    /// Swapchain extension loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Queue family indices
    pub fn queue_families(&self) -> QueueFamilies {
        self.queue_families
    }

    /// Graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Compute queue
    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    /// Transfer queue
    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    /// Depth format selected at boot
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Index of the first memory type allowed by `type_bits` that has all `properties`
    pub fn get_mem_type_idx(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> Option<u32> {
        find_memory_type(&self.memory_properties, type_bits, properties)
    }

    /// Like [`Self::get_mem_type_idx`], failing with [`VulkanError::NoSuitableMemoryType`]
    pub fn require_mem_type_idx(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        require_memory_type(&self.memory_properties, type_bits, properties)
    }

    /// Query general and mip-generation support of an image format
    pub fn is_image_format_supported(
        &self,
        ty: vk::ImageType,
        format: vk::Format,
        flags: vk::ImageCreateFlags,
        usage: vk::ImageUsageFlags,
        tiling: vk::ImageTiling,
    ) -> FormatSupport {
        let vk_instance = self.instance.instance();
        let supported = unsafe {
            vk_instance.get_physical_device_image_format_properties(self.physical, format, ty, tiling, usage, flags)
        }
        .is_ok();

        let props = unsafe { vk_instance.get_physical_device_format_properties(self.physical, format) };
        let features = if tiling == vk::ImageTiling::OPTIMAL {
            props.optimal_tiling_features
        } else {
            props.linear_tiling_features
        };
        let mip_generation =
            features.contains(vk::FormatFeatureFlags::BLIT_SRC | vk::FormatFeatureFlags::BLIT_DST);

        FormatSupport { supported, mip_generation }
    }

    /// Minimum alignment of dynamic uniform buffer offsets
    pub fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        self.properties.limits.min_uniform_buffer_offset_alignment
    }

    /// Highest sample count usable for both color and depth attachments, capped at `requested`
    pub fn clamp_sample_count(&self, requested: vk::SampleCountFlags) -> vk::SampleCountFlags {
        let limits = &self.properties.limits;
        let supported = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
        let mut samples = requested.as_raw();
        while samples > 1 && !supported.contains(vk::SampleCountFlags::from_raw(samples)) {
            samples >>= 1;
        }
        vk::SampleCountFlags::from_raw(samples.max(1))
    }

    /// Block until the device finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.logical.device_wait_idle().map_err(VulkanError::Api) }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            let _ = self.logical.device_wait_idle();
            ManuallyDrop::drop(&mut self.allocator);
            self.logical.destroy_device(None);
        }
        log::info!("[DEVICE] Vulkan device destroyed");
    }
}

/// Queue family for `flags`: a dedicated compute or transfer family when one exists,
/// else the first family supporting all `flags`
pub fn queue_family_index(families: &[vk::QueueFamilyProperties], flags: vk::QueueFlags) -> Option<u32> {
    let position = |pred: &dyn Fn(vk::QueueFlags) -> bool| {
        families.iter().position(|family| pred(family.queue_flags)).map(|i| i as u32)
    };

    if flags == vk::QueueFlags::COMPUTE {
        let dedicated = position(&|f| f.contains(vk::QueueFlags::COMPUTE) && !f.contains(vk::QueueFlags::GRAPHICS));
        if dedicated.is_some() {
            return dedicated;
        }
    }

    if flags == vk::QueueFlags::TRANSFER {
        let dedicated = position(&|f| {
            f.contains(vk::QueueFlags::TRANSFER)
                && !f.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        });
        if dedicated.is_some() {
            return dedicated;
        }
    }

    position(&|f| f.contains(flags))
}

/// First memory type allowed by `type_bits` whose property flags contain `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    memory_properties.memory_types[..memory_properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .find(|(i, ty)| type_bits & (1 << i) != 0 && ty.property_flags.contains(properties))
        .map(|(i, _)| i as u32)
}

/// [`find_memory_type`] as a `Result`
pub fn require_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    find_memory_type(memory_properties, type_bits, properties).ok_or(VulkanError::NoSuitableMemoryType)
}

/// First format in `candidates` accepted by `is_supported`
pub fn select_depth_format(
    candidates: &[vk::Format],
    mut is_supported: impl FnMut(vk::Format) -> bool,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| is_supported(format))
}

/// Whether a depth format carries a stencil aspect
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    )
}

fn select_physical_device(instance: &ash::Instance) -> VulkanResult<vk::PhysicalDevice> {
    let devices = unsafe {
        instance.enumerate_physical_devices()
            .map_err(VulkanError::Api)?
    };
    log::info!("[DEVICE] Found {} Vulkan physical device(s)", devices.len());

    let mut selected = None;
    for &device in &devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();
        log::info!("[DEVICE] Found Vulkan physical device: {}", name);
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            selected = Some(device);
            break;
        }
    }

    selected
        .or_else(|| devices.first().copied())
        .ok_or_else(|| VulkanError::InitializationFailed("No Vulkan physical devices found".to_string()))
}

fn dump_physical_device_limits(limits: &vk::PhysicalDeviceLimits) {
    log::debug!("[DEVICE] maxImageDimension2D: {}", limits.max_image_dimension2_d);
    log::debug!("[DEVICE] maxUniformBufferRange: {}", limits.max_uniform_buffer_range);
    log::debug!("[DEVICE] maxStorageBufferRange: {}", limits.max_storage_buffer_range);
    log::debug!("[DEVICE] maxPushConstantsSize: {}", limits.max_push_constants_size);
    log::debug!("[DEVICE] maxMemoryAllocationCount: {}", limits.max_memory_allocation_count);
    log::debug!("[DEVICE] maxBoundDescriptorSets: {}", limits.max_bound_descriptor_sets);
    log::debug!("[DEVICE] maxDescriptorSetUniformBuffersDynamic: {}", limits.max_descriptor_set_uniform_buffers_dynamic);
    log::debug!("[DEVICE] maxDescriptorSetSampledImages: {}", limits.max_descriptor_set_sampled_images);
    log::debug!("[DEVICE] maxVertexInputAttributes: {}", limits.max_vertex_input_attributes);
    log::debug!("[DEVICE] maxComputeWorkGroupInvocations: {}", limits.max_compute_work_group_invocations);
    log::debug!("[DEVICE] maxComputeWorkGroupSize: {:?}", limits.max_compute_work_group_size);
    log::debug!("[DEVICE] maxSamplerAnisotropy: {}", limits.max_sampler_anisotropy);
    log::debug!("[DEVICE] minUniformBufferOffsetAlignment: {}", limits.min_uniform_buffer_offset_alignment);
    log::debug!("[DEVICE] framebufferColorSampleCounts: {:?}", limits.framebuffer_color_sample_counts);
    log::debug!("[DEVICE] framebufferDepthSampleCounts: {:?}", limits.framebuffer_depth_sample_counts);
    log::debug!("[DEVICE] timestampPeriod: {}", limits.timestamp_period);
}

fn dump_memory_properties(props: &vk::PhysicalDeviceMemoryProperties) {
    for (i, ty) in props.memory_types[..props.memory_type_count as usize].iter().enumerate() {
        log::debug!("[DEVICE] memoryTypes[{}]: heap {}, flags {:?}", i, ty.heap_index, ty.property_flags);
    }
    for (i, heap) in props.memory_heaps[..props.memory_heap_count as usize].iter().enumerate() {
        log::info!(
            "[DEVICE] memoryHeaps[{}]: {} MiB, flags {:?}",
            i,
            heap.size / (1024 * 1024),
            heap.flags
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_queue_families_prefer_dedicated() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let selected = QueueFamilies::select(&families).unwrap();
        assert_eq!(selected, QueueFamilies { graphics: 0, compute: 1, transfer: 2 });
        assert_eq!(selected.unique().len(), 3);
    }

    #[test]
    fn test_queue_families_alias_on_single_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        let selected = QueueFamilies::select(&families).unwrap();
        assert_eq!(selected, QueueFamilies { graphics: 0, compute: 0, transfer: 0 });
        assert_eq!(selected.unique().into_iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_queue_family_missing_graphics() {
        let families = [family(vk::QueueFlags::TRANSFER)];
        assert_eq!(queue_family_index(&families, vk::QueueFlags::GRAPHICS), None);
        assert!(QueueFamilies::select(&families).is_none());
    }

    #[test]
    fn test_find_memory_type_respects_type_bits() {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        props.memory_types[2].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;

        assert_eq!(find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL), Some(0));
        assert_eq!(find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE), Some(1));
        assert_eq!(find_memory_type(&props, 0b100, vk::MemoryPropertyFlags::HOST_VISIBLE), Some(2));
        assert_eq!(find_memory_type(&props, 0b110, vk::MemoryPropertyFlags::DEVICE_LOCAL), None);
        assert!(matches!(
            require_memory_type(&props, 0b110, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Err(VulkanError::NoSuitableMemoryType)
        ));
        assert_eq!(require_memory_type(&props, 0b100, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(), 2);
    }

    #[test]
    fn test_select_depth_format_order() {
        let supported = [vk::Format::D32_SFLOAT, vk::Format::D16_UNORM];
        let pick = |list: &[vk::Format]| select_depth_format(list, |f| supported.contains(&f));
        assert_eq!(pick(&DEPTH_FORMATS), Some(vk::Format::D32_SFLOAT));
        assert_eq!(pick(&STENCIL_DEPTH_FORMATS), None);
    }

    #[test]
    fn test_has_stencil_component() {
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
    }
}
