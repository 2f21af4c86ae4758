//! Presentation surface and swapchain images
//!
//! The swapchain owns the window surface it was created for, plus one image
//! view per presentable image. Image count is chosen by the presentation
//! engine, so callers must never assume an acquired image index matches the
//! frame ring slot.

use std::sync::Arc;

use ash::vk;

use crate::render::backends::vulkan::initialization::device::Device;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Surface formats tried in order before falling back to the first reported one
const PREFERRED_FORMATS: [vk::Format; 3] = [
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::A8B8G8R8_UNORM_PACK32,
];

/// Composite alpha modes tried in order
const COMPOSITE_ALPHA_MODES: [vk::CompositeAlphaFlagsKHR; 4] = [
    vk::CompositeAlphaFlagsKHR::OPAQUE,
    vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::INHERIT,
];

/// Outcome of [`Swapchain::acquire_next_image`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; `suboptimal` images are still rendered to
    Image {
        /// Index into the swapchain image array
        index: u32,
        /// Surface properties no longer match exactly
        suboptimal: bool,
    },
    /// The swapchain must be recreated before rendering again
    OutOfDate,
}

/// Outcome of [`Swapchain::queue_present`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented and still matching the surface
    Presented,
    /// Presented, but the swapchain should be recreated
    Suboptimal,
    /// Not presented, the swapchain must be recreated
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the caller should run its resize path
    pub fn needs_recreate(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// Window surface plus the presentable image ring
pub struct Swapchain {
    device: Arc<Device>,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Take ownership of `surface` and verify the graphics queue can present to it
    ///
    /// The swapchain itself is built by [`Swapchain::create`].
    pub fn new(device: Arc<Device>, surface: vk::SurfaceKHR) -> VulkanResult<Self> {
        let graphics_family = device.queue_families().graphics;
        let supports_present = unsafe {
            device
                .surface_loader()
                .get_physical_device_surface_support(device.physical(), graphics_family, surface)
        };
        match supports_present {
            Ok(true) => {}
            Ok(false) => {
                unsafe { device.surface_loader().destroy_surface(surface, None) };
                return Err(VulkanError::InitializationFailed(
                    "Graphics queue family cannot present to the window surface".to_string(),
                ));
            }
            Err(e) => {
                unsafe { device.surface_loader().destroy_surface(surface, None) };
                return Err(VulkanError::Api(e));
            }
        }

        Ok(Self {
            device,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
        })
    }

    /// (Re)build the swapchain for a `width`×`height` framebuffer
    ///
    /// `width` and `height` are updated to the extent the surface actually
    /// uses. The previous swapchain is handed to the driver as `old_swapchain`
    /// and destroyed together with its views once the new one exists.
    pub fn create(&mut self, width: &mut u32, height: &mut u32, vsync: bool, fullscreen: bool) -> VulkanResult<()> {
        log::info!(
            "[SWAPCHAIN] Creating swapchain: {}x{}, VSync: {}, Fullscreen: {}",
            width, height, vsync, fullscreen
        );
        let physical = self.device.physical();
        let surface_loader = self.device.surface_loader();

        let caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical, self.surface)
                .map_err(VulkanError::Api)?
        };
        let formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical, self.surface)
                .map_err(VulkanError::Api)?
        };
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(physical, self.surface)
                .map_err(VulkanError::Api)?
        };

        let format = choose_surface_format(&formats).ok_or_else(|| {
            VulkanError::InitializationFailed("Surface reports no formats".to_string())
        })?;
        let present_mode = choose_present_mode(&present_modes, vsync);
        let extent = choose_extent(&caps, *width, *height);
        *width = extent.width;
        *height = extent.height;

        let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        for extra in [vk::ImageUsageFlags::TRANSFER_SRC, vk::ImageUsageFlags::TRANSFER_DST] {
            if caps.supported_usage_flags.contains(extra) {
                usage |= extra;
            }
        }

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(choose_image_count(&caps))
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(choose_pre_transform(&caps))
            .composite_alpha(choose_composite_alpha(caps.supported_composite_alpha))
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let device = Arc::clone(&self.device);
        let loader = device.swapchain_loader();
        let swapchain = unsafe {
            loader
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        self.destroy_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;
        self.format = format;
        self.extent = extent;

        self.images = unsafe {
            loader
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::Api)?
        };
        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::R,
                    g: vk::ComponentSwizzle::G,
                    b: vk::ComponentSwizzle::B,
                    a: vk::ComponentSwizzle::A,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe {
                self.device
                    .logical()
                    .create_image_view(&view_info, None)
                    .map_err(VulkanError::Api)?
            };
            self.image_views.push(view);
        }

        log::info!(
            "[SWAPCHAIN] {} images, {:?}, {:?}, {}x{}",
            self.images.len(),
            format.format,
            present_mode,
            extent.width,
            extent.height
        );
        Ok(())
    }

    /// Acquire the next presentable image, signaling `present_complete` when it is ready
    pub fn acquire_next_image(&self, present_complete: vk::Semaphore) -> VulkanResult<AcquireOutcome> {
        let result = unsafe {
            self.device.swapchain_loader().acquire_next_image(
                self.swapchain,
                u64::MAX,
                present_complete,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Queue image `index` for presentation after `wait` is signaled
    pub fn queue_present(&self, queue: vk::Queue, index: u32, wait: vk::Semaphore) -> VulkanResult<PresentOutcome> {
        let swapchains = [self.swapchain];
        let indices = [index];
        let wait_semaphores = [wait];
        let mut present_info = vk::PresentInfoKHR::builder()
            .swapchains(&swapchains)
            .image_indices(&indices);
        if wait != vk::Semaphore::null() {
            present_info = present_info.wait_semaphores(&wait_semaphores);
        }

        let result = unsafe { self.device.swapchain_loader().queue_present(queue, &present_info) };
        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Swapchain handle (null before the first `create`)
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Presentable images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// One color view per presentable image
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Number of presentable images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Selected color format
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    /// Selected color space
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.format.color_space
    }

    /// Current image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn destroy_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe { self.device.logical().destroy_image_view(view, None) };
        }
        self.images.clear();
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_views();
        unsafe {
            if self.swapchain != vk::SwapchainKHR::null() {
                self.device.swapchain_loader().destroy_swapchain(self.swapchain, None);
            }
            self.device.surface_loader().destroy_surface(self.surface, None);
        }
        log::debug!("[SWAPCHAIN] Destroyed");
    }
}

/// First preferred format the surface offers, else whatever it lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    PREFERRED_FORMATS
        .iter()
        .find_map(|&preferred| formats.iter().find(|f| f.format == preferred).copied())
        .or_else(|| formats.first().copied())
}

/// FIFO under vsync; otherwise mailbox, then immediate, then FIFO
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's current extent, or the requested size when the surface leaves it undefined
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width == u32::MAX {
        vk::Extent2D { width, height }
    } else {
        caps.current_extent
    }
}

/// One more than the minimum, capped by the maximum when the surface has one
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// Identity when supported, else the surface's current transform
pub fn choose_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps.supported_transforms.contains(vk::SurfaceTransformFlagsKHR::IDENTITY) {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

/// First supported composite alpha mode, opaque when the surface reports none of them
pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    COMPOSITE_ALPHA_MODES
        .into_iter()
        .find(|&mode| supported.contains(mode))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR }
    }

    #[test]
    fn test_surface_format_preference() {
        let formats = [
            surface_format(vk::Format::R16G16B16A16_SFLOAT),
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(choose_surface_format(&formats).map(|f| f.format), Some(vk::Format::B8G8R8A8_UNORM));

        let fallback = [surface_format(vk::Format::R16G16B16A16_SFLOAT)];
        assert_eq!(choose_surface_format(&fallback).map(|f| f.format), Some(vk::Format::R16G16B16A16_SFLOAT));
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_present_mode() {
        let all = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        let no_mailbox = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&no_mailbox, false), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::FIFO], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_and_image_count() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            ..Default::default()
        };
        assert_eq!(choose_extent(&caps, 1280, 720), vk::Extent2D { width: 1280, height: 720 });
        assert_eq!(choose_image_count(&caps), 3);

        caps.current_extent = vk::Extent2D { width: 800, height: 600 };
        caps.max_image_count = 2;
        assert_eq!(choose_extent(&caps, 1280, 720), vk::Extent2D { width: 800, height: 600 });
        assert_eq!(choose_image_count(&caps), 2);
    }

    #[test]
    fn test_transform_and_alpha() {
        let caps = vk::SurfaceCapabilitiesKHR {
            supported_transforms: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            current_transform: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            ..Default::default()
        };
        assert_eq!(choose_pre_transform(&caps), vk::SurfaceTransformFlagsKHR::ROTATE_90);

        let alpha = vk::CompositeAlphaFlagsKHR::INHERIT | vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED;
        assert_eq!(choose_composite_alpha(alpha), vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED);
    }

    #[test]
    fn test_present_outcome_recreate() {
        assert!(!PresentOutcome::Presented.needs_recreate());
        assert!(PresentOutcome::Suboptimal.needs_recreate());
        assert!(PresentOutcome::OutOfDate.needs_recreate());
    }
}
