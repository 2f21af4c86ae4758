//! Graphics context and frame loop
//!
//! [`GraphicsContext`] owns the device, the swapchain and everything sized
//! after it: the scene render pass, depth and MSAA attachments, one
//! framebuffer per swapchain image, and a ring of per-frame command buffers,
//! semaphores and fences. It also owns the descriptor allocator, layout
//! cache, shader cache, pipeline registry and the shared per-frame uniform
//! buffer, so an application holds exactly one object for the whole
//! rendering core.
//!
//! A frame goes through [`GraphicsContext::begin_frame`], recording into
//! [`Frame::cmd`], and [`GraphicsContext::end_frame`]. The window is passed
//! to the calls that may need to resize, nothing is reached through globals.
//!
//! Size-dependent resources are registered in a LIFO [`DeletionQueue`] as
//! they are created; [`GraphicsContext::on_resize`] flushes it before
//! building the replacements.

use std::sync::Arc;

use ash::vk;
use vk_mem::Alloc;

use super::deletion_queue::DeletionQueue;
use super::swapchain::{AcquireOutcome, Swapchain};
use super::sync::{Fence, FrameRing, Semaphore};
use crate::assets::AssetAccessor;
use crate::core::config::RendererConfig;
use crate::render::backends::vulkan::error::allocation_error;
use crate::render::backends::vulkan::initialization::device::{has_stencil_component, Device};
use crate::render::backends::vulkan::initialization::instance::VulkanInstance;
use crate::render::backends::vulkan::rendering::command_buffer::CommandBuffer;
use crate::render::backends::vulkan::rendering::pipeline::VulkanPipelineBackend;
use crate::render::backends::vulkan::rendering::pipeline_cache::PipelineCache;
use crate::render::backends::vulkan::rendering::render_thread_pool::FrameInheritance;
use crate::render::backends::vulkan::rendering::shader_cache::ShaderCache;
use crate::render::backends::vulkan::resources::descriptor_allocator::DescriptorAllocator;
use crate::render::backends::vulkan::resources::descriptor_factory::DescriptorFactory;
use crate::render::backends::vulkan::resources::descriptor_layout_cache::DescriptorLayoutCache;
use crate::render::backends::vulkan::resources::shared_buffers::SharedBuffers;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::window::WindowSurface;

/// Image aspect of a depth attachment in `format`
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil_component(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Attachments of the scene render pass
///
/// Multisampled: `[msaa color, resolve (swapchain), msaa depth]`.
/// Single sampled: `[swapchain color, depth]`.
pub fn scene_attachments(
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Vec<vk::AttachmentDescription> {
    let depth = vk::AttachmentDescription::builder()
        .format(depth_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    if samples == vk::SampleCountFlags::TYPE_1 {
        let color = vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();
        return vec![color, depth];
    }

    let msaa_color = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();
    let resolve = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::DONT_CARE)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();
    vec![msaa_color, resolve, depth]
}

/// Clear values matching [`scene_attachments`]
pub fn scene_clear_values(clear_color: [f32; 4], samples: vk::SampleCountFlags) -> Vec<vk::ClearValue> {
    let color = vk::ClearValue {
        color: vk::ClearColorValue { float32: clear_color },
    };
    let depth = vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
    };
    if samples == vk::SampleCountFlags::TYPE_1 {
        vec![color, depth]
    } else {
        vec![color, color, depth]
    }
}

fn scene_dependencies() -> [vk::SubpassDependency; 2] {
    let depth_stages = vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    [
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: depth_stages,
            dst_stage_mask: depth_stages,
            src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            dependency_flags: vk::DependencyFlags::empty(),
        },
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::COLOR_ATTACHMENT_READ,
            dependency_flags: vk::DependencyFlags::empty(),
        },
    ]
}

/// The scene pass bakes in the color format, so a new format needs a new pass
pub fn needs_new_render_pass(old_format: vk::Format, new_format: vk::Format) -> bool {
    old_format != new_format
}

fn create_scene_render_pass(
    device: &Device,
    color_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> VulkanResult<vk::RenderPass> {
    let attachments = scene_attachments(color_format, device.depth_format(), samples);
    let msaa = samples != vk::SampleCountFlags::TYPE_1;

    let color_ref = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let resolve_ref = [vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: if msaa { 2 } else { 1 },
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_ref)
        .depth_stencil_attachment(&depth_ref);
    if msaa {
        subpass = subpass.resolve_attachments(&resolve_ref);
    }
    let subpasses = [subpass.build()];
    let dependencies = scene_dependencies();

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    unsafe {
        device.logical().create_render_pass(&create_info, None)
            .map_err(VulkanError::Api)
    }
}

/// Allocator-backed image used as a render target
struct AttachmentImage {
    device: Arc<Device>,
    image: vk::Image,
    allocation: vk_mem::Allocation,
    view: vk::ImageView,
}

/// Approximate footprint of an attachment, for error reports
fn attachment_bytes(extent: vk::Extent2D, samples: vk::SampleCountFlags) -> usize {
    extent.width as usize * extent.height as usize * samples.as_raw() as usize * 4
}

// Only moved into the deletion queue; the allocation is not touched from two threads.
unsafe impl Send for AttachmentImage {}

impl AttachmentImage {
    fn new(
        device: Arc<Device>,
        format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_info = vk_mem::AllocationCreateInfo {
            flags: vk_mem::AllocationCreateFlags::DEDICATED_MEMORY,
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, mut allocation) = unsafe {
            device.allocator().create_image(&image_info, &alloc_info)
                .map_err(|e| allocation_error(e, attachment_bytes(extent, samples)))?
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = match unsafe { device.logical().create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { device.allocator().destroy_image(image, &mut allocation) };
                return Err(VulkanError::Api(e));
            }
        };
        Ok(Self { device, image, allocation, view })
    }
}

impl Drop for AttachmentImage {
    fn drop(&mut self) {
        unsafe {
            self.device.logical().destroy_image_view(self.view, None);
            self.device.allocator().destroy_image(self.image, &mut self.allocation);
        }
    }
}

/// Views used by the framebuffers of the current swapchain size
#[derive(Debug, Default, Clone)]
struct TargetViews {
    depth_stencil: vk::ImageView,
    msaa_color: vk::ImageView,
    msaa_depth: vk::ImageView,
}

/// Framebuffer attachments for one swapchain image, in [`scene_attachments`] order
fn framebuffer_views(targets: &TargetViews, swapchain_view: vk::ImageView, msaa: bool) -> Vec<vk::ImageView> {
    if msaa {
        vec![targets.msaa_color, swapchain_view, targets.msaa_depth]
    } else {
        vec![swapchain_view, targets.depth_stencil]
    }
}

/// One in-flight frame handed out by [`GraphicsContext::begin_frame`]
///
/// The command buffer is reset but not begun. Every frame must go back
/// through [`GraphicsContext::end_frame`].
pub struct Frame {
    cmd: CommandBuffer,
    slot: usize,
    image_index: u32,
    inheritance: Option<FrameInheritance>,
}

impl Frame {
    /// Primary command buffer of this ring slot
    pub fn cmd(&mut self) -> &mut CommandBuffer {
        &mut self.cmd
    }

    /// Ring slot of this frame
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Acquired swapchain image
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Inheritance data for secondary recording, if requested
    pub fn inheritance(&self) -> Option<&FrameInheritance> {
        self.inheritance.as_ref()
    }
}

/// Per-slot sync primitives
struct FrameSync {
    present_complete: Vec<Semaphore>,
    render_complete: Vec<Semaphore>,
    fences: FrameRing<Fence>,
}

impl FrameSync {
    fn new(device: &Arc<Device>, slots: usize) -> VulkanResult<Self> {
        let mut present_complete = Vec::with_capacity(slots);
        let mut render_complete = Vec::with_capacity(slots);
        let mut fences = Vec::with_capacity(slots);
        for _ in 0..slots {
            present_complete.push(Semaphore::new(Arc::clone(device))?);
            render_complete.push(Semaphore::new(Arc::clone(device))?);
            fences.push(Fence::new(Arc::clone(device), true)?);
        }
        Ok(Self {
            present_complete,
            render_complete,
            fences: FrameRing::new(fences),
        })
    }
}

/// Device, swapchain and frame loop of the rendering core
pub struct GraphicsContext {
    config: RendererConfig,
    samples: vk::SampleCountFlags,
    extent: vk::Extent2D,
    minimized: bool,
    image_index: u32,
    clear_values: Vec<vk::ClearValue>,
    render_pass: vk::RenderPass,
    targets: TargetViews,
    framebuffers: Vec<vk::Framebuffer>,
    resize_queue: DeletionQueue,
    command_pool: vk::CommandPool,
    command_buffers: Vec<Option<CommandBuffer>>,
    sync: FrameSync,
    shared_buffers: SharedBuffers,
    pipelines: PipelineCache<VulkanPipelineBackend>,
    shader_cache: Arc<ShaderCache>,
    layout_cache: DescriptorLayoutCache<Arc<Device>>,
    descriptor_allocator: DescriptorAllocator<Arc<Device>>,
    swapchain: Swapchain,
    device: Arc<Device>,
}

impl GraphicsContext {
    /// Boot the device and swapchain for `window` and build every frame resource
    pub fn new(
        window: &dyn WindowSurface,
        config: RendererConfig,
        assets: Arc<dyn AssetAccessor>,
    ) -> VulkanResult<Self> {
        config.validate().map_err(VulkanError::InitializationFailed)?;
        log::info!("[RENDER] Creating graphics context for '{}'", config.application_name);

        let (width, height) = window.framebuffer_size();
        if width == 0 || height == 0 {
            return Err(VulkanError::InitializationFailed(
                "Window framebuffer has zero size".to_string(),
            ));
        }

        let instance = VulkanInstance::new(window, &config.application_name, config.enable_validation)?;
        let device = Arc::new(Device::new(instance, false)?);
        let surface = window
            .create_vulkan_surface(device.instance().handle())
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let mut swapchain = Swapchain::new(Arc::clone(&device), surface)?;
        let (mut width, mut height) = (width, height);
        swapchain.create(&mut width, &mut height, config.enable_vsync, false)?;

        let samples = device.clamp_sample_count(config.sample_count_flags());
        if samples != config.sample_count_flags() {
            log::warn!(
                "[RENDER] {} MSAA samples not supported, using {}",
                config.msaa_samples,
                samples.as_raw()
            );
        }

        let slots = config.concurrent_frames;
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(device.queue_families().graphics);
        let command_pool = unsafe {
            device.logical().create_command_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };
        let command_buffers = allocate_frame_buffers(&device, command_pool, slots)?;
        let sync = FrameSync::new(&device, slots)?;
        let render_pass = create_scene_render_pass(&device, swapchain.format(), samples)?;

        let mut descriptor_allocator = DescriptorAllocator::new(Arc::clone(&device), config.descriptor_pool_granularity);
        let mut layout_cache = DescriptorLayoutCache::new(Arc::clone(&device));
        let shared_buffers = SharedBuffers::new(Arc::clone(&device), slots, &mut layout_cache, &mut descriptor_allocator)?;

        let include_dirs = vec![config.shader_include_dir.clone()];
        let shader_cache = Arc::new(ShaderCache::with_shaderc(Arc::clone(&device), assets, include_dirs));
        let pipelines = PipelineCache::new(VulkanPipelineBackend::new(Arc::clone(&device), Arc::clone(&shader_cache))?);

        let mut context = Self {
            clear_values: scene_clear_values([0.0; 4], samples),
            config,
            samples,
            extent: vk::Extent2D { width, height },
            minimized: false,
            image_index: 0,
            render_pass,
            targets: TargetViews::default(),
            framebuffers: Vec::new(),
            resize_queue: DeletionQueue::new(),
            command_pool,
            command_buffers,
            sync,
            shared_buffers,
            pipelines,
            shader_cache,
            layout_cache,
            descriptor_allocator,
            swapchain,
            device,
        };
        context.create_size_dependent()?;

        log::info!(
            "[RENDER] Graphics context ready: {}x{}, {} swapchain images, {} frames in flight, {}x MSAA",
            width,
            height,
            context.swapchain.image_count(),
            slots,
            samples.as_raw()
        );
        Ok(context)
    }

    fn msaa(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }

    /// Create attachments and framebuffers for the current extent
    ///
    /// Everything created here is registered in the resize queue.
    fn create_size_dependent(&mut self) -> VulkanResult<()> {
        let depth_format = self.device.depth_format();
        let aspect = depth_aspect(depth_format);

        let depth_stencil = AttachmentImage::new(
            Arc::clone(&self.device),
            depth_format,
            self.extent,
            vk::SampleCountFlags::TYPE_1,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect,
        )?;
        self.targets = TargetViews {
            depth_stencil: depth_stencil.view,
            ..TargetViews::default()
        };
        self.resize_queue.push(move || drop(depth_stencil));

        if self.msaa() {
            let msaa_color = AttachmentImage::new(
                Arc::clone(&self.device),
                self.swapchain.format(),
                self.extent,
                self.samples,
                vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                vk::ImageAspectFlags::COLOR,
            )?;
            self.targets.msaa_color = msaa_color.view;
            self.resize_queue.push(move || drop(msaa_color));

            let msaa_depth = AttachmentImage::new(
                Arc::clone(&self.device),
                depth_format,
                self.extent,
                self.samples,
                vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                aspect,
            )?;
            self.targets.msaa_depth = msaa_depth.view;
            self.resize_queue.push(move || drop(msaa_depth));
        }

        let mut framebuffers = Vec::with_capacity(self.swapchain.image_count());
        for &swapchain_view in self.swapchain.image_views() {
            let views = framebuffer_views(&self.targets, swapchain_view, self.msaa());
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.render_pass)
                .attachments(&views)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer = unsafe { self.device.logical().create_framebuffer(&create_info, None) };
            match framebuffer {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(e) => {
                    destroy_framebuffers(&self.device, &framebuffers);
                    return Err(VulkanError::Api(e));
                }
            }
        }
        self.framebuffers = framebuffers.clone();
        let device = Arc::clone(&self.device);
        self.resize_queue.push(move || destroy_framebuffers(&device, &framebuffers));
        Ok(())
    }

    /// Wait for the ring slot, acquire a swapchain image and hand out the slot's command buffer
    ///
    /// Returns `None` when no frame can be rendered: the swapchain was out of
    /// date (and has been recreated) or the window is minimized. With
    /// `want_inheritance`, the frame carries the render pass and framebuffer
    /// for secondary command buffers.
    pub fn begin_frame(
        &mut self,
        window: &dyn WindowSurface,
        clear_color: [f32; 4],
        want_inheritance: bool,
    ) -> VulkanResult<Option<Frame>> {
        if self.minimized {
            self.on_resize(window)?;
            if self.minimized {
                return Ok(None);
            }
        }

        let slot = self.sync.fences.current();
        if self.command_buffers[slot].is_none() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("frame in slot {slot} was never ended"),
            });
        }

        self.sync.fences.acquire()?;
        self.clear_values = scene_clear_values(clear_color, self.samples);

        match self.swapchain.acquire_next_image(self.sync.present_complete[slot].handle())? {
            AcquireOutcome::OutOfDate => {
                log::debug!("[SWAPCHAIN] Out of date on acquire, resizing");
                self.on_resize(window)?;
                return Ok(None);
            }
            AcquireOutcome::Image { index, suboptimal } => {
                if suboptimal {
                    log::trace!("[SWAPCHAIN] Suboptimal image {index}");
                }
                self.image_index = index;
            }
        }

        let inheritance = want_inheritance.then(|| FrameInheritance {
            render_pass: self.render_pass,
            framebuffer: self.framebuffers[self.image_index as usize],
            extent: self.extent,
            slot,
        });

        let Some(mut cmd) = self.command_buffers[slot].take() else {
            return Err(VulkanError::InvalidOperation {
                reason: format!("command buffer of slot {slot} is missing"),
            });
        };
        cmd.reset()?;
        Ok(Some(Frame {
            cmd,
            slot,
            image_index: self.image_index,
            inheritance,
        }))
    }

    /// Submit the frame's command buffer and present
    ///
    /// The submit waits on the slot's `present_complete` semaphore at color
    /// output, signals `render_complete` and the slot fence. An out-of-date
    /// or suboptimal present triggers [`Self::on_resize`].
    pub fn end_frame(&mut self, window: &dyn WindowSurface, frame: Frame) -> VulkanResult<()> {
        let Frame { mut cmd, slot, image_index, .. } = frame;
        assert_eq!(slot, self.sync.fences.current(), "frames must be ended in the order they were begun");
        if cmd.is_recording() {
            cmd.end()?;
        }

        let wait_semaphores = [self.sync.present_complete[slot].handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.render_complete[slot].handle()];
        let command_buffers = [cmd.handle()];
        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();
        let submitted = unsafe {
            self.device.logical().queue_submit(
                self.device.graphics_queue(),
                &[submit],
                self.sync.fences.current_fence().handle(),
            )
        };
        self.command_buffers[slot] = Some(cmd);
        submitted.map_err(VulkanError::Api)?;

        let outcome = self.swapchain.queue_present(
            self.device.graphics_queue(),
            image_index,
            self.sync.render_complete[slot].handle(),
        )?;
        if outcome.needs_recreate() {
            log::debug!("[SWAPCHAIN] {outcome:?} on present, resizing");
            self.on_resize(window)?;
        }

        self.sync.fences.advance();
        Ok(())
    }

    /// Rebuild everything that depends on the framebuffer size
    ///
    /// A zero-sized framebuffer (minimized window) leaves the current
    /// resources in place and suspends [`Self::begin_frame`] until the window
    /// has a size again.
    pub fn on_resize(&mut self, window: &dyn WindowSurface) -> VulkanResult<()> {
        if self.command_buffers.iter().any(Option::is_none) {
            return Err(VulkanError::InvalidOperation {
                reason: "cannot resize while a frame is in flight".to_string(),
            });
        }
        self.device.wait_idle()?;

        let (mut width, mut height) = window.framebuffer_size();
        if width == 0 || height == 0 {
            if !self.minimized {
                log::debug!("[RENDER] Framebuffer is zero sized, suspending frames");
            }
            self.minimized = true;
            return Ok(());
        }
        self.minimized = false;

        let old_format = self.swapchain.format();
        self.resize_queue.flush();
        self.swapchain.create(&mut width, &mut height, self.config.enable_vsync, false)?;
        if needs_new_render_pass(old_format, self.swapchain.format()) {
            self.rebuild_render_pass(old_format)?;
        }
        self.extent = vk::Extent2D { width, height };
        self.create_size_dependent()?;

        free_frame_buffers(&self.device, self.command_pool, &mut self.command_buffers);
        self.command_buffers = allocate_frame_buffers(&self.device, self.command_pool, self.config.concurrent_frames)?;
        self.sync = FrameSync::new(&self.device, self.config.concurrent_frames)?;

        self.device.wait_idle()?;
        log::info!("[RENDER] Resized to {width}x{height}");
        Ok(())
    }

    /// Replace the scene render pass after a swapchain format change
    ///
    /// Graphics pipelines built against the old pass are rebuilt against the
    /// new one before it is destroyed. The device must be idle.
    fn rebuild_render_pass(&mut self, old_format: vk::Format) -> VulkanResult<()> {
        let new_pass = create_scene_render_pass(&self.device, self.swapchain.format(), self.samples)?;
        let old_pass = std::mem::replace(&mut self.render_pass, new_pass);
        let rebuilt = self.pipelines.retarget_render_pass(old_pass, new_pass);
        unsafe {
            self.device.logical().destroy_render_pass(old_pass, None);
        }
        log::info!(
            "[RENDER] Swapchain format changed from {:?} to {:?}, rebuilt render pass and {} pipelines",
            old_format,
            self.swapchain.format(),
            rebuilt
        );
        Ok(())
    }

    /// Begin the scene render pass on the acquired framebuffer with the frame's clear values
    pub fn begin_render_pass(&self, frame: &mut Frame, contents: vk::SubpassContents) {
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[frame.image_index as usize])
            .render_area(self.scissor())
            .clear_values(&self.clear_values);
        frame.cmd.begin_render_pass(&begin_info, contents);
    }

    /// End the scene render pass
    pub fn end_render_pass(&self, frame: &mut Frame) {
        frame.cmd.end_render_pass();
    }

    /// Shared device handle
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Active configuration
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Swapchain
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Scene render pass
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Framebuffers, one per swapchain image
    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    /// Sample count of the scene attachments
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    /// Current framebuffer extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Width over height
    pub fn aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height.max(1) as f32
    }

    /// Viewport covering the framebuffer
    pub fn viewport(&self) -> vk::Viewport {
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// Viewport covering the framebuffer, flipped so +Y points up
    pub fn flipped_viewport(&self) -> vk::Viewport {
        let height = self.extent.height as f32;
        vk::Viewport {
            y: height,
            height: -height,
            ..self.viewport()
        }
    }

    /// Scissor covering the framebuffer
    pub fn scissor(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }

    /// Number of ring slots
    pub fn concurrent_frames(&self) -> usize {
        self.config.concurrent_frames
    }

    /// Ring slot the next `begin_frame` uses
    pub fn current_frame(&self) -> usize {
        self.sync.fences.current()
    }

    /// Swapchain image acquired by the last `begin_frame`
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Whether frames are suspended for a zero-sized window
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    /// Start a descriptor set builder over the context's layout cache and allocator
    pub fn descriptor_factory(&mut self) -> DescriptorFactory<'_, Arc<Device>> {
        DescriptorFactory::new(&mut self.layout_cache, &mut self.descriptor_allocator)
    }

    /// Descriptor pool allocator
    pub fn descriptor_allocator(&mut self) -> &mut DescriptorAllocator<Arc<Device>> {
        &mut self.descriptor_allocator
    }

    /// Descriptor set layout cache
    pub fn layout_cache(&mut self) -> &mut DescriptorLayoutCache<Arc<Device>> {
        &mut self.layout_cache
    }

    /// Shader cache shared with the pipeline backend
    pub fn shader_cache(&self) -> &Arc<ShaderCache> {
        &self.shader_cache
    }

    /// Pipeline registry
    pub fn pipelines(&self) -> &PipelineCache<VulkanPipelineBackend> {
        &self.pipelines
    }

    /// Pipeline registry, for registration and reloads
    pub fn pipelines_mut(&mut self) -> &mut PipelineCache<VulkanPipelineBackend> {
        &mut self.pipelines
    }

    /// Per-frame uniform buffer
    pub fn shared_buffers(&self) -> &SharedBuffers {
        &self.shared_buffers
    }

    /// Per-frame uniform buffer, for writing this frame's slot
    pub fn shared_buffers_mut(&mut self) -> &mut SharedBuffers {
        &mut self.shared_buffers
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("[RENDER] wait_idle failed during teardown: {e}");
        }
        self.pipelines.invalidate_all();
        self.resize_queue.flush();
        free_frame_buffers(&self.device, self.command_pool, &mut self.command_buffers);
        unsafe {
            self.device.logical().destroy_command_pool(self.command_pool, None);
            self.device.logical().destroy_render_pass(self.render_pass, None);
        }
        log::info!("[RENDER] Graphics context destroyed");
    }
}

fn allocate_frame_buffers(
    device: &Arc<Device>,
    pool: vk::CommandPool,
    count: usize,
) -> VulkanResult<Vec<Option<CommandBuffer>>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count as u32);
    let raw = unsafe {
        device.logical().allocate_command_buffers(&alloc_info)
            .map_err(VulkanError::Api)?
    };
    Ok(raw
        .into_iter()
        .map(|cmd| {
            Some(CommandBuffer::new(
                Arc::clone(device),
                pool,
                cmd,
                device.graphics_queue(),
                vk::QueueFlags::GRAPHICS,
            ))
        })
        .collect())
}

fn free_frame_buffers(device: &Device, pool: vk::CommandPool, buffers: &mut Vec<Option<CommandBuffer>>) {
    let raw: Vec<vk::CommandBuffer> = buffers.drain(..).flatten().map(|cmd| cmd.handle()).collect();
    if !raw.is_empty() {
        unsafe { device.logical().free_command_buffers(pool, &raw) };
    }
}

fn destroy_framebuffers(device: &Device, framebuffers: &[vk::Framebuffer]) {
    for &framebuffer in framebuffers {
        unsafe { device.logical().destroy_framebuffer(framebuffer, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msaa_pass_resolves_into_swapchain() {
        let attachments = scene_attachments(
            vk::Format::B8G8R8A8_UNORM,
            vk::Format::D32_SFLOAT,
            vk::SampleCountFlags::TYPE_4,
        );
        assert_eq!(attachments.len(), 3);
        assert_eq!(attachments[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(attachments[0].store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(attachments[1].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachments[1].load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(attachments[1].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(attachments[2].format, vk::Format::D32_SFLOAT);
        assert_eq!(attachments[2].load_op, vk::AttachmentLoadOp::CLEAR);
    }

    #[test]
    fn test_render_pass_kept_across_same_format_resize() {
        assert!(!needs_new_render_pass(vk::Format::B8G8R8A8_UNORM, vk::Format::B8G8R8A8_UNORM));
        assert!(needs_new_render_pass(vk::Format::B8G8R8A8_UNORM, vk::Format::B8G8R8A8_SRGB));
    }

    #[test]
    fn test_single_sample_pass_presents_color() {
        let attachments = scene_attachments(
            vk::Format::B8G8R8A8_UNORM,
            vk::Format::D24_UNORM_S8_UINT,
            vk::SampleCountFlags::TYPE_1,
        );
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(attachments[1].final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_clear_values_match_attachments() {
        let color = [0.1, 0.2, 0.3, 1.0];
        for samples in [vk::SampleCountFlags::TYPE_1, vk::SampleCountFlags::TYPE_8] {
            let values = scene_clear_values(color, samples);
            let attachments = scene_attachments(vk::Format::B8G8R8A8_UNORM, vk::Format::D32_SFLOAT, samples);
            assert_eq!(values.len(), attachments.len());
            let depth = unsafe { values[values.len() - 1].depth_stencil };
            assert_eq!(depth.depth, 1.0);
            assert_eq!(unsafe { values[0].color.float32 }, color);
        }
    }

    #[test]
    fn test_framebuffer_views_follow_attachment_order() {
        use ash::vk::Handle;
        let targets = TargetViews {
            depth_stencil: vk::ImageView::from_raw(1),
            msaa_color: vk::ImageView::from_raw(2),
            msaa_depth: vk::ImageView::from_raw(3),
        };
        let swap = vk::ImageView::from_raw(9);
        assert_eq!(
            framebuffer_views(&targets, swap, true),
            vec![targets.msaa_color, swap, targets.msaa_depth]
        );
        assert_eq!(framebuffer_views(&targets, swap, false), vec![swap, targets.depth_stencil]);
    }

    #[test]
    fn test_depth_aspect() {
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            depth_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_dependencies_are_external() {
        let deps = scene_dependencies();
        assert!(deps.iter().all(|d| d.src_subpass == vk::SUBPASS_EXTERNAL && d.dst_subpass == 0));
        assert!(deps[1].dst_access_mask.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    }
}
