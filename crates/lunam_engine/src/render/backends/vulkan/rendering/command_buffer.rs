//! Command buffer wrapper
//!
//! Pairs a raw `vk::CommandBuffer` with the pool it came from, the queue it is
//! submitted to, and that queue's capability. Buffers created through
//! [`CommandBuffer::allocate`] own their pool and free it on drop; buffers
//! wrapped with [`CommandBuffer::new`] borrow a pool managed elsewhere.
//!
//! `flush` is a blocking submit for one-shot setup and transfer work. The
//! per-frame path submits through the graphics context instead.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;

use super::pipeline::Pipeline;
use crate::render::backends::vulkan::initialization::device::Device;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Push constant budget every Vulkan implementation guarantees
pub const MAX_PUSH_CONSTANT_SIZE: u32 = 128;

static DRAW_CALLS: AtomicU32 = AtomicU32::new(0);
static VERTICES: AtomicU32 = AtomicU32::new(0);

/// Process-wide draw counters, accumulated by every command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawStats {
    /// Draw commands recorded
    pub draw_calls: u32,
    /// Vertices (or indices) submitted by those draws
    pub vertices: u32,
}

impl DrawStats {
    /// Current counter values
    pub fn snapshot() -> Self {
        Self {
            draw_calls: DRAW_CALLS.load(Ordering::Relaxed),
            vertices: VERTICES.load(Ordering::Relaxed),
        }
    }

    /// Read and zero the counters, typically once per frame
    pub fn take() -> Self {
        Self {
            draw_calls: DRAW_CALLS.swap(0, Ordering::Relaxed),
            vertices: VERTICES.swap(0, Ordering::Relaxed),
        }
    }

    fn record(draw_calls: u32, vertices: u32) {
        DRAW_CALLS.fetch_add(draw_calls, Ordering::Relaxed);
        VERTICES.fetch_add(vertices, Ordering::Relaxed);
    }
}

/// Whether `T` fits the push constant block: at most 128 bytes, aligned to at most 16
pub const fn fits_push_constant<T>() -> bool {
    std::mem::size_of::<T>() <= MAX_PUSH_CONSTANT_SIZE as usize && std::mem::align_of::<T>() <= 16
}

struct PushConstantCheck<T>(PhantomData<T>);

impl<T> PushConstantCheck<T> {
    const OK: () = assert!(fits_push_constant::<T>(), "push constant type exceeds 128 bytes or 16-byte alignment");
}

/// Running offset into the push constant block of the bound pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushConstantCursor {
    offset: u32,
}

impl PushConstantCursor {
    /// Restart at offset 0
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Claim `size` bytes and return their offset
    ///
    /// # Panics
    /// If the block would grow past [`MAX_PUSH_CONSTANT_SIZE`].
    pub fn advance(&mut self, size: u32) -> u32 {
        let offset = self.offset;
        assert!(
            offset + size <= MAX_PUSH_CONSTANT_SIZE,
            "push constants overflow: {offset} + {size} > {MAX_PUSH_CONSTANT_SIZE}"
        );
        self.offset += size;
        offset
    }

    /// Bytes claimed so far
    pub fn offset(&self) -> u32 {
        self.offset
    }
}

/// Access mask that must complete before leaving `layout`
pub fn src_access_for_layout(layout: vk::ImageLayout) -> Option<vk::AccessFlags> {
    Some(match layout {
        vk::ImageLayout::UNDEFINED => vk::AccessFlags::empty(),
        vk::ImageLayout::PREINITIALIZED => vk::AccessFlags::HOST_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::PRESENT_SRC_KHR => vk::AccessFlags::MEMORY_READ,
        _ => return None,
    })
}

/// Access mask that must wait for the transition into `layout`
pub fn dst_access_for_layout(layout: vk::ImageLayout) -> Option<vk::AccessFlags> {
    Some(match layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::PRESENT_SRC_KHR => vk::AccessFlags::MEMORY_READ,
        vk::ImageLayout::GENERAL => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        _ => return None,
    })
}

/// `(src_access, dst_access)` for a layout transition, `None` for unsupported layouts
pub fn layout_transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Option<(vk::AccessFlags, vk::AccessFlags)> {
    let mut src = src_access_for_layout(old)?;
    let dst = dst_access_for_layout(new)?;
    // Freshly uploaded data read by shaders: make host and transfer writes visible
    if new == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL && src.is_empty() {
        src = vk::AccessFlags::HOST_WRITE | vk::AccessFlags::TRANSFER_WRITE;
    }
    Some((src, dst))
}

fn validate_queue_flags(flags: vk::QueueFlags) {
    assert!(
        flags == vk::QueueFlags::GRAPHICS || flags == vk::QueueFlags::COMPUTE || flags == vk::QueueFlags::TRANSFER,
        "command buffer queue must be exactly one of graphics, compute or transfer, got {flags:?}"
    );
}

/// A command buffer plus its pool, queue and recording state
pub struct CommandBuffer {
    device: Arc<Device>,
    pool: vk::CommandPool,
    owns_pool: bool,
    cmd: vk::CommandBuffer,
    queue: vk::Queue,
    queue_flags: vk::QueueFlags,
    recording: bool,
    bound_layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
    push_constants: PushConstantCursor,
}

impl CommandBuffer {
    /// Wrap a buffer allocated from a pool owned by the caller
    ///
    /// # Panics
    /// If `queue_flags` is not exactly one of graphics, compute or transfer.
    pub fn new(
        device: Arc<Device>,
        pool: vk::CommandPool,
        cmd: vk::CommandBuffer,
        queue: vk::Queue,
        queue_flags: vk::QueueFlags,
    ) -> Self {
        validate_queue_flags(queue_flags);
        Self {
            device,
            pool,
            owns_pool: false,
            cmd,
            queue,
            queue_flags,
            recording: false,
            bound_layout: vk::PipelineLayout::null(),
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            push_constants: PushConstantCursor::default(),
        }
    }

    /// Create a private pool on the family serving `queue_flags` and allocate one buffer from it
    pub fn allocate(device: Arc<Device>, queue_flags: vk::QueueFlags, level: vk::CommandBufferLevel) -> VulkanResult<Self> {
        validate_queue_flags(queue_flags);
        let families = device.queue_families();
        let (family, queue) = if queue_flags == vk::QueueFlags::GRAPHICS {
            (families.graphics, device.graphics_queue())
        } else if queue_flags == vk::QueueFlags::COMPUTE {
            (families.compute, device.compute_queue())
        } else {
            (families.transfer, device.transfer_queue())
        };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(family);
        let pool = unsafe {
            device.logical().create_command_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(level)
            .command_buffer_count(1);
        let cmd = match unsafe { device.logical().allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.logical().destroy_command_pool(pool, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let mut buffer = Self::new(device, pool, cmd, queue, queue_flags);
        buffer.owns_pool = true;
        Ok(buffer)
    }

    /// Raw handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.cmd
    }

    /// Pool the buffer was allocated from
    pub fn pool(&self) -> vk::CommandPool {
        self.pool
    }

    /// Capability of the queue this buffer submits to
    pub fn queue_flags(&self) -> vk::QueueFlags {
        self.queue_flags
    }

    /// Whether `begin` was called without a matching `end`
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Start recording; secondary buffers pass their inheritance info
    pub fn begin(
        &mut self,
        usage: vk::CommandBufferUsageFlags,
        inheritance: Option<&vk::CommandBufferInheritanceInfo>,
    ) -> VulkanResult<()> {
        if self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer already recording".to_string(),
            });
        }
        let mut begin_info = vk::CommandBufferBeginInfo::builder().flags(usage);
        if let Some(inheritance) = inheritance {
            begin_info = begin_info.inheritance_info(inheritance);
        }
        unsafe {
            self.device.logical().begin_command_buffer(self.cmd, &begin_info)
                .map_err(VulkanError::Api)?;
        }
        self.recording = true;
        self.bound_layout = vk::PipelineLayout::null();
        self.push_constants.reset();
        Ok(())
    }

    /// Finish recording
    pub fn end(&mut self) -> VulkanResult<()> {
        if !self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer not recording".to_string(),
            });
        }
        unsafe {
            self.device.logical().end_command_buffer(self.cmd)
                .map_err(VulkanError::Api)?;
        }
        self.recording = false;
        Ok(())
    }

    /// End if recording, submit to the queue and block until the GPU is done
    pub fn flush(&mut self) -> VulkanResult<()> {
        if self.recording {
            self.end()?;
        }
        let logical = self.device.logical();
        let fence = unsafe {
            logical.create_fence(&vk::FenceCreateInfo::builder(), None)
                .map_err(VulkanError::Api)?
        };
        let buffers = [self.cmd];
        let submit = vk::SubmitInfo::builder().command_buffers(&buffers).build();
        let result = unsafe {
            logical
                .queue_submit(self.queue, &[submit], fence)
                .and_then(|()| logical.wait_for_fences(&[fence], true, u64::MAX))
        };
        unsafe { logical.destroy_fence(fence, None) };
        result.map_err(VulkanError::Api)
    }

    /// Return the buffer to the initial state
    pub fn reset(&mut self) -> VulkanResult<()> {
        unsafe {
            self.device.logical()
                .reset_command_buffer(self.cmd, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
        }
        self.recording = false;
        Ok(())
    }

    /// Begin a render pass
    pub fn begin_render_pass(&mut self, info: &vk::RenderPassBeginInfo, contents: vk::SubpassContents) {
        unsafe { self.device.logical().cmd_begin_render_pass(self.cmd, info, contents) };
    }

    /// End the current render pass
    pub fn end_render_pass(&mut self) {
        unsafe { self.device.logical().cmd_end_render_pass(self.cmd) };
    }

    /// Set dynamic viewport 0
    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        unsafe { self.device.logical().cmd_set_viewport(self.cmd, 0, &[viewport]) };
    }

    /// Set dynamic scissor 0
    pub fn set_scissor(&mut self, scissor: vk::Rect2D) {
        unsafe { self.device.logical().cmd_set_scissor(self.cmd, 0, &[scissor]) };
    }

    /// Bind a vertex buffer at binding 0
    pub fn bind_vertex_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize) {
        unsafe {
            self.device.logical().cmd_bind_vertex_buffers(self.cmd, 0, &[buffer], &[offset]);
        }
    }

    /// Bind an index buffer of 32-bit or 16-bit indices
    pub fn bind_index_buffer(&mut self, buffer: vk::Buffer, index32: bool, offset: vk::DeviceSize) {
        let index_type = if index32 { vk::IndexType::UINT32 } else { vk::IndexType::UINT16 };
        unsafe {
            self.device.logical().cmd_bind_index_buffer(self.cmd, buffer, offset, index_type);
        }
    }

    /// Bind a pipeline and remember its layout for descriptor and push constant calls
    pub fn bind_pipeline(&mut self, pipeline: &Pipeline) {
        self.bind_raw_pipeline(pipeline.bind_point(), pipeline.handle(), pipeline.layout());
    }

    /// Bind raw pipeline handles
    pub fn bind_raw_pipeline(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
    ) {
        unsafe { self.device.logical().cmd_bind_pipeline(self.cmd, bind_point, pipeline) };
        self.bind_point = bind_point;
        self.bound_layout = layout;
        self.push_constants.reset();
    }

    fn bound_layout(&self) -> vk::PipelineLayout {
        assert!(
            self.bound_layout != vk::PipelineLayout::null(),
            "no pipeline bound on this command buffer"
        );
        self.bound_layout
    }

    /// Bind `set` at index `set_index` of the bound pipeline's layout
    pub fn bind_descriptor_set(&mut self, set_index: u32, set: vk::DescriptorSet, dynamic_offsets: &[u32]) {
        let layout = self.bound_layout();
        unsafe {
            self.device.logical().cmd_bind_descriptor_sets(
                self.cmd,
                self.bind_point,
                layout,
                set_index,
                &[set],
                dynamic_offsets,
            );
        }
    }

    /// Restart push constant offsets at 0
    pub fn push_consts_start(&mut self) {
        self.push_constants.reset();
    }

    /// Push raw bytes at the next free offset
    pub fn push_consts_raw(&mut self, stages: vk::ShaderStageFlags, data: &[u8]) {
        let layout = self.bound_layout();
        let offset = self.push_constants.advance(data.len() as u32);
        unsafe {
            self.device.logical().cmd_push_constants(self.cmd, layout, stages, offset, data);
        }
    }

    /// Push a plain-old-data value; its size and alignment are checked at compile time
    pub fn push_consts<T: Pod>(&mut self, stages: vk::ShaderStageFlags, data: &T) {
        let () = PushConstantCheck::<T>::OK;
        self.push_consts_raw(stages, bytemuck::bytes_of(data));
    }

    /// Image layout barrier over `range` with explicit stages
    ///
    /// # Panics
    /// If either layout has no known access mask.
    pub fn image_layout_barrier_range(
        &mut self,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        range: vk::ImageSubresourceRange,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) {
        let Some((src_access, dst_access)) = layout_transition_masks(old_layout, new_layout) else {
            panic!("unsupported image layout transition {old_layout:?} -> {new_layout:?}");
        };
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
            .build();
        unsafe {
            self.device.logical().cmd_pipeline_barrier(
                self.cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Image layout barrier over the first mip and layer of `aspect`, synchronizing all commands
    pub fn image_layout_barrier(
        &mut self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let range = vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        self.image_layout_barrier_range(
            image,
            old_layout,
            new_layout,
            range,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
        );
    }

    /// Copy whole regions between buffers
    pub fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { self.device.logical().cmd_copy_buffer(self.cmd, src, dst, regions) };
    }

    /// Execute recorded secondary buffers inside the current render pass
    pub fn execute_commands(&mut self, secondaries: &[vk::CommandBuffer]) {
        if secondaries.is_empty() {
            return;
        }
        unsafe { self.device.logical().cmd_execute_commands(self.cmd, secondaries) };
    }

    /// Non-indexed draw
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device.logical().cmd_draw(self.cmd, vertex_count, instance_count, first_vertex, first_instance);
        }
        DrawStats::record(1, vertex_count * instance_count);
    }

    /// Indexed draw
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.logical().cmd_draw_indexed(
                self.cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
        DrawStats::record(1, index_count * instance_count);
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        if self.owns_pool {
            unsafe { self.device.logical().destroy_command_pool(self.pool, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constant_cursor_advances() {
        let mut cursor = PushConstantCursor::default();
        assert_eq!(cursor.advance(64), 0);
        assert_eq!(cursor.advance(16), 64);
        assert_eq!(cursor.offset(), 80);
        cursor.reset();
        assert_eq!(cursor.advance(128), 0);
    }

    #[test]
    #[should_panic(expected = "push constants overflow")]
    fn test_push_constant_cursor_overflow_panics() {
        let mut cursor = PushConstantCursor::default();
        cursor.advance(96);
        cursor.advance(64);
    }

    #[test]
    fn test_push_constant_type_limits() {
        assert!(fits_push_constant::<[f32; 32]>());
        assert!(fits_push_constant::<[[f32; 4]; 4]>());
        assert!(!fits_push_constant::<[f32; 33]>());
        #[repr(align(32))]
        struct Overaligned([u8; 32]);
        assert!(!fits_push_constant::<Overaligned>());
    }

    #[test]
    fn test_layout_transition_masks() {
        assert_eq!(
            layout_transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            Some((vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE))
        );
        assert_eq!(
            layout_transition_masks(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            Some((vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::SHADER_READ))
        );
        assert_eq!(
            layout_transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            Some((
                vk::AccessFlags::HOST_WRITE | vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ
            ))
        );
    }

    #[test]
    fn test_unknown_layouts_have_no_masks() {
        assert!(layout_transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::UNDEFINED).is_none());
        assert!(layout_transition_masks(vk::ImageLayout::GENERAL, vk::ImageLayout::TRANSFER_DST_OPTIMAL).is_none());
    }

    #[test]
    fn test_draw_stats_accumulate() {
        let before = DrawStats::snapshot();
        DrawStats::record(2, 300);
        let after = DrawStats::snapshot();
        assert!(after.draw_calls >= before.draw_calls + 2);
        assert!(after.vertices >= before.vertices + 300);
    }
}
