//! Per-frame uniform buffer shared by every pipeline
//!
//! One persistently mapped buffer holds a [`PerFrameData`] slice per ring
//! slot, each starting on the device's uniform offset alignment. The slice
//! is selected at bind time with a dynamic offset so a single descriptor set
//! serves every slot.

use std::sync::Arc;

use ash::vk;

use super::buffer::{GpuBuffer, MemoryLocation};
use super::descriptor_allocator::{DescriptorAllocator, DescriptorDevice};
use super::descriptor_factory::DescriptorFactory;
use super::descriptor_layout_cache::DescriptorLayoutCache;
use super::frame_data::{PerFrameData, PER_FRAME_BINDING, SET_IDX_PER_FRAME};
use crate::render::backends::vulkan::initialization::device::Device;
use crate::render::backends::vulkan::rendering::command_buffer::CommandBuffer;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Round `size` up to a multiple of `alignment` (a power of two, or zero)
pub fn aligned_stride(size: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment == 0 {
        return size;
    }
    debug_assert!(alignment.is_power_of_two(), "alignment {alignment} is not a power of two");
    (size + alignment - 1) & !(alignment - 1)
}

/// Dynamic uniform buffer with one [`PerFrameData`] slice per ring slot
pub struct SharedBuffers {
    buffer: GpuBuffer,
    stride: vk::DeviceSize,
    slots: usize,
    set: vk::DescriptorSet,
    layout: vk::DescriptorSetLayout,
}

impl SharedBuffers {
    /// Allocate the buffer and build its descriptor set through the factory
    pub fn new<D: DescriptorDevice>(
        device: Arc<Device>,
        slots: usize,
        cache: &mut DescriptorLayoutCache<D>,
        allocator: &mut DescriptorAllocator<D>,
    ) -> VulkanResult<Self> {
        if slots == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "shared buffers need at least one slot".to_string(),
            });
        }
        let size = std::mem::size_of::<PerFrameData>() as vk::DeviceSize;
        let stride = aligned_stride(size, device.min_uniform_buffer_offset_alignment());
        let buffer = GpuBuffer::new(
            device,
            stride * slots as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            true,
        )?;

        let info = [vk::DescriptorBufferInfo {
            buffer: buffer.handle(),
            offset: 0,
            range: size,
        }];
        let (set, layout) = DescriptorFactory::new(cache, allocator)
            .bind_buffers(
                PER_FRAME_BINDING,
                &info,
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                vk::ShaderStageFlags::ALL_GRAPHICS | vk::ShaderStageFlags::COMPUTE,
            )
            .build()?;

        log::debug!("[RENDER] Shared per-frame buffer: {slots} slots, stride {stride} bytes");
        Ok(Self { buffer, stride, slots, set, layout })
    }

    /// Descriptor set for [`SET_IDX_PER_FRAME`]
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Layout to put at index [`SET_IDX_PER_FRAME`] of pipeline layouts
    pub fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Distance in bytes between two slots
    pub fn stride(&self) -> vk::DeviceSize {
        self.stride
    }

    /// Number of slots
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Dynamic offset that selects `slot`
    ///
    /// # Panics
    /// If `slot` is out of range.
    pub fn dynamic_offset(&self, slot: usize) -> u32 {
        assert!(slot < self.slots, "slot {slot} out of range for {} slots", self.slots);
        (self.stride * slot as vk::DeviceSize) as u32
    }

    /// Store `data` in `slot`
    pub fn write(&mut self, slot: usize, data: &PerFrameData) -> VulkanResult<()> {
        let offset = vk::DeviceSize::from(self.dynamic_offset(slot));
        self.buffer.write(offset, bytemuck::bytes_of(data))
    }

    /// Bind `slot` at set 0 of the pipeline currently bound on `cmd`
    pub fn bind(&self, cmd: &mut CommandBuffer, slot: usize) {
        cmd.bind_descriptor_set(SET_IDX_PER_FRAME, self.set, &[self.dynamic_offset(slot)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_stride() {
        assert_eq!(aligned_stride(384, 256), 512);
        assert_eq!(aligned_stride(384, 64), 384);
        assert_eq!(aligned_stride(1, 16), 16);
        assert_eq!(aligned_stride(384, 0), 384);
    }

    #[test]
    fn test_per_frame_slice_fits_stride() {
        let size = std::mem::size_of::<PerFrameData>() as vk::DeviceSize;
        for alignment in [16, 64, 256] {
            let stride = aligned_stride(size, alignment);
            assert!(stride >= size);
            assert_eq!(stride % alignment, 0);
        }
    }
}
