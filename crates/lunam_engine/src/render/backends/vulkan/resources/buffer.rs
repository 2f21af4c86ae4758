//! Allocator-backed GPU buffers
//!
//! Buffers are placed by [`MemoryLocation`]. Host-visible buffers can stay
//! mapped for their whole life; device-local ones are filled through a
//! temporary staging buffer and a blocking transfer submit.

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use vk_mem::Alloc;

use crate::render::backends::vulkan::error::allocation_error;
use crate::render::backends::vulkan::initialization::device::Device;
use crate::render::backends::vulkan::rendering::command_buffer::CommandBuffer;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Where a buffer lives and how the CPU reaches it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Device-local, not host visible
    GpuOnly,
    /// Host-visible memory written by the CPU and read by the GPU
    CpuToGpu,
    /// Host-visible memory written by the GPU and read back by the CPU
    GpuToCpu,
    /// Host memory used as a transfer source
    CpuOnly,
}

impl MemoryLocation {
    /// Whether the CPU can map buffers in this location
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryLocation::GpuOnly)
    }

    /// Allocation parameters for this location
    pub fn allocation_info(self) -> vk_mem::AllocationCreateInfo {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        match self {
            MemoryLocation::GpuOnly => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            MemoryLocation::CpuToGpu => vk_mem::AllocationCreateInfo {
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                usage: vk_mem::MemoryUsage::Auto,
                required_flags: host,
                preferred_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                ..Default::default()
            },
            MemoryLocation::GpuToCpu => vk_mem::AllocationCreateInfo {
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                usage: vk_mem::MemoryUsage::Auto,
                required_flags: host,
                preferred_flags: vk::MemoryPropertyFlags::HOST_CACHED,
                ..Default::default()
            },
            MemoryLocation::CpuOnly => vk_mem::AllocationCreateInfo {
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                required_flags: host,
                ..Default::default()
            },
        }
    }
}

/// Validate a write of `len` bytes at `offset` into a buffer of `size` bytes
pub fn check_range(offset: vk::DeviceSize, len: usize, size: vk::DeviceSize) -> VulkanResult<()> {
    let end = offset.checked_add(len as vk::DeviceSize);
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(VulkanError::InvalidOperation {
            reason: format!("write of {len} bytes at offset {offset} exceeds buffer size {size}"),
        }),
    }
}

/// A `VkBuffer` and its allocation
pub struct GpuBuffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    location: MemoryLocation,
    mapped: Option<NonNull<u8>>,
}

// The mapped pointer is only dereferenced through `&mut self`.
unsafe impl Send for GpuBuffer {}
unsafe impl Sync for GpuBuffer {}

impl GpuBuffer {
    /// Allocate `size` bytes; `persistent_map` keeps host-visible memory mapped
    pub fn new(
        device: Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        persistent_map: bool,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot create a zero-sized buffer".to_string(),
            });
        }
        let usage = if location == MemoryLocation::GpuOnly {
            usage | vk::BufferUsageFlags::TRANSFER_DST
        } else {
            usage
        };
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let (buffer, allocation) = unsafe {
            device
                .allocator()
                .create_buffer(&buffer_info, &location.allocation_info())
                .map_err(|e| allocation_error(e, size as usize))?
        };

        let mut gpu_buffer = Self {
            device,
            buffer,
            allocation,
            size,
            location,
            mapped: None,
        };
        if persistent_map && location.is_host_visible() {
            gpu_buffer.map()?;
        }
        Ok(gpu_buffer)
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Memory location class
    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    /// Whether the buffer is currently mapped
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Map the allocation, returning the start of the buffer
    pub fn map(&mut self) -> VulkanResult<NonNull<u8>> {
        if let Some(ptr) = self.mapped {
            return Ok(ptr);
        }
        if !self.location.is_host_visible() {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot map a GPU-only buffer".to_string(),
            });
        }
        let raw = unsafe {
            self.device.allocator().map_memory(&mut self.allocation)
                .map_err(VulkanError::Api)?
        };
        let ptr = NonNull::new(raw).ok_or(VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        self.mapped = Some(ptr);
        Ok(ptr)
    }

    /// Unmap if mapped
    pub fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            unsafe { self.device.allocator().unmap_memory(&mut self.allocation) };
        }
    }

    /// The mapped bytes, if mapped
    pub fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        self.mapped
            .map(|ptr| unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.size as usize) })
    }

    /// Copy `data` into host-visible memory at `offset`
    pub fn write(&mut self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        check_range(offset, data.len(), self.size)?;
        let was_mapped = self.is_mapped();
        let ptr = self.map()?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().add(offset as usize), data.len());
        }
        if !was_mapped {
            self.unmap();
        }
        Ok(())
    }

    /// Copy `data` to `offset`, staging it when the buffer is device-local
    ///
    /// The staging path blocks until the transfer queue is done.
    pub fn upload_data(&mut self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.location.is_host_visible() {
            return self.write(offset, data);
        }
        check_range(offset, data.len(), self.size)?;

        let mut staging = GpuBuffer::new(
            Arc::clone(&self.device),
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuOnly,
            false,
        )?;
        staging.write(0, data)?;

        let mut cmd = CommandBuffer::allocate(
            Arc::clone(&self.device),
            vk::QueueFlags::TRANSFER,
            vk::CommandBufferLevel::PRIMARY,
        )?;
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, None)?;
        cmd.copy_buffer(
            staging.handle(),
            self.buffer,
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: offset,
                size: data.len() as vk::DeviceSize,
            }],
        );
        cmd.flush()
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.unmap();
        unsafe { self.device.allocator().destroy_buffer(self.buffer, &mut self.allocation) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_visibility() {
        assert!(!MemoryLocation::GpuOnly.is_host_visible());
        assert!(MemoryLocation::CpuToGpu.is_host_visible());
        assert!(MemoryLocation::GpuToCpu.is_host_visible());
        assert!(MemoryLocation::CpuOnly.is_host_visible());
    }

    #[test]
    fn test_host_locations_require_coherent_memory() {
        let required = MemoryLocation::CpuToGpu.allocation_info().required_flags;
        assert!(required.contains(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT));
        assert!(MemoryLocation::GpuOnly.allocation_info().required_flags.is_empty());
    }

    #[test]
    fn test_check_range() {
        assert!(check_range(0, 256, 256).is_ok());
        assert!(check_range(192, 64, 256).is_ok());
        assert!(check_range(193, 64, 256).is_err());
        assert!(check_range(u64::MAX, 1, 256).is_err());
    }
}
