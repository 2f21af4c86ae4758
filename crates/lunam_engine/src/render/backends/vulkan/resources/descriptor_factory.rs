//! One-shot descriptor set builder
//!
//! Accumulates layout bindings and the writes that go with them, then in
//! `build` resolves the layout through the [`DescriptorLayoutCache`],
//! allocates a set from the [`DescriptorAllocator`] and applies every write
//! in a single `vkUpdateDescriptorSets` call.
//!
//! ```ignore
//! let (set, layout) = DescriptorFactory::new(&mut cache, &mut allocator)
//!     .bind_buffers(0, &ubo_info, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, vk::ShaderStageFlags::ALL_GRAPHICS)
//!     .bind_images(1, &albedo_info, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT)
//!     .build()?;
//! ```

use ash::vk;

use super::descriptor_allocator::{DescriptorAllocator, DescriptorDevice};
use super::descriptor_layout_cache::DescriptorLayoutCache;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Stages used by bindings that don't name their own
pub const COMMON_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw()
        | vk::ShaderStageFlags::FRAGMENT.as_raw()
        | vk::ShaderStageFlags::COMPUTE.as_raw(),
);

enum WriteInfo<'a> {
    Buffers(&'a [vk::DescriptorBufferInfo]),
    Images(&'a [vk::DescriptorImageInfo]),
}

struct PendingWrite<'a> {
    binding: u32,
    ty: vk::DescriptorType,
    info: WriteInfo<'a>,
}

/// Builder composing bindings and writes into one allocate + update
pub struct DescriptorFactory<'a, D: DescriptorDevice> {
    cache: &'a mut DescriptorLayoutCache<D>,
    allocator: &'a mut DescriptorAllocator<D>,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
    writes: Vec<PendingWrite<'a>>,
    error: Option<VulkanError>,
}

impl<'a, D: DescriptorDevice> DescriptorFactory<'a, D> {
    /// Start an empty builder
    pub fn new(cache: &'a mut DescriptorLayoutCache<D>, allocator: &'a mut DescriptorAllocator<D>) -> Self {
        Self {
            cache,
            allocator,
            bindings: Vec::new(),
            writes: Vec::new(),
            error: None,
        }
    }

    /// Record the first misuse; the build methods report it
    fn reject_empty(&mut self, binding: u32) {
        if self.error.is_none() {
            self.error = Some(VulkanError::InvalidOperation {
                reason: format!("descriptor binding {binding} has no infos"),
            });
        }
    }

    fn check(&mut self) -> VulkanResult<()> {
        self.error.take().map_or(Ok(()), Err)
    }

    fn push_binding(&mut self, binding: u32, ty: vk::DescriptorType, count: u32, stages: vk::ShaderStageFlags) {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(count)
                .stage_flags(stages)
                .build(),
        );
    }

    /// Bind buffers at `binding`; one array element per info
    ///
    /// An empty `infos` makes the next build fail.
    pub fn bind_buffers(
        mut self,
        binding: u32,
        infos: &'a [vk::DescriptorBufferInfo],
        ty: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        if infos.is_empty() {
            self.reject_empty(binding);
            return self;
        }
        self.push_binding(binding, ty, infos.len() as u32, stages);
        self.writes.push(PendingWrite { binding, ty, info: WriteInfo::Buffers(infos) });
        self
    }

    /// Bind images at `binding`; one array element per info
    ///
    /// An empty `infos` makes the next build fail.
    pub fn bind_images(
        mut self,
        binding: u32,
        infos: &'a [vk::DescriptorImageInfo],
        ty: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        if infos.is_empty() {
            self.reject_empty(binding);
            return self;
        }
        self.push_binding(binding, ty, infos.len() as u32, stages);
        self.writes.push(PendingWrite { binding, ty, info: WriteInfo::Images(infos) });
        self
    }

    /// Declare a binding that is written later (or pushed), visible to `stages`
    pub fn bind_no_info_stage(mut self, ty: vk::DescriptorType, stages: vk::ShaderStageFlags, binding: u32, count: u32) -> Self {
        self.push_binding(binding, ty, count, stages);
        self
    }

    /// Declare a binding without a write, visible to [`COMMON_STAGES`]
    pub fn bind_no_info(self, ty: vk::DescriptorType, binding: u32, count: u32) -> Self {
        self.bind_no_info_stage(ty, COMMON_STAGES, binding, count)
    }

    /// Resolve the layout, allocate a set and apply all pending writes
    pub fn build(mut self) -> VulkanResult<(vk::DescriptorSet, vk::DescriptorSetLayout)> {
        self.check()?;
        let layout = self.cache.create_layout(&self.bindings, vk::DescriptorSetLayoutCreateFlags::empty())?;
        let set = self.allocator.allocate(layout)?;

        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|pending| {
                let write = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(pending.binding)
                    .descriptor_type(pending.ty);
                match pending.info {
                    WriteInfo::Buffers(infos) => write.buffer_info(infos).build(),
                    WriteInfo::Images(infos) => write.image_info(infos).build(),
                }
            })
            .collect();
        if !writes.is_empty() {
            self.allocator.device().update_descriptor_sets(&writes);
        }
        Ok((set, layout))
    }

    /// Resolve the layout and allocate a set without writing it
    pub fn build_no_info(mut self) -> VulkanResult<(vk::DescriptorSet, vk::DescriptorSetLayout)> {
        self.check()?;
        let layout = self.cache.create_layout(&self.bindings, vk::DescriptorSetLayoutCreateFlags::empty())?;
        let set = self.allocator.allocate(layout)?;
        Ok((set, layout))
    }

    /// Resolve only the layout, flagged for push descriptors when `push` is set
    pub fn build_layout(mut self, push: bool) -> VulkanResult<vk::DescriptorSetLayout> {
        self.check()?;
        let flags = if push {
            vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR
        } else {
            vk::DescriptorSetLayoutCreateFlags::empty()
        };
        self.cache.create_layout(&self.bindings, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::super::descriptor_allocator::mock::MockDescriptorDevice;
    use super::*;
    use ash::vk::Handle;

    fn buffer_info() -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: vk::Buffer::from_raw(7),
            offset: 0,
            range: 256,
        }
    }

    #[test]
    fn test_build_applies_all_writes_once() {
        let device = MockDescriptorDevice::default();
        let mut cache = DescriptorLayoutCache::new(device.clone());
        let mut allocator = DescriptorAllocator::new(device.clone(), 16);
        let buffers = [buffer_info()];
        let images = [vk::DescriptorImageInfo::default(); 2];

        let (set, layout) = DescriptorFactory::new(&mut cache, &mut allocator)
            .bind_buffers(0, &buffers, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, vk::ShaderStageFlags::VERTEX)
            .bind_images(1, &images, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT)
            .bind_no_info(vk::DescriptorType::STORAGE_BUFFER, 2, 1)
            .build()
            .unwrap();

        assert_ne!(set, vk::DescriptorSet::null());
        assert_ne!(layout, vk::DescriptorSetLayout::null());
        let state = device.state.borrow();
        assert_eq!(
            state.writes,
            vec![
                (0, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1),
                (1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 2),
            ]
        );
    }

    #[test]
    fn test_repeated_builds_reuse_layout() {
        let device = MockDescriptorDevice::default();
        let mut cache = DescriptorLayoutCache::new(device.clone());
        let mut allocator = DescriptorAllocator::new(device.clone(), 16);
        let buffers = [buffer_info()];

        let (set_a, layout_a) = DescriptorFactory::new(&mut cache, &mut allocator)
            .bind_buffers(0, &buffers, vk::DescriptorType::UNIFORM_BUFFER, COMMON_STAGES)
            .build()
            .unwrap();
        let (set_b, layout_b) = DescriptorFactory::new(&mut cache, &mut allocator)
            .bind_buffers(0, &buffers, vk::DescriptorType::UNIFORM_BUFFER, COMMON_STAGES)
            .build()
            .unwrap();

        assert_eq!(layout_a, layout_b);
        assert_ne!(set_a, set_b);
        assert_eq!(device.state.borrow().layouts_created, 1);
    }

    #[test]
    fn test_build_no_info_skips_writes() {
        let device = MockDescriptorDevice::default();
        let mut cache = DescriptorLayoutCache::new(device.clone());
        let mut allocator = DescriptorAllocator::new(device.clone(), 16);

        DescriptorFactory::new(&mut cache, &mut allocator)
            .bind_no_info_stage(vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE, 0, 1)
            .build_no_info()
            .unwrap();
        assert!(device.state.borrow().writes.is_empty());
    }

    #[test]
    fn test_build_layout_allocates_nothing() {
        let device = MockDescriptorDevice::default();
        let mut cache = DescriptorLayoutCache::new(device.clone());
        let mut allocator = DescriptorAllocator::new(device.clone(), 16);

        DescriptorFactory::new(&mut cache, &mut allocator)
            .bind_no_info(vk::DescriptorType::UNIFORM_BUFFER, 0, 1)
            .build_layout(true)
            .unwrap();
        assert_eq!(device.state.borrow().pools_created, 0);
        assert_eq!(allocator.used_pool_count(), 0);
    }

    #[test]
    fn test_empty_infos_fail_build_before_allocating() {
        let device = MockDescriptorDevice::default();
        let mut cache = DescriptorLayoutCache::new(device.clone());
        let mut allocator = DescriptorAllocator::new(device.clone(), 16);
        let buffers = [buffer_info()];

        let result = DescriptorFactory::new(&mut cache, &mut allocator)
            .bind_buffers(0, &buffers, vk::DescriptorType::UNIFORM_BUFFER, COMMON_STAGES)
            .bind_images(1, &[], vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT)
            .build();

        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
        let state = device.state.borrow();
        assert_eq!(state.layouts_created, 0);
        assert_eq!(state.pools_created, 0);
        assert!(state.writes.is_empty());
    }

    #[test]
    fn test_empty_buffer_infos_fail_layout_build() {
        let device = MockDescriptorDevice::default();
        let mut cache = DescriptorLayoutCache::new(device.clone());
        let mut allocator = DescriptorAllocator::new(device.clone(), 16);

        let result = DescriptorFactory::new(&mut cache, &mut allocator)
            .bind_buffers(3, &[], vk::DescriptorType::STORAGE_BUFFER, COMMON_STAGES)
            .build_layout(false);
        assert!(result.is_err());
        assert_eq!(device.state.borrow().layouts_created, 0);
    }
}
