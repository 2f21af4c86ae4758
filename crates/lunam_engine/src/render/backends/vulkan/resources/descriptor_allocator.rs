//! Growing descriptor pool allocator
//!
//! Sets are allocated from a current pool. When that pool is fragmented or
//! exhausted, a fresh pool is requested (recycled from `free_pools` when
//! possible) and the allocation is retried exactly once. `reset_all_pools`
//! recycles every pool without destroying it.
//!
//! The allocator is not internally synchronized; it belongs to the render thread.

use std::sync::Arc;

use ash::vk;

use crate::render::backends::vulkan::initialization::device::Device;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Descriptor-related device calls used by the allocator, layout cache and factory
pub trait DescriptorDevice {
    /// Create a pool with the given per-type sizes
    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
        flags: vk::DescriptorPoolCreateFlags,
    ) -> VulkanResult<vk::DescriptorPool>;

    /// Destroy a pool and every set allocated from it
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    /// Return all sets of `pool` to it
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()>;

    /// Allocate one set; the raw result lets callers branch on pool exhaustion
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result>;

    /// Create a set layout
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
        flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> VulkanResult<vk::DescriptorSetLayout>;

    /// Destroy a set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    /// Apply descriptor writes in one batch
    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]);
}

impl DescriptorDevice for Device {
    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
        flags: vk::DescriptorPoolCreateFlags,
    ) -> VulkanResult<vk::DescriptorPool> {
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(flags)
            .max_sets(max_sets)
            .pool_sizes(sizes);
        unsafe {
            self.logical().create_descriptor_pool(&pool_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.logical().destroy_descriptor_pool(pool, None) };
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()> {
        unsafe {
            self.logical().reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
                .map_err(VulkanError::Api)
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        unsafe { self.logical().allocate_descriptor_sets(&alloc_info) }
            .map(|sets| sets[0])
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
        flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .flags(flags)
            .bindings(bindings);
        unsafe {
            self.logical().create_descriptor_set_layout(&layout_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.logical().destroy_descriptor_set_layout(layout, None) };
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        unsafe { self.logical().update_descriptor_sets(writes, &[]) };
    }
}

impl<T: DescriptorDevice + ?Sized> DescriptorDevice for Arc<T> {
    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
        flags: vk::DescriptorPoolCreateFlags,
    ) -> VulkanResult<vk::DescriptorPool> {
        (**self).create_descriptor_pool(sizes, max_sets, flags)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        (**self).destroy_descriptor_pool(pool);
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()> {
        (**self).reset_descriptor_pool(pool)
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result> {
        (**self).allocate_descriptor_set(pool, layout)
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
        flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        (**self).create_descriptor_set_layout(bindings, flags)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        (**self).destroy_descriptor_set_layout(layout);
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        (**self).update_descriptor_sets(writes);
    }
}

/// Default number of sets per pool
pub const DEFAULT_POOL_GRANULARITY: u32 = 1024;

/// Descriptors of each type reserved per set in a new pool
pub const DEFAULT_POOL_RATIOS: [(vk::DescriptorType, f32); 11] = [
    (vk::DescriptorType::SAMPLER, 0.5),
    (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
    (vk::DescriptorType::SAMPLED_IMAGE, 4.0),
    (vk::DescriptorType::STORAGE_IMAGE, 1.0),
    (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, 1.0),
    (vk::DescriptorType::STORAGE_TEXEL_BUFFER, 1.0),
    (vk::DescriptorType::UNIFORM_BUFFER, 2.0),
    (vk::DescriptorType::STORAGE_BUFFER, 2.0),
    (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1.0),
    (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, 1.0),
    (vk::DescriptorType::INPUT_ATTACHMENT, 0.5),
];

/// Pool sizes for a pool holding `count` sets
pub fn pool_sizes(ratios: &[(vk::DescriptorType, f32)], count: u32) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|&(ty, ratio)| vk::DescriptorPoolSize {
            ty,
            descriptor_count: ((ratio * count as f32) as u32).max(1),
        })
        .collect()
}

/// Descriptor set allocator that grows by whole pools
pub struct DescriptorAllocator<D: DescriptorDevice> {
    device: D,
    ratios: Vec<(vk::DescriptorType, f32)>,
    granularity: u32,
    current_pool: vk::DescriptorPool,
    used_pools: Vec<vk::DescriptorPool>,
    free_pools: Vec<vk::DescriptorPool>,
}

impl<D: DescriptorDevice> DescriptorAllocator<D> {
    /// Allocator with the default ratio table and `granularity` sets per pool
    pub fn new(device: D, granularity: u32) -> Self {
        Self::with_ratios(device, granularity, DEFAULT_POOL_RATIOS.to_vec())
    }

    /// Allocator with a custom `(type, ratio)` table
    pub fn with_ratios(device: D, granularity: u32, ratios: Vec<(vk::DescriptorType, f32)>) -> Self {
        Self {
            device,
            ratios,
            granularity: granularity.max(1),
            current_pool: vk::DescriptorPool::null(),
            used_pools: Vec::new(),
            free_pools: Vec::new(),
        }
    }

    /// Allocate a set for `layout`, spilling into a fresh pool once if the current one is full
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        if self.current_pool == vk::DescriptorPool::null() {
            self.current_pool = self.request_pool()?;
            self.used_pools.push(self.current_pool);
        }

        match self.device.allocate_descriptor_set(self.current_pool, layout) {
            Ok(set) => return Ok(set),
            Err(vk::Result::ERROR_FRAGMENTED_POOL | vk::Result::ERROR_OUT_OF_POOL_MEMORY) => {}
            Err(e) => return Err(VulkanError::Api(e)),
        }

        log::debug!("[RENDER] Descriptor pool exhausted, switching to pool #{}", self.used_pools.len() + 1);
        self.current_pool = self.request_pool()?;
        self.used_pools.push(self.current_pool);

        self.device
            .allocate_descriptor_set(self.current_pool, layout)
            .map_err(VulkanError::DescriptorAllocation)
    }

    /// Pop a recycled pool, or create one sized for `granularity` sets
    pub fn request_pool(&mut self) -> VulkanResult<vk::DescriptorPool> {
        if let Some(pool) = self.free_pools.pop() {
            return Ok(pool);
        }
        let sizes = pool_sizes(&self.ratios, self.granularity);
        self.device
            .create_descriptor_pool(&sizes, self.granularity, vk::DescriptorPoolCreateFlags::empty())
    }

    /// Reset every used pool and move it to the free list
    pub fn reset_all_pools(&mut self) -> VulkanResult<()> {
        for &pool in &self.used_pools {
            self.device.reset_descriptor_pool(pool)?;
        }
        self.free_pools.append(&mut self.used_pools);
        self.current_pool = vk::DescriptorPool::null();
        Ok(())
    }

    /// Pools currently holding live sets
    pub fn used_pool_count(&self) -> usize {
        self.used_pools.len()
    }

    /// Recycled pools ready for reuse
    pub fn free_pool_count(&self) -> usize {
        self.free_pools.len()
    }

    /// Device the allocator issues calls through
    pub fn device(&self) -> &D {
        &self.device
    }
}

impl<D: DescriptorDevice> Drop for DescriptorAllocator<D> {
    fn drop(&mut self) {
        for pool in self.used_pools.drain(..).chain(self.free_pools.drain(..)) {
            self.device.destroy_descriptor_pool(pool);
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    #[derive(Default)]
    pub struct MockState {
        pub next_handle: u64,
        pub pools: HashMap<u64, (u32, u32)>,
        pub pools_created: usize,
        pub pools_destroyed: usize,
        pub resets: usize,
        pub layouts_created: usize,
        pub layouts_destroyed: usize,
        pub writes: Vec<(u32, vk::DescriptorType, u32)>,
        pub fail_with: Option<vk::Result>,
    }

    /// In-memory descriptor device; each pool holds `max_sets` sets
    #[derive(Clone, Default)]
    pub struct MockDescriptorDevice {
        pub state: Rc<RefCell<MockState>>,
    }

    impl MockDescriptorDevice {
        fn next(&self) -> u64 {
            let mut state = self.state.borrow_mut();
            state.next_handle += 1;
            state.next_handle
        }
    }

    impl DescriptorDevice for MockDescriptorDevice {
        fn create_descriptor_pool(
            &self,
            _sizes: &[vk::DescriptorPoolSize],
            max_sets: u32,
            _flags: vk::DescriptorPoolCreateFlags,
        ) -> VulkanResult<vk::DescriptorPool> {
            let raw = self.next();
            let mut state = self.state.borrow_mut();
            state.pools.insert(raw, (0, max_sets));
            state.pools_created += 1;
            Ok(vk::DescriptorPool::from_raw(raw))
        }

        fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
            let mut state = self.state.borrow_mut();
            state.pools.remove(&pool.as_raw());
            state.pools_destroyed += 1;
        }

        fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()> {
            let mut state = self.state.borrow_mut();
            if let Some(entry) = state.pools.get_mut(&pool.as_raw()) {
                entry.0 = 0;
            }
            state.resets += 1;
            Ok(())
        }

        fn allocate_descriptor_set(
            &self,
            pool: vk::DescriptorPool,
            _layout: vk::DescriptorSetLayout,
        ) -> Result<vk::DescriptorSet, vk::Result> {
            if let Some(err) = self.state.borrow().fail_with {
                return Err(err);
            }
            {
                let mut state = self.state.borrow_mut();
                let entry = state.pools.get_mut(&pool.as_raw()).ok_or(vk::Result::ERROR_UNKNOWN)?;
                if entry.0 >= entry.1 {
                    return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
                }
                entry.0 += 1;
            }
            Ok(vk::DescriptorSet::from_raw(self.next()))
        }

        fn create_descriptor_set_layout(
            &self,
            _bindings: &[vk::DescriptorSetLayoutBinding],
            _flags: vk::DescriptorSetLayoutCreateFlags,
        ) -> VulkanResult<vk::DescriptorSetLayout> {
            let raw = self.next();
            self.state.borrow_mut().layouts_created += 1;
            Ok(vk::DescriptorSetLayout::from_raw(raw))
        }

        fn destroy_descriptor_set_layout(&self, _layout: vk::DescriptorSetLayout) {
            self.state.borrow_mut().layouts_destroyed += 1;
        }

        fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
            let mut state = self.state.borrow_mut();
            for write in writes {
                state.writes.push((write.dst_binding, write.descriptor_type, write.descriptor_count));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockDescriptorDevice;
    use super::*;
    use ash::vk::Handle;

    fn layout() -> vk::DescriptorSetLayout {
        vk::DescriptorSetLayout::from_raw(0xabc)
    }

    #[test]
    fn test_pool_sizes_scale_with_count() {
        let sizes = pool_sizes(&DEFAULT_POOL_RATIOS, 1024);
        assert_eq!(sizes.len(), DEFAULT_POOL_RATIOS.len());
        assert_eq!(sizes[0].descriptor_count, 512);
        assert_eq!(sizes[1].descriptor_count, 4096);
        let tiny = pool_sizes(&[(vk::DescriptorType::SAMPLER, 0.5)], 1);
        assert_eq!(tiny[0].descriptor_count, 1);
    }

    #[test]
    fn test_allocation_spills_into_second_pool() {
        let device = MockDescriptorDevice::default();
        let mut allocator = DescriptorAllocator::new(device.clone(), 4);

        let sets: Vec<_> = (0..6).map(|_| allocator.allocate(layout()).unwrap()).collect();
        assert_eq!(sets.len(), 6);
        assert_eq!(allocator.used_pool_count(), 2);
        assert_eq!(device.state.borrow().pools_created, 2);
    }

    #[test]
    fn test_reset_recycles_pools() {
        let device = MockDescriptorDevice::default();
        let mut allocator = DescriptorAllocator::new(device.clone(), 2);
        for _ in 0..5 {
            allocator.allocate(layout()).unwrap();
        }
        assert_eq!(allocator.used_pool_count(), 3);

        allocator.reset_all_pools().unwrap();
        assert_eq!(allocator.used_pool_count(), 0);
        assert_eq!(allocator.free_pool_count(), 3);
        assert_eq!(device.state.borrow().resets, 3);

        for _ in 0..4 {
            allocator.allocate(layout()).unwrap();
        }
        assert_eq!(device.state.borrow().pools_created, 3);
        assert_eq!(allocator.free_pool_count(), 1);
    }

    #[test]
    fn test_unexpected_error_is_not_retried() {
        let device = MockDescriptorDevice::default();
        let mut allocator = DescriptorAllocator::new(device.clone(), 8);
        device.state.borrow_mut().fail_with = Some(vk::Result::ERROR_DEVICE_LOST);
        let err = allocator.allocate(layout()).unwrap_err();
        assert!(matches!(err, VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)));
        assert_eq!(device.state.borrow().pools_created, 1);
    }

    #[test]
    fn test_retry_failure_surfaces() {
        let device = MockDescriptorDevice::default();
        let mut allocator = DescriptorAllocator::new(device.clone(), 8);
        device.state.borrow_mut().fail_with = Some(vk::Result::ERROR_FRAGMENTED_POOL);
        let err = allocator.allocate(layout()).unwrap_err();
        assert!(matches!(err, VulkanError::DescriptorAllocation(vk::Result::ERROR_FRAGMENTED_POOL)));
        assert_eq!(device.state.borrow().pools_created, 2);
    }

    #[test]
    fn test_drop_destroys_all_pools() {
        let device = MockDescriptorDevice::default();
        {
            let mut allocator = DescriptorAllocator::new(device.clone(), 1);
            allocator.allocate(layout()).unwrap();
            allocator.allocate(layout()).unwrap();
            allocator.reset_all_pools().unwrap();
            allocator.allocate(layout()).unwrap();
        }
        let state = device.state.borrow();
        assert_eq!(state.pools_created, 2);
        assert_eq!(state.pools_destroyed, 2);
    }
}
