//! Deduplicating cache for descriptor set layouts
//!
//! Layouts are keyed by their binding signature sorted by binding index, so
//! two requests that list the same bindings in a different order resolve to
//! the same `vk::DescriptorSetLayout`.

use std::collections::HashMap;

use ash::vk;

use super::descriptor_allocator::DescriptorDevice;
use crate::render::backends::vulkan::VulkanResult;

/// Structural identity of one layout binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingSignature {
    /// Binding index within the set
    pub binding: u32,
    /// Raw `vk::DescriptorType`
    pub ty: i32,
    /// Array element count
    pub count: u32,
    /// Raw `vk::ShaderStageFlags`
    pub stages: u32,
}

impl From<&vk::DescriptorSetLayoutBinding> for BindingSignature {
    fn from(binding: &vk::DescriptorSetLayoutBinding) -> Self {
        Self {
            binding: binding.binding,
            ty: binding.descriptor_type.as_raw(),
            count: binding.descriptor_count,
            stages: binding.stage_flags.as_raw(),
        }
    }
}

/// Cache key: the sorted binding signatures plus layout create flags
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutKey {
    bindings: Vec<BindingSignature>,
    flags: u32,
}

impl LayoutKey {
    /// Build a key from bindings in any order
    pub fn new(bindings: &[vk::DescriptorSetLayoutBinding], flags: vk::DescriptorSetLayoutCreateFlags) -> Self {
        let mut signatures: Vec<BindingSignature> = bindings.iter().map(BindingSignature::from).collect();
        if !signatures.windows(2).all(|w| w[0].binding < w[1].binding) {
            signatures.sort_by_key(|s| s.binding);
        }
        Self { bindings: signatures, flags: flags.as_raw() }
    }
}

/// Map from binding signature to a shared layout object
pub struct DescriptorLayoutCache<D: DescriptorDevice> {
    device: D,
    layouts: HashMap<LayoutKey, vk::DescriptorSetLayout>,
}

impl<D: DescriptorDevice> DescriptorLayoutCache<D> {
    /// Create an empty cache
    pub fn new(device: D) -> Self {
        Self { device, layouts: HashMap::new() }
    }

    /// Return the cached layout for `bindings`, creating it on first request
    pub fn create_layout(
        &mut self,
        bindings: &[vk::DescriptorSetLayoutBinding],
        flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let key = LayoutKey::new(bindings, flags);
        if let Some(&layout) = self.layouts.get(&key) {
            return Ok(layout);
        }
        let layout = self.device.create_descriptor_set_layout(bindings, flags)?;
        self.layouts.insert(key, layout);
        Ok(layout)
    }

    /// Number of distinct layouts created
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    /// Whether no layout has been created yet
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

impl<D: DescriptorDevice> Drop for DescriptorLayoutCache<D> {
    fn drop(&mut self) {
        for (_, layout) in self.layouts.drain() {
            self.device.destroy_descriptor_set_layout(layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::descriptor_allocator::mock::MockDescriptorDevice;
    use super::*;

    fn binding(index: u32, ty: vk::DescriptorType, stages: vk::ShaderStageFlags) -> vk::DescriptorSetLayoutBinding {
        vk::DescriptorSetLayoutBinding::builder()
            .binding(index)
            .descriptor_type(ty)
            .descriptor_count(1)
            .stage_flags(stages)
            .build()
    }

    #[test]
    fn test_reordered_bindings_share_layout() {
        let device = MockDescriptorDevice::default();
        let mut cache = DescriptorLayoutCache::new(device.clone());
        let a = binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX);
        let b = binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT);

        let first = cache.create_layout(&[a, b], vk::DescriptorSetLayoutCreateFlags::empty()).unwrap();
        let second = cache.create_layout(&[b, a], vk::DescriptorSetLayoutCreateFlags::empty()).unwrap();
        let third = cache.create_layout(&[a, b], vk::DescriptorSetLayoutCreateFlags::empty()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, third);
        assert_eq!(cache.len(), 1);
        assert_eq!(device.state.borrow().layouts_created, 1);
    }

    #[test]
    fn test_different_stage_gets_new_layout() {
        let device = MockDescriptorDevice::default();
        let mut cache = DescriptorLayoutCache::new(device.clone());
        let vertex = binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX);
        let fragment = binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::FRAGMENT);

        let a = cache.create_layout(&[vertex], vk::DescriptorSetLayoutCreateFlags::empty()).unwrap();
        let b = cache.create_layout(&[fragment], vk::DescriptorSetLayoutCreateFlags::empty()).unwrap();
        assert_ne!(a, b);
        assert_eq!(device.state.borrow().layouts_created, 2);
    }

    #[test]
    fn test_push_descriptor_flag_is_part_of_key() {
        let device = MockDescriptorDevice::default();
        let mut cache = DescriptorLayoutCache::new(device);
        let ubo = binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX);
        let plain = cache.create_layout(&[ubo], vk::DescriptorSetLayoutCreateFlags::empty()).unwrap();
        let push = cache
            .create_layout(&[ubo], vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
            .unwrap();
        assert_ne!(plain, push);
    }

    #[test]
    fn test_drop_destroys_layouts() {
        let device = MockDescriptorDevice::default();
        {
            let mut cache = DescriptorLayoutCache::new(device.clone());
            let ubo = binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX);
            let ssbo = binding(0, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE);
            cache.create_layout(&[ubo], vk::DescriptorSetLayoutCreateFlags::empty()).unwrap();
            cache.create_layout(&[ssbo], vk::DescriptorSetLayoutCreateFlags::empty()).unwrap();
        }
        assert_eq!(device.state.borrow().layouts_destroyed, 2);
    }
}
