//! Vulkan resource management
//!
//! GPU buffers, the descriptor allocator/layout cache/factory triad, the
//! shared per-frame uniform buffer and the background upload workers.

/// Allocator-backed buffers
pub mod buffer;

/// Growing descriptor pool allocator
pub mod descriptor_allocator;

/// Descriptor set layout deduplication
pub mod descriptor_layout_cache;

/// One-shot descriptor set builder
pub mod descriptor_factory;

/// Per-frame uniform layout shared with shaders
pub mod frame_data;

/// Per-frame dynamic uniform buffer
pub mod shared_buffers;

/// Transfer-queue upload workers
pub mod async_upload;
