//! Vulkan backend
//!
//! Organized the same way as the frame is built:
//! - [`initialization`]: instance, device and the GLFW window
//! - [`resources`]: buffers, descriptors, per-frame uniforms and async uploads
//! - [`rendering`]: command buffers, shaders, pipelines, debug lines and the render thread pool
//! - [`state`]: swapchain, synchronization, teardown and the graphics context

/// Vulkan error type and version helpers
pub mod error;

/// Vulkan initialization types (instance, device, window)
pub mod initialization;

/// Vulkan resource management (buffers, descriptors, uploads)
pub mod resources;

/// Vulkan rendering operations (commands, shaders, pipelines, parallel recording)
pub mod rendering;

/// Vulkan state management (swapchain, sync, context)
pub mod state;

pub use error::{api_version_string, make_version, unpack_version, VulkanError, VulkanResult};

pub use initialization::device::Device;
pub use initialization::instance::VulkanInstance;
pub use initialization::window::Window;

pub use resources::async_upload::{AsyncUploadManager, UploadContext, UploadPool, UploadTask};
pub use resources::buffer::{GpuBuffer, MemoryLocation};
pub use resources::descriptor_allocator::DescriptorAllocator;
pub use resources::descriptor_factory::DescriptorFactory;
pub use resources::descriptor_layout_cache::DescriptorLayoutCache;
pub use resources::frame_data::{PerFrameData, SkyParams};
pub use resources::shared_buffers::SharedBuffers;

pub use rendering::command_buffer::{CommandBuffer, DrawStats};
pub use rendering::debug_draw::{DebugBatch, DebugDraw, DebugDrawList, DistanceFade};
pub use rendering::pipeline::{
    ComputeRecipe, ConfigureHooks, GraphicsRecipe, Pipeline, PipelineError, PipelineHandles, PipelineKind, PipelineRecipe,
};
pub use rendering::pipeline_cache::PipelineCache;
pub use rendering::render_thread_pool::{FrameInheritance, RenderCallback, RenderThreadPool};
pub use rendering::shader::{Shader, ShaderError, ShaderStage, ShaderVariant};
pub use rendering::shader_cache::ShaderCache;

pub use state::context::{Frame, GraphicsContext};
pub use state::deletion_queue::DeletionQueue;
pub use state::signal::Signal;
pub use state::swapchain::Swapchain;
