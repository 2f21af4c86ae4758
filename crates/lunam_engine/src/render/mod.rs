//! # Rendering System
//!
//! The rendering core of the engine. The Vulkan backend lives in
//! [`backends::vulkan`]; [`window`] defines the small surface the backend
//! needs from whatever platform layer owns the window.
//!
//! ## Frame flow
//!
//! - [`GraphicsContext::begin_frame`] waits for the ring slot, acquires a
//!   swapchain image and hands out the slot's primary command buffer
//! - draw calls are recorded directly, or in parallel by the
//!   [`RenderThreadPool`] into secondary buffers
//! - [`GraphicsContext::end_frame`] submits and presents

pub mod window;

/// Graphics backend implementations
///
/// Vulkan is the only backend.
pub mod backends;

pub use backends::vulkan::{
    CommandBuffer, Frame, FrameInheritance, GraphicsContext, GraphicsRecipe, ComputeRecipe,
    PerFrameData, PipelineRecipe, RenderThreadPool, ShaderStage, ShaderVariant, VulkanError, VulkanResult,
};
pub use window::{WindowError, WindowResult, WindowSurface};
