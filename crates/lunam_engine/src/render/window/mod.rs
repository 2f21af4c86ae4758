//! Window abstraction consumed by the rendering core
//!
//! The context only needs three things from a window: its framebuffer size in
//! pixels, the instance extensions the platform surface requires, and a way to
//! create that surface. [`WindowSurface`] captures exactly that, so the frame
//! loop can be driven by the GLFW window in
//! [`crate::render::backends::vulkan::Window`] or by any other platform layer.

use ash::vk;
use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The native window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Any other GLFW failure
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Presentation-side window capabilities needed by the Vulkan backend
pub trait WindowSurface {
    /// Current framebuffer size in pixels (may be `(0, 0)` while minimized)
    fn framebuffer_size(&self) -> (u32, u32);

    /// Instance extensions required to create a surface for this window
    fn required_instance_extensions(&self) -> WindowResult<Vec<String>>;

    /// Create a presentation surface for `instance`
    fn create_vulkan_surface(&self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR>;
}
