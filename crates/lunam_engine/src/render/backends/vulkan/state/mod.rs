// Vulkan state management

pub mod context;
pub mod deletion_queue;
pub mod signal;
pub mod swapchain;
pub mod sync;
