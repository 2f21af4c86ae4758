// Vulkan initialization components

pub mod device;
pub mod instance;
pub mod window;
