// Vulkan rendering components

pub mod command_buffer;
pub mod debug_draw;
pub mod draw_partition;
pub mod pipeline;
pub mod pipeline_cache;
pub mod render_thread_pool;
pub mod shader;
pub mod shader_cache;
pub mod shader_compiler;
