//! # Lunam Engine
//!
//! Vulkan rendering core of the Lunam engine: device and swapchain
//! management, an N-buffered frame loop, descriptor and pipeline caches,
//! GLSL compilation with variant caching, debug lines, parallel secondary
//! command buffer recording and background transfer-queue uploads.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lunam_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut window = Window::new("Lunam", 1280, 720)?;
//!     let assets = Arc::new(FileSystemAccessor::new("."));
//!     let mut context = GraphicsContext::new(&window, RendererConfig::default(), assets)?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         if let Some(mut frame) = context.begin_frame(&window, [0.1, 0.1, 0.1, 1.0], false)? {
//!             frame.cmd().begin(ash::vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, None)?;
//!             context.begin_render_pass(&mut frame, ash::vk::SubpassContents::INLINE);
//!             context.end_render_pass(&mut frame);
//!             context.end_frame(&window, frame)?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod assets;
pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        assets::{AssetAccessor, FileSystemAccessor},
        config::{Config, ConfigError},
        core::config::RendererConfig,
        foundation::math::{Mat4, Vec3, Vec4},
        render::backends::vulkan::{
            CommandBuffer, ComputeRecipe, Frame, FrameInheritance, GraphicsContext, GraphicsRecipe, PerFrameData,
            PipelineRecipe, RenderThreadPool, ShaderStage, ShaderVariant, SkyParams, VulkanError, VulkanResult, Window,
        },
    };
}
