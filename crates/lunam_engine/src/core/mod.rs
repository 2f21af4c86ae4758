//! Core engine types
//!
//! - [`config`]: renderer configuration consumed by the Vulkan backend

pub mod config;

pub use config::RendererConfig;
