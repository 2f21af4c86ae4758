//! # Renderer Configuration
//!
//! Typed tunables for the Vulkan rendering core. Every value has a default that
//! boots a working renderer; applications override them in code with the
//! `with_*` builders or load them from a TOML/RON file through [`Config`].
//!
//! ## Keys
//!
//! - **`concurrent_frames`**: ring size of per-frame sync objects and command buffers
//! - **`msaa_samples`**: sample count of the scene render pass color/depth targets
//! - **`enable_validation`**: load `VK_LAYER_KHRONOS_validation` and the debug messenger
//! - **`enable_vsync`**: FIFO presentation instead of mailbox/immediate
//! - **`debug_draw_vertex_cap`**: vertex budget of the debug line renderer
//! - **`descriptor_pool_granularity`**: set count each new descriptor pool is sized for
//! - **`render_threads`**: number of secondary command buffer recording threads
//! - **`upload_size_threshold`**: byte size at which uploads go to the static uploaders
//! - **`shader_include_dir`**: directory searched for `#include` in GLSL

use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};

/// Largest ring size accepted by [`RendererConfig::validate`]
pub const MAX_CONCURRENT_FRAMES: usize = 8;

/// Vulkan renderer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Whether to enable Vulkan validation layers
    pub enable_validation: bool,
    /// Whether presentation waits for vertical blank
    pub enable_vsync: bool,
    /// Number of frames the CPU may record ahead of the GPU
    pub concurrent_frames: usize,
    /// MSAA sample count (power of two, 1 to 64)
    pub msaa_samples: u32,
    /// Maximum vertices the debug draw buffer holds per frame
    pub debug_draw_vertex_cap: usize,
    /// Sets per descriptor pool (pool sizes scale with it)
    pub descriptor_pool_granularity: u32,
    /// Secondary command buffer recording threads (0 disables parallel recording)
    pub render_threads: usize,
    /// Uploads at or above this many bytes are routed to the static uploaders
    pub upload_size_threshold: usize,
    /// Directory searched when resolving GLSL `#include` directives
    pub shader_include_dir: String,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            enable_validation: false,
            enable_vsync: false,
            concurrent_frames: 3,
            msaa_samples: 4,
            debug_draw_vertex_cap: 0x20000,
            descriptor_pool_granularity: 1024,
            render_threads: 2,
            upload_size_threshold: 8 * 1024 * 1024,
            shader_include_dir: "engine_assets/shaders/include".to_string(),
        }
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = enabled;
        self
    }

    /// Enable validation in debug builds and disable it in release builds
    pub fn with_auto_validation(mut self) -> Self {
        self.enable_validation = cfg!(debug_assertions);
        self
    }

    /// Enable or disable vsync
    pub fn with_vsync(mut self, enabled: bool) -> Self {
        self.enable_vsync = enabled;
        self
    }

    /// Set the frame ring size
    pub fn with_concurrent_frames(mut self, frames: usize) -> Self {
        self.concurrent_frames = frames;
        self
    }

    /// Set the MSAA sample count
    pub fn with_msaa_samples(mut self, samples: u32) -> Self {
        self.msaa_samples = samples;
        self
    }

    /// Set the number of recording threads
    pub fn with_render_threads(mut self, threads: usize) -> Self {
        self.render_threads = threads;
        self
    }

    /// Set the descriptor pool granularity
    pub fn with_descriptor_pool_granularity(mut self, sets: u32) -> Self {
        self.descriptor_pool_granularity = sets;
        self
    }

    /// Set the per-frame debug line vertex budget
    pub fn with_debug_draw_vertex_cap(mut self, vertices: usize) -> Self {
        self.debug_draw_vertex_cap = vertices;
        self
    }

    /// Set the GLSL include directory
    pub fn with_shader_include_dir(mut self, dir: impl Into<String>) -> Self {
        self.shader_include_dir = dir.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }

        if self.concurrent_frames == 0 {
            return Err("Concurrent frames must be at least 1".to_string());
        }

        if self.concurrent_frames > MAX_CONCURRENT_FRAMES {
            return Err(format!(
                "Concurrent frames should not exceed {MAX_CONCURRENT_FRAMES}"
            ));
        }

        if !self.msaa_samples.is_power_of_two() || self.msaa_samples > 64 {
            return Err(format!(
                "MSAA samples must be a power of two between 1 and 64, got {}",
                self.msaa_samples
            ));
        }

        if self.debug_draw_vertex_cap % 2 != 0 {
            return Err("Debug draw vertex cap must be even, lines take two vertices".to_string());
        }

        if self.descriptor_pool_granularity == 0 {
            return Err("Descriptor pool granularity must be at least 1".to_string());
        }

        Ok(())
    }

    /// Load a configuration file and validate it
    pub fn load_validated(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// MSAA sample count as Vulkan flags
    pub fn sample_count_flags(&self) -> ash::vk::SampleCountFlags {
        ash::vk::SampleCountFlags::from_raw(self.msaa_samples)
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Lunam")
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrent_frames, 3);
        assert_eq!(config.descriptor_pool_granularity, 1024);
        assert!(!config.enable_validation);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RendererConfig::default().with_concurrent_frames(0).validate().is_err());
        assert!(RendererConfig::default().with_concurrent_frames(9).validate().is_err());
        assert!(RendererConfig::default().with_msaa_samples(3).validate().is_err());
        assert!(RendererConfig::default().with_msaa_samples(128).validate().is_err());
        assert!(RendererConfig::default().with_descriptor_pool_granularity(0).validate().is_err());
        assert!(RendererConfig::default().with_debug_draw_vertex_cap(3).validate().is_err());
        assert!(RendererConfig::new("").validate().is_err());
    }

    #[test]
    fn test_sample_count_flags() {
        let config = RendererConfig::default().with_msaa_samples(8);
        assert_eq!(config.sample_count_flags(), ash::vk::SampleCountFlags::TYPE_8);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = RendererConfig::from_str_with_format(
            "concurrent_frames = 2\nenable_vsync = true\n",
            ConfigFormat::Toml,
        )
        .unwrap();
        assert_eq!(config.concurrent_frames, 2);
        assert!(config.enable_vsync);
        assert_eq!(config.msaa_samples, 4);
    }

    #[test]
    fn test_ron_round_trip_preserves_values() {
        let config = RendererConfig::default().with_vsync(true).with_render_threads(6);
        let text = config.to_string_with_format(ConfigFormat::Ron).unwrap();
        let parsed = RendererConfig::from_str_with_format(&text, ConfigFormat::Ron).unwrap();
        assert_eq!(parsed, config);
    }
}
