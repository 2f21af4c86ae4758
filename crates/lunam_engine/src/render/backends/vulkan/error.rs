//! Vulkan error types and version helpers
//!
//! Every fallible Vulkan call in the backend funnels into [`VulkanError`] through
//! `.map_err(VulkanError::Api)?`. Contract violations that indicate a programming
//! error (double-triggered signals, unknown layout transitions, missing pipelines)
//! panic instead of returning an error.

use ash::vk;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: usize,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Descriptor set allocation failed even after requesting a fresh pool
    #[error("Descriptor set allocation failed: {0:?}")]
    DescriptorAllocation(vk::Result),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Map a failed vk-mem buffer or image creation of `requested` bytes
///
/// The allocator reports `ERROR_FEATURE_NOT_PRESENT` when no memory type
/// satisfies the request.
pub fn allocation_error(result: vk::Result, requested: usize) -> VulkanError {
    match result {
        vk::Result::ERROR_FEATURE_NOT_PRESENT => VulkanError::NoSuitableMemoryType,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            VulkanError::OutOfMemory { requested }
        }
        other => VulkanError::Api(other),
    }
}

/// Pack a `major.minor` version into a single `u32`.
///
/// Major occupies the upper 16 bits, minor the lower 16 bits.
#[must_use]
pub const fn make_version(major: u32, minor: u32) -> u32 {
    ((major & 0xffff) << 16) | (minor & 0xffff)
}

/// Unpack a version produced by [`make_version`] into `(major, minor)`.
#[must_use]
pub const fn unpack_version(version: u32) -> (u32, u32) {
    (version >> 16, version & 0xffff)
}

/// Render a packed Vulkan API version (`VK_MAKE_API_VERSION`) for logs.
#[must_use]
pub fn api_version_string(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_round_trip() {
        for major in 0..=255 {
            for minor in 0..=255 {
                assert_eq!(unpack_version(make_version(major, minor)), (major, minor));
            }
        }
    }

    #[test]
    fn test_version_ordering() {
        assert!(make_version(1, 0) > make_version(0, 255));
        assert!(make_version(2, 3) > make_version(2, 2));
    }

    #[test]
    fn test_api_version_string() {
        assert_eq!(api_version_string(vk::make_api_version(0, 1, 2, 131)), "1.2.131");
    }

    #[test]
    fn test_allocation_error_mapping() {
        assert!(matches!(
            allocation_error(vk::Result::ERROR_FEATURE_NOT_PRESENT, 64),
            VulkanError::NoSuitableMemoryType
        ));
        assert!(matches!(
            allocation_error(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, 64),
            VulkanError::OutOfMemory { requested: 64 }
        ));
        assert!(matches!(
            allocation_error(vk::Result::ERROR_DEVICE_LOST, 64),
            VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)
        ));
    }

    #[test]
    fn test_error_display() {
        let err = VulkanError::Api(vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(err.to_string(), "Vulkan API error: ERROR_DEVICE_LOST");
        let err = VulkanError::InvalidOperation { reason: "not recording".to_string() };
        assert_eq!(err.to_string(), "Invalid operation: not recording");
    }
}
