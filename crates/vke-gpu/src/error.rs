//! GPU error types.

use std::time::Duration;

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// A named Vulkan call returned a failure status.
    #[error("{call} failed: {result:?}")]
    Call {
        call: &'static str,
        result: vk::Result,
    },

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Descriptor pool creation was rejected.
    #[error("Descriptor pool creation failed: {0}")]
    PoolCreation(String),

    /// Descriptor pool has no room left for the requested set.
    #[error("Descriptor allocation exhausted: {0}")]
    AllocationExhausted(String),

    /// Surface changed; the swapchain must be rebuilt.
    #[error("Swapchain out of date")]
    SwapchainOutOfDate,

    /// Presentation failed for a reason other than an out-of-date surface.
    #[error("Present failed: {0:?}")]
    PresentFailed(vk::Result),

    /// Fence did not signal in time.
    #[error("Fence wait timed out after {0:?}")]
    FenceTimeout(Duration),

    /// Immediate submission did not complete in time.
    #[error("Immediate submission timed out after {0:?}")]
    SubmissionTimeout(Duration),

    /// Queue submission failed.
    #[error("Queue submit failed: {0:?}")]
    SubmissionFailed(vk::Result),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl GpuError {
    /// Attach the name of the failing call to a raw status code.
    pub const fn call(call: &'static str, result: vk::Result) -> Self {
        Self::Call { call, result }
    }

    /// Whether the frame loop can continue after this error.
    ///
    /// Only an out-of-date swapchain is recoverable; everything else is an
    /// engine fault.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::SwapchainOutOfDate)
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

/// Extension for tagging raw `ash` results with the call that produced them.
pub(crate) trait VkResultExt<T> {
    fn named(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn named(self, call: &'static str) -> Result<T> {
        self.map_err(|result| GpuError::call(call, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_out_of_date_is_recoverable() {
        assert!(GpuError::SwapchainOutOfDate.is_recoverable());
        assert!(!GpuError::FenceTimeout(Duration::from_secs(1)).is_recoverable());
        assert!(!GpuError::SubmissionFailed(vk::Result::ERROR_DEVICE_LOST).is_recoverable());
        assert!(!GpuError::PresentFailed(vk::Result::ERROR_SURFACE_LOST_KHR).is_recoverable());
    }

    #[test]
    fn call_error_names_operation_and_status() {
        let err: Result<()> = Err(vk::Result::ERROR_DEVICE_LOST).named("vkQueueSubmit");
        let message = err.unwrap_err().to_string();
        assert!(message.contains("vkQueueSubmit"));
        assert!(message.contains("ERROR_DEVICE_LOST"));
    }
}
