//! Core constants and error types for the vke engine.
//!
//! This crate provides the small set of types shared by every layer:
//! - Engine-wide constants (frame overlap, default timeouts)
//! - The engine-level error type used above the GPU layer

pub mod error;

pub use error::{Error, Result};

/// Engine-wide constants
pub mod constants {
    use std::time::Duration;

    /// Number of frames the CPU may record ahead of the GPU.
    pub const FRAME_OVERLAP: usize = 2;
    /// Per-frame fence wait before the GPU is declared hung.
    pub const FRAME_FENCE_TIMEOUT: Duration = Duration::from_secs(1);
    /// Swapchain image acquire timeout.
    pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(1);
    /// Wait budget for a blocking one-shot submission.
    pub const IMMEDIATE_TIMEOUT: Duration = Duration::from_nanos(9_999_999_999);
    /// Engine name reported to the graphics driver.
    pub const ENGINE_NAME: &str = "vke";
}

#[cfg(test)]
mod tests {
    use super::constants::*;

    #[test]
    fn frame_overlap_is_double_buffered() {
        assert_eq!(FRAME_OVERLAP, 2);
    }

    #[test]
    fn immediate_timeout_exceeds_frame_timeout() {
        assert!(IMMEDIATE_TIMEOUT > FRAME_FENCE_TIMEOUT);
    }
}
