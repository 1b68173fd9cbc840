//! Frame engine configuration.

use std::time::Duration;

use ash::vk;
use vke_core::constants::{ACQUIRE_TIMEOUT, FRAME_FENCE_TIMEOUT, FRAME_OVERLAP, IMMEDIATE_TIMEOUT};

use crate::descriptors::PoolSizeRatio;

/// Sizing of one descriptor pool.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorPoolConfig {
    pub max_sets: u32,
    pub ratios: Vec<PoolSizeRatio>,
}

impl DescriptorPoolConfig {
    pub fn new(max_sets: u32, ratios: Vec<PoolSizeRatio>) -> Self {
        Self { max_sets, ratios }
    }

    /// Pool recycled every frame for transient sets.
    pub fn per_frame() -> Self {
        Self::new(
            1000,
            vec![
                PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 3.0),
                PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 3.0),
                PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
                PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
            ],
        )
    }

    /// Pool for sets that live as long as the engine.
    pub fn global() -> Self {
        Self::new(
            10,
            vec![PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 1.0)],
        )
    }
}

/// Frame engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEngineConfig {
    /// Number of frame slots in the ring.
    pub frames_in_flight: usize,
    /// How long a slot waits for its previous submission before giving up.
    pub fence_timeout: Duration,
    /// Swapchain image acquire timeout.
    pub acquire_timeout: Duration,
    /// Wait budget for immediate submissions.
    pub immediate_timeout: Duration,
    /// Pool owned by each frame slot.
    pub frame_descriptors: DescriptorPoolConfig,
    /// Pool owned by the engine.
    pub global_descriptors: DescriptorPoolConfig,
    /// Format of the offscreen draw image.
    pub draw_format: vk::Format,
    /// Draw image size (the initial swapchain extent when unset).
    pub draw_extent: Option<vk::Extent2D>,
}

impl Default for FrameEngineConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: FRAME_OVERLAP,
            fence_timeout: FRAME_FENCE_TIMEOUT,
            acquire_timeout: ACQUIRE_TIMEOUT,
            immediate_timeout: IMMEDIATE_TIMEOUT,
            frame_descriptors: DescriptorPoolConfig::per_frame(),
            global_descriptors: DescriptorPoolConfig::global(),
            draw_format: vk::Format::R16G16B16A16_SFLOAT,
            draw_extent: None,
        }
    }
}

impl FrameEngineConfig {
    /// Set the number of frames in flight.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the per-frame fence timeout.
    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }

    /// Set the swapchain acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the immediate submission timeout.
    pub fn with_immediate_timeout(mut self, timeout: Duration) -> Self {
        self.immediate_timeout = timeout;
        self
    }

    /// Set the per-frame descriptor pool sizing.
    pub fn with_frame_descriptors(mut self, pool: DescriptorPoolConfig) -> Self {
        self.frame_descriptors = pool;
        self
    }

    /// Set the engine-global descriptor pool sizing.
    pub fn with_global_descriptors(mut self, pool: DescriptorPoolConfig) -> Self {
        self.global_descriptors = pool;
        self
    }

    /// Set the draw image format.
    pub fn with_draw_format(mut self, format: vk::Format) -> Self {
        self.draw_format = format;
        self
    }

    /// Fix the draw image size instead of following the swapchain.
    pub fn with_draw_extent(mut self, extent: vk::Extent2D) -> Self {
        self.draw_extent = Some(extent);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_double_buffered_with_one_second_waits() {
        let config = FrameEngineConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.fence_timeout, Duration::from_secs(1));
        assert_eq!(config.acquire_timeout, Duration::from_secs(1));
        assert_eq!(config.frame_descriptors.max_sets, 1000);
        assert_eq!(config.global_descriptors.max_sets, 10);
    }

    #[test]
    fn builders_override_fields() {
        let config = FrameEngineConfig::default()
            .with_frames_in_flight(3)
            .with_fence_timeout(Duration::from_millis(5))
            .with_draw_extent(vk::Extent2D {
                width: 64,
                height: 32,
            });
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.fence_timeout, Duration::from_millis(5));
        assert_eq!(config.draw_extent.map(|e| e.width), Some(64));
    }
}
