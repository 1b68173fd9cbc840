//! Application configuration.

use std::time::Duration;

use vke_gpu::FrameEngineConfig;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    pub resizable: bool,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Frame engine tuning.
    pub engine: FrameEngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "vke".to_string(),
            width: 1700,
            height: 900,
            resizable: true,
            vsync: true,
            validation: cfg!(debug_assertions),
            target_fps: None,
            engine: FrameEngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub const fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub const fn with_resizable(mut self, resizable: bool) -> Self {
        self.resizable = resizable;
        self
    }

    /// Enable or disable vsync.
    pub const fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub const fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the target FPS.
    pub const fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    pub fn with_engine(mut self, engine: FrameEngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Minimum time between frames, if a target FPS is set.
    pub fn frame_interval(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}
