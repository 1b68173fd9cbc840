//! Frame timing statistics.

use tracing::info;

/// Running FPS statistics, logged at shutdown.
#[derive(Debug, Clone)]
pub struct FrameStats {
    frames: u64,
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            frames: 0,
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
        }
    }
}

impl FrameStats {
    /// Record one frame that took `dt` seconds. Zero-length frames are
    /// ignored.
    pub fn record(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        let fps = 1.0 / f64::from(dt);
        self.min_fps = self.min_fps.min(fps);
        self.max_fps = self.max_fps.max(fps);
        self.fps_sum += fps;
        self.frames += 1;
    }

    pub const fn frames(&self) -> u64 {
        self.frames
    }

    pub fn min(&self) -> Option<f64> {
        (self.frames > 0).then_some(self.min_fps)
    }

    pub fn max(&self) -> Option<f64> {
        (self.frames > 0).then_some(self.max_fps)
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn average(&self) -> Option<f64> {
        (self.frames > 0).then(|| self.fps_sum / self.frames as f64)
    }

    /// Print FPS statistics.
    pub fn log_summary(&self) {
        let (Some(min), Some(max), Some(avg)) = (self.min(), self.max(), self.average()) else {
            return;
        };
        info!("FPS Statistics:");
        info!("  Min: {min:.1}");
        info!("  Max: {max:.1}");
        info!("  Avg: {avg:.1}");
        info!("  Total frames: {}", self.frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats_report_nothing() {
        let stats = FrameStats::default();
        assert_eq!(stats.frames(), 0);
        assert_eq!(stats.average(), None);
        assert_eq!(stats.min(), None);
    }

    #[test]
    fn tracks_min_max_and_average() {
        let mut stats = FrameStats::default();
        stats.record(0.5);
        stats.record(0.25);
        stats.record(0.0);

        assert_eq!(stats.frames(), 2);
        assert_eq!(stats.min(), Some(2.0));
        assert_eq!(stats.max(), Some(4.0));
        assert_eq!(stats.average(), Some(3.0));
    }
}
