//! `VkeApp` trait definition.

use vke_gpu::{FrameContext, GpuContext, WindowEngine};
use vke_scene::{Scene, SceneArena, SceneId, System, SystemRegistry};

/// Registration surface handed to [`VkeApp::setup`].
///
/// Scenes and systems registered here exist before the first frame; the
/// engine is available for one-off uploads.
pub struct Setup<'a> {
    pub(crate) scenes: &'a mut SceneArena,
    pub(crate) systems: &'a mut SystemRegistry,
    pub(crate) engine: &'a mut WindowEngine,
}

impl Setup<'_> {
    /// Register a scene, populated once by `setup`.
    pub fn register_scene<F>(&mut self, name: &str, setup: F) -> anyhow::Result<SceneId>
    where
        F: FnOnce(&mut Scene),
    {
        Ok(self.scenes.register(name, setup)?)
    }

    /// Register a system. Systems receive events in registration order.
    pub fn register_system(&mut self, system: impl System + 'static) {
        self.systems.register_system(system);
    }

    /// Make `name` the current scene.
    pub fn switch_scene(&mut self, name: &str) -> anyhow::Result<SceneId> {
        Ok(self.scenes.switch_to(name)?)
    }

    pub fn scenes(&self) -> &SceneArena {
        self.scenes
    }

    /// The frame engine, for uploads and long-lived descriptor sets.
    pub fn engine(&mut self) -> &mut WindowEngine {
        self.engine
    }
}

/// Trait for vke applications.
///
/// The runner handles window creation, GPU initialization, the frame loop
/// and teardown; the application registers scenes and systems and may
/// record its own commands into the draw image.
pub trait VkeApp: Sized {
    /// Register scenes and systems and create application state.
    ///
    /// Called once after the window and engine exist, before any system is
    /// woken.
    fn setup(setup: &mut Setup<'_>) -> anyhow::Result<Self>;

    /// Record this frame's commands into the draw image.
    ///
    /// The draw image is in `GENERAL` layout. The default clears it to a
    /// slowly pulsing blue.
    fn record(&mut self, frame: &mut FrameContext<'_, GpuContext>, scenes: &SceneArena) -> vke_gpu::Result<()> {
        let _ = scenes;
        frame.clear(pulse(frame.frame_number()));
        Ok(())
    }

    /// Handle window resize. The swapchain is rebuilt by the engine.
    #[allow(unused_variables)]
    fn on_resize(&mut self, width: u32, height: u32) {}

    /// Release GPU resources before shutdown.
    ///
    /// The GPU is idle. Anything handed to
    /// [`vke_gpu::FrameEngine::defer_destroy`] here is destroyed with the
    /// engine.
    #[allow(unused_variables)]
    fn cleanup(&mut self, engine: &mut WindowEngine) {}
}

/// Clear colour for the default recording.
#[allow(clippy::cast_precision_loss)]
pub fn pulse(frame_number: u64) -> [f32; 4] {
    let flash = (frame_number as f32 / 120.0).sin().abs();
    [0.0, 0.0, flash, 1.0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulse_stays_in_range() {
        for frame in [0, 1, 60, 188, 10_000] {
            let [r, g, b, a] = pulse(frame);
            assert_eq!((r, g, a), (0.0, 0.0, 1.0));
            assert!((0.0..=1.0).contains(&b));
        }
        assert_eq!(pulse(0)[2], 0.0);
    }
}
