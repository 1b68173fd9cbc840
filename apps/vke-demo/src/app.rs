//! Demo application: two scenes, one system, and a small vertex buffer.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use tracing::info;

use vke_app::{pulse, FrameContext, GpuContext, SceneArena, Setup, VkeApp, WindowEngine};
use vke_gpu::GpuBuffer;

use crate::demo::{setup_initial, setup_second, DemoSystem, INITIAL_SCENE, SECOND_SCENE};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
}

pub const TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: Vec3::new(0.0, -0.5, 0.0),
        color: Vec3::X,
    },
    Vertex {
        position: Vec3::new(0.5, 0.5, 0.0),
        color: Vec3::Y,
    },
    Vertex {
        position: Vec3::new(-0.5, 0.5, 0.0),
        color: Vec3::Z,
    },
];

pub struct DemoApp {
    vertices: Option<GpuBuffer>,
}

impl VkeApp for DemoApp {
    fn setup(setup: &mut Setup<'_>) -> anyhow::Result<Self> {
        setup.register_scene(INITIAL_SCENE, setup_initial)?;
        setup.register_scene(SECOND_SCENE, setup_second)?;
        setup.register_system(DemoSystem::default());
        setup.switch_scene(INITIAL_SCENE)?;

        let vertices = setup.engine().upload_buffer(
            &TRIANGLE,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "demo triangle",
        )?;
        info!("Uploaded {} byte vertex buffer", vertices.size);

        Ok(Self {
            vertices: Some(vertices),
        })
    }

    fn record(&mut self, frame: &mut FrameContext<'_, GpuContext>, scenes: &SceneArena) -> vke_gpu::Result<()> {
        frame.clear(scene_color(scenes, frame.frame_number()));
        Ok(())
    }

    fn cleanup(&mut self, engine: &mut WindowEngine) {
        if let Some(vertices) = self.vertices.take() {
            engine.defer_destroy(vertices);
        }
    }
}

/// Blue pulse in the initial scene, green once switched.
fn scene_color(scenes: &SceneArena, frame_number: u64) -> [f32; 4] {
    let [_, _, flash, alpha] = pulse(frame_number);
    match scenes.current().map(vke_app::Scene::name) {
        Ok(SECOND_SCENE) => [0.0, flash, 0.0, alpha],
        _ => [0.0, 0.0, flash, alpha],
    }
}
