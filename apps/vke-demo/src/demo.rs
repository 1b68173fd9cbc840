//! Demo scenes, components and the system that drives them.

use tracing::{debug, info, trace};
use vke_scene::{Lifecycle, Scene, System, SystemContext};

/// Counter component incremented every update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoComponent {
    pub value1: i32,
    pub value2: i32,
}

impl DemoComponent {
    pub const fn new(value1: i32) -> Self {
        Self { value1, value2: 0 }
    }
}

/// Secondary component, only present on one entity of the initial scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoComponent2 {
    pub value1: i32,
    pub value2: i32,
}

pub const INITIAL_SCENE: &str = "initial";
pub const SECOND_SCENE: &str = "scene2";

/// Values that are a multiple of this switch to [`SECOND_SCENE`].
pub const SWITCH_EVERY: i32 = 100;

pub fn setup_initial(scene: &mut Scene) {
    scene.spawn((DemoComponent::new(5),));
    scene.spawn((DemoComponent::new(10),));

    // Component added after spawn.
    let late = scene.spawn(());
    if let Err(e) = scene.add_component(late, DemoComponent::new(5)) {
        tracing::warn!("Failed to attach component: {e}");
    }

    scene.spawn((
        DemoComponent {
            value1: -1000,
            value2: 7,
        },
        DemoComponent2 {
            value1: 10,
            value2: 20,
        },
    ));
}

pub fn setup_second(scene: &mut Scene) {
    scene.spawn((DemoComponent::new(20),));
}

/// Logs and increments every [`DemoComponent`] of the current scene.
#[derive(Debug, Default)]
pub struct DemoSystem {
    updates: u64,
}

impl DemoSystem {
    pub const fn updates(&self) -> u64 {
        self.updates
    }
}

impl System for DemoSystem {
    fn name(&self) -> &str {
        "DemoSystem"
    }

    fn on_event(&mut self, event: &Lifecycle, ctx: &mut SystemContext<'_>) -> vke_core::Result<()> {
        match event {
            Lifecycle::Awake => {
                let scene = ctx.current_scene()?;
                info!(
                    "DemoSystem awake in '{}' with {} counters",
                    scene.name(),
                    scene.count::<DemoComponent>()
                );
                for (_, extra) in scene.entities::<DemoComponent2>().iter() {
                    debug!("DemoComponent2 ({}, {})", extra.value1, extra.value2);
                }
            }
            Lifecycle::Update { dt } => {
                self.updates += 1;
                trace!("DemoSystem update {} (dt {dt:.4}s)", self.updates);

                let mut switch = false;
                for (i, (_, component)) in ctx
                    .current_scene_mut()?
                    .entities_mut::<DemoComponent>()
                    .into_iter()
                    .enumerate()
                {
                    debug!(
                        "Entity {i} DemoComponent value: {} ({})",
                        component.value1, component.value2
                    );
                    component.value1 += 1;
                    switch |= component.value1 % SWITCH_EVERY == 0;
                }

                if switch {
                    ctx.request_switch(SECOND_SCENE);
                }
            }
            Lifecycle::Resize { width, height } => {
                debug!("DemoSystem saw resize to {width}x{height}");
            }
            Lifecycle::Sleep => {
                info!("DemoSystem sleeping after {} updates", self.updates);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vke_scene::{SceneArena, SystemRegistry};

    fn demo_world() -> (SceneArena, SystemRegistry) {
        let mut scenes = SceneArena::new();
        scenes.register(INITIAL_SCENE, setup_initial).unwrap();
        scenes.register(SECOND_SCENE, setup_second).unwrap();
        scenes.switch_to(INITIAL_SCENE).unwrap();

        let mut systems = SystemRegistry::new();
        systems.register_system(DemoSystem::default());
        systems.awake_all(&mut scenes).unwrap();
        (scenes, systems)
    }

    fn values(scene: &Scene) -> Vec<i32> {
        let mut values: Vec<i32> = scene
            .entities::<DemoComponent>()
            .iter()
            .map(|(_, c)| c.value1)
            .collect();
        values.sort_unstable();
        values
    }

    #[test]
    fn initial_scene_layout() {
        let (scenes, _) = demo_world();
        let scene = scenes.current().unwrap();

        assert_eq!(scene.len(), 4);
        assert_eq!(values(scene), vec![-1000, 5, 5, 10]);
        assert_eq!(scene.count::<DemoComponent2>(), 1);

        let second = scenes.get(scenes.id_of(SECOND_SCENE).unwrap()).unwrap();
        assert_eq!(values(second), vec![20]);
    }

    #[test]
    fn update_increments_every_counter() {
        let (mut scenes, mut systems) = demo_world();
        systems.update_all(&mut scenes, 0.016).unwrap();
        systems.update_all(&mut scenes, 0.016).unwrap();

        assert_eq!(values(scenes.current().unwrap()), vec![-998, 7, 7, 12]);
    }

    #[test]
    fn switches_when_a_counter_reaches_a_hundred() {
        let (mut scenes, mut systems) = demo_world();

        // 10 reaches 100 on the 90th update.
        for _ in 0..89 {
            systems.update_all(&mut scenes, 0.016).unwrap();
        }
        assert_eq!(scenes.current().unwrap().name(), INITIAL_SCENE);

        systems.update_all(&mut scenes, 0.016).unwrap();
        assert_eq!(scenes.current().unwrap().name(), SECOND_SCENE);

        // The initial scene stops advancing once inactive.
        systems.update_all(&mut scenes, 0.016).unwrap();
        let initial = scenes.get(scenes.id_of(INITIAL_SCENE).unwrap()).unwrap();
        assert_eq!(values(initial), vec![-910, 95, 95, 100]);
        assert_eq!(values(scenes.current().unwrap()), vec![21]);
    }
}
