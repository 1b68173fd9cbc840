//! Scene arena and system registry driven the way the runner drives them.

use vke_scene::{Lifecycle, SceneArena, System, SystemContext, SystemRegistry};

struct Counter(i32);

struct CountingSystem {
    updates: u32,
}

impl System for CountingSystem {
    fn on_event(&mut self, event: &Lifecycle, ctx: &mut SystemContext<'_>) -> vke_core::Result<()> {
        let Lifecycle::Update { .. } = event else {
            return Ok(());
        };
        self.updates += 1;

        let mut reached = false;
        for (_, counter) in ctx.current_scene_mut()?.entities_mut::<Counter>() {
            counter.0 += 1;
            reached |= counter.0 % 10 == 0;
        }
        if reached {
            ctx.request_switch("second");
        }
        Ok(())
    }
}

#[test]
fn scenes_keep_their_state_across_switches() {
    let mut scenes = SceneArena::new();
    scenes
        .register("first", |scene| {
            scene.spawn((Counter(5),));
        })
        .unwrap();
    scenes
        .register("second", |scene| {
            scene.spawn((Counter(20),));
            scene.spawn((Counter(33),));
        })
        .unwrap();
    scenes.switch_to("first").unwrap();

    let mut systems = SystemRegistry::new();
    systems.register_system(CountingSystem { updates: 0 });
    systems.awake_all(&mut scenes).unwrap();

    for _ in 0..5 {
        systems.update_all(&mut scenes, 1.0 / 60.0).unwrap();
    }

    // 5 -> 10 on the fifth update triggers the switch.
    assert_eq!(scenes.current().unwrap().name(), "second");
    let first = scenes.get(scenes.id_of("first").unwrap()).unwrap();
    let values: Vec<i32> = first.entities::<Counter>().iter().map(|(_, c)| c.0).collect();
    assert_eq!(values, vec![10]);

    systems.update_all(&mut scenes, 1.0 / 60.0).unwrap();
    let mut values: Vec<i32> = scenes
        .current()
        .unwrap()
        .entities::<Counter>()
        .iter()
        .map(|(_, c)| c.0)
        .collect();
    values.sort_unstable();
    assert_eq!(values, vec![21, 34]);

    systems.sleep_all(&mut scenes).unwrap();
}
