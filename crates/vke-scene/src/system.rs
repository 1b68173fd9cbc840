//! Lifecycle systems.
//!
//! A [`System`] reacts to [`Lifecycle`] events. The [`SystemRegistry`]
//! dispatches each event to every system in registration order; a system
//! may ask for a scene switch through its [`SystemContext`], which takes
//! effect once the whole pass has run.

use vke_core::Result;

use crate::scene::{Scene, SceneArena};

/// Events delivered to systems.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lifecycle {
    /// Once, before the first frame.
    Awake,
    /// Every frame, before recording. `dt` is in seconds.
    Update { dt: f32 },
    /// Once, after the last frame.
    Sleep,
    /// The window surface changed size.
    Resize { width: u32, height: u32 },
}

/// What a system sees while handling an event.
pub struct SystemContext<'a> {
    scenes: &'a mut SceneArena,
    pending_switch: Option<String>,
}

impl<'a> SystemContext<'a> {
    pub(crate) fn new(scenes: &'a mut SceneArena) -> Self {
        Self {
            scenes,
            pending_switch: None,
        }
    }

    pub fn current_scene(&self) -> Result<&Scene> {
        self.scenes.current()
    }

    pub fn current_scene_mut(&mut self) -> Result<&mut Scene> {
        self.scenes.current_mut()
    }

    pub fn scenes(&self) -> &SceneArena {
        self.scenes
    }

    /// Switch to `name` after the current dispatch pass. The last request
    /// in a pass wins.
    pub fn request_switch(&mut self, name: impl Into<String>) {
        self.pending_switch = Some(name.into());
    }

    pub fn pending_switch(&self) -> Option<&str> {
        self.pending_switch.as_deref()
    }
}

/// A unit of per-frame game logic.
pub trait System {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_event(&mut self, event: &Lifecycle, ctx: &mut SystemContext<'_>) -> Result<()>;
}

/// Systems in registration order.
#[derive(Default)]
pub struct SystemRegistry {
    systems: Vec<Box<dyn System>>,
}

impl SystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_system(&mut self, system: impl System + 'static) {
        tracing::debug!("Registered system {}", system.name());
        self.systems.push(Box::new(system));
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Deliver `event` to every system, then apply any requested scene
    /// switch.
    ///
    /// The first failing system stops the pass; a switch requested before
    /// the failure is dropped.
    pub fn dispatch(&mut self, event: &Lifecycle, scenes: &mut SceneArena) -> Result<()> {
        let mut ctx = SystemContext::new(scenes);
        for system in &mut self.systems {
            system.on_event(event, &mut ctx)?;
        }

        if let Some(name) = ctx.pending_switch.take() {
            scenes.switch_to(&name)?;
        }
        Ok(())
    }

    pub fn awake_all(&mut self, scenes: &mut SceneArena) -> Result<()> {
        self.dispatch(&Lifecycle::Awake, scenes)
    }

    /// Run the update pass. Nothing happens while no scene is current.
    pub fn update_all(&mut self, scenes: &mut SceneArena, dt: f32) -> Result<()> {
        if scenes.current_id().is_none() {
            tracing::trace!("No active scene, skipping update");
            return Ok(());
        }
        self.dispatch(&Lifecycle::Update { dt }, scenes)
    }

    pub fn sleep_all(&mut self, scenes: &mut SceneArena) -> Result<()> {
        self.dispatch(&Lifecycle::Sleep, scenes)
    }

    pub fn resize_all(&mut self, scenes: &mut SceneArena, width: u32, height: u32) -> Result<()> {
        self.dispatch(&Lifecycle::Resize { width, height }, scenes)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use vke_core::Error;

    use super::*;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        label: &'static str,
        log: Log,
    }

    impl System for Recorder {
        fn on_event(&mut self, event: &Lifecycle, _ctx: &mut SystemContext<'_>) -> Result<()> {
            self.log
                .borrow_mut()
                .push(format!("{}:{event:?}", self.label));
            Ok(())
        }
    }

    struct Switcher {
        target: &'static str,
    }

    impl System for Switcher {
        fn on_event(&mut self, event: &Lifecycle, ctx: &mut SystemContext<'_>) -> Result<()> {
            if matches!(event, Lifecycle::Update { .. }) {
                ctx.request_switch(self.target);
            }
            Ok(())
        }
    }

    struct SceneWatcher {
        seen: Rc<RefCell<Vec<String>>>,
    }

    impl System for SceneWatcher {
        fn on_event(&mut self, _event: &Lifecycle, ctx: &mut SystemContext<'_>) -> Result<()> {
            let name = ctx.current_scene()?.name().to_string();
            self.seen.borrow_mut().push(name);
            Ok(())
        }
    }

    fn arena() -> SceneArena {
        let mut arena = SceneArena::new();
        arena.register("initial", |_| {}).unwrap();
        arena.register("scene2", |_| {}).unwrap();
        arena.switch_to("initial").unwrap();
        arena
    }

    #[test]
    fn events_follow_registration_order() {
        let log = Log::default();
        let mut registry = SystemRegistry::new();
        for label in ["first", "second", "third"] {
            registry.register_system(Recorder {
                label,
                log: Rc::clone(&log),
            });
        }
        let mut scenes = arena();

        registry.awake_all(&mut scenes).unwrap();
        registry.resize_all(&mut scenes, 800, 600).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                "first:Awake",
                "second:Awake",
                "third:Awake",
                "first:Resize { width: 800, height: 600 }",
                "second:Resize { width: 800, height: 600 }",
                "third:Resize { width: 800, height: 600 }",
            ]
        );
    }

    #[test]
    fn switch_applies_after_the_pass() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut registry = SystemRegistry::new();
        registry.register_system(Switcher { target: "scene2" });
        registry.register_system(SceneWatcher {
            seen: Rc::clone(&seen),
        });
        let mut scenes = arena();

        registry.update_all(&mut scenes, 0.016).unwrap();
        assert_eq!(*seen.borrow(), vec!["initial"]);
        assert_eq!(scenes.current().unwrap().name(), "scene2");

        registry.update_all(&mut scenes, 0.016).unwrap();
        assert_eq!(*seen.borrow(), vec!["initial", "scene2"]);
    }

    #[test]
    fn switching_to_unknown_scene_fails_the_pass() {
        let mut registry = SystemRegistry::new();
        registry.register_system(Switcher { target: "nowhere" });
        let mut scenes = arena();

        let err = registry.update_all(&mut scenes, 0.016).unwrap_err();

        assert!(matches!(err, Error::SceneNotFound(_)));
        assert_eq!(scenes.current().unwrap().name(), "initial");
    }

    #[test]
    fn update_is_skipped_without_a_current_scene() {
        let log = Log::default();
        let mut registry = SystemRegistry::new();
        registry.register_system(Recorder {
            label: "only",
            log: Rc::clone(&log),
        });
        let mut scenes = SceneArena::new();

        registry.update_all(&mut scenes, 0.016).unwrap();
        registry.sleep_all(&mut scenes).unwrap();

        assert_eq!(*log.borrow(), vec!["only:Sleep"]);
    }

    #[test]
    fn system_errors_stop_dispatch() {
        let log = Log::default();
        let mut registry = SystemRegistry::new();
        registry.register_system(SceneWatcher {
            seen: Rc::new(RefCell::new(Vec::new())),
        });
        registry.register_system(Recorder {
            label: "after",
            log: Rc::clone(&log),
        });
        let mut scenes = SceneArena::new();

        let err = registry.awake_all(&mut scenes).unwrap_err();

        assert!(matches!(err, Error::NoActiveScene));
        assert!(log.borrow().is_empty());
    }
}
