//! Scene storage.

use std::collections::HashMap;
use std::fmt;

use hecs::{Component, DynamicBundle, Entity, QueryBorrow, QueryMut, World};
use vke_core::{Error, Result};

/// Stable handle to a scene in a [`SceneArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneId(usize);

impl SceneId {
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scene#{}", self.0)
    }
}

/// A named entity world.
pub struct Scene {
    name: String,
    world: World,
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            world: World::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create an entity from a bundle of components (`()` for none).
    pub fn spawn(&mut self, components: impl DynamicBundle) -> Entity {
        self.world.spawn(components)
    }

    /// Attach `component` to an existing entity, replacing any previous
    /// component of the same type.
    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) -> Result<()> {
        self.world
            .insert_one(entity, component)
            .map_err(|_| Error::EntityNotFound(format!("{entity:?}")))
    }

    pub fn despawn(&mut self, entity: Entity) -> Result<()> {
        self.world
            .despawn(entity)
            .map_err(|_| Error::EntityNotFound(format!("{entity:?}")))
    }

    /// Borrow every `T` in the scene.
    pub fn entities<T: Component>(&self) -> QueryBorrow<'_, &T> {
        self.world.query::<&T>()
    }

    /// Mutably borrow every `T` in the scene.
    pub fn entities_mut<T: Component>(&mut self) -> QueryMut<'_, &mut T> {
        self.world.query_mut::<&mut T>()
    }

    /// Number of entities carrying a `T`.
    pub fn count<T: Component>(&self) -> usize {
        self.world.query::<&T>().iter().count()
    }

    /// Number of live entities.
    pub fn len(&self) -> u32 {
        self.world.len()
    }

    pub fn is_empty(&self) -> bool {
        self.world.is_empty()
    }

    pub const fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("name", &self.name)
            .field("entities", &self.world.len())
            .finish()
    }
}

/// Owns every registered scene and tracks the current one.
#[derive(Debug, Default)]
pub struct SceneArena {
    scenes: Vec<Scene>,
    by_name: HashMap<String, SceneId>,
    current: Option<SceneId>,
}

impl SceneArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scene and populate it with `setup`.
    ///
    /// Setup runs exactly once, here. Names must be unique.
    pub fn register<F>(&mut self, name: impl Into<String>, setup: F) -> Result<SceneId>
    where
        F: FnOnce(&mut Scene),
    {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateScene(name));
        }

        let mut scene = Scene::new(name.clone());
        setup(&mut scene);

        let id = SceneId(self.scenes.len());
        tracing::debug!("Registered scene '{name}' as {id} with {} entities", scene.len());
        self.scenes.push(scene);
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Make `name` the current scene.
    ///
    /// Switching to the scene that is already current does nothing.
    pub fn switch_to(&mut self, name: &str) -> Result<SceneId> {
        let id = self
            .id_of(name)
            .ok_or_else(|| Error::SceneNotFound(name.to_string()))?;

        if self.current == Some(id) {
            tracing::debug!("Already in '{name}' scene");
            return Ok(id);
        }

        tracing::info!("Switching to '{name}' scene");
        self.current = Some(id);
        Ok(id)
    }

    pub const fn current_id(&self) -> Option<SceneId> {
        self.current
    }

    pub fn current(&self) -> Result<&Scene> {
        self.current
            .and_then(|id| self.scenes.get(id.0))
            .ok_or(Error::NoActiveScene)
    }

    pub fn current_mut(&mut self) -> Result<&mut Scene> {
        self.current
            .and_then(|id| self.scenes.get_mut(id.0))
            .ok_or(Error::NoActiveScene)
    }

    pub fn get(&self, id: SceneId) -> Option<&Scene> {
        self.scenes.get(id.0)
    }

    pub fn get_mut(&mut self, id: SceneId) -> Option<&mut Scene> {
        self.scenes.get_mut(id.0)
    }

    pub fn id_of(&self, name: &str) -> Option<SceneId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Scene names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scenes.iter().map(Scene::name)
    }
}
