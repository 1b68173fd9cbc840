//! Scenes and lifecycle systems for the vke engine.
//!
//! Uses hecs as the ECS backend. Scenes live in a [`SceneArena`] and are
//! addressed by [`SceneId`]; systems receive [`Lifecycle`] events in
//! registration order through a [`SystemRegistry`].

pub mod scene;
pub mod system;

pub use hecs::{Component, Entity, World};
pub use scene::{Scene, SceneArena, SceneId};
pub use system::{Lifecycle, System, SystemContext, SystemRegistry};
