//! Error types for the engine.

use thiserror::Error;

/// Engine-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// No scene registered under the requested name.
    #[error("Scene not found: {0}")]
    SceneNotFound(String),

    /// A scene with this name already exists.
    #[error("Scene already registered: {0}")]
    DuplicateScene(String),

    /// No scene has been made current yet.
    #[error("No active scene")]
    NoActiveScene,

    /// Entity lookup failed.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
