//! Application framework for the vke engine.
//!
//! This crate provides a trait-based application framework that handles
//! common boilerplate like:
//! - Logging setup
//! - Window creation and management
//! - GPU context, swapchain and frame engine initialization
//! - Dispatching lifecycle events to scene systems
//! - Shutting everything down on close or on a fatal engine error
//!
//! # Example
//!
//! ```no_run
//! use vke_app::{run_app, AppConfig, Setup, VkeApp};
//!
//! struct MyApp;
//!
//! impl VkeApp for MyApp {
//!     fn setup(setup: &mut Setup<'_>) -> anyhow::Result<Self> {
//!         setup.register_scene("main", |scene| {
//!             scene.spawn(());
//!         })?;
//!         setup.switch_scene("main")?;
//!         Ok(MyApp)
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::new("My app"))
//! }
//! ```

mod app;
mod config;
mod runner;
mod stats;

pub use app::{pulse, Setup, VkeApp};
pub use config::AppConfig;
pub use runner::{init_logging, run_app};
pub use stats::FrameStats;

// Re-export commonly used types for convenience
pub use vke_gpu::{FrameContext, FrameEngineConfig, GpuContext, WindowEngine};
pub use vke_scene::{Lifecycle, Scene, SceneArena, System, SystemContext};
