//! vke demo
//!
//! Opens a window, registers two scenes and a counting system, and clears
//! the draw image every frame. The system switches to the second scene
//! once any counter reaches a multiple of 100.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p vke-demo
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace). `debug` shows
//!   every counter update.

mod app;
mod demo;

use vke_app::{run_app, AppConfig};

use crate::app::DemoApp;

const WIDTH: u32 = 1700;
const HEIGHT: u32 = 900;

fn main() -> anyhow::Result<()> {
    run_app::<DemoApp>(AppConfig::new("vke demo").with_size(WIDTH, HEIGHT))
}
