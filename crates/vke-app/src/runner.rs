//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use ash::vk;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vke_gpu::{FrameEngine, FrameStatus, GpuContextBuilder, GpuDevice, WindowEngine, WindowTarget};
use vke_scene::{SceneArena, SystemRegistry};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::raw_window_handle::HasDisplayHandle;
use winit::window::{Window, WindowId};

use crate::app::{Setup, VkeApp};
use crate::config::AppConfig;
use crate::stats::FrameStats;

/// Run a `VkeApp` with the given configuration.
///
/// Initializes logging, creates the window, GPU context and frame engine,
/// and runs the event loop until the window closes. A fatal engine error
/// is logged, everything is torn down, and the error is returned.
pub fn run_app<A: VkeApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    init_logging();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        fatal: None,
    };

    event_loop.run_app(&mut runner)?;

    // Window closed without a close request (e.g. the platform ended the loop).
    if let Some(state) = runner.state.take() {
        state.shutdown()?;
    }

    match runner.fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Install the global `tracing` subscriber, filtered by `RUST_LOG`
/// (default `info`). Does nothing if one is already installed.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: VkeApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    fatal: Option<anyhow::Error>,
}

impl<A: VkeApp> AppRunner<A> {
    /// Log a fatal error, tear everything down and stop the loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        error!("Fatal error: {error:#}");
        if let Some(state) = self.state.take() {
            if let Err(e) = state.shutdown() {
                error!("Cleanup after fatal error failed: {e:#}");
            }
        }
        self.fatal.get_or_insert(error);
        event_loop.exit();
    }
}

impl<A: VkeApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() || self.fatal.is_some() {
            return;
        }

        info!("Creating application state...");

        match AppState::create(&self.config, event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let result = match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                let result = self.state.take().map_or(Ok(()), AppState::shutdown);
                event_loop.exit();
                result
            }
            WindowEvent::RedrawRequested => match &mut self.state {
                Some(state) => state.render_frame(),
                None => Ok(()),
            },
            WindowEvent::Resized(size) => match &mut self.state {
                Some(state) => state.handle_resize(size.width, size.height),
                None => Ok(()),
            },
            _ => Ok(()),
        };

        if let Err(e) = result {
            self.fail(event_loop, e);
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

/// Internal application state.
struct AppState<A: VkeApp> {
    app: A,
    engine: WindowEngine,
    scenes: SceneArena,
    systems: SystemRegistry,
    frame_interval: Option<std::time::Duration>,
    last_frame: Instant,
    stats: FrameStats,
    // Dropped last: the surface must not outlive the window.
    window: Arc<Window>,
}

impl<A: VkeApp> AppState<A> {
    fn create(config: &AppConfig, event_loop: &ActiveEventLoop) -> anyhow::Result<Self> {
        let window_attrs = Window::default_attributes()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(config.resizable);
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let gpu = Arc::new(
            GpuContextBuilder::new()
                .app_name(&config.title)
                .validation(config.validation)
                .display(window.display_handle()?.as_raw())
                .build()?,
        );

        let size = window.inner_size();
        let extent = vk::Extent2D {
            width: size.width.max(1),
            height: size.height.max(1),
        };
        // SAFETY: the window is kept alive by `AppState` until after the
        // engine, and with it the surface, has been destroyed.
        let target = unsafe { WindowTarget::new(Arc::clone(&gpu), window.as_ref(), extent, config.vsync)? };
        info!(
            "Swapchain created: {}x{} ({} images)",
            extent.width,
            extent.height,
            target.image_count()
        );

        let mut engine = FrameEngine::new(gpu, target, config.engine.clone())?;
        let mut scenes = SceneArena::new();
        let mut systems = SystemRegistry::new();

        let app = match A::setup(&mut Setup {
            scenes: &mut scenes,
            systems: &mut systems,
            engine: &mut engine,
        }) {
            Ok(app) => app,
            Err(e) => {
                if let Err(destroy) = engine.destroy() {
                    error!("Failed to release engine after setup error: {destroy}");
                }
                return Err(e);
            }
        };

        info!(
            "Setup complete: {} scenes, {} systems",
            scenes.len(),
            systems.len()
        );

        let mut state = Self {
            app,
            engine,
            scenes,
            systems,
            frame_interval: config.frame_interval(),
            last_frame: Instant::now(),
            stats: FrameStats::default(),
            window,
        };

        if let Err(e) = state.systems.awake_all(&mut state.scenes) {
            let e = anyhow::Error::from(e);
            if let Err(cleanup) = state.shutdown() {
                error!("Cleanup after failed awake failed: {cleanup:#}");
            }
            return Err(e);
        }

        Ok(state)
    }

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();
        let dt = frame_start.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = frame_start;
        self.stats.record(dt);

        {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.update").entered();
            self.systems.update_all(&mut self.scenes, dt)?;
        }

        let Self {
            app,
            engine,
            scenes,
            frame_interval,
            ..
        } = self;
        let status = engine.draw_frame(|frame| app.record(frame, scenes))?;
        if status != FrameStatus::Presented {
            tracing::debug!("Frame {} finished as {status:?}", engine.frame_number());
        }

        // Frame pacing
        if let Some(target) = *frame_interval {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                #[cfg(feature = "profiling-tracy")]
                let _span = tracing::trace_span!("frame.pacing").entered();
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        // A zero size (minimized) makes the engine skip frames until the
        // next real size arrives.
        self.engine.request_resize(vk::Extent2D { width, height });
        if width == 0 || height == 0 {
            return Ok(());
        }

        self.systems.resize_all(&mut self.scenes, width, height)?;
        self.app.on_resize(width, height);

        info!("Resized to {width}x{height}");
        Ok(())
    }

    /// Put systems to sleep, release application and engine resources.
    fn shutdown(mut self) -> anyhow::Result<()> {
        self.stats.log_summary();
        info!("Starting cleanup...");

        if let Err(e) = self.engine.device().wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        let sleep = self.systems.sleep_all(&mut self.scenes);
        self.app.cleanup(&mut self.engine);
        let destroyed = self.engine.destroy();

        sleep?;
        destroyed?;
        info!("Cleanup complete");
        Ok(())
    }
}
