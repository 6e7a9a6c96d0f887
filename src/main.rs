// =============================================================================
// VKVOXEL - Vulkan frame loop
// =============================================================================
//
// A window, a swapchain and a single static draw per frame.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, input, FPS title)                       │
// │    └── FrameDriver (frame counter, resize flag, state machine)  │
// │          └── Renderer (FrameBackend)                            │
// │                ├── Swapchain + SyncSet + CommandSlots           │
// │                └── GraphicsPipeline + GeometryBuffers           │
// │                      └── VulkanDevice                           │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW (see frame.rs):
// 1. Wait for the frame slot's fence
// 2. Acquire swapchain image
// 3. Reset fence, reset and record the slot's command buffer
// 4. Submit to the graphics queue
// 5. Present, rebuilding the swapchain if it went stale or the window resized
// 6. Advance to the next slot
//
// =============================================================================

#![deny(dead_code)]

mod backend;
mod config;
mod error;
mod frame;
mod geometry;
mod renderer;

use anyhow::{Context, Result};
use config::Config;
use frame::{FrameDriver, MAX_FRAMES_IN_FLIGHT};
use renderer::Renderer;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

const CONFIG_PATH: &str = "config.toml";

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Logging depends on the config, so a bad file is reported afterwards
    let (config, config_error) = match Config::load_from_path(CONFIG_PATH) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    init_logging(&config)?;
    match config_error {
        Some(e) => log::warn!("{:#}. Using defaults.", e),
        None => log::debug!("Config: {:?}", config),
    }

    log::info!("Starting VKVoxel");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging, optionally into a file instead of stderr.
///
/// Defaults to `info`; `RUST_LOG` overrides it.
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        let path = &config.debug.log_file;
        let mut file = File::create(path)
            .with_context(|| format!("Failed to create log file {:?}", path))?;
        writeln!(file, "=== VKVoxel Log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,

    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    driver: FrameDriver,
    is_fullscreen: bool,

    /// First fatal error; main turns it into a non-zero exit
    fatal: Option<anyhow::Error>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let driver = FrameDriver::new(MAX_FRAMES_IN_FLIGHT, config.graphics.wait_idle_each_frame);
        let now = Instant::now();
        Self {
            config,
            window: None,
            renderer: None,
            driver,
            is_fullscreen,
            fatal: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        event_loop.exit();
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn render_frame(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match self.driver.run_iteration(renderer) {
            Ok(outcome) => {
                if outcome.advanced() {
                    self.update_fps();
                }
            }
            Err(e) => {
                let error = anyhow::Error::new(e)
                    .context(format!("Frame loop failed while {:?}", self.driver.state()));
                self.fail(event_loop, error);
            }
        }
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            self.driver.request_resize();
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match Renderer::new(window.clone(), &self.config) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to initialize Vulkan"));
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            // Zero-sized (minimized) windows are skipped by the driver and
            // redraws stop; the flag stays raised until there are pixels again
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.driver.request_resize();
                if size.width > 0 && size.height > 0 {
                    self.driver.resume();
                    if let Some(ref window) = self.window {
                        window.request_redraw();
                    }
                }
            }

            WindowEvent::RedrawRequested => self.render_frame(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    match event.physical_key {
                        PhysicalKey::Code(KeyCode::Escape) => {
                            log::info!("ESC pressed, exiting...");
                            event_loop.exit();
                        }
                        PhysicalKey::Code(KeyCode::F11) => self.toggle_fullscreen(),
                        _ => {}
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws, except while minimized
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if !self.driver.wants_redraw() {
            return;
        }
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        let stats = self.driver.stats();
        log::info!(
            "Rendered {} frames, {} swapchain rebuilds, {} skipped",
            stats.frames,
            stats.rebuilds,
            stats.skipped
        );
        // Tear down GPU resources while the window still exists
        self.renderer = None;
    }
}
