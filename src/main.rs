// =============================================================================
// VKPONG - Two-paddle ball game on raw Vulkan
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, keyboard, redraw requests)           │
// │    └── App: config, input, match state, timing                  │
// │          └── Renderer (frame loop)                              │
// │                ├── Swapchain + Pipeline (rebuilt on resize)     │
// │                ├── FrameResources (fences, semaphores)          │
// │                └── DeviceContext (instance, device, queues)     │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW (one RedrawRequested = one tick):
// 1. Wait for the frame slot's fence
// 2. Acquire swapchain image
// 3. Step the simulation
// 4. Tessellate and record commands
// 5. Submit, then present
//
// =============================================================================

mod backend;
mod config;
mod game;
mod geometry;
mod input;
mod renderer;

use anyhow::{Context, Result};
use ash::vk;
use backend::DeviceContext;
use config::Config;
use game::{Phase, Side, SimulationState};
use input::{Bindings, InputState};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use renderer::{Renderer, Tick};
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::PhysicalKey,
    window::{Fullscreen, Window, WindowAttributes},
};

/// Longest simulation step; longer stalls (window drag, breakpoints) are cut
const MAX_FRAME_TIME: f32 = 0.1;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    init_logging();
    log::info!("Starting vkpong");

    let config = Config::load();
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// `info` by default, `RUST_LOG` overrides
fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Everything the event loop owns.
///
/// The renderer is dropped before the window so the surface never outlives
/// the window it was created for.
struct App {
    config: Config,
    bindings: Bindings,
    input: InputState,
    state: SimulationState,

    renderer: Option<Renderer>,
    window: Option<Window>,

    is_fullscreen: bool,
    last_frame_time: Instant,
    fps: FpsCounter,
    title: String,
    /// Error that ended the event loop, reported from main
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        let bindings = Bindings::from_config(&config.controls).unwrap_or_else(|e| {
            log::warn!("Invalid key binding ({:#}), using default controls", e);
            Bindings::default()
        });

        Self {
            state: SimulationState::new(&config.game),
            is_fullscreen: config.window.fullscreen,
            bindings,
            input: InputState::default(),
            renderer: None,
            window: None,
            last_frame_time: Instant::now(),
            fps: FpsCounter::new(Instant::now()),
            title: String::new(),
            fatal: None,
            config,
        }
    }

    // =========================================================================
    // VULKAN INITIALIZATION
    // =========================================================================

    fn init_graphics(&self, window: &Window) -> Result<Renderer> {
        // Validation is a development aid, release builds never load it
        let validation = cfg!(debug_assertions) && self.config.debug.validation_layers;

        let (device, surface) = DeviceContext::new(
            &self.config.window.title,
            validation,
            window.raw_display_handle(),
            window.raw_window_handle(),
        )
        .context("Failed to initialize Vulkan")?;

        log::info!("Using GPU: {}", device.device_name());

        Renderer::new(device, surface, window_extent(window), &self.config).context("Failed to create renderer")
    }

    // =========================================================================
    // FRAME
    // =========================================================================

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        let dt = now
            .duration_since(self.last_frame_time)
            .as_secs_f32()
            .min(MAX_FRAME_TIME);
        self.last_frame_time = now;

        let (Some(window), Some(renderer)) = (self.window.as_ref(), self.renderer.as_mut()) else {
            return;
        };

        let inputs = self.input.inputs(&self.bindings, &self.state, &self.config.game);
        match renderer.tick(window_extent(window), &mut self.state, &self.config.game, dt, &inputs) {
            Ok(Tick::Rendered) => {
                self.input.consume_presses();
                let fps = self.fps.frame(now);
                self.update_title(fps);
            }
            Ok(Tick::Skipped) => {}
            Err(e) => {
                if e.is_device_lost() {
                    log::error!("GPU device lost");
                }
                log::error!("Fatal render error: {}", e);
                self.fatal = Some(anyhow::Error::new(e).context("Frame loop aborted"));
                self.shutdown(event_loop);
            }
        }
    }

    fn update_title(&mut self, fps: Option<f32>) {
        let fps = if self.config.debug.show_fps {
            fps.or(self.fps.last)
        } else {
            None
        };
        let title = window_title(&self.config.window.title, &self.state, fps);

        // Only touch the window when something changed
        if title != self.title {
            if let Some(window) = &self.window {
                window.set_title(&title);
            }
            self.title = title;
        }
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(window) = &self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            if let Some(renderer) = &mut self.renderer {
                renderer.request_recreate();
            }
        }
    }

    /// Tear down GPU state while the window still exists, then leave the loop
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.take().is_some() {
            log::info!("Renderer shut down");
        }
        event_loop.exit();
    }
}

fn window_extent(window: &Window) -> vk::Extent2D {
    let size = window.inner_size();
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

/// "vkpong - 3 : 7 - 144 FPS", with the winner once the match is over
fn window_title(base: &str, state: &SimulationState, fps: Option<f32>) -> String {
    let mut title = format!(
        "{} - {} : {}",
        base,
        state.score(Side::Left),
        state.score(Side::Right)
    );
    if let Phase::GameOver { winner } = state.phase {
        let name = match winner {
            Side::Left => "Left",
            Side::Right => "Right",
        };
        title.push_str(&format!(" - {name} wins"));
    }
    if let Some(fps) = fps {
        title.push_str(&format!(" - {fps:.0} FPS"));
    }
    title
}

// =============================================================================
// FPS TRACKING
// =============================================================================

/// Frames per second, refreshed once a second
struct FpsCounter {
    window_start: Instant,
    frames: u32,
    last: Option<f32>,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
            last: None,
        }
    }

    /// Count a rendered frame; returns a new value once per second
    fn frame(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.duration_since(self.window_start).as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }

        let fps = self.frames as f32 / elapsed;
        self.frames = 0;
        self.window_start = now;
        self.last = Some(fps);
        Some(fps)
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
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
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => w,
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                self.fatal = Some(anyhow::Error::new(e).context("Failed to create window"));
                event_loop.exit();
                return;
            }
        };

        match self.init_graphics(&window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("{:#}", e);
                self.fatal = Some(e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
        self.last_frame_time = Instant::now();
        self.update_title(None);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = &mut self.renderer {
                    renderer.request_recreate();
                }
            }

            WindowEvent::Focused(false) => self.input.clear(),

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };
                let pressed = event.state.is_pressed();

                if pressed && !event.repeat {
                    if key == self.bindings.quit {
                        log::info!("Quit key pressed, exiting...");
                        self.shutdown(event_loop);
                        return;
                    }
                    if key == self.bindings.fullscreen {
                        self.toggle_fullscreen();
                        return;
                    }
                }

                self.input.key_event(key, pressed);
            }

            _ => {}
        }
    }

    /// Called when the event loop is about to block waiting for events.
    /// We use this to request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Waits for the GPU, then destroys in reverse creation order
        self.renderer = None;
        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn title_shows_score_and_fps() {
        let rules = config::GameConfig::default();
        let mut state = SimulationState::new(&rules);
        state.scores = [3, 7];

        assert_eq!(window_title("vkpong", &state, None), "vkpong - 3 : 7");
        assert_eq!(window_title("vkpong", &state, Some(143.6)), "vkpong - 3 : 7 - 144 FPS");
    }

    #[test]
    fn title_announces_winner() {
        let rules = config::GameConfig::default();
        let mut state = SimulationState::new(&rules);
        state.scores = [4, 11];
        state.phase = Phase::GameOver { winner: Side::Right };

        assert_eq!(window_title("pong", &state, None), "pong - 4 : 11 - Right wins");
    }

    #[test]
    fn fps_is_reported_once_per_second() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);

        for i in 1..60 {
            assert_eq!(counter.frame(start + Duration::from_millis(i * 16)), None);
        }
        let fps = counter.frame(start + Duration::from_secs(1)).unwrap();
        assert_eq!(fps, 60.0);
        assert_eq!(counter.last, Some(60.0));
        assert_eq!(counter.frame(start + Duration::from_millis(1016)), None);
    }
}
