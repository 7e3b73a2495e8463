// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.
// The loaded Config is handed to the rest of the program by reference and
// never mutated afterwards.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub game: GameConfig,
    pub controls: ControlsConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "vkpong".to_string(),
            width: 1280,
            height: 800,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preferred present mode, FIFO is used when the surface lacks it
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.02, 0.02, 0.03, 1.0],
            max_frames_in_flight: 2,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honored in debug builds
    pub validation_layers: bool,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            show_fps: true,
        }
    }
}

/// Who moves the right paddle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RightPlayer {
    Cpu,
    Human,
}

/// Match rules and playfield dimensions, in playfield units.
///
/// The playfield spans `0..width` horizontally and `0..height` vertically
/// with y pointing up. Speeds are in units per second.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub width: f32,
    pub height: f32,
    pub paddle_height: f32,
    pub paddle_thickness: f32,
    /// Gap between a side wall and the back of its paddle
    pub paddle_margin: f32,
    pub ball_radius: f32,
    pub paddle_speed: f32,
    pub serve_speed: f32,
    pub max_ball_speed: f32,
    /// Speed multiplier applied on every paddle return
    pub ball_speedup: f32,
    /// Fraction of the paddle's vertical velocity transferred to the ball
    pub paddle_spin: f32,
    pub winning_score: u32,
    /// Seconds between a point and the next serve
    pub point_delay: f32,
    /// Seconds the ball waits at the center before it is served
    pub serve_delay: f32,
    pub right_player: RightPlayer,
    /// Vertical dead zone of the CPU paddle
    pub cpu_reaction: f32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            width: 32.0,
            height: 20.0,
            paddle_height: 4.0,
            paddle_thickness: 0.6,
            paddle_margin: 1.0,
            ball_radius: 0.5,
            paddle_speed: 18.0,
            serve_speed: 14.0,
            max_ball_speed: 40.0,
            ball_speedup: 1.05,
            paddle_spin: 0.25,
            winning_score: 11,
            point_delay: 1.0,
            serve_delay: 1.0,
            right_player: RightPlayer::Cpu,
            cpu_reaction: 0.4,
        }
    }
}

impl GameConfig {
    /// Width over height of the playfield
    pub fn aspect(&self) -> f32 {
        self.width / self.height
    }

    fn validate(&self) -> Result<()> {
        let positive = [
            ("width", self.width),
            ("height", self.height),
            ("paddle_height", self.paddle_height),
            ("paddle_thickness", self.paddle_thickness),
            ("ball_radius", self.ball_radius),
            ("serve_speed", self.serve_speed),
            ("max_ball_speed", self.max_ball_speed),
            ("ball_speedup", self.ball_speedup),
        ];
        for (name, value) in positive {
            anyhow::ensure!(value.is_finite() && value > 0.0, "game.{name} must be positive, got {value}");
        }
        let non_negative = [
            ("paddle_margin", self.paddle_margin),
            ("paddle_speed", self.paddle_speed),
            ("paddle_spin", self.paddle_spin),
            ("point_delay", self.point_delay),
            ("serve_delay", self.serve_delay),
            ("cpu_reaction", self.cpu_reaction),
        ];
        for (name, value) in non_negative {
            anyhow::ensure!(
                value.is_finite() && value >= 0.0,
                "game.{name} must be a finite non-negative number, got {value}"
            );
        }
        anyhow::ensure!(self.winning_score >= 1, "game.winning_score must be at least 1");
        anyhow::ensure!(
            self.serve_speed <= self.max_ball_speed,
            "game.serve_speed exceeds game.max_ball_speed"
        );
        anyhow::ensure!(
            self.paddle_height < self.height && self.ball_radius * 2.0 < self.height,
            "paddles and ball must fit inside the playfield"
        );
        anyhow::ensure!(
            2.0 * (self.paddle_margin + self.paddle_thickness + self.ball_radius) < self.width,
            "paddles leave no room for the ball"
        );
        Ok(())
    }
}

/// Control key bindings, named after winit's `KeyCode` variants
/// (the `Key` and `Digit` prefixes may be dropped, so "W" means `KeyW`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub left_up: String,
    pub left_down: String,
    pub right_up: String,
    pub right_down: String,
    pub serve: String,
    pub reset: String,
    pub fullscreen_key: String,
    pub quit_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            left_up: "W".to_string(),
            left_down: "S".to_string(),
            right_up: "ArrowUp".to_string(),
            right_down: "ArrowDown".to_string(),
            serve: "Space".to_string(),
            reset: "R".to_string(),
            fullscreen_key: "F11".to_string(),
            quit_key: "Escape".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.graphics.max_frames_in_flight >= 1,
            "graphics.max_frames_in_flight must be at least 1"
        );
        self.game.validate()
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::MAILBOX
            }
        }
    }
}
