// Keyboard input
//
// Resolves the configured key names, tracks which keys are held, and turns
// that into per-tick `Inputs` for the simulation. The CPU opponent also lives
// here so `SimulationState::step` stays a pure function of its inputs.

use crate::config::{ControlsConfig, GameConfig, RightPlayer};
use crate::game::{Inputs, Side, SimulationState};
use anyhow::{bail, Result};
use std::collections::HashSet;
use winit::keyboard::KeyCode;

/// Resolve a key name such as "W", "KeyW", "7", "Digit7", "ArrowUp" or "F11"
pub fn parse_key(name: &str) -> Result<KeyCode> {
    let trimmed = name.trim();
    let lower = trimmed.to_ascii_lowercase();

    if let Some(c) = single_char(&lower).or_else(|| lower.strip_prefix("key").and_then(single_char)) {
        if let Some(code) = letter(c) {
            return Ok(code);
        }
    }
    if let Some(c) = single_char(&lower).or_else(|| lower.strip_prefix("digit").and_then(single_char)) {
        if let Some(code) = digit(c) {
            return Ok(code);
        }
    }

    let code = match lower.as_str() {
        "arrowup" | "up" => KeyCode::ArrowUp,
        "arrowdown" | "down" => KeyCode::ArrowDown,
        "arrowleft" | "left" => KeyCode::ArrowLeft,
        "arrowright" | "right" => KeyCode::ArrowRight,
        "space" => KeyCode::Space,
        "enter" | "return" => KeyCode::Enter,
        "escape" | "esc" => KeyCode::Escape,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        "shiftleft" => KeyCode::ShiftLeft,
        "shiftright" => KeyCode::ShiftRight,
        "controlleft" => KeyCode::ControlLeft,
        "controlright" => KeyCode::ControlRight,
        "altleft" => KeyCode::AltLeft,
        "altright" => KeyCode::AltRight,
        "f1" => KeyCode::F1,
        "f2" => KeyCode::F2,
        "f3" => KeyCode::F3,
        "f4" => KeyCode::F4,
        "f5" => KeyCode::F5,
        "f6" => KeyCode::F6,
        "f7" => KeyCode::F7,
        "f8" => KeyCode::F8,
        "f9" => KeyCode::F9,
        "f10" => KeyCode::F10,
        "f11" => KeyCode::F11,
        "f12" => KeyCode::F12,
        _ => bail!("Unknown key name '{}'", trimmed),
    };
    Ok(code)
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

fn letter(c: char) -> Option<KeyCode> {
    const LETTERS: [KeyCode; 26] = [
        KeyCode::KeyA,
        KeyCode::KeyB,
        KeyCode::KeyC,
        KeyCode::KeyD,
        KeyCode::KeyE,
        KeyCode::KeyF,
        KeyCode::KeyG,
        KeyCode::KeyH,
        KeyCode::KeyI,
        KeyCode::KeyJ,
        KeyCode::KeyK,
        KeyCode::KeyL,
        KeyCode::KeyM,
        KeyCode::KeyN,
        KeyCode::KeyO,
        KeyCode::KeyP,
        KeyCode::KeyQ,
        KeyCode::KeyR,
        KeyCode::KeyS,
        KeyCode::KeyT,
        KeyCode::KeyU,
        KeyCode::KeyV,
        KeyCode::KeyW,
        KeyCode::KeyX,
        KeyCode::KeyY,
        KeyCode::KeyZ,
    ];
    c.is_ascii_lowercase().then(|| LETTERS[(c as u8 - b'a') as usize])
}

fn digit(c: char) -> Option<KeyCode> {
    const DIGITS: [KeyCode; 10] = [
        KeyCode::Digit0,
        KeyCode::Digit1,
        KeyCode::Digit2,
        KeyCode::Digit3,
        KeyCode::Digit4,
        KeyCode::Digit5,
        KeyCode::Digit6,
        KeyCode::Digit7,
        KeyCode::Digit8,
        KeyCode::Digit9,
    ];
    c.to_digit(10).map(|d| DIGITS[d as usize])
}

/// Resolved control bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bindings {
    pub left_up: KeyCode,
    pub left_down: KeyCode,
    pub right_up: KeyCode,
    pub right_down: KeyCode,
    pub serve: KeyCode,
    pub reset: KeyCode,
    pub fullscreen: KeyCode,
    pub quit: KeyCode,
}

impl Default for Bindings {
    fn default() -> Self {
        Self {
            left_up: KeyCode::KeyW,
            left_down: KeyCode::KeyS,
            right_up: KeyCode::ArrowUp,
            right_down: KeyCode::ArrowDown,
            serve: KeyCode::Space,
            reset: KeyCode::KeyR,
            fullscreen: KeyCode::F11,
            quit: KeyCode::Escape,
        }
    }
}

impl Bindings {
    pub fn from_config(controls: &ControlsConfig) -> Result<Self> {
        Ok(Self {
            left_up: parse_key(&controls.left_up)?,
            left_down: parse_key(&controls.left_down)?,
            right_up: parse_key(&controls.right_up)?,
            right_down: parse_key(&controls.right_down)?,
            serve: parse_key(&controls.serve)?,
            reset: parse_key(&controls.reset)?,
            fullscreen: parse_key(&controls.fullscreen_key)?,
            quit: parse_key(&controls.quit_key)?,
        })
    }
}

/// Keyboard state between ticks
#[derive(Debug, Default)]
pub struct InputState {
    held: HashSet<KeyCode>,
    /// Presses not yet seen by a rendered tick, so a tap shorter than a
    /// frame (or made while frames are skipped) still serves or resets
    pressed: HashSet<KeyCode>,
}

impl InputState {
    pub fn key_event(&mut self, key: KeyCode, pressed: bool) {
        if pressed {
            if self.held.insert(key) {
                self.pressed.insert(key);
            }
        } else {
            self.held.remove(&key);
        }
    }

    pub fn is_held(&self, key: KeyCode) -> bool {
        self.held.contains(&key)
    }

    /// Drop all held keys, e.g. when the window loses focus
    pub fn clear(&mut self) {
        self.held.clear();
        self.pressed.clear();
    }

    fn axis(&self, up: KeyCode, down: KeyCode) -> f32 {
        let mut axis = 0.0;
        if self.is_held(up) {
            axis += 1.0;
        }
        if self.is_held(down) {
            axis -= 1.0;
        }
        axis
    }

    /// Build this tick's inputs. Pending presses stay pending until
    /// `consume_presses`.
    pub fn inputs(&self, bindings: &Bindings, state: &SimulationState, rules: &GameConfig) -> Inputs {
        let right = match rules.right_player {
            RightPlayer::Human => self.axis(bindings.right_up, bindings.right_down),
            RightPlayer::Cpu => cpu_axis(state, rules),
        };

        Inputs {
            paddles: [self.axis(bindings.left_up, bindings.left_down), right],
            serve: self.pressed.contains(&bindings.serve),
            reset: self.pressed.contains(&bindings.reset),
        }
    }

    /// Call once the simulation has actually stepped with the pending presses
    pub fn consume_presses(&mut self) {
        self.pressed.clear();
    }
}

/// CPU opponent for the right paddle: follows the ball while it approaches,
/// drifts back to the middle otherwise. Does nothing within `cpu_reaction`
/// of its target, which keeps it beatable.
pub fn cpu_axis(state: &SimulationState, rules: &GameConfig) -> f32 {
    let paddle = state.paddle(Side::Right);
    let target = if state.ball.velocity.x > 0.0 {
        state.ball.position.y
    } else {
        rules.height * 0.5
    };

    let offset = target - paddle.y;
    if offset.abs() <= rules.cpu_reaction {
        0.0
    } else {
        offset.signum()
    }
}
