// Frame geometry
//
// The scene is a flat list of drawables in paint order. Each one is
// tessellated into triangles already in clip space, so the vertex shader is a
// pass-through and the pipeline needs no uniforms.

use crate::config::GameConfig;
use crate::game::{Phase, Side, SimulationState};
use bytemuck::{Pod, Zeroable};
use glam::Vec2;

/// Triangles used to approximate the ball
pub const DISC_SEGMENTS: usize = 24;

const BACKGROUND: [f32; 4] = [0.06, 0.07, 0.09, 1.0];
const NET: [f32; 4] = [0.25, 0.27, 0.32, 1.0];
const PADDLE: [f32; 4] = [0.92, 0.92, 0.95, 1.0];
const BALL: [f32; 4] = [1.0, 0.82, 0.25, 1.0];
const SCORE: [f32; 4] = [0.55, 0.58, 0.65, 1.0];
const WINNER: [f32; 4] = [0.35, 0.9, 0.45, 1.0];
const SCORER: [f32; 4] = [0.95, 0.95, 0.98, 1.0];

const NET_DASHES: usize = 10;

/// Seven-segment masks for 0-9, bit order a b c d e f g
/// (top, upper right, lower right, bottom, lower left, upper left, middle).
const SEGMENT_MASKS: [u8; 10] = [0x3F, 0x06, 0x5B, 0x4F, 0x66, 0x6D, 0x7D, 0x07, 0x7F, 0x6F];

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub color: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Rect,
    Disc,
    /// Seven-segment digit, values above 9 draw nothing
    Digit(u8),
}

/// One flat-colored shape in playfield units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drawable {
    pub shape: Shape,
    pub center: Vec2,
    pub half_extent: Vec2,
    pub color: [f32; 4],
}

impl Drawable {
    pub fn rect(center: Vec2, half_extent: Vec2, color: [f32; 4]) -> Self {
        Self {
            shape: Shape::Rect,
            center,
            half_extent,
            color,
        }
    }

    pub fn vertex_count(&self) -> usize {
        match self.shape {
            Shape::Rect => 6,
            Shape::Disc => DISC_SEGMENTS * 3,
            Shape::Digit(d) => lit_segments(d).len() * 6,
        }
    }
}

/// Local centers and half extents of the segments lit for `digit`,
/// relative to a digit of half extent (1, 1) with stroke `STROKE`.
fn lit_segments(digit: u8) -> Vec<(Vec2, Vec2)> {
    const STROKE: f32 = 0.3;
    let t = STROKE * 0.5;
    let horizontal = Vec2::new(1.0, t);
    let vertical = Vec2::new(t, 0.5);

    let segments = [
        (Vec2::new(0.0, 1.0 - t), horizontal),
        (Vec2::new(1.0 - t, 0.5), vertical),
        (Vec2::new(1.0 - t, -0.5), vertical),
        (Vec2::new(0.0, -1.0 + t), horizontal),
        (Vec2::new(-1.0 + t, -0.5), vertical),
        (Vec2::new(-1.0 + t, 0.5), vertical),
        (Vec2::ZERO, horizontal),
    ];

    let mask = SEGMENT_MASKS.get(digit as usize).copied().unwrap_or(0);
    segments
        .into_iter()
        .enumerate()
        .filter(|(bit, _)| mask & (1 << bit) != 0)
        .map(|(_, segment)| segment)
        .collect()
}

/// Decimal digits of `n`, most significant first
pub fn digits(mut n: u32) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        out.push((n % 10) as u8);
        n /= 10;
        if n == 0 {
            break;
        }
    }
    out.reverse();
    out
}

/// Build the drawables for one frame, in paint order:
/// background, paddles, ball, score.
pub fn scene(state: &SimulationState, rules: &GameConfig) -> Vec<Drawable> {
    let field = Vec2::new(rules.width, rules.height);
    let mut drawables = vec![Drawable::rect(field * 0.5, field * 0.5, BACKGROUND)];

    let dash = rules.height / (NET_DASHES * 2) as f32;
    for i in 0..NET_DASHES {
        let y = dash * (2 * i) as f32 + dash;
        drawables.push(Drawable::rect(
            Vec2::new(rules.width * 0.5, y),
            Vec2::new(0.08, dash * 0.5),
            NET,
        ));
    }

    for side in Side::BOTH {
        let paddle = state.paddle(side);
        drawables.push(Drawable::rect(
            Vec2::new(side.paddle_x(rules), paddle.y),
            Vec2::new(rules.paddle_thickness * 0.5, rules.paddle_height * 0.5),
            PADDLE,
        ));
    }

    drawables.push(Drawable {
        shape: Shape::Disc,
        center: state.ball.position,
        half_extent: Vec2::splat(rules.ball_radius),
        color: BALL,
    });

    let digit_half = Vec2::new(rules.height * 0.035, rules.height * 0.06);
    let spacing = digit_half.x * 2.8;
    for side in Side::BOTH {
        let color = match state.phase {
            Phase::GameOver { winner } if winner == side => WINNER,
            Phase::PointScored { scorer } if scorer == side => SCORER,
            _ => SCORE,
        };
        let anchor_x = match side {
            Side::Left => rules.width * 0.25,
            Side::Right => rules.width * 0.75,
        };
        let number = digits(state.score(side));
        let first_x = anchor_x - spacing * (number.len() - 1) as f32 * 0.5;
        for (i, digit) in number.into_iter().enumerate() {
            drawables.push(Drawable {
                shape: Shape::Digit(digit),
                center: Vec2::new(first_x + spacing * i as f32, rules.height - digit_half.y * 2.0),
                half_extent: digit_half,
                color,
            });
        }
    }

    drawables
}

/// Maps playfield units (y up) to Vulkan clip space (y down)
struct ClipSpace {
    scale: Vec2,
}

impl ClipSpace {
    fn new(rules: &GameConfig) -> Self {
        Self {
            scale: Vec2::new(2.0 / rules.width, -2.0 / rules.height),
        }
    }

    fn map(&self, p: Vec2) -> [f32; 2] {
        (p * self.scale + Vec2::new(-1.0, 1.0)).to_array()
    }
}

/// Append the triangles for `drawables` to `out`, in order
pub fn tessellate(drawables: &[Drawable], rules: &GameConfig, out: &mut Vec<Vertex>) {
    let clip = ClipSpace::new(rules);
    out.reserve(drawables.iter().map(Drawable::vertex_count).sum());

    for drawable in drawables {
        match drawable.shape {
            Shape::Rect => push_rect(out, &clip, drawable.center, drawable.half_extent, drawable.color),
            Shape::Disc => push_disc(out, &clip, drawable),
            Shape::Digit(d) => {
                for (center, half) in lit_segments(d) {
                    push_rect(
                        out,
                        &clip,
                        drawable.center + center * drawable.half_extent,
                        half * drawable.half_extent,
                        drawable.color,
                    );
                }
            }
        }
    }
}

fn push_rect(out: &mut Vec<Vertex>, clip: &ClipSpace, center: Vec2, half: Vec2, color: [f32; 4]) {
    let min = center - half;
    let max = center + half;
    let corners = [
        Vec2::new(min.x, min.y),
        Vec2::new(max.x, min.y),
        Vec2::new(max.x, max.y),
        Vec2::new(min.x, max.y),
    ];
    for i in [0, 1, 2, 0, 2, 3] {
        out.push(Vertex {
            position: clip.map(corners[i]),
            color,
        });
    }
}

fn push_disc(out: &mut Vec<Vertex>, clip: &ClipSpace, disc: &Drawable) {
    let step = std::f32::consts::TAU / DISC_SEGMENTS as f32;
    let rim = |i: usize| disc.center + Vec2::from_angle(step * i as f32) * disc.half_extent;

    for i in 0..DISC_SEGMENTS {
        for p in [disc.center, rim(i), rim(i + 1)] {
            out.push(Vertex {
                position: clip.map(p),
                color: disc.color,
            });
        }
    }
}
