// Match simulation
//
// Pure CPU state machine: paddles, ball, scores and the match phase.
// Nothing in here touches the GPU; the frame loop calls `step` once per
// rendered tick and tessellates the result.

use crate::config::GameConfig;
use glam::Vec2;

/// Upper bound on ball sub-steps per tick
const MAX_SUBSTEPS: usize = 256;

/// Angle of the serve vector above the horizontal, in radians
const SERVE_ANGLE: f32 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn opponent(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// Horizontal center of this side's paddle
    pub fn paddle_x(self, rules: &GameConfig) -> f32 {
        let offset = rules.paddle_margin + rules.paddle_thickness * 0.5;
        match self {
            Side::Left => offset,
            Side::Right => rules.width - offset,
        }
    }

    /// X coordinate of the paddle face the ball bounces off
    fn paddle_face(self, rules: &GameConfig) -> f32 {
        let inset = rules.paddle_margin + rules.paddle_thickness;
        match self {
            Side::Left => inset,
            Side::Right => rules.width - inset,
        }
    }
}

/// Match phase
///
/// `Serving -> Rallying -> PointScored -> Serving`, and `Rallying -> GameOver`
/// once a side reaches the winning score. `GameOver` only leaves on reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Serving,
    Rallying,
    PointScored { scorer: Side },
    GameOver { winner: Side },
}

/// Per-tick player intent
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Inputs {
    /// Paddle movement axis per side, -1 (down) to 1 (up)
    pub paddles: [f32; 2],
    pub serve: bool,
    pub reset: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paddle {
    pub y: f32,
    pub velocity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ball {
    pub position: Vec2,
    pub velocity: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationState {
    pub paddles: [Paddle; 2],
    pub ball: Ball,
    pub scores: [u32; 2],
    pub phase: Phase,
    /// Seconds spent in the current phase
    pub phase_time: f32,
    /// Horizontal sign of the next serve
    pub next_serve: f32,
}

impl SimulationState {
    /// Fresh match: centered paddles, ball waiting to be served to the right
    pub fn new(rules: &GameConfig) -> Self {
        let paddle = Paddle {
            y: rules.height * 0.5,
            velocity: 0.0,
        };
        let mut state = Self {
            paddles: [paddle; 2],
            ball: Ball {
                position: center(rules),
                velocity: Vec2::ZERO,
            },
            scores: [0, 0],
            phase: Phase::Serving,
            phase_time: 0.0,
            next_serve: 1.0,
        };
        state.enter_serving(rules);
        state
    }

    pub fn score(&self, side: Side) -> u32 {
        self.scores[side.index()]
    }

    pub fn paddle(&self, side: Side) -> Paddle {
        self.paddles[side.index()]
    }

    /// Advance the match by `dt` seconds.
    pub fn step(&self, rules: &GameConfig, dt: f32, inputs: &Inputs) -> Self {
        let mut next = *self;

        if inputs.reset && matches!(next.phase, Phase::GameOver { .. }) {
            return Self::new(rules);
        }
        if !(dt.is_finite() && dt > 0.0) || matches!(next.phase, Phase::GameOver { .. }) {
            return next;
        }

        next.move_paddles(rules, dt, inputs);
        next.phase_time += dt;

        match next.phase {
            Phase::Serving => {
                if inputs.serve || next.phase_time >= rules.serve_delay {
                    next.set_phase(Phase::Rallying);
                }
            }
            Phase::Rallying => next.advance_ball(rules, dt),
            Phase::PointScored { .. } => {
                if next.phase_time >= rules.point_delay {
                    next.enter_serving(rules);
                }
            }
            Phase::GameOver { .. } => {}
        }

        next
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.phase_time = 0.0;
    }

    /// Re-center the ball and load the serve vector, alternating direction
    fn enter_serving(&mut self, rules: &GameConfig) {
        let direction = Vec2::new(self.next_serve * SERVE_ANGLE.cos(), SERVE_ANGLE.sin());
        self.ball = Ball {
            position: center(rules),
            velocity: direction * rules.serve_speed.min(rules.max_ball_speed),
        };
        self.next_serve = -self.next_serve;
        self.set_phase(Phase::Serving);
    }

    fn move_paddles(&mut self, rules: &GameConfig, dt: f32, inputs: &Inputs) {
        let half = rules.paddle_height * 0.5;
        for (paddle, axis) in self.paddles.iter_mut().zip(inputs.paddles) {
            let axis = if axis.is_finite() { axis.clamp(-1.0, 1.0) } else { 0.0 };
            let y = (paddle.y + axis * rules.paddle_speed * dt).clamp(half, rules.height - half);
            paddle.velocity = (y - paddle.y) / dt;
            paddle.y = y;
        }
    }

    /// Integrate the ball in strides short enough that it cannot skip a paddle
    fn advance_ball(&mut self, rules: &GameConfig, dt: f32) {
        self.ball.velocity = self.ball.velocity.clamp_length_max(rules.max_ball_speed);

        let stride = (rules.paddle_thickness * 0.5).min(rules.ball_radius);
        let travel = self.ball.velocity.length() * dt;
        let steps = ((travel / stride).ceil() as usize).clamp(1, MAX_SUBSTEPS);
        let h = dt / steps as f32;

        for _ in 0..steps {
            match self.substep(rules, h) {
                Contact::None => {}
                // The ball rests at the contact point for the rest of the tick
                Contact::Bounce => return,
                Contact::Wall(wall) => {
                    self.award_point(rules, wall.opponent());
                    return;
                }
            }
        }
    }

    fn substep(&mut self, rules: &GameConfig, h: f32) -> Contact {
        let r = rules.ball_radius;
        let prev = self.ball.position;
        let mut velocity = self.ball.velocity;
        let mut position = prev + velocity * h;
        let mut contact = Contact::None;

        let approaching = if velocity.x < 0.0 {
            Some(Side::Left)
        } else if velocity.x > 0.0 {
            Some(Side::Right)
        } else {
            None
        };

        if let Some(side) = approaching {
            let face = side.paddle_face(rules);
            // Signed distance of the leading edge in front of the face
            let gap = |x: f32| match side {
                Side::Left => x - r - face,
                Side::Right => face - (x + r),
            };
            let (before, after) = (gap(prev.x), gap(position.x));

            if before >= 0.0 && after < 0.0 {
                let t = before / (before - after);
                let contact_y = prev.y + (position.y - prev.y) * t;
                let paddle = self.paddles[side.index()];

                if (contact_y - paddle.y).abs() <= rules.paddle_height * 0.5 + r {
                    position = Vec2::new(
                        match side {
                            Side::Left => face + r,
                            Side::Right => face - r,
                        },
                        contact_y,
                    );
                    velocity.x = -velocity.x;
                    velocity.y += paddle.velocity * rules.paddle_spin;
                    velocity = (velocity * rules.ball_speedup).clamp_length_max(rules.max_ball_speed);
                    contact = Contact::Bounce;
                }
            }
        }

        if position.y + r > rules.height {
            position.y = rules.height - r;
            velocity.y = -velocity.y.abs();
            contact = Contact::Bounce;
        } else if position.y - r < 0.0 {
            position.y = r;
            velocity.y = velocity.y.abs();
            contact = Contact::Bounce;
        }

        if position.x - r <= 0.0 {
            position.x = r;
            contact = Contact::Wall(Side::Left);
        } else if position.x + r >= rules.width {
            position.x = rules.width - r;
            contact = Contact::Wall(Side::Right);
        }

        self.ball = Ball { position, velocity };
        contact
    }

    fn award_point(&mut self, rules: &GameConfig, scorer: Side) {
        let score = &mut self.scores[scorer.index()];
        *score += 1;
        self.ball.velocity = Vec2::ZERO;

        if *score >= rules.winning_score {
            self.set_phase(Phase::GameOver { winner: scorer });
        } else {
            self.set_phase(Phase::PointScored { scorer });
        }
    }
}

/// Outcome of one ball sub-step
enum Contact {
    None,
    Bounce,
    /// The ball reached the wall behind this side's paddle
    Wall(Side),
}

fn center(rules: &GameConfig) -> Vec2 {
    Vec2::new(rules.width * 0.5, rules.height * 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const EPS: f32 = 1e-4;

    fn rallying(rules: &GameConfig, position: Vec2, velocity: Vec2) -> SimulationState {
        let mut state = SimulationState::new(rules);
        state.phase = Phase::Rallying;
        state.ball = Ball { position, velocity };
        state
    }

    fn idle() -> Inputs {
        Inputs::default()
    }

    #[test]
    fn ball_reflects_off_top_wall() {
        let rules = GameConfig {
            height: 10.0,
            ..GameConfig::default()
        };
        let start = rallying(&rules, Vec2::new(rules.width * 0.5, 9.0), Vec2::new(3.0, 1.0));

        let next = start.step(&rules, 1.0, &idle());

        assert_eq!(next.phase, Phase::Rallying);
        assert!((next.ball.position.y - 9.5).abs() < EPS, "y = {}", next.ball.position.y);
        assert!((next.ball.velocity.y + 1.0).abs() < EPS);
        assert!((next.ball.velocity.x - 3.0).abs() < EPS);
    }

    #[test]
    fn crossing_left_wall_scores_for_right() {
        let rules = GameConfig::default();
        let start = rallying(&rules, Vec2::new(0.6, 3.0), Vec2::new(-3.0, 0.0));

        let next = start.step(&rules, 1.0, &idle());

        assert_eq!(next.score(Side::Right), 1);
        assert_eq!(next.score(Side::Left), 0);
        assert_eq!(next.phase, Phase::PointScored { scorer: Side::Right });
        assert!(next.ball.position.x >= rules.ball_radius - EPS);
    }

    #[test]
    fn paddle_returns_ball() {
        let rules = GameConfig::default();
        let y = rules.height * 0.5;
        let start = rallying(&rules, Vec2::new(4.0, y), Vec2::new(-10.0, 0.0));

        let next = start.step(&rules, 0.5, &idle());

        assert_eq!(next.phase, Phase::Rallying);
        assert!(next.ball.velocity.x > 0.0);
        assert_eq!(next.scores, [0, 0]);
    }

    #[test]
    fn fast_ball_does_not_tunnel_through_paddle() {
        let rules = GameConfig {
            max_ball_speed: 400.0,
            ..GameConfig::default()
        };
        let y = rules.height * 0.5;
        // One tick covers many paddle thicknesses
        let start = rallying(&rules, Vec2::new(rules.width - 6.0, y), Vec2::new(300.0, 0.0));
        assert!(0.1 * 300.0 > rules.paddle_thickness);

        let next = start.step(&rules, 0.1, &idle());

        assert_eq!(next.scores, [0, 0]);
        assert!(next.ball.velocity.x < 0.0);
    }

    #[test]
    fn paddle_hit_respects_speed_cap() {
        let rules = GameConfig::default();
        let y = rules.height * 0.5;
        let start = rallying(
            &rules,
            Vec2::new(4.0, y),
            Vec2::new(-rules.max_ball_speed, 0.0),
        );

        let next = start.step(&rules, 0.2, &idle());

        assert!(next.ball.velocity.length() <= rules.max_ball_speed + EPS);
    }

    #[test]
    fn ball_stays_in_bounds_for_random_states() {
        let rules = GameConfig::default();
        let r = rules.ball_radius;
        let half = rules.paddle_height * 0.5;
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..5_000 {
            let mut state = rallying(
                &rules,
                Vec2::new(
                    rng.gen_range(r..rules.width - r),
                    rng.gen_range(r..rules.height - r),
                ),
                Vec2::new(
                    rng.gen_range(-rules.max_ball_speed..rules.max_ball_speed),
                    rng.gen_range(-rules.max_ball_speed..rules.max_ball_speed),
                ),
            );
            for paddle in &mut state.paddles {
                paddle.y = rng.gen_range(half..rules.height - half);
            }
            let dt = rng.gen_range(0.0001..0.5);
            let inputs = Inputs {
                paddles: [rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)],
                ..Inputs::default()
            };

            let next = state.step(&rules, dt, &inputs);
            let p = next.ball.position;

            assert!(p.x >= r - EPS && p.x <= rules.width - r + EPS, "x out of bounds: {p}");
            assert!(p.y >= r - EPS && p.y <= rules.height - r + EPS, "y out of bounds: {p}");
            assert!(next.ball.velocity.length() <= rules.max_ball_speed + EPS);
        }
    }

    #[test]
    fn serving_after_point_recenters_and_alternates() {
        let rules = GameConfig::default();
        let mut state = SimulationState::new(&rules);
        let mut previous = state.ball.velocity.x.signum();
        assert_eq!(previous, 1.0, "first serve goes right");

        for point in 0..6 {
            // Put the ball just shy of whichever wall it is heading for
            let x = if point % 2 == 0 { 0.6 } else { rules.width - 0.6 };
            state.phase = Phase::Rallying;
            state.ball = Ball {
                position: Vec2::new(x, 2.0),
                velocity: Vec2::new(if x < 1.0 { -5.0 } else { 5.0 }, 0.0),
            };

            state = state.step(&rules, 0.1, &idle());
            assert!(matches!(state.phase, Phase::PointScored { .. }));

            state = state.step(&rules, rules.point_delay + 0.01, &idle());
            assert_eq!(state.phase, Phase::Serving);
            assert_eq!(state.ball.position, center(&rules));

            let direction = state.ball.velocity.x.signum();
            assert_eq!(direction, -previous, "serve {point} did not alternate");
            previous = direction;
        }
    }

    #[test]
    fn serve_input_launches_immediately() {
        let rules = GameConfig::default();
        let state = SimulationState::new(&rules);
        let serve = Inputs {
            serve: true,
            ..Inputs::default()
        };

        let next = state.step(&rules, 0.01, &serve);
        assert_eq!(next.phase, Phase::Rallying);

        let waiting = state.step(&rules, 0.01, &idle());
        assert_eq!(waiting.phase, Phase::Serving);
        assert_eq!(waiting.ball.position, state.ball.position);
    }

    #[test]
    fn winning_score_ends_match_until_reset() {
        let rules = GameConfig {
            winning_score: 3,
            ..GameConfig::default()
        };
        let mut state = rallying(&rules, Vec2::new(rules.width - 0.6, 2.0), Vec2::new(5.0, 0.0));
        state.scores = [2, 1];

        state = state.step(&rules, 0.1, &idle());
        assert_eq!(state.phase, Phase::GameOver { winner: Side::Left });
        assert_eq!(state.scores, [3, 1]);

        let frozen = state;
        let pushy = Inputs {
            paddles: [1.0, -1.0],
            serve: true,
            reset: false,
        };
        for _ in 0..100 {
            state = state.step(&rules, 0.25, &pushy);
        }
        assert_eq!(state, frozen);

        let reset = Inputs {
            reset: true,
            ..Inputs::default()
        };
        state = state.step(&rules, 0.016, &reset);
        assert_eq!(state.phase, Phase::Serving);
        assert_eq!(state.scores, [0, 0]);
    }

    #[test]
    fn paddles_stay_inside_playfield() {
        let rules = GameConfig::default();
        let mut state = SimulationState::new(&rules);
        let inputs = Inputs {
            paddles: [1.0, -1.0],
            ..Inputs::default()
        };

        for _ in 0..200 {
            state = state.step(&rules, 0.05, &inputs);
        }

        let half = rules.paddle_height * 0.5;
        assert!((state.paddle(Side::Left).y - (rules.height - half)).abs() < EPS);
        assert!((state.paddle(Side::Right).y - half).abs() < EPS);
        assert_eq!(state.paddle(Side::Left).velocity, 0.0);
    }

    #[test]
    fn non_positive_dt_is_a_no_op() {
        let rules = GameConfig::default();
        let state = rallying(&rules, Vec2::new(10.0, 10.0), Vec2::new(3.0, 3.0));

        assert_eq!(state.step(&rules, 0.0, &idle()), state);
        assert_eq!(state.step(&rules, -1.0, &idle()), state);
        assert_eq!(state.step(&rules, f32::NAN, &idle()), state);
    }
}
