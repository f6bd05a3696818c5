//! Closed-loop detail controller.
//!
//! Observes frame rate and triangle-count history on a fixed sampling cadence
//! and steers the mesher's detail factor so that frame rate stays inside a
//! target band. Lower detail means more triangles.
//!
//! Each sampling tick runs, in order:
//! 1. averaging of the FPS window and triangle window,
//! 2. an oscillation guard with a dead zone that freezes the target,
//! 3. regime classification and a multiplicative nudge of the target,
//! 4. a dynamic step limiter driven by FPS distance and FPS variance,
//! 5. exponential smoothing against recent targets,
//! 6. change-event bookkeeping,
//! 7. an adaptation step moving the live detail towards the target,
//! 8. an adjustment of the diagnostic triangle budget.
//!
//! Every value leaving a tick is finite and inside the configured bounds.

use std::collections::VecDeque;

use crate::config::ControllerParams;

/// Fixed-depth FIFO; pushing into a full buffer evicts the oldest value.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl RingBuffer<f32> {
    pub fn mean(&self) -> Option<f32> {
        if self.items.is_empty() {
            return None;
        }
        Some(self.items.iter().sum::<f32>() / self.items.len() as f32)
    }

    /// Population variance.
    pub fn variance(&self) -> Option<f32> {
        let mean = self.mean()?;
        let sum_sq: f32 = self.items.iter().map(|v| (v - mean) * (v - mean)).sum();
        Some(sum_sq / self.items.len() as f32)
    }
}

/// Direction of a recorded target change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Detail rising: fewer triangles
    Up,
    /// Detail falling: more triangles
    Down,
}

/// How a sampling tick classified the current situation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Regime {
    /// No FPS samples yet; nothing was changed
    Idle,
    /// Dead zone active; target frozen
    Frozen,
    /// Far too few triangles while FPS has headroom
    TrianglesExtremeLow,
    /// Far too many triangles while FPS is below target
    TrianglesExtremeHigh,
    /// Average FPS inside the target band
    InBand,
    /// Average FPS outside the target band
    OutOfBand,
}

/// Mutable controller state for one rendering session.
#[derive(Clone, Debug)]
pub struct DetailState {
    pub adaptive_detail: f32,
    pub target_detail: f32,
    pub fps_samples: RingBuffer<f32>,
    pub triangle_counts: RingBuffer<f32>,
    pub previous_targets: RingBuffer<f32>,
    pub directions: RingBuffer<Direction>,
    pub consecutive_up: u32,
    pub consecutive_down: u32,
    pub dead_zone_counter: u32,
    pub sweet_ticks: u32,
    pub optimal_found: bool,
    pub max_allowed_change: f32,
    /// Magnitude of the most recent adaptive-detail move
    pub last_jump: f32,
    /// Diagnostic triangle budget
    pub triangle_target: f32,
    latest_triangles: Option<usize>,
}

impl DetailState {
    fn new(params: &ControllerParams) -> Self {
        let initial = params.initial_detail.clamp(params.min_detail, params.max_detail);
        Self {
            adaptive_detail: initial,
            target_detail: initial,
            fps_samples: RingBuffer::new(params.fps_window),
            triangle_counts: RingBuffer::new(params.triangle_window),
            previous_targets: RingBuffer::new(params.target_window),
            directions: RingBuffer::new(params.direction_window),
            consecutive_up: 0,
            consecutive_down: 0,
            dead_zone_counter: 0,
            sweet_ticks: 0,
            optimal_found: false,
            max_allowed_change: params.max_step,
            last_jump: 0.0,
            triangle_target: (params.preferred_triangles_min + params.preferred_triangles_max) as f32 * 0.5,
            latest_triangles: None,
        }
    }
}

/// What one sampling tick observed and decided.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleReport {
    pub avg_fps: f32,
    pub avg_triangles: Option<f32>,
    pub regime: Regime,
    pub oscillating: bool,
    pub frozen: bool,
    pub max_allowed_change: f32,
    pub target_detail: f32,
    pub adaptive_detail: f32,
    pub optimal_found: bool,
    pub triangle_target: f32,
}

/// Performance governor driving the mesher's detail factor.
pub struct DetailController {
    params: ControllerParams,
    state: DetailState,
}

impl DetailController {
    pub fn new(params: ControllerParams) -> Self {
        let state = DetailState::new(&params);
        Self { params, state }
    }

    pub fn params(&self) -> &ControllerParams {
        &self.params
    }

    pub fn state(&self) -> &DetailState {
        &self.state
    }

    pub fn adaptive_detail(&self) -> f32 {
        self.state.adaptive_detail
    }

    pub fn target_detail(&self) -> f32 {
        self.state.target_detail
    }

    pub fn optimal_found(&self) -> bool {
        self.state.optimal_found
    }

    pub fn triangle_target(&self) -> f32 {
        self.state.triangle_target
    }

    /// Record one frame duration. Non-positive or non-finite durations are ignored.
    pub fn record_frame(&mut self, frame_ms: f64) {
        if frame_ms.is_finite() && frame_ms > 0.0 {
            self.record_fps((1000.0 / frame_ms) as f32);
        }
    }

    /// Record an instantaneous FPS sample.
    pub fn record_fps(&mut self, fps: f32) {
        if fps.is_finite() && fps >= 0.0 {
            self.state.fps_samples.push(fps);
        }
    }

    /// Record the triangle count of the most recent frame.
    pub fn record_triangles(&mut self, count: usize) {
        self.state.latest_triangles = Some(count);
    }

    /// Run one sampling tick.
    pub fn sample(&mut self) -> SampleReport {
        let p = &self.params;
        let s = &mut self.state;

        // 1. Averages
        if let Some(count) = s.latest_triangles.take() {
            s.triangle_counts.push(count as f32);
        }
        let Some(avg_fps) = s.fps_samples.mean() else {
            return report(s, 0.0, None, Regime::Idle, false, false);
        };
        let avg_triangles = s.triangle_counts.mean();

        let target_fps = p.target_fps();
        let deviation = (avg_fps - target_fps) / target_fps;
        let distance_ratio = deviation.abs();
        let in_band = (p.target_fps_low..=p.target_fps_high).contains(&avg_fps);

        // 2. Oscillation guard
        let at_bound = s.adaptive_detail <= p.min_detail + p.bound_epsilon
            || s.adaptive_detail >= p.max_detail - p.bound_epsilon;
        let oscillating = at_bound || alternating(&s.directions) || s.last_jump > p.oscillation_jump;

        let mut frozen = false;
        if oscillating {
            if s.dead_zone_counter < p.dead_zone_ticks {
                s.dead_zone_counter += 1;
                frozen = true;
            } else {
                s.dead_zone_counter = 0;
            }
        }

        let regime = if frozen {
            Regime::Frozen
        } else {
            // 3. Regime and nudge
            if avg_fps < p.sweet_fps_low - p.optimal_exit_margin
                || avg_fps > p.sweet_fps_high + p.optimal_exit_margin
            {
                if s.optimal_found {
                    log::debug!("Detail controller left optimum at {:.1} FPS", avg_fps);
                }
                s.optimal_found = false;
                s.sweet_ticks = 0;
            }

            let (regime, nudge) = match avg_triangles {
                Some(t) if t < p.min_triangles as f32 && avg_fps > p.target_fps_high => {
                    (Regime::TrianglesExtremeLow, -p.extreme_nudge)
                }
                Some(t) if t > p.max_triangles as f32 && avg_fps < p.target_fps_low => {
                    (Regime::TrianglesExtremeHigh, p.extreme_nudge)
                }
                _ if in_band => {
                    if (p.sweet_fps_low..=p.sweet_fps_high).contains(&avg_fps) {
                        s.sweet_ticks += 1;
                        if s.sweet_ticks >= p.sweet_ticks_required && !s.optimal_found {
                            s.optimal_found = true;
                            log::debug!("Detail controller found optimum at {:.3}", s.adaptive_detail);
                        }
                    } else {
                        s.sweet_ticks = 0;
                    }
                    let mut nudge = -deviation * p.in_band_gain;
                    if s.optimal_found {
                        nudge *= p.optimal_gain_scale;
                    }
                    (Regime::InBand, nudge)
                }
                _ => {
                    s.sweet_ticks = 0;
                    (Regime::OutOfBand, -deviation * p.out_of_band_gain)
                }
            };

            // 4. Step limiter
            let proposed = s.target_detail * (1.0 + nudge);
            s.max_allowed_change = if s.optimal_found {
                p.min_step
            } else {
                let instability = s.fps_samples.variance().unwrap_or(0.0).sqrt() / avg_fps.max(1.0);
                (p.base_step + p.distance_step_gain * distance_ratio + p.instability_step_gain * instability)
                    .clamp(p.min_step, p.max_step)
            };
            let delta = (proposed - s.target_detail).clamp(-s.max_allowed_change, s.max_allowed_change);
            let limited = s.target_detail + delta;

            // 5. Smoothing against recent targets
            let window_mean = s.previous_targets.mean().unwrap_or(limited);
            let smoothed = p.target_smoothing * limited + (1.0 - p.target_smoothing) * window_mean;
            let smoothed = clamp_detail(smoothed, p);
            s.previous_targets.push(smoothed);
            s.target_detail = smoothed;

            // 6. Change events
            let change = s.target_detail - s.adaptive_detail;
            if change.abs() > p.stability_threshold {
                let direction = if change > 0.0 { Direction::Up } else { Direction::Down };
                s.directions.push(direction);
                match direction {
                    Direction::Up => {
                        s.consecutive_up += 1;
                        s.consecutive_down = 0;
                    }
                    Direction::Down => {
                        s.consecutive_down += 1;
                        s.consecutive_up = 0;
                    }
                }
            }

            regime
        };

        // 7. Adaptation
        let gap = s.target_detail - s.adaptive_detail;
        let rate = if s.optimal_found {
            p.rate_optimal
        } else if distance_ratio > p.far_ratio {
            p.rate_far
        } else if in_band {
            p.rate_in_band
        } else {
            p.rate_default
        };
        let step = if avg_fps > p.target_fps_high && gap.abs() < p.stuck_epsilon && !s.optimal_found {
            // High FPS with a negligible gap would otherwise never add triangles
            -p.stuck_nudge
        } else {
            gap * rate
        };
        let damping = match step.abs() {
            m if m > 0.05 => 0.5,
            m if m > 0.02 => 0.75,
            _ => 1.0,
        };
        let previous = s.adaptive_detail;
        s.adaptive_detail = clamp_detail(previous + step * damping, p);
        s.last_jump = (s.adaptive_detail - previous).abs();

        // 8. Triangle budget
        if let Some(avg) = avg_triangles {
            s.triangle_target = adjust_triangle_target(s.triangle_target, avg, avg_fps, s.optimal_found, p);
        }

        let report = report(s, avg_fps, avg_triangles, regime, oscillating, frozen);
        log::debug!(
            "detail sample: fps {:.1} regime {:?} target {:.3} adaptive {:.3} limit {:.4}{}",
            report.avg_fps,
            report.regime,
            report.target_detail,
            report.adaptive_detail,
            report.max_allowed_change,
            if report.optimal_found { " (optimal)" } else { "" }
        );
        report
    }
}

fn report(
    s: &DetailState,
    avg_fps: f32,
    avg_triangles: Option<f32>,
    regime: Regime,
    oscillating: bool,
    frozen: bool,
) -> SampleReport {
    SampleReport {
        avg_fps,
        avg_triangles,
        regime,
        oscillating,
        frozen,
        max_allowed_change: s.max_allowed_change,
        target_detail: s.target_detail,
        adaptive_detail: s.adaptive_detail,
        optimal_found: s.optimal_found,
        triangle_target: s.triangle_target,
    }
}

/// Clamp into the detail bounds; non-finite becomes the midpoint 0.5.
fn clamp_detail(value: f32, p: &ControllerParams) -> f32 {
    if value.is_finite() {
        value.clamp(p.min_detail, p.max_detail)
    } else {
        0.5
    }
}

/// True when a full direction window flips on every entry.
fn alternating(directions: &RingBuffer<Direction>) -> bool {
    if !directions.is_full() {
        return false;
    }
    let items: Vec<Direction> = directions.iter().copied().collect();
    items.windows(2).all(|w| w[0] != w[1])
}

fn adjust_triangle_target(
    current: f32,
    avg_triangles: f32,
    avg_fps: f32,
    optimal: bool,
    p: &ControllerParams,
) -> f32 {
    let preferred_min = p.preferred_triangles_min as f32;
    let preferred_max = p.preferred_triangles_max as f32;
    let preferred_mid = (preferred_min + preferred_max) * 0.5;

    let next = if optimal {
        if avg_triangles < preferred_min {
            current * 1.02
        } else if avg_triangles > preferred_max {
            current * 0.98
        } else {
            current
        }
    } else if avg_triangles < preferred_min && avg_fps > p.target_fps_high {
        current * 1.10
    } else if avg_triangles > preferred_max || avg_fps < p.target_fps_low {
        current * 0.85
    } else {
        current + (preferred_mid - current) * 0.05
    };

    if next.is_finite() {
        next.clamp(p.min_triangles as f32, p.max_triangles as f32)
    } else {
        preferred_mid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(controller: &mut DetailController, fps: f32, triangles: usize) -> SampleReport {
        for _ in 0..10 {
            controller.record_fps(fps);
        }
        controller.record_triangles(triangles);
        controller.sample()
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut ring = RingBuffer::new(3);
        for v in [1.0f32, 2.0, 3.0, 4.0] {
            ring.push(v);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.mean(), Some(3.0));
        assert!((ring.variance().unwrap() - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_idle_without_samples() {
        let mut controller = DetailController::new(ControllerParams::default());
        let report = controller.sample();
        assert_eq!(report.regime, Regime::Idle);
        assert_eq!(controller.adaptive_detail(), 0.5);
    }

    #[test]
    fn test_low_fps_moves_towards_coarse_bound() {
        let mut controller = DetailController::new(ControllerParams::default());
        let start = controller.adaptive_detail();
        let mut previous = start;
        let mut flagged_outside_dead_zone = 0;

        for _ in 0..10 {
            let report = feed(&mut controller, 20.0, 8_000);
            assert!(report.adaptive_detail >= previous, "detail fell from {} to {}", previous, report.adaptive_detail);
            if report.oscillating && !report.frozen {
                flagged_outside_dead_zone += 1;
            }
            previous = report.adaptive_detail;
        }

        assert!(previous > start + 0.15, "only reached {}", previous);
        assert!(flagged_outside_dead_zone <= 1);

        for _ in 0..20 {
            let report = feed(&mut controller, 20.0, 8_000);
            assert!(report.adaptive_detail >= previous);
            previous = report.adaptive_detail;
        }
        assert!(previous > 0.9, "did not approach bound: {}", previous);
    }

    #[test]
    fn test_high_fps_moves_towards_fine_bound() {
        let mut controller = DetailController::new(ControllerParams::default());
        let mut previous = controller.adaptive_detail();
        for _ in 0..30 {
            let report = feed(&mut controller, 60.0, 8_000);
            assert!(report.adaptive_detail <= previous);
            previous = report.adaptive_detail;
        }
        assert!(previous < 0.15);
    }

    #[test]
    fn test_in_band_fps_settles_optimal() {
        let mut controller = DetailController::new(ControllerParams::default());
        let mut ticks = 0;
        while !controller.optimal_found() {
            feed(&mut controller, 34.0, 8_000);
            ticks += 1;
            assert!(ticks <= 10, "optimal not found within 10 ticks");
        }

        let settled = controller.adaptive_detail();
        for _ in 0..20 {
            let report = feed(&mut controller, 34.0, 8_000);
            assert!(report.optimal_found);
            assert!((report.adaptive_detail - settled).abs() <= 0.02);
        }
    }

    #[test]
    fn test_optimal_cleared_on_far_drift() {
        let mut controller = DetailController::new(ControllerParams::default());
        for _ in 0..5 {
            feed(&mut controller, 35.0, 8_000);
        }
        assert!(controller.optimal_found());
        feed(&mut controller, 15.0, 8_000);
        assert!(!controller.optimal_found());
    }

    #[test]
    fn test_converges_after_step_change() {
        let mut controller = DetailController::new(ControllerParams::default());
        for _ in 0..10 {
            feed(&mut controller, 20.0, 8_000);
        }
        let mut ticks = 0;
        while !controller.optimal_found() {
            feed(&mut controller, 34.0, 8_000);
            ticks += 1;
            assert!(ticks <= 10);
        }
    }

    #[test]
    fn test_dead_zone_cycles_at_bound() {
        let params = ControllerParams::default();
        let mut controller = DetailController::new(params.clone());

        // High FPS walks the detail down to the fine bound
        let mut first = None;
        for _ in 0..40 {
            let target = controller.target_detail();
            let report = feed(&mut controller, 90.0, 8_000);
            if report.frozen {
                first = Some((report, target));
                break;
            }
        }
        let (report, target) = first.expect("controller never froze at the bound");
        assert!(report.adaptive_detail <= params.min_detail + params.bound_epsilon);
        assert_eq!(report.target_detail, target);
        assert_eq!(controller.state().dead_zone_counter, 1);

        let mut frozen = vec![report.frozen];
        let mut counters = vec![controller.state().dead_zone_counter];
        for _ in 0..7 {
            let target = controller.target_detail();
            let report = feed(&mut controller, 90.0, 8_000);
            assert!(report.oscillating);
            if report.frozen {
                assert_eq!(report.regime, Regime::Frozen);
                assert_eq!(report.target_detail, target);
            } else {
                assert_eq!(report.regime, Regime::OutOfBand);
            }
            frozen.push(report.frozen);
            counters.push(controller.state().dead_zone_counter);
        }

        assert_eq!(frozen, vec![true, true, true, false, true, true, true, false]);
        assert_eq!(counters, vec![1, 2, 3, 0, 1, 2, 3, 0]);
    }

    #[test]
    fn test_alternating_history_freezes_mid_range() {
        let mut controller = DetailController::new(ControllerParams::default());
        let report = feed(&mut controller, 35.0, 8_000);
        assert!(!report.oscillating);

        let mut controller = DetailController::new(ControllerParams::default());
        for d in [Direction::Up, Direction::Down, Direction::Up, Direction::Down] {
            controller.state.directions.push(d);
        }
        let target = controller.target_detail();
        let report = feed(&mut controller, 35.0, 8_000);
        assert!(report.oscillating);
        assert!(report.frozen);
        assert_eq!(report.regime, Regime::Frozen);
        assert_eq!(report.target_detail, target);
        assert_eq!(controller.state().dead_zone_counter, 1);
    }

    #[test]
    fn test_large_jump_freezes_next_tick() {
        let params = ControllerParams::default();
        let mut controller = DetailController::new(params.clone());
        controller.state.last_jump = params.oscillation_jump + 0.05;
        let target = controller.target_detail();

        let report = feed(&mut controller, 35.0, 8_000);
        assert!(report.oscillating);
        assert!(report.frozen);
        assert_eq!(report.target_detail, target);
        assert_eq!(controller.state().dead_zone_counter, 1);

        // In-band FPS with no gap leaves the detail still, so the guard clears
        assert_eq!(controller.state().last_jump, 0.0);
        let report = feed(&mut controller, 35.0, 8_000);
        assert!(!report.oscillating);
        assert!(!report.frozen);
        assert_eq!(report.regime, Regime::InBand);
    }

    #[test]
    fn test_alternating_directions_flag_oscillation() {
        let mut ring = RingBuffer::new(4);
        for d in [Direction::Up, Direction::Down, Direction::Up] {
            ring.push(d);
        }
        assert!(!alternating(&ring));
        ring.push(Direction::Down);
        assert!(alternating(&ring));
        ring.push(Direction::Down);
        assert!(!alternating(&ring));
    }

    #[test]
    fn test_outputs_stay_finite_and_bounded() {
        let params = ControllerParams::default();
        let mut controller = DetailController::new(params.clone());
        let inputs = [0.0, 1e9, 12.0, 75.0, 33.0, 5.0, 48.0, 31.0];
        for i in 0..200 {
            controller.record_fps(inputs[i % inputs.len()]);
            controller.record_fps(f32::NAN);
            controller.record_frame(0.0);
            controller.record_triangles(i * 311);
            let report = controller.sample();
            assert!(report.adaptive_detail.is_finite());
            assert!(report.adaptive_detail >= params.min_detail && report.adaptive_detail <= params.max_detail);
            assert!(report.target_detail >= params.min_detail && report.target_detail <= params.max_detail);
            assert!(report.triangle_target >= params.min_triangles as f32);
            assert!(report.triangle_target <= params.max_triangles as f32);
        }
    }

    #[test]
    fn test_triangle_extreme_low_adds_triangles() {
        let mut controller = DetailController::new(ControllerParams::default());
        let report = feed(&mut controller, 45.0, 100);
        assert_eq!(report.regime, Regime::TrianglesExtremeLow);
        assert!(report.target_detail < 0.5);
    }

    #[test]
    fn test_triangle_budget_shrinks_when_slow() {
        let mut controller = DetailController::new(ControllerParams::default());
        let start = controller.triangle_target();
        let report = feed(&mut controller, 20.0, 30_000);
        assert!(report.triangle_target < start);
    }

    #[test]
    fn test_record_frame_converts_duration() {
        let mut controller = DetailController::new(ControllerParams::default());
        controller.record_frame(25.0);
        assert_eq!(controller.state().fps_samples.mean(), Some(40.0));
    }
}
