//! Client half: velocity matching against the server's checkpoints.
//!
//! The client never copies the server's absolute values after the first
//! checkpoint. It estimates how fast each scalar moves on the server and
//! advances its own copy at that rate, so jitter and loss change the speed
//! slightly instead of making the animation jump.

use crate::config::SyncParams;

use super::protocol::Checkpoint;
use super::server::wrap_unit;

/// Where the client's animation rates currently come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncMode {
    /// No checkpoint yet, or the link went quiet: fixed default rates
    Autonomous,
    /// Rates estimated from server checkpoints
    Synced,
}

/// Reconciliation state, created by the first checkpoint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyncState {
    pub server_time: f64,
    pub server_color_shift: f64,
    /// `globalTime` units per second
    pub time_velocity: f64,
    /// `colorShift` turns per second
    pub color_velocity: f64,
    /// Local clock at the last accepted checkpoint
    pub last_update_ms: f64,
    pub checkpoint_count: u64,
}

pub struct SyncClient {
    params: SyncParams,
    clock_ms: f64,
    global_time: f64,
    color_shift: f64,
    state: Option<SyncState>,
}

impl SyncClient {
    pub fn new(params: SyncParams) -> Self {
        Self {
            params,
            clock_ms: 0.0,
            global_time: 0.0,
            color_shift: 0.0,
            state: None,
        }
    }

    pub fn global_time(&self) -> f64 {
        self.global_time
    }

    pub fn color_shift(&self) -> f64 {
        self.color_shift
    }

    pub fn state(&self) -> Option<&SyncState> {
        self.state.as_ref()
    }

    /// Local monotonic clock in milliseconds.
    pub fn clock_ms(&self) -> f64 {
        self.clock_ms
    }

    pub fn mode(&self) -> SyncMode {
        match &self.state {
            Some(state) if !self.is_stale(state) => SyncMode::Synced,
            _ => SyncMode::Autonomous,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.mode() == SyncMode::Synced
    }

    fn is_stale(&self, state: &SyncState) -> bool {
        self.clock_ms - state.last_update_ms > self.params.stale_after_ms
    }

    /// Current rates per second, falling back to the defaults when not synced.
    pub fn velocities(&self) -> (f64, f64) {
        match &self.state {
            Some(state) if !self.is_stale(state) => (state.time_velocity, state.color_velocity),
            _ => (self.params.default_time_rate(), self.params.default_color_rate()),
        }
    }

    /// Difference between local `globalTime` and where the server is
    /// expected to be now, extrapolated from the last checkpoint.
    pub fn drift(&self) -> Option<f64> {
        let state = self.state.as_ref()?;
        let since = (self.clock_ms - state.last_update_ms) / 1000.0;
        Some(self.global_time - (state.server_time + state.time_velocity * since))
    }

    /// Advance the local clock and both scalars. Negative or non-finite
    /// deltas count as zero, so `globalTime` never runs backward.
    pub fn advance(&mut self, delta_ms: f64) {
        let delta_ms = if delta_ms.is_finite() { delta_ms.max(0.0) } else { 0.0 };
        let (time_velocity, color_velocity) = self.velocities();
        let seconds = delta_ms / 1000.0;

        self.clock_ms += delta_ms;
        self.global_time += time_velocity * seconds;
        self.color_shift = wrap_unit(self.color_shift + color_velocity * seconds);
    }

    /// Fold a checkpoint into the velocity estimates. Returns false when the
    /// checkpoint was rejected as corrupt.
    pub fn on_checkpoint(&mut self, checkpoint: &Checkpoint) -> bool {
        if !checkpoint.global_time.is_finite() || !checkpoint.color_shift.is_finite() {
            log::warn!("Ignoring checkpoint with non-finite scalars");
            return false;
        }
        let server_color = wrap_unit(checkpoint.color_shift);

        let Some(state) = self.state.as_mut() else {
            // First contact is the one place absolute values are taken, and
            // time may only move forward
            self.global_time = self.global_time.max(checkpoint.global_time);
            self.color_shift = server_color;
            self.state = Some(SyncState {
                server_time: checkpoint.global_time,
                server_color_shift: server_color,
                time_velocity: self.params.default_time_rate(),
                color_velocity: self.params.default_color_rate(),
                last_update_ms: self.clock_ms,
                checkpoint_count: 1,
            });
            log::info!("First checkpoint at globalTime {:.2}", checkpoint.global_time);
            return true;
        };

        let elapsed = (self.clock_ms - state.last_update_ms) / 1000.0;
        if elapsed > 0.0 {
            let retention = self.params.velocity_retention;

            let time_rate = ((checkpoint.global_time - state.server_time) / elapsed).max(0.0);
            if time_rate.is_finite() {
                state.time_velocity = retention * state.time_velocity + (1.0 - retention) * time_rate;
            }

            let color_rate = unwrap_delta(server_color - state.server_color_shift) / elapsed;
            if color_rate.is_finite() {
                state.color_velocity = retention * state.color_velocity + (1.0 - retention) * color_rate;
            }
        }

        state.server_time = checkpoint.global_time;
        state.server_color_shift = server_color;
        state.last_update_ms = self.clock_ms;
        state.checkpoint_count += 1;
        true
    }
}

/// Shortest signed distance on the unit circle.
fn unwrap_delta(delta: f64) -> f64 {
    if delta < -0.5 {
        delta + 1.0
    } else if delta > 0.5 {
        delta - 1.0
    } else {
        delta
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn checkpoint(global_time: f64, color_shift: f64) -> Checkpoint {
        Checkpoint {
            global_time,
            color_shift,
            shared_seed: 0,
            is_sync_checkpoint: true,
            micro_evolve: false,
        }
    }

    #[test]
    fn test_autonomous_before_checkpoint() {
        let mut client = SyncClient::new(SyncParams::default());
        assert_eq!(client.mode(), SyncMode::Autonomous);
        client.advance(2000.0);
        assert!((client.global_time() - 2.0).abs() < 1e-9);
        assert!((client.color_shift() - 0.02).abs() < 1e-9);
        assert!(client.drift().is_none());
    }

    #[test]
    fn test_first_checkpoint_never_rewinds() {
        let mut client = SyncClient::new(SyncParams::default());
        client.advance(5000.0);
        client.on_checkpoint(&checkpoint(2.0, 0.4));
        assert!((client.global_time() - 5.0).abs() < 1e-9);
        assert_eq!(client.color_shift(), 0.4);
        assert!(client.is_synced());
    }

    #[test]
    fn test_velocity_blends_towards_server_rate() {
        let mut client = SyncClient::new(SyncParams::default());
        client.on_checkpoint(&checkpoint(0.0, 0.0));
        // Server runs at twice the default speed
        for i in 1..=30 {
            client.advance(1000.0);
            client.on_checkpoint(&checkpoint(2.0 * i as f64, 0.0));
        }
        let state = client.state().unwrap();
        assert!((state.time_velocity - 2.0).abs() < 0.01);
        assert_eq!(state.checkpoint_count, 31);
    }

    #[test]
    fn test_single_checkpoint_weighting() {
        let mut client = SyncClient::new(SyncParams::default());
        client.on_checkpoint(&checkpoint(0.0, 0.0));
        client.advance(1000.0);
        client.on_checkpoint(&checkpoint(3.0, 0.0));
        // 0.8 * 1.0 + 0.2 * 3.0
        assert!((client.state().unwrap().time_velocity - 1.4).abs() < 1e-9);
    }

    #[test]
    fn test_color_delta_unwraps_across_boundary() {
        let mut client = SyncClient::new(SyncParams::default());
        client.on_checkpoint(&checkpoint(0.0, 0.99));
        client.advance(1000.0);
        client.on_checkpoint(&checkpoint(1.0, 0.01));
        let v = client.state().unwrap().color_velocity;
        // 0.8 * 0.01 + 0.2 * 0.02
        assert!((v - 0.012).abs() < 1e-9, "velocity {}", v);
    }

    #[test]
    fn test_global_time_monotonic_under_jitter() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut client = SyncClient::new(SyncParams::default());
        let mut server_time = 0.0;
        let mut previous = client.global_time();

        for _ in 0..500 {
            let frame = rng.gen_range(5.0..40.0);
            client.advance(frame);
            assert!(client.global_time() >= previous);
            previous = client.global_time();

            server_time += frame / 1000.0;
            if rng.gen_bool(0.05) {
                // Jittered and sometimes stale or regressed server values
                let reported = server_time + rng.gen_range(-0.5..0.5);
                client.on_checkpoint(&checkpoint(reported, rng.gen::<f64>()));
                assert!(client.global_time() >= previous);
                previous = client.global_time();
            }
        }
        assert!(client.state().unwrap().time_velocity >= 0.0);
    }

    #[test]
    fn test_stale_link_falls_back_to_defaults() {
        let mut client = SyncClient::new(SyncParams::default());
        client.on_checkpoint(&checkpoint(0.0, 0.0));
        client.advance(1000.0);
        client.on_checkpoint(&checkpoint(10.0, 0.0));
        assert!(client.velocities().0 > 2.0);

        client.advance(6000.0);
        assert_eq!(client.mode(), SyncMode::Autonomous);
        let params = SyncParams::default();
        assert_eq!(client.velocities(), (params.default_time_rate(), params.default_color_rate()));

        client.on_checkpoint(&checkpoint(17.0, 0.0));
        assert!(client.is_synced());
    }

    #[test]
    fn test_rejects_non_finite_checkpoint() {
        let mut client = SyncClient::new(SyncParams::default());
        assert!(!client.on_checkpoint(&checkpoint(f64::NAN, 0.0)));
        assert!(client.state().is_none());
        client.advance(f64::INFINITY);
        client.advance(-100.0);
        assert_eq!(client.global_time(), 0.0);
    }

    #[test]
    fn test_unwrap_delta() {
        assert!((unwrap_delta(0.01 - 0.99) - 0.02).abs() < 1e-12);
        assert!((unwrap_delta(0.99 - 0.01) + 0.02).abs() < 1e-12);
        assert_eq!(unwrap_delta(0.25), 0.25);
    }
}
