//! Server half: single writer of the canonical animation state.
//!
//! `SyncServer` is transport-agnostic. A driver calls `update` with elapsed
//! wall-clock time and broadcasts whatever it returns; client edits come in
//! through `handle_client_message`.

use crate::color::Palette;
use crate::config::{SyncParams, TerrainConfig};
use crate::heightfield::SeedPoint;
use crate::seeds::SessionSeeds;
use crate::shared_random::shared_seed_for;

use super::protocol::{Checkpoint, ClientMessage, FullState, OptionUpdate, SeedTick, ServerMessage};

/// Highest accepted evolve speed.
pub const MAX_EVOLVE_SPEED: u32 = 10;

/// Advances allowed per `update` call; a longer stall is dropped, not replayed.
const MAX_CATCH_UP_ADVANCES: u32 = 200;

/// Canonical animation scalars.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanonicalState {
    pub global_time: f64,
    /// Always in [0, 1)
    pub color_shift: f64,
    pub shared_seed: u32,
}

/// Session configuration owned by the server and mirrored by every client.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionOptions {
    pub seed_points: Vec<SeedPoint>,
    pub evolve_speed: u32,
    pub roughness: f32,
    pub palette: Palette,
    pub terrain_seed: u64,
}

pub struct SyncServer {
    params: SyncParams,
    state: CanonicalState,
    options: SessionOptions,
    advance_elapsed: f64,
    seed_elapsed: f64,
    checkpoint_elapsed: f64,
    advances: u64,
}

impl SyncServer {
    pub fn new(config: &TerrainConfig) -> Self {
        let seeds = SessionSeeds::from_master(config.seed);
        Self {
            params: config.sync.clone(),
            state: CanonicalState {
                global_time: 0.0,
                color_shift: 0.0,
                shared_seed: shared_seed_for(0.0),
            },
            options: SessionOptions {
                seed_points: Vec::new(),
                evolve_speed: config.field.evolve_speed.min(MAX_EVOLVE_SPEED),
                roughness: config.field.roughness,
                palette: config.field.palette,
                terrain_seed: seeds.terrain,
            },
            advance_elapsed: 0.0,
            seed_elapsed: 0.0,
            checkpoint_elapsed: 0.0,
            advances: 0,
        }
    }

    pub fn state(&self) -> &CanonicalState {
        &self.state
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Number of advance ticks applied since start.
    pub fn advances(&self) -> u64 {
        self.advances
    }

    /// One fixed internal step of the canonical scalars.
    pub fn advance_tick(&mut self) {
        self.state.global_time += self.params.time_step;
        self.state.color_shift = wrap_unit(self.state.color_shift + self.params.color_step);
        self.state.shared_seed = shared_seed_for(self.state.global_time);
        self.advances += 1;
    }

    pub fn seed_tick(&self) -> ServerMessage {
        ServerMessage::SeedTick(SeedTick {
            shared_seed: self.state.shared_seed,
        })
    }

    pub fn checkpoint(&self) -> ServerMessage {
        ServerMessage::Checkpoint(Checkpoint {
            global_time: self.state.global_time,
            color_shift: self.state.color_shift,
            shared_seed: self.state.shared_seed,
            is_sync_checkpoint: true,
            micro_evolve: self.options.evolve_speed > 0,
        })
    }

    pub fn full_state(&self) -> ServerMessage {
        ServerMessage::FullState(FullState {
            seed_points: self.options.seed_points.clone(),
            evolve_speed: self.options.evolve_speed,
            roughness: self.options.roughness,
            palette: self.options.palette,
            terrain_seed: self.options.terrain_seed,
        })
    }

    /// Apply a client edit. Returns the message to broadcast, if any.
    pub fn handle_client_message(&mut self, message: ClientMessage) -> Option<ServerMessage> {
        match message {
            ClientMessage::AddSeed { x, y, value } => {
                let point = SeedPoint::new(x, y, value);
                log::info!("Seed point added at ({:.3}, {:.3}) = {:.3}", point.x, point.y, point.value);
                self.options.seed_points.push(point);
            }
            ClientMessage::UpdateOption(update) => self.apply_update(update),
            ClientMessage::SetEvolveSpeed { n } => self.set_evolve_speed(n),
            ClientMessage::RequestFullState => {}
        }
        Some(self.full_state())
    }

    /// Run the three fixed-interval timers over `elapsed_ms` of wall time.
    ///
    /// Advances happen first so that a seed tick or checkpoint emitted in the
    /// same call carries the newest values. At most one seed tick and one
    /// checkpoint are emitted per call.
    pub fn update(&mut self, elapsed_ms: f64) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        if !elapsed_ms.is_finite() || elapsed_ms <= 0.0 {
            return out;
        }

        self.advance_elapsed += elapsed_ms;
        let mut applied = 0;
        while self.advance_elapsed >= self.params.advance_interval_ms {
            self.advance_elapsed -= self.params.advance_interval_ms;
            if applied == MAX_CATCH_UP_ADVANCES {
                log::warn!("Server stalled for {:.0} ms, dropping missed advances", elapsed_ms);
                self.advance_elapsed %= self.params.advance_interval_ms;
                break;
            }
            self.advance_tick();
            applied += 1;
        }

        self.seed_elapsed += elapsed_ms;
        if self.seed_elapsed >= self.params.seed_interval_ms {
            self.seed_elapsed %= self.params.seed_interval_ms;
            out.push(self.seed_tick());
        }

        self.checkpoint_elapsed += elapsed_ms;
        if self.checkpoint_elapsed >= self.params.checkpoint_interval_ms {
            self.checkpoint_elapsed %= self.params.checkpoint_interval_ms;
            out.push(self.checkpoint());
        }

        out
    }

    fn apply_update(&mut self, update: OptionUpdate) {
        if let Some(roughness) = update.roughness {
            if roughness.is_finite() && roughness > 0.0 && roughness < 1.0 {
                self.options.roughness = roughness;
            } else {
                log::warn!("Ignoring roughness {} outside (0, 1)", roughness);
            }
        }
        if let Some(palette) = update.palette {
            self.options.palette = palette;
        }
        if let Some(speed) = update.evolve_speed {
            self.set_evolve_speed(speed);
        }
    }

    fn set_evolve_speed(&mut self, speed: u32) {
        if speed > MAX_EVOLVE_SPEED {
            log::warn!("Evolve speed {} clamped to {}", speed, MAX_EVOLVE_SPEED);
        }
        self.options.evolve_speed = speed.min(MAX_EVOLVE_SPEED);
    }
}

/// Wrap into [0, 1).
pub(crate) fn wrap_unit(value: f64) -> f64 {
    let wrapped = value.rem_euclid(1.0);
    // rem_euclid can round up to exactly 1.0 for tiny negative inputs
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> SyncServer {
        SyncServer::new(&TerrainConfig::default())
    }

    fn count(messages: &[ServerMessage]) -> (usize, usize) {
        let seeds = messages.iter().filter(|m| matches!(m, ServerMessage::SeedTick(_))).count();
        let checkpoints = messages.iter().filter(|m| matches!(m, ServerMessage::Checkpoint(_))).count();
        (seeds, checkpoints)
    }

    #[test]
    fn test_timer_cadence() {
        let mut server = server();
        let mut seeds = 0;
        let mut checkpoints = 0;
        // 10 seconds in 10 ms steps
        for _ in 0..1000 {
            let (s, c) = count(&server.update(10.0));
            seeds += s;
            checkpoints += c;
        }
        assert_eq!(server.advances(), 200);
        assert_eq!(seeds, 40);
        assert_eq!(checkpoints, 10);
        assert!((server.state().global_time - 10.0).abs() < 1e-6);
        assert!((server.state().color_shift - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_color_shift_wraps() {
        let mut server = server();
        for _ in 0..2500 {
            server.advance_tick();
        }
        let shift = server.state().color_shift;
        assert!((0.0..1.0).contains(&shift));
        assert!((shift - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_checkpoint_carries_state() {
        let mut server = server();
        server.update(1000.0);
        match server.checkpoint() {
            ServerMessage::Checkpoint(c) => {
                assert!((c.global_time - 1.0).abs() < 1e-9);
                assert_eq!(c.shared_seed, server.state().shared_seed);
                assert!(c.is_sync_checkpoint);
                assert!(c.micro_evolve);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_zero_speed_disables_micro_evolve() {
        let mut server = server();
        server.handle_client_message(ClientMessage::SetEvolveSpeed { n: 0 });
        match server.checkpoint() {
            ServerMessage::Checkpoint(c) => assert!(!c.micro_evolve),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_add_seed_broadcasts_full_state() {
        let mut server = server();
        let reply = server.handle_client_message(ClientMessage::AddSeed { x: 1.5, y: 0.5, value: f32::NAN });
        match reply {
            Some(ServerMessage::FullState(state)) => {
                assert_eq!(state.seed_points, vec![SeedPoint::new(1.0, 0.5, 0.0)]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_partial_option_update() {
        let mut server = server();
        let before = server.options().clone();
        server.handle_client_message(ClientMessage::UpdateOption(OptionUpdate {
            palette: Some(Palette::Ember),
            roughness: Some(2.0),
            evolve_speed: Some(99),
        }));
        let after = server.options();
        assert_eq!(after.palette, Palette::Ember);
        assert_eq!(after.roughness, before.roughness);
        assert_eq!(after.evolve_speed, MAX_EVOLVE_SPEED);
        assert_eq!(after.seed_points, before.seed_points);
    }

    #[test]
    fn test_ignores_bad_elapsed_and_caps_catch_up() {
        let mut server = server();
        assert!(server.update(f64::NAN).is_empty());
        assert!(server.update(-5.0).is_empty());
        assert_eq!(server.advances(), 0);

        let messages = server.update(1.0e9);
        assert_eq!(server.advances(), MAX_CATCH_UP_ADVANCES as u64);
        assert_eq!(count(&messages), (1, 1));
    }

    #[test]
    fn test_wrap_unit() {
        assert_eq!(wrap_unit(1.25), 0.25);
        assert!((wrap_unit(-0.25) - 0.75).abs() < 1e-12);
        assert!(wrap_unit(-1e-20) < 1.0);
    }
}
