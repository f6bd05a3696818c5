//! One viewer's rendering session.
//!
//! Owns every piece of mutable client state: the height field, the mesher
//! and its triangle buffer, the detail controller, the sync client and both
//! random sources. An external driver calls `advance` once per render tick
//! and `produce_frame` to get the batch to draw.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::color::Palette;
use crate::config::TerrainConfig;
use crate::detail::{DetailController, SampleReport};
use crate::heightfield::{HeightField, SeedPoint};
use crate::mesher::{AdaptiveMesher, MeshFrame, MeshOptions};
use crate::seeds::SessionSeeds;
use crate::shared_random::SharedRandom;
use crate::sync::{decode_line, FullState, ProtocolError, ServerMessage, SyncClient, MAX_EVOLVE_SPEED};

/// Empty border kept around the mesh, in pixels.
const VIEWPORT_MARGIN: f32 = 2.0;

/// Pixel placement of the grid on the canvas.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub pixel_scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub height_lift: f32,
}

pub struct RenderSession {
    config: TerrainConfig,
    seeds: SessionSeeds,
    field: HeightField,
    mesher: AdaptiveMesher,
    controller: DetailController,
    sync: SyncClient,
    shared_random: SharedRandom,
    local_rng: ChaCha8Rng,
    palette: Palette,
    evolve_speed: u32,
    sample_elapsed_ms: f64,
    frames: u64,
    last_report: Option<SampleReport>,
}

impl RenderSession {
    pub fn new(config: TerrainConfig) -> Self {
        let seeds = SessionSeeds::from_master(config.seed);
        let field = build_field(&config, &seeds, &[]);

        Self {
            mesher: AdaptiveMesher::new(config.mesh.clone()),
            controller: DetailController::new(config.controller.clone()),
            sync: SyncClient::new(config.sync.clone()),
            shared_random: SharedRandom::new(0),
            local_rng: ChaCha8Rng::seed_from_u64(seeds.local_evolution),
            palette: config.field.palette,
            evolve_speed: config.field.evolve_speed.min(MAX_EVOLVE_SPEED),
            sample_elapsed_ms: 0.0,
            frames: 0,
            last_report: None,
            seeds,
            field,
            config,
        }
    }

    pub fn field(&self) -> &HeightField {
        &self.field
    }

    pub fn controller(&self) -> &DetailController {
        &self.controller
    }

    pub fn sync(&self) -> &SyncClient {
        &self.sync
    }

    pub fn seeds(&self) -> &SessionSeeds {
        &self.seeds
    }

    pub fn palette(&self) -> Palette {
        self.palette
    }

    pub fn evolve_speed(&self) -> u32 {
        self.evolve_speed
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Report from the most recent controller sampling tick.
    pub fn last_report(&self) -> Option<&SampleReport> {
        self.last_report.as_ref()
    }

    /// One render tick of `delta_ms` wall time.
    ///
    /// Advances the animation scalars, feeds the frame time to the
    /// controller, runs a controller sample when its interval has elapsed,
    /// and micro-evolves the field while running autonomously.
    pub fn advance(&mut self, delta_ms: f64) {
        self.sync.advance(delta_ms);
        self.controller.record_frame(delta_ms);

        if delta_ms.is_finite() && delta_ms > 0.0 {
            self.sample_elapsed_ms += delta_ms;
            let interval = self.controller.params().sample_interval_ms;
            if self.sample_elapsed_ms >= interval {
                self.sample_elapsed_ms %= interval;
                self.last_report = Some(self.controller.sample());
            }
        }

        // While synced, micro-evolution follows the server's checkpoints
        if !self.sync.is_synced() && self.evolve_speed > 0 {
            let rate = self.micro_evolve_rate();
            self.field.micro_evolve(rate, &mut self.local_rng);
        }
    }

    /// Where the grid lands on the canvas: centered, uniformly scaled, with
    /// headroom above for the height lift.
    pub fn viewport(&self) -> Viewport {
        let mesh = self.mesher.params();
        let span = (self.field.size() - 1) as f32;
        let height_lift = mesh.height_lift * mesh.canvas_height;
        let usable_width = (mesh.canvas_width - 2.0 * VIEWPORT_MARGIN).max(0.0);
        let usable_height = (mesh.canvas_height - height_lift - 2.0 * VIEWPORT_MARGIN).max(0.0);
        let pixel_scale = (usable_width / span).min(usable_height / span);

        Viewport {
            pixel_scale,
            offset_x: (mesh.canvas_width - span * pixel_scale) * 0.5,
            offset_y: height_lift + VIEWPORT_MARGIN + (usable_height - span * pixel_scale) * 0.5,
            height_lift,
        }
    }

    /// Mesh the field at the controller's current detail. The triangle count
    /// is fed back to the controller for its next sample.
    pub fn produce_frame(&mut self) -> MeshFrame<'_> {
        let viewport = self.viewport();
        let mesh = self.mesher.params();
        let options = MeshOptions {
            canvas_width: mesh.canvas_width,
            canvas_height: mesh.canvas_height,
            offset_x: viewport.offset_x,
            offset_y: viewport.offset_y,
            height_lift: viewport.height_lift,
            color_shift: self.sync.color_shift() as f32,
            ramp: &self.palette,
        };
        let cell_size = mesh.cell_size;

        let frame = self.mesher.subdivide(
            &self.field,
            cell_size,
            self.controller.adaptive_detail(),
            viewport.pixel_scale,
            self.sync.global_time() as f32,
            &options,
        );
        self.controller.record_triangles(frame.stats.triangle_count);
        self.frames += 1;
        frame
    }

    /// Decode and apply one protocol line.
    pub fn handle_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        let message: ServerMessage = decode_line(line)?;
        self.handle_server_message(&message);
        Ok(())
    }

    pub fn handle_server_message(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::SeedTick(tick) => self.shared_random.reseed(tick.shared_seed),
            ServerMessage::Checkpoint(checkpoint) => {
                if !self.sync.on_checkpoint(checkpoint) {
                    return;
                }
                self.shared_random.reseed(checkpoint.shared_seed);
                if checkpoint.micro_evolve && self.evolve_speed > 0 {
                    let rate = self.micro_evolve_rate();
                    self.field.micro_evolve(rate, &mut self.shared_random);
                }
            }
            ServerMessage::FullState(state) => self.apply_full_state(state),
        }
    }

    /// Full-field random walk at the configured rate. Draws from the shared
    /// generator while synced so every client applies the same walk.
    pub fn evolve_terrain(&mut self) {
        let rate = self.config.field.evolve_rate;
        if self.sync.is_synced() {
            self.field.evolve(rate, &mut self.shared_random);
        } else {
            self.field.evolve(rate, &mut self.local_rng);
        }
    }

    fn micro_evolve_rate(&self) -> f32 {
        self.config.field.micro_evolve_rate_per_speed * self.evolve_speed as f32
    }

    /// Mirror the server's session options. New seed points are replayed
    /// incrementally when the rest of the terrain definition is unchanged;
    /// anything else rebuilds the field.
    fn apply_full_state(&mut self, state: &FullState) {
        self.palette = state.palette;
        self.evolve_speed = state.evolve_speed.min(MAX_EVOLVE_SPEED);

        let current = self.field.seed_points();
        let same_terrain = state.terrain_seed == self.seeds.terrain
            && state.roughness == self.field.roughness()
            && state.seed_points.starts_with(current);

        if same_terrain {
            let start = current.len();
            for (index, point) in state.seed_points.iter().enumerate().skip(start) {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seeds.seed_point(index));
                self.field.add_seed_point(point.x, point.y, point.value, &mut rng);
            }
            return;
        }

        self.seeds = self.seeds.with_terrain(state.terrain_seed);
        self.config.field.roughness = state.roughness;
        self.field = build_field(&self.config, &self.seeds, &state.seed_points);
        log::info!(
            "Rebuilt terrain from server state (seed {}, roughness {:.2}, {} seed points)",
            state.terrain_seed,
            self.field.roughness(),
            state.seed_points.len()
        );
    }
}

/// Base terrain from the terrain seed, then every seed point replayed in
/// order with its own generator. Matches a field that received the same
/// points one at a time.
fn build_field(config: &TerrainConfig, seeds: &SessionSeeds, seed_points: &[SeedPoint]) -> HeightField {
    let mut rng = ChaCha8Rng::seed_from_u64(seeds.terrain);
    let mut field = HeightField::initialize(config.field.grid_size, config.field.roughness, &[], &mut rng);
    for (index, point) in seed_points.iter().enumerate() {
        let mut rng = ChaCha8Rng::seed_from_u64(seeds.seed_point(index));
        field.add_seed_point(point.x, point.y, point.value, &mut rng);
    }
    field
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldParams;
    use crate::sync::{encode_line, ClientMessage, SyncServer};

    fn small_config() -> TerrainConfig {
        TerrainConfig {
            field: FieldParams {
                grid_size: 65,
                ..FieldParams::default()
            },
            ..TerrainConfig::default()
        }
    }

    #[test]
    fn test_frame_stays_on_canvas() {
        let mut session = RenderSession::new(small_config());
        let (width, height) = (session.config.mesh.canvas_width, session.config.mesh.canvas_height);
        let frame = session.produce_frame();
        assert!(frame.stats.triangle_count > 0);
        assert_eq!(frame.stats.dropped_count, 0);
        for tri in frame.triangles {
            for v in &tri.vertices {
                assert!(v.x >= 0.0 && v.x <= width);
                assert!(v.y >= 0.0 && v.y <= height);
            }
        }
    }

    #[test]
    fn test_controller_samples_on_interval() {
        let mut session = RenderSession::new(small_config());
        // 31 * 16 ms stays under the 500 ms sampling interval
        for _ in 0..31 {
            session.produce_frame();
            session.advance(16.0);
        }
        assert!(session.last_report().is_none());
        session.produce_frame();
        session.advance(16.0);
        let report = session.last_report().unwrap();
        // 62.5 FPS is well above the band
        assert!(report.avg_fps > 60.0);
        assert!(report.avg_triangles.is_some());
        assert!(session.controller().target_detail() < 0.5);
    }

    #[test]
    fn test_clients_share_terrain_and_edits() {
        let config = small_config();
        let mut server = SyncServer::new(&config);
        let mut early = RenderSession::new(config.clone());

        let update = server
            .handle_client_message(ClientMessage::AddSeed { x: 0.25, y: 0.75, value: 1.0 })
            .unwrap();
        let line = encode_line(&update).unwrap();
        early.handle_line(&line).unwrap();
        assert_eq!(early.field().seed_points().len(), 1);

        // A late joiner with a different local seed converges on the same field
        let mut late = RenderSession::new(TerrainConfig { seed: 4242, ..config });
        late.handle_line(&line).unwrap();

        assert_eq!(early.field().values(), late.field().values());
        assert_eq!(early.field().cell(16, 48), 1.0);
        assert_eq!(late.field().cell(16, 48), 1.0);
    }

    #[test]
    fn test_checkpoint_micro_evolution_matches_across_clients() {
        let config = small_config();
        let mut server = SyncServer::new(&config);
        let mut a = RenderSession::new(config.clone());
        let mut b = RenderSession::new(config);

        for _ in 0..3 {
            for msg in server.update(1000.0) {
                a.handle_server_message(&msg);
                b.handle_server_message(&msg);
            }
        }
        assert!(a.sync().is_synced());
        assert_eq!(a.field().values(), b.field().values());
    }

    #[test]
    fn test_autonomous_micro_evolution_changes_field() {
        let mut session = RenderSession::new(small_config());
        let before = session.field().values().to_vec();
        for _ in 0..50 {
            session.advance(16.0);
        }
        assert_ne!(session.field().values(), &before[..]);
    }

    #[test]
    fn test_full_state_updates_options() {
        let config = small_config();
        let mut server = SyncServer::new(&config);
        let mut session = RenderSession::new(config);

        let msg = server
            .handle_client_message(ClientMessage::UpdateOption(crate::sync::OptionUpdate {
                palette: Some(Palette::Ember),
                evolve_speed: Some(0),
                roughness: Some(0.3),
            }))
            .unwrap();
        session.handle_server_message(&msg);

        assert_eq!(session.palette(), Palette::Ember);
        assert_eq!(session.evolve_speed(), 0);
        assert_eq!(session.field().roughness(), 0.3);

        // Zero speed stops autonomous drift
        let before = session.field().values().to_vec();
        session.advance(16.0);
        assert_eq!(session.field().values(), &before[..]);
    }

    #[test]
    fn test_undecodable_line_is_error() {
        let mut session = RenderSession::new(small_config());
        assert!(session.handle_line("garbage").is_err());
        assert_eq!(session.frames(), 0);
    }

    #[test]
    fn test_evolve_terrain_keeps_range() {
        let mut session = RenderSession::new(small_config());
        for _ in 0..20 {
            session.evolve_terrain();
        }
        let stats = session.field().stats();
        assert!(stats.min >= 0.0 && stats.max <= 1.0);
    }
}
