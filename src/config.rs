//! Session configuration.
//!
//! One `TerrainConfig` carries every construction-time knob of the core:
//! height field, mesher, detail controller and synchronization. All structs
//! implement `Default` with the canonical constant set and deserialize with
//! `#[serde(default)]`, so a JSON file only needs the fields it overrides.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::color::Palette;
use crate::heightfield::is_valid_field_size;

// =============================================================================
// ERRORS
// =============================================================================

/// Errors that can occur while loading or validating a configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error (file not found, permissions, etc.)
    Io(std::io::Error),
    /// Malformed JSON or wrong field types
    Parse(String),
    /// Well-formed but unusable values
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

// =============================================================================
// TERRAIN
// =============================================================================

/// Height-field parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldParams {
    /// Grid side length, must be 2^k + 1
    pub grid_size: usize,
    /// Diamond-square roughness, exclusive (0, 1)
    pub roughness: f32,
    /// Step size of a user-triggered `evolve`
    pub evolve_rate: f32,
    /// Micro-evolution step per unit of evolve speed
    pub micro_evolve_rate_per_speed: f32,
    /// Initial evolve speed (0 disables ambient drift)
    pub evolve_speed: u32,
    /// Built-in palette used for vertex colors
    pub palette: Palette,
}

impl Default for FieldParams {
    fn default() -> Self {
        Self {
            grid_size: 129,
            roughness: 0.5,
            evolve_rate: 0.05,
            micro_evolve_rate_per_speed: 0.002,
            evolve_speed: 3,
            palette: Palette::Terrain,
        }
    }
}

// =============================================================================
// MESHER
// =============================================================================

/// Adaptive mesher parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshParams {
    /// Side length (in grid cells) of the top-level partition
    pub cell_size: usize,
    /// Canvas width in pixels
    pub canvas_width: f32,
    /// Canvas height in pixels
    pub canvas_height: f32,
    /// Vertical pixel lift per unit of height, as a fraction of canvas height
    pub height_lift: f32,
    /// Detail factor above which no cell is ever subdivided
    pub coarse_cutoff: f32,
    /// Minimum cell size is `detail * min_size_scale` grid cells (at least 1)
    pub min_size_scale: f32,
    /// Peak threshold = `peak_base + detail * peak_scale`
    pub peak_base: f32,
    pub peak_scale: f32,
    /// Corner-spread threshold = `detail * variance_scale`
    pub variance_scale: f32,
    /// Size threshold = `cell_size * detail * size_scale`
    pub size_scale: f32,
}

impl Default for MeshParams {
    fn default() -> Self {
        Self {
            cell_size: 16,
            canvas_width: 1024.0,
            canvas_height: 768.0,
            height_lift: 0.15,
            coarse_cutoff: 0.9,
            min_size_scale: 8.0,
            peak_base: 0.35,
            peak_scale: 0.6,
            variance_scale: 0.3,
            size_scale: 1.5,
        }
    }
}

// =============================================================================
// DETAIL CONTROLLER
// =============================================================================

/// Detail-controller constants. One canonical set; every threshold the
/// controller uses is here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerParams {
    pub min_detail: f32,
    pub max_detail: f32,
    pub initial_detail: f32,

    /// Target FPS band
    pub target_fps_low: f32,
    pub target_fps_high: f32,
    /// Narrow sub-band where the controller settles
    pub sweet_fps_low: f32,
    pub sweet_fps_high: f32,
    /// Consecutive sweet ticks before `optimal_found`
    pub sweet_ticks_required: u32,
    /// Distance outside the sweet band that clears `optimal_found`
    pub optimal_exit_margin: f32,

    /// Wall-clock sampling cadence
    pub sample_interval_ms: f64,
    pub fps_window: usize,
    pub triangle_window: usize,
    pub target_window: usize,
    pub direction_window: usize,

    /// Ticks the dead zone holds the target frozen
    pub dead_zone_ticks: u32,
    /// An adaptive-detail jump larger than this counts as oscillation
    pub oscillation_jump: f32,
    /// Distance from a bound that counts as sitting on it
    pub bound_epsilon: f32,
    /// Smallest target/adaptive gap recorded as a change event
    pub stability_threshold: f32,

    /// Step limiter
    pub min_step: f32,
    pub max_step: f32,
    pub base_step: f32,
    pub distance_step_gain: f32,
    pub instability_step_gain: f32,

    /// Weight of the new target against the previous-target window mean
    pub target_smoothing: f32,

    /// Nudge gains
    pub out_of_band_gain: f32,
    pub in_band_gain: f32,
    pub optimal_gain_scale: f32,
    pub extreme_nudge: f32,

    /// Adaptation rates
    pub rate_far: f32,
    pub rate_in_band: f32,
    pub rate_optimal: f32,
    pub rate_default: f32,
    /// FPS distance ratio beyond which the controller is "far"
    pub far_ratio: f32,
    /// Gap below which high FPS forces a fixed nudge
    pub stuck_epsilon: f32,
    pub stuck_nudge: f32,

    /// Triangle budget
    pub min_triangles: u32,
    pub max_triangles: u32,
    pub preferred_triangles_min: u32,
    pub preferred_triangles_max: u32,
}

impl Default for ControllerParams {
    fn default() -> Self {
        Self {
            min_detail: 0.10,
            max_detail: 0.95,
            initial_detail: 0.5,

            target_fps_low: 30.0,
            target_fps_high: 40.0,
            sweet_fps_low: 32.0,
            sweet_fps_high: 38.0,
            sweet_ticks_required: 3,
            optimal_exit_margin: 6.0,

            sample_interval_ms: 500.0,
            fps_window: 10,
            triangle_window: 10,
            target_window: 5,
            direction_window: 4,

            dead_zone_ticks: 3,
            oscillation_jump: 0.12,
            bound_epsilon: 0.001,
            stability_threshold: 0.004,

            min_step: 0.004,
            max_step: 0.08,
            base_step: 0.01,
            distance_step_gain: 0.1,
            instability_step_gain: 0.2,

            target_smoothing: 0.7,

            out_of_band_gain: 1.0,
            in_band_gain: 0.3,
            optimal_gain_scale: 0.1,
            extreme_nudge: 0.15,

            rate_far: 0.5,
            rate_in_band: 0.3,
            rate_optimal: 0.08,
            rate_default: 0.2,
            far_ratio: 0.3,
            stuck_epsilon: 0.01,
            stuck_nudge: 0.01,

            min_triangles: 500,
            max_triangles: 40_000,
            preferred_triangles_min: 4_000,
            preferred_triangles_max: 16_000,
        }
    }
}

impl ControllerParams {
    /// Center of the target FPS band.
    pub fn target_fps(&self) -> f32 {
        (self.target_fps_low + self.target_fps_high) * 0.5
    }
}

// =============================================================================
// SYNC
// =============================================================================

/// Canonical-state cadence and client reconciliation constants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncParams {
    /// Server internal advance interval
    pub advance_interval_ms: f64,
    /// Seed broadcast interval
    pub seed_interval_ms: f64,
    /// Checkpoint broadcast interval
    pub checkpoint_interval_ms: f64,
    /// `globalTime` increment per advance
    pub time_step: f64,
    /// `colorShift` increment per advance
    pub color_step: f64,
    /// Weight kept on the previous velocity estimate
    pub velocity_retention: f64,
    /// Silence after which a client falls back to autonomous mode
    pub stale_after_ms: f64,
}

impl Default for SyncParams {
    fn default() -> Self {
        Self {
            advance_interval_ms: 50.0,
            seed_interval_ms: 250.0,
            checkpoint_interval_ms: 1000.0,
            time_step: 0.05,
            color_step: 0.0005,
            velocity_retention: 0.8,
            stale_after_ms: 5000.0,
        }
    }
}

impl SyncParams {
    /// Canonical `globalTime` rate per second.
    pub fn default_time_rate(&self) -> f64 {
        self.time_step * 1000.0 / self.advance_interval_ms
    }

    /// Canonical `colorShift` rate per second.
    pub fn default_color_rate(&self) -> f64 {
        self.color_step * 1000.0 / self.advance_interval_ms
    }
}

// =============================================================================
// TOP LEVEL
// =============================================================================

/// Complete configuration for one terrain session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Master seed for terrain and local randomness
    pub seed: u64,
    pub field: FieldParams,
    pub mesh: MeshParams,
    pub controller: ControllerParams,
    pub sync: SyncParams,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            seed: 1337,
            field: FieldParams::default(),
            mesh: MeshParams::default(),
            controller: ControllerParams::default(),
            sync: SyncParams::default(),
        }
    }
}

impl TerrainConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: TerrainConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check every cross-field constraint. Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let field = &self.field;
        if !is_valid_field_size(field.grid_size) {
            return Err(invalid(format!("grid_size {} is not 2^k+1", field.grid_size)));
        }
        if !(field.roughness > 0.0 && field.roughness < 1.0) {
            return Err(invalid(format!("roughness {} outside (0, 1)", field.roughness)));
        }

        let mesh = &self.mesh;
        if mesh.cell_size == 0 || !mesh.cell_size.is_power_of_two() {
            return Err(invalid(format!("cell_size {} is not a power of two", mesh.cell_size)));
        }
        if mesh.cell_size > field.grid_size - 1 {
            return Err(invalid(format!(
                "cell_size {} larger than grid span {}",
                mesh.cell_size,
                field.grid_size - 1
            )));
        }
        if !(mesh.canvas_width > 0.0 && mesh.canvas_height > 0.0) {
            return Err(invalid("canvas dimensions must be positive".to_string()));
        }

        let c = &self.controller;
        if !(c.min_detail > 0.0 && c.min_detail < c.max_detail && c.max_detail < 1.0) {
            return Err(invalid(format!(
                "detail bounds [{}, {}] must satisfy 0 < min < max < 1",
                c.min_detail, c.max_detail
            )));
        }
        if !(c.target_fps_low > 0.0 && c.target_fps_low < c.target_fps_high) {
            return Err(invalid(format!(
                "target FPS band {}-{} is empty",
                c.target_fps_low, c.target_fps_high
            )));
        }
        if !(c.sweet_fps_low >= c.target_fps_low
            && c.sweet_fps_low < c.sweet_fps_high
            && c.sweet_fps_high <= c.target_fps_high)
        {
            return Err(invalid("sweet FPS band must sit inside the target band".to_string()));
        }
        if !(c.min_triangles <= c.preferred_triangles_min
            && c.preferred_triangles_min <= c.preferred_triangles_max
            && c.preferred_triangles_max <= c.max_triangles)
        {
            return Err(invalid("triangle ranges must nest: min <= preferred <= max".to_string()));
        }
        if c.fps_window == 0 || c.triangle_window == 0 || c.target_window == 0 || c.direction_window < 2 {
            return Err(invalid("controller windows must be non-empty".to_string()));
        }
        if !(c.sample_interval_ms > 0.0) {
            return Err(invalid("sample_interval_ms must be positive".to_string()));
        }

        let s = &self.sync;
        if !(s.advance_interval_ms > 0.0 && s.seed_interval_ms > 0.0 && s.checkpoint_interval_ms > 0.0) {
            return Err(invalid("sync intervals must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&s.velocity_retention) {
            return Err(invalid(format!("velocity_retention {} outside [0, 1)", s.velocity_retention)));
        }

        Ok(())
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Invalid(message)
}
