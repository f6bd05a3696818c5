//! Fractal height field with incremental evolution.
//!
//! The field is a square `2^k + 1` grid of heights in [0, 1], generated with
//! the diamond-square algorithm. User-placed seed points pin individual cells
//! and survive every regeneration. Two evolution operators perturb the field
//! afterwards: `evolve` walks every cell, `micro_evolve` only a handful.
//!
//! All randomness comes from the caller's `Rng`, so a field is fully
//! reproducible from its inputs and the generator state.

use std::path::Path;

use image::{GrayImage, Luma};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::grid::Grid;

/// Number of cells touched by one `micro_evolve` call.
pub const MICRO_EVOLVE_CELLS: usize = 10;

/// Smallest side length that still has a center cell.
const MIN_FIELD_SIZE: usize = 3;

// =============================================================================
// SEED POINTS
// =============================================================================

/// A user-placed height constraint in normalized field coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeedPoint {
    /// Horizontal position, 0.0 (left edge) to 1.0 (right edge)
    pub x: f32,
    /// Vertical position, 0.0 (top edge) to 1.0 (bottom edge)
    pub y: f32,
    /// Forced height, 0.0 to 1.0
    pub value: f32,
}

impl SeedPoint {
    /// Build a seed point, clamping every component into [0, 1].
    /// Non-finite components become 0 so a corrupt edit never hard-fails.
    pub fn new(x: f32, y: f32, value: f32) -> Self {
        Self {
            x: clamp_unit(x),
            y: clamp_unit(y),
            value: clamp_unit(value),
        }
    }

    /// Same point with every component forced back into range.
    pub fn sanitized(self) -> Self {
        Self::new(self.x, self.y, self.value)
    }

    /// Nearest grid cell for a field of side `size`.
    pub fn nearest_cell(&self, size: usize) -> (usize, usize) {
        let last = size.saturating_sub(1) as f32;
        let x = (clamp_unit(self.x) * last).round() as usize;
        let y = (clamp_unit(self.y) * last).round() as usize;
        (x.min(size - 1), y.min(size - 1))
    }
}

/// Clamp to [0, 1]; NaN and infinities map to 0.
fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Round an arbitrary side length up to the next valid `2^k + 1`.
pub fn valid_field_size(size: usize) -> usize {
    let inner = size.saturating_sub(1).max(MIN_FIELD_SIZE - 1);
    inner.next_power_of_two() + 1
}

/// Whether `size` is of the form `2^k + 1` with k >= 1.
pub fn is_valid_field_size(size: usize) -> bool {
    size >= MIN_FIELD_SIZE && (size - 1).is_power_of_two()
}

/// Summary statistics for logging.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HeightStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

// =============================================================================
// HEIGHT FIELD
// =============================================================================

/// Square fractal height field.
#[derive(Clone, Debug)]
pub struct HeightField {
    heights: Grid<f32>,
    /// Cells occupied by seed points; diamond-square leaves them alone
    pinned: Grid<bool>,
    roughness: f32,
    seed_points: Vec<SeedPoint>,
}

impl HeightField {
    /// An all-zero field. `size` is rounded up to the next `2^k + 1`.
    pub fn new(size: usize, roughness: f32) -> Self {
        let size = if is_valid_field_size(size) {
            size
        } else {
            let adjusted = valid_field_size(size);
            log::warn!("Height field size {} is not 2^k+1, using {}", size, adjusted);
            adjusted
        };

        Self {
            heights: Grid::new_with(size, 0.0),
            pinned: Grid::new_with(size, false),
            roughness: sanitize_roughness(roughness),
            seed_points: Vec::new(),
        }
    }

    /// Generate a fresh field: random corners, seed points, diamond-square.
    pub fn initialize(
        size: usize,
        roughness: f32,
        seed_points: &[SeedPoint],
        rng: &mut impl Rng,
    ) -> Self {
        let mut field = Self::new(size, roughness);
        field.seed_points = seed_points.iter().map(|p| p.sanitized()).collect();
        field.regenerate(rng);
        field
    }

    pub fn size(&self) -> usize {
        self.heights.size
    }

    pub fn roughness(&self) -> f32 {
        self.roughness
    }

    pub fn seed_points(&self) -> &[SeedPoint] {
        &self.seed_points
    }

    /// Row-major cell values.
    pub fn values(&self) -> &[f32] {
        self.heights.as_slice()
    }

    /// Wholesale rebuild keeping the seed list.
    pub fn regenerate(&mut self, rng: &mut impl Rng) {
        let last = self.size() - 1;
        for (x, y) in [(0, 0), (last, 0), (0, last), (last, last)] {
            self.heights.set(x, y, rng.gen::<f32>());
        }
        self.apply_seed_points();
        self.diamond_square(rng);

        log::debug!(
            "Regenerated {}x{} height field (roughness {:.2}, {} seed points)",
            self.size(),
            self.size(),
            self.roughness,
            self.seed_points.len()
        );
    }

    /// Change roughness and rebuild. Seed points are kept.
    pub fn set_roughness(&mut self, roughness: f32, rng: &mut impl Rng) {
        self.roughness = sanitize_roughness(roughness);
        self.regenerate(rng);
    }

    /// Force the nearest cell to `value`, remember the point, and re-run
    /// diamond-square around it. Corners are kept, so the edit is local in
    /// spirit even though the whole pass is recomputed.
    pub fn add_seed_point(&mut self, x: f32, y: f32, value: f32, rng: &mut impl Rng) {
        let point = SeedPoint::new(x, y, value);
        self.seed_points.push(point);
        self.apply_seed_points();
        self.diamond_square(rng);
    }

    /// Random walk of every cell by up to `rate` in either direction.
    pub fn evolve(&mut self, rate: f32, rng: &mut impl Rng) {
        let Some(rate) = sanitize_rate(rate) else {
            return;
        };
        for (_, _, h) in self.heights.iter_mut() {
            *h = perturb(*h, rate, rng);
        }
    }

    /// Random walk of `MICRO_EVOLVE_CELLS` randomly chosen cells.
    pub fn micro_evolve(&mut self, rate: f32, rng: &mut impl Rng) {
        let Some(rate) = sanitize_rate(rate) else {
            return;
        };
        let size = self.size();
        for _ in 0..MICRO_EVOLVE_CELLS {
            let x = rng.gen_range(0..size);
            let y = rng.gen_range(0..size);
            let h = self.heights.get_mut(x, y);
            *h = perturb(*h, rate, rng);
        }
    }

    /// Height at grid coordinates (truncated). Out-of-range or non-finite
    /// input returns 0, as does a non-finite stored value.
    pub fn get_value(&self, x: f32, y: f32) -> f32 {
        if !(x.is_finite() && y.is_finite()) {
            return 0.0;
        }
        let (xi, yi) = (x.trunc(), y.trunc());
        if xi < 0.0 || yi < 0.0 {
            return 0.0;
        }
        self.cell(xi as usize, yi as usize)
    }

    /// Height at integer grid coordinates, 0 when out of range.
    pub fn cell(&self, x: usize, y: usize) -> f32 {
        match self.heights.try_get(x, y) {
            Some(&h) if h.is_finite() => h,
            _ => 0.0,
        }
    }

    /// Bilinear lookup in normalized coordinates, for decorative systems that
    /// want a smooth color hint between cells.
    pub fn sample_bilinear(&self, nx: f32, ny: f32) -> f32 {
        if !(nx.is_finite() && ny.is_finite()) {
            return 0.0;
        }
        let last = (self.size() - 1) as f32;
        let fx = nx.clamp(0.0, 1.0) * last;
        let fy = ny.clamp(0.0, 1.0) * last;

        let x0 = fx.floor() as usize;
        let y0 = fy.floor() as usize;
        let x1 = (x0 + 1).min(self.size() - 1);
        let y1 = (y0 + 1).min(self.size() - 1);
        let tx = fx - x0 as f32;
        let ty = fy - y0 as f32;

        let top = self.cell(x0, y0) * (1.0 - tx) + self.cell(x1, y0) * tx;
        let bottom = self.cell(x0, y1) * (1.0 - tx) + self.cell(x1, y1) * tx;
        top * (1.0 - ty) + bottom * ty
    }

    pub fn stats(&self) -> HeightStats {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        let mut sum = 0.0f64;
        for (_, _, &h) in self.heights.iter() {
            min = min.min(h);
            max = max.max(h);
            sum += h as f64;
        }
        HeightStats {
            min,
            max,
            mean: (sum / self.heights.len() as f64) as f32,
        }
    }

    /// Grayscale rendition of the field, one pixel per cell.
    pub fn to_grayscale_image(&self) -> GrayImage {
        let size = self.size() as u32;
        GrayImage::from_fn(size, size, |x, y| {
            let h = self.cell(x as usize, y as usize);
            Luma([(h * 255.0).round() as u8])
        })
    }

    /// Export the field as a grayscale PNG.
    pub fn export_png(&self, path: impl AsRef<Path>) -> Result<(), image::ImageError> {
        self.to_grayscale_image().save(path)
    }

    // -------------------------------------------------------------------------
    // Generation internals
    // -------------------------------------------------------------------------

    fn apply_seed_points(&mut self) {
        self.pinned.fill(false);
        let size = self.size();
        for point in &self.seed_points {
            let (x, y) = point.nearest_cell(size);
            self.heights.set(x, y, point.value);
            self.pinned.set(x, y, true);
        }
    }

    fn diamond_square(&mut self, rng: &mut impl Rng) {
        let size = self.size();
        let mut step = size - 1;
        let mut rho = self.roughness;

        while step > 1 {
            let half = step / 2;

            // Diamond step: centers of each square take the diagonal average
            for y in (half..size).step_by(step) {
                for x in (half..size).step_by(step) {
                    if *self.pinned.get(x, y) {
                        continue;
                    }
                    let avg = (*self.heights.get(x - half, y - half)
                        + *self.heights.get(x + half, y - half)
                        + *self.heights.get(x - half, y + half)
                        + *self.heights.get(x + half, y + half))
                        / 4.0;
                    self.heights.set(x, y, clamp_unit(avg + jitter(rho, rng)));
                }
            }

            // Square step: edge midpoints average their 2-4 orthogonal neighbors
            for y in (0..size).step_by(half) {
                let start = if (y / half) % 2 == 0 { half } else { 0 };
                for x in (start..size).step_by(step) {
                    if *self.pinned.get(x, y) {
                        continue;
                    }
                    let mut sum = 0.0;
                    let mut count = 0;
                    for (nx, ny) in self.heights.orthogonal_at(x, y, half) {
                        sum += *self.heights.get(nx, ny);
                        count += 1;
                    }
                    let avg = sum / count as f32;
                    self.heights.set(x, y, clamp_unit(avg + jitter(rho, rng)));
                }
            }

            step = half;
            rho *= 0.5;
        }
    }
}

/// Roughness outside [0, 1] is clamped; non-finite falls back to the midpoint.
fn sanitize_roughness(roughness: f32) -> f32 {
    if roughness.is_finite() {
        roughness.clamp(0.0, 1.0)
    } else {
        0.5
    }
}

/// A usable perturbation rate, or None when the walk should be skipped.
fn sanitize_rate(rate: f32) -> Option<f32> {
    if rate.is_finite() && rate > 0.0 {
        Some(rate.min(1.0))
    } else {
        None
    }
}

fn jitter(rho: f32, rng: &mut impl Rng) -> f32 {
    if rho > 0.0 {
        rng.gen_range(-rho..rho)
    } else {
        0.0
    }
}

/// One clamped random-walk step. An invalid result keeps the old height.
fn perturb(height: f32, rate: f32, rng: &mut impl Rng) -> f32 {
    let next = height + rng.gen_range(-rate..rate);
    if next.is_finite() {
        next.clamp(0.0, 1.0)
    } else {
        clamp_unit(height)
    }
}
