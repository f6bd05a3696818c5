//! Adaptive quadtree mesher.
//!
//! Converts a `HeightField` into a back-to-front sorted triangle batch whose
//! density follows a single detail factor (lower = more triangles). The grid
//! is partitioned into fixed-size cells; each cell is quartered while a
//! refinement predicate holds, and every leaf emits the two triangles of its
//! diagonal split.
//!
//! The recursion runs on an explicit work stack and writes into a triangle
//! buffer owned by the mesher, so a warm mesher does not allocate per frame.

use bytemuck::{Pod, Zeroable};

use crate::color::ColorRamp;
use crate::config::MeshParams;
use crate::heightfield::HeightField;

/// Triangles with a smaller pixel area are dropped.
const MIN_TRIANGLE_AREA: f32 = 1e-4;

/// Heights within the same bucket of this width count as tied when sorting.
const HEIGHT_TIE_EPSILON: f32 = 1e-3;

/// Brightness modulation amplitude of the time shimmer.
const SHIMMER_AMPLITUDE: f32 = 0.04;

/// One screen-space vertex, laid out for direct GPU upload.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub x: f32,
    pub y: f32,
    /// RGBA
    pub color: [u8; 4],
}

/// One triangle of the frame batch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangleBatchEntry {
    pub vertices: [Vertex; 3],
    /// Mean of the three source heights; the sort key
    pub height: f32,
}

impl TriangleBatchEntry {
    fn y_sum(&self) -> f32 {
        self.vertices.iter().map(|v| v.y).sum()
    }

    fn x_sum(&self) -> f32 {
        self.vertices.iter().map(|v| v.x).sum()
    }

    /// Unsigned pixel area.
    pub fn area(&self) -> f32 {
        let [a, b, c] = self.vertices;
        0.5 * ((b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y)).abs()
    }
}

/// Per-frame rendering inputs that are not part of the terrain itself.
pub struct MeshOptions<'a> {
    pub canvas_width: f32,
    pub canvas_height: f32,
    /// Pixel position of grid cell (0, 0)
    pub offset_x: f32,
    pub offset_y: f32,
    /// Pixels a vertex is lifted per unit of height
    pub height_lift: f32,
    /// Animated hue rotation, [0, 1)
    pub color_shift: f32,
    pub ramp: &'a dyn ColorRamp,
}

/// Counters describing one mesh pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshStats {
    pub triangle_count: usize,
    /// Top-level cells that were subdivided at least once
    pub detail_area_count: usize,
    /// Triangles rejected as degenerate or off-canvas
    pub dropped_count: usize,
}

/// Result of `subdivide`: the sorted batch plus its counters.
pub struct MeshFrame<'a> {
    pub triangles: &'a [TriangleBatchEntry],
    pub stats: MeshStats,
}

#[derive(Clone, Copy, Debug)]
struct CellTask {
    x: usize,
    y: usize,
    size: usize,
    root: bool,
}

/// Refinement thresholds for one detail factor.
#[derive(Clone, Copy, Debug)]
struct Thresholds {
    peak: f32,
    variance: f32,
    size: f32,
    min_size: usize,
    coarse: bool,
}

impl Thresholds {
    fn for_detail(detail: f32, cell_size: usize, params: &MeshParams) -> Self {
        Self {
            peak: params.peak_base + detail * params.peak_scale,
            variance: detail * params.variance_scale,
            size: cell_size as f32 * detail * params.size_scale,
            min_size: ((detail * params.min_size_scale) as usize).max(1),
            coarse: detail > params.coarse_cutoff,
        }
    }
}

/// Adaptive mesher with frame-reused buffers.
pub struct AdaptiveMesher {
    params: MeshParams,
    triangles: Vec<TriangleBatchEntry>,
    stack: Vec<CellTask>,
}

impl AdaptiveMesher {
    pub fn new(params: MeshParams) -> Self {
        Self {
            params,
            triangles: Vec::new(),
            stack: Vec::new(),
        }
    }

    pub fn params(&self) -> &MeshParams {
        &self.params
    }

    /// The batch produced by the last `subdivide` call.
    pub fn triangles(&self) -> &[TriangleBatchEntry] {
        &self.triangles
    }

    /// Rebuild the triangle batch for `field`.
    ///
    /// `detail_factor` outside [0, 1] is clamped and a non-finite value is
    /// treated as 0.5. Bad triangles are dropped individually; this never
    /// panics on numeric input.
    pub fn subdivide(
        &mut self,
        field: &HeightField,
        cell_size: usize,
        detail_factor: f32,
        pixel_scale: f32,
        time: f32,
        options: &MeshOptions<'_>,
    ) -> MeshFrame<'_> {
        self.triangles.clear();
        self.stack.clear();

        let detail = if detail_factor.is_finite() {
            detail_factor.clamp(0.0, 1.0)
        } else {
            0.5
        };
        let span = field.size() - 1;
        let cell_size = floor_power_of_two(cell_size.clamp(1, span));
        let thresholds = Thresholds::for_detail(detail, cell_size, &self.params);

        for y in (0..span).step_by(cell_size) {
            for x in (0..span).step_by(cell_size) {
                self.stack.push(CellTask { x, y, size: cell_size, root: true });
            }
        }

        let mut stats = MeshStats::default();
        while let Some(task) = self.stack.pop() {
            if should_refine(field, task, &thresholds) {
                if task.root {
                    stats.detail_area_count += 1;
                }
                let half = task.size / 2;
                for (dx, dy) in [(0, 0), (half, 0), (0, half), (half, half)] {
                    self.stack.push(CellTask {
                        x: task.x + dx,
                        y: task.y + dy,
                        size: half,
                        root: false,
                    });
                }
            } else {
                stats.dropped_count += emit_leaf(&mut self.triangles, field, task, pixel_scale, time, options);
            }
        }

        self.triangles.sort_unstable_by(|a, b| {
            let ka = (a.height / HEIGHT_TIE_EPSILON).floor() as i64;
            let kb = (b.height / HEIGHT_TIE_EPSILON).floor() as i64;
            ka.cmp(&kb)
                .then_with(|| a.y_sum().total_cmp(&b.y_sum()))
                .then_with(|| a.x_sum().total_cmp(&b.x_sum()))
        });

        stats.triangle_count = self.triangles.len();
        MeshFrame {
            triangles: &self.triangles,
            stats,
        }
    }
}

fn floor_power_of_two(n: usize) -> usize {
    if n == 0 {
        1
    } else {
        1 << (usize::BITS - 1 - n.leading_zeros())
    }
}

/// Subdivide when the cell has a high center, uneven corners, or is simply
/// larger than the detail level allows.
fn should_refine(field: &HeightField, task: CellTask, t: &Thresholds) -> bool {
    if t.coarse || task.size < 2 || task.size / 2 < t.min_size {
        return false;
    }

    let s = task.size;
    let corners = [
        field.cell(task.x, task.y),
        field.cell(task.x + s, task.y),
        field.cell(task.x, task.y + s),
        field.cell(task.x + s, task.y + s),
    ];
    let center = field.cell(task.x + s / 2, task.y + s / 2);
    let lo = corners.iter().copied().fold(f32::MAX, f32::min);
    let hi = corners.iter().copied().fold(f32::MIN, f32::max);

    center > t.peak || hi - lo > t.variance || s as f32 > t.size
}

fn make_vertex(
    field: &HeightField,
    gx: usize,
    gy: usize,
    pixel_scale: f32,
    time: f32,
    options: &MeshOptions<'_>,
) -> (Vertex, f32) {
    let h = field.cell(gx, gy);
    let x = options.offset_x + gx as f32 * pixel_scale;
    let y = options.offset_y + gy as f32 * pixel_scale - h * options.height_lift;

    let phase = time * 2.0 + gx as f32 * 0.15 + gy as f32 * 0.1;
    let shimmer = if phase.is_finite() { 1.0 + SHIMMER_AMPLITUDE * phase.sin() } else { 1.0 };
    let color = options.ramp.color_at(h, options.color_shift).scaled(shimmer);

    (Vertex { x, y, color: color.to_rgba() }, h)
}

fn vertex_on_canvas(v: &Vertex, options: &MeshOptions<'_>) -> bool {
    v.x.is_finite()
        && v.y.is_finite()
        && (0.0..=options.canvas_width).contains(&v.x)
        && (0.0..=options.canvas_height).contains(&v.y)
}

/// Emit the two triangles of a leaf cell. Returns how many were dropped.
fn emit_leaf(
    out: &mut Vec<TriangleBatchEntry>,
    field: &HeightField,
    task: CellTask,
    pixel_scale: f32,
    time: f32,
    options: &MeshOptions<'_>,
) -> usize {
    let s = task.size;
    let tl = make_vertex(field, task.x, task.y, pixel_scale, time, options);
    let tr = make_vertex(field, task.x + s, task.y, pixel_scale, time, options);
    let bl = make_vertex(field, task.x, task.y + s, pixel_scale, time, options);
    let br = make_vertex(field, task.x + s, task.y + s, pixel_scale, time, options);

    let mut dropped = 0;
    for [a, b, c] in [[tl, tr, bl], [tr, br, bl]] {
        let entry = TriangleBatchEntry {
            vertices: [a.0, b.0, c.0],
            height: (a.1 + b.1 + c.1) / 3.0,
        };
        let valid = entry.vertices.iter().all(|v| vertex_on_canvas(v, options))
            && entry.area() > MIN_TRIANGLE_AREA;
        if valid {
            out.push(entry);
        } else {
            dropped += 1;
        }
    }
    dropped
}
