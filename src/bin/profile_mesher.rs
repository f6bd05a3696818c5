//! Profiling tool for height-field generation and adaptive meshing

use std::time::Instant;

use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use terrain_sync::{
    color::Palette,
    config::MeshParams,
    heightfield::HeightField,
    mesher::{AdaptiveMesher, MeshOptions},
};

#[derive(Parser, Debug)]
#[command(name = "profile_mesher")]
#[command(about = "Time height-field generation and meshing across detail factors")]
struct Args {
    /// Height field side length, must be 2^k+1
    #[arg(short = 'g', long, default_value = "257")]
    grid_size: usize,

    /// Diamond-square roughness
    #[arg(short, long, default_value = "0.5")]
    roughness: f32,

    /// Random seed
    #[arg(short, long, default_value = "1337")]
    seed: u64,

    /// Mesh passes per detail factor
    #[arg(short, long, default_value = "20")]
    passes: u32,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    println!("=== Mesher Profiling ===");
    println!("Field size: {}x{}  roughness: {:.2}  seed: {}", args.grid_size, args.grid_size, args.roughness, args.seed);
    println!();

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);

    // Profile generation
    let start = Instant::now();
    let mut field = HeightField::initialize(args.grid_size, args.roughness, &[], &mut rng);
    let generation_time = start.elapsed();
    println!("Diamond-square generation: {:?}", generation_time);

    // Profile evolution
    let start = Instant::now();
    field.evolve(0.05, &mut rng);
    let evolve_time = start.elapsed();
    println!("Full evolve: {:?}", evolve_time);

    let start = Instant::now();
    for _ in 0..1000 {
        field.micro_evolve(0.01, &mut rng);
    }
    println!("1000 micro evolves: {:?}", start.elapsed());

    let stats = field.stats();
    println!("Heights: {:.3} to {:.3} (mean {:.3})", stats.min, stats.max, stats.mean);

    // Profile meshing across the detail range
    let params = MeshParams::default();
    let span = (field.size() - 1) as f32;
    let pixel_scale = (params.canvas_width / span).min(params.canvas_height * (1.0 - params.height_lift) / span);
    let palette = Palette::Terrain;
    let options = MeshOptions {
        canvas_width: params.canvas_width,
        canvas_height: params.canvas_height,
        offset_x: (params.canvas_width - span * pixel_scale) * 0.5,
        offset_y: params.canvas_height * params.height_lift,
        height_lift: params.canvas_height * params.height_lift,
        color_shift: 0.0,
        ramp: &palette,
    };
    let cell_size = params.cell_size;
    let mut mesher = AdaptiveMesher::new(params);
    let passes = args.passes.max(1);

    println!();
    println!("{:>8} {:>10} {:>8} {:>8} {:>12}", "detail", "triangles", "areas", "dropped", "per pass");
    let mut total = std::time::Duration::ZERO;
    for step in 0..=9 {
        let detail = 0.05 + step as f32 * 0.1;
        let start = Instant::now();
        let mut stats = Default::default();
        for pass in 0..passes {
            stats = mesher.subdivide(&field, cell_size, detail, pixel_scale, pass as f32 * 0.016, &options).stats;
        }
        let elapsed = start.elapsed();
        total += elapsed;
        println!(
            "{:>8.2} {:>10} {:>8} {:>8} {:>12?}",
            detail,
            stats.triangle_count,
            stats.detail_area_count,
            stats.dropped_count,
            elapsed / passes
        );
    }

    println!("\n=== Summary ===");
    println!("Generation: {:?}", generation_time);
    println!("Meshing:    {:?} over {} passes", total, passes * 10);
}
