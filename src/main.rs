use std::time::Duration;

use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use terrain_sync::config::TerrainConfig;
use terrain_sync::session::RenderSession;
use terrain_sync::sync::{encode_line, ClientMessage, ServerMessage, SyncMode, SyncServer};

#[derive(Parser, Debug)]
#[command(name = "terrain_sync")]
#[command(about = "Run a shared evolving terrain session with simulated clients")]
struct Args {
    /// Number of simulated viewers
    #[arg(short, long, default_value = "3")]
    clients: usize,

    /// Session length in seconds
    #[arg(short, long, default_value = "6.0")]
    duration: f64,

    /// Master seed (uses random seed if not specified)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Load configuration from a JSON file
    #[arg(long)]
    config: Option<String>,

    /// Height field side length, must be 2^k+1
    #[arg(short = 'g', long)]
    grid_size: Option<usize>,

    /// Diamond-square roughness in (0, 1)
    #[arg(short, long)]
    roughness: Option<f32>,

    /// Maximum extra delivery delay per message in milliseconds
    #[arg(long, default_value = "80")]
    jitter_ms: u64,

    /// Fraction of server messages each client drops
    #[arg(long, default_value = "0.05")]
    loss: f64,

    /// Base frame time before meshing cost, in milliseconds
    #[arg(long, default_value = "16.0")]
    frame_ms: f64,

    /// Simulated render cost per triangle, in microseconds
    #[arg(long, default_value = "1.5")]
    triangle_cost_us: f64,

    /// Export the first client's final height field as a grayscale PNG
    #[arg(long)]
    export_heightmap: Option<String>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

/// Network conditions and render cost shared by all simulated clients.
#[derive(Clone, Copy, Debug)]
struct LinkSim {
    jitter_ms: u64,
    loss: f64,
    frame_ms: f64,
    triangle_cost_us: f64,
}

struct ClientSummary {
    id: usize,
    session: RenderSession,
    delivered: usize,
    dropped: usize,
    undecodable: usize,
    last_triangles: usize,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match TerrainConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => TerrainConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    } else if args.config.is_none() {
        config.seed = rand::random();
    }
    if let Some(size) = args.grid_size {
        config.field.grid_size = size;
    }
    if let Some(roughness) = args.roughness {
        config.field.roughness = roughness;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    if args.print_config {
        match config.to_json_pretty() {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize config: {}", e),
        }
        return;
    }

    let link = LinkSim {
        jitter_ms: args.jitter_ms,
        loss: if args.loss.is_finite() { args.loss.clamp(0.0, 1.0) } else { 0.0 },
        frame_ms: args.frame_ms.max(1.0),
        triangle_cost_us: args.triangle_cost_us.max(0.0),
    };
    let clients = args.clients.max(1);

    println!("Starting terrain session with seed: {}", config.seed);
    println!(
        "Field: {}x{}, roughness {:.2}, evolve speed {}",
        config.field.grid_size, config.field.grid_size, config.field.roughness, config.field.evolve_speed
    );
    println!(
        "Clients: {} (jitter up to {} ms, {:.0}% loss), duration {:.1}s",
        clients,
        link.jitter_ms,
        link.loss * 100.0,
        args.duration
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let duration = Duration::from_secs_f64(args.duration.max(0.1));
    let (server, summaries) = runtime.block_on(run_session(config, clients, link, duration));

    print_report(&server, &summaries);

    if let Some(path) = &args.export_heightmap {
        if let Some(first) = summaries.first() {
            println!("Exporting height field to {}...", path);
            if let Err(e) = first.session.field().export_png(path) {
                eprintln!("Failed to export height field: {}", e);
            }
        }
    }
}

/// Run one server task and `clients` client tasks until `duration` elapses.
async fn run_session(
    config: TerrainConfig,
    clients: usize,
    link: LinkSim,
    duration: Duration,
) -> (SyncServer, Vec<ClientSummary>) {
    let (broadcast_tx, _) = broadcast::channel::<String>(1024);
    let (inbox_tx, inbox_rx) = mpsc::channel::<ClientMessage>(256);

    let mut handles = Vec::new();
    for id in 0..clients {
        let client_config = TerrainConfig {
            seed: config.seed.wrapping_add(id as u64),
            ..config.clone()
        };
        let rx = broadcast_tx.subscribe();
        let outbox = inbox_tx.clone();
        handles.push(tokio::spawn(run_client(id, client_config, link, rx, outbox)));
    }
    drop(inbox_tx);

    let server = run_server(&config, duration, broadcast_tx, inbox_rx).await;

    let mut summaries = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(summary) => summaries.push(summary),
            Err(e) => eprintln!("Client task failed: {}", e),
        }
    }
    summaries.sort_by_key(|s| s.id);
    (server, summaries)
}

/// Single writer of the canonical state. Publishes JSON lines until the
/// deadline, then drops the broadcast sender so clients wind down.
async fn run_server(
    config: &TerrainConfig,
    duration: Duration,
    tx: broadcast::Sender<String>,
    mut inbox: mpsc::Receiver<ClientMessage>,
) -> SyncServer {
    let mut server = SyncServer::new(config);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(config.sync.advance_interval_ms / 1000.0));
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = ticker.tick() => {
                let now = Instant::now();
                let elapsed_ms = now.duration_since(last).as_secs_f64() * 1000.0;
                last = now;
                for message in server.update(elapsed_ms) {
                    publish(&tx, &message);
                }
            }
            Some(message) = inbox.recv() => {
                if let Some(reply) = server.handle_client_message(message) {
                    publish(&tx, &reply);
                }
            }
        }
    }

    log::info!("Server stopped after {} advances", server.advances());
    server
}

fn publish(tx: &broadcast::Sender<String>, message: &ServerMessage) {
    match encode_line(message) {
        // No receivers left is not an error for a broadcast
        Ok(line) => {
            let _ = tx.send(line);
        }
        Err(e) => log::warn!("{}", e),
    }
}

/// One viewer: renders on its own simulated clock, receives server lines
/// through a lossy, jittery link, and occasionally edits the terrain.
async fn run_client(
    id: usize,
    config: TerrainConfig,
    link: LinkSim,
    mut rx: broadcast::Receiver<String>,
    outbox: mpsc::Sender<ClientMessage>,
) -> ClientSummary {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed ^ 0x5EED_CAFE);
    let mut session = RenderSession::new(config);
    let mut pending: Vec<(f64, String)> = Vec::new();
    let mut clock_ms = 0.0;
    let mut next_edit_ms = 2000.0;
    let mut closed = false;
    let (mut delivered, mut dropped, mut undecodable, mut last_triangles) = (0, 0, 0, 0);

    if let Err(e) = outbox.send(ClientMessage::RequestFullState).await {
        log::debug!("Client {} could not request full state: {}", id, e);
    }

    while !(closed && pending.is_empty()) {
        loop {
            match rx.try_recv() {
                Ok(line) => {
                    if rng.gen_bool(link.loss) {
                        dropped += 1;
                    } else {
                        let delay = rng.gen_range(0..=link.jitter_ms) as f64;
                        pending.push((clock_ms + delay, line));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => break,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    log::warn!("Client {} lagged, {} messages lost", id, n);
                    dropped += n as usize;
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    closed = true;
                    break;
                }
            }
        }

        let mut index = 0;
        while index < pending.len() {
            if pending[index].0 <= clock_ms || closed {
                let (_, line) = pending.swap_remove(index);
                match session.handle_line(&line) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        log::warn!("Client {} skipped a line: {}", id, e);
                        undecodable += 1;
                    }
                }
            } else {
                index += 1;
            }
        }

        if id == 0 && clock_ms >= next_edit_ms {
            next_edit_ms += 2000.0;
            let edit = ClientMessage::AddSeed {
                x: rng.gen(),
                y: rng.gen(),
                value: rng.gen(),
            };
            if let Err(e) = outbox.send(edit).await {
                log::debug!("Client {} edit not delivered: {}", id, e);
            }
        }

        last_triangles = session.produce_frame().stats.triangle_count;
        let frame_ms = link.frame_ms + last_triangles as f64 * link.triangle_cost_us / 1000.0;
        tokio::time::sleep(Duration::from_secs_f64(frame_ms / 1000.0)).await;
        session.advance(frame_ms);
        clock_ms += frame_ms;
    }

    ClientSummary {
        id,
        session,
        delivered,
        dropped,
        undecodable,
        last_triangles,
    }
}

fn print_report(server: &SyncServer, summaries: &[ClientSummary]) {
    let state = server.state();
    println!();
    println!("=== Server ===");
    println!("globalTime: {:.3}  colorShift: {:.4}  advances: {}", state.global_time, state.color_shift, server.advances());
    println!("Seed points: {}  evolve speed: {}", server.options().seed_points.len(), server.options().evolve_speed);

    println!();
    println!("=== Clients ===");
    for summary in summaries {
        let session = &summary.session;
        let sync = session.sync();
        let mode = match sync.mode() {
            SyncMode::Synced => "synced",
            SyncMode::Autonomous => "autonomous",
        };
        let (time_velocity, _) = sync.velocities();
        let controller = session.controller();
        println!(
            "Client {}: {} frames, globalTime {:.3} ({}, {:.3}/s, drift {:+.3})",
            summary.id,
            session.frames(),
            sync.global_time(),
            mode,
            time_velocity,
            sync.drift().unwrap_or(0.0)
        );
        println!(
            "  detail {:.3} (target {:.3}{}), {} triangles, budget {:.0}",
            controller.adaptive_detail(),
            controller.target_detail(),
            if controller.optimal_found() { ", optimal" } else { "" },
            summary.last_triangles,
            controller.triangle_target()
        );
        if let Some(report) = session.last_report() {
            println!("  last sample: {:.1} FPS, {:?}", report.avg_fps, report.regime);
        }
        let stats = session.field().stats();
        println!(
            "  field: {} seed points, heights {:.3}..{:.3} (mean {:.3}), palette {}",
            session.field().seed_points().len(),
            stats.min,
            stats.max,
            stats.mean,
            session.palette()
        );
        println!(
            "  messages: {} delivered, {} dropped, {} undecodable",
            summary.delivered, summary.dropped, summary.undecodable
        );
    }
}
