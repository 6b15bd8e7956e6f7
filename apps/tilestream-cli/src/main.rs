use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tilestream_common::{TileResolution, TileSlot};
use tilestream_mesh::{SurfaceParams, content_hash, generate_tile};
use tilestream_stream::sim::{SimFrame, SimLedger};
use tilestream_stream::{RetirementPolicy, StreamConfig, TileStream};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tilestream-cli", about = "CLI tool for tile streaming")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions
    Info,
    /// Generate one tile and print its shape and digest
    Mesh {
        /// Grid slot, 0..=8
        #[arg(short, long, default_value = "4")]
        slot: usize,
        #[arg(long, default_value = "110")]
        rows: u32,
        #[arg(long, default_value = "110")]
        cols: u32,
    },
    /// Run the threaded protocol against the simulated device and audit it
    Simulate {
        /// Frames to render
        #[arg(short, long, default_value = "2000")]
        frames: usize,
        /// Base frame time in microseconds
        #[arg(long, default_value = "500")]
        frame_us: u64,
        /// Random extra frame and device latency, up to this many microseconds
        #[arg(long, default_value = "200")]
        jitter_us: u64,
        /// RNG seed for the latency schedule
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Retirement policy: eager or regenerated-slot. Overrides the config file.
        #[arg(long)]
        policy: Option<RetirementPolicy>,
        /// JSON stream configuration. Without one, producer pacing delays are zero.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("tilestream-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("mesh: {}", tilestream_mesh::crate_info());
            println!("stream: {}", tilestream_stream::crate_info());
            let config = StreamConfig::default();
            println!(
                "defaults: {}x{} samples, {} vertices/tile, policy={}",
                config.resolution.rows,
                config.resolution.cols,
                config.vertex_count(),
                config.policy
            );
        }
        Commands::Mesh { slot, rows, cols } => mesh(slot, rows, cols)?,
        Commands::Simulate {
            frames,
            frame_us,
            jitter_us,
            seed,
            policy,
            config,
        } => {
            let mut stream_config = match config {
                Some(path) => StreamConfig::load(path)?,
                None => StreamConfig {
                    startup_delay_ms: 0,
                    cycle_delay_ms: 0,
                    ..StreamConfig::default()
                },
            };
            if let Some(policy) = policy {
                stream_config.policy = policy;
            }
            simulate(stream_config, frames, frame_us, jitter_us, seed)?;
        }
    }

    Ok(())
}

fn mesh(slot: usize, rows: u32, cols: u32) -> anyhow::Result<()> {
    let slot = TileSlot::new(slot)?;
    let resolution = TileResolution::new(rows, cols)?;
    let mut vertices = Vec::new();
    generate_tile(slot, resolution, &SurfaceParams::default(), &mut vertices);

    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for v in &vertices {
        for axis in 0..3 {
            min[axis] = min[axis].min(v.position[axis]);
            max[axis] = max[axis].max(v.position[axis]);
        }
    }
    let digest: String = content_hash(&vertices)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();

    println!("{slot} at offset {}", slot.offset());
    println!("vertices: {} ({rows}x{cols} samples)", vertices.len());
    println!("bounds: min={min:?} max={max:?}");
    println!("sha256: {digest}");
    Ok(())
}

fn simulate(
    config: StreamConfig,
    frames: usize,
    frame_us: u64,
    jitter_us: u64,
    seed: u64,
) -> anyhow::Result<()> {
    println!(
        "Simulating {frames} frames: policy={}, frame={frame_us}us, jitter<={jitter_us}us, seed={seed}",
        config.policy
    );

    let ledger = SimLedger::new();
    let mut upload_rng = StdRng::seed_from_u64(seed);
    let uploader = ledger
        .uploader()
        .with_delay(move || Duration::from_micros(upload_rng.random_range(0..=jitter_us)));
    let mut drawer = ledger.drawer();
    let mut frame_rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let mut frame = SimFrame::default();

    let started = Instant::now();
    let mut stream = TileStream::start(uploader, config)?;
    let mut frame_errors = 0usize;
    for _ in 0..frames {
        frame.clear();
        if let Err(e) = stream.advance_and_draw(&mut drawer, &mut frame) {
            frame_errors += 1;
            tracing::warn!("frame error: {e}");
        }
        let pause = frame_us + frame_rng.random_range(0..=jitter_us);
        std::thread::sleep(Duration::from_micros(pause));
    }
    let stats = stream.stats();
    let teardown = stream.shutdown(&mut drawer);
    let report = ledger.report();

    println!("elapsed: {:?}", started.elapsed());
    println!(
        "producer: cycles={}, uploads={}, released={}, handoff_misses={}, upload_timeouts={}",
        stats.producer.cycles,
        stats.producer.uploads,
        stats.producer.buffers_released,
        stats.producer.handoff_misses,
        stats.producer.upload_timeouts
    );
    println!(
        "consumer: frames={}, swaps={}, built={}, destroyed={}, draws={}, errors={frame_errors}",
        stats.consumer.frames,
        stats.consumer.swaps,
        stats.consumer.drawables_built,
        stats.consumer.drawables_destroyed,
        stats.consumer.draws
    );
    println!(
        "frame hook: avg={:?}, max={:?}",
        stats.frame_time_avg, stats.frame_time_max
    );
    println!(
        "teardown: drawables={}, buffers={}, joined={}",
        teardown.drawables_destroyed, teardown.buffers_released, teardown.producer_joined
    );
    println!(
        "ledger: allocations={}, releases={}, drawables={}/{}, uploads/slot={:?}",
        report.allocations,
        report.releases,
        report.drawables_created,
        report.drawables_destroyed,
        report.uploads
    );
    for v in &report.violations {
        println!("VIOLATION: {v}");
    }

    if !report.violations.is_empty() {
        anyhow::bail!("{} resource violations", report.violations.len());
    }
    if report.leaked_buffers() > 0 || report.leaked_drawables() > 0 {
        anyhow::bail!(
            "leaked {} buffers and {} drawables",
            report.leaked_buffers(),
            report.leaked_drawables()
        );
    }
    println!("OK: no violations, no leaks");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulate_policy_is_optional() {
        let cli = Cli::try_parse_from(["tilestream-cli", "simulate"]).unwrap();
        assert!(matches!(cli.command, Commands::Simulate { policy: None, .. }));

        let cli =
            Cli::try_parse_from(["tilestream-cli", "simulate", "--policy", "regenerated-slot"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Simulate {
                policy: Some(RetirementPolicy::RegeneratedSlot),
                ..
            }
        ));
    }
}
