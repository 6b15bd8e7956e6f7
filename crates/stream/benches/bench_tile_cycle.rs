use std::hint::black_box;
use std::time::{Duration, Instant};

use tilestream_common::{TileResolution, TileSlot};
use tilestream_mesh::{SurfaceParams, TileMeshBuilder};
use tilestream_stream::sim::{SimFrame, SimLedger};
use tilestream_stream::{RetirementPolicy, StreamConfig, connect};

fn bench_generate(res: TileResolution, iterations: usize) {
    let mut builder = TileMeshBuilder::new(res, SurfaceParams::default());
    let slots: Vec<TileSlot> = TileSlot::all().collect();

    let start = Instant::now();
    for i in 0..iterations {
        let slot = slots[i % slots.len()];
        black_box(builder.build(black_box(slot)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  generate ({}x{}, {} verts, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}",
        res.rows,
        res.cols,
        res.vertex_count()
    );
}

fn bench_cycle(policy: RetirementPolicy, iterations: usize) {
    let config = StreamConfig {
        resolution: TileResolution { rows: 32, cols: 32 },
        policy,
        ..StreamConfig::default()
    };
    let ledger = SimLedger::new();
    let mut drawer = ledger.drawer();
    let mut frame = SimFrame::default();
    let Ok((mut producer, mut consumer)) = connect(ledger.uploader(), config) else {
        println!("  cycle ({policy}): invalid config");
        return;
    };

    let start = Instant::now();
    for _ in 0..iterations {
        producer.cycle();
        frame.clear();
        let _ = black_box(consumer.advance_and_draw(&mut drawer, &mut frame));
        producer.await_swap(Duration::ZERO);
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  cycle + frame ({policy}, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_idle_frame(iterations: usize) {
    let ledger = SimLedger::new();
    let mut drawer = ledger.drawer();
    let mut frame = SimFrame::default();
    let Ok((_producer, mut consumer)) = connect(ledger.uploader(), StreamConfig::default()) else {
        return;
    };

    let start = Instant::now();
    for _ in 0..iterations {
        let _ = black_box(consumer.advance_and_draw(&mut drawer, &mut frame));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  idle frame ({iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn main() {
    println!("=== Tile Stream Benchmarks ===\n");

    println!("Tile generation:");
    bench_generate(TileResolution { rows: 32, cols: 32 }, 1000);
    bench_generate(TileResolution::default(), 100);
    bench_generate(TileResolution { rows: 256, cols: 256 }, 20);

    println!("\nProducer cycle with render frame (simulated device):");
    bench_cycle(RetirementPolicy::Eager, 10000);
    bench_cycle(RetirementPolicy::RegeneratedSlot, 10000);

    println!("\nPer-frame hook with no pending swap:");
    bench_idle_frame(100000);

    println!("\n=== Done ===");
}
