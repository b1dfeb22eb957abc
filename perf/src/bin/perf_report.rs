use mimoring_buffer::{Buffer, with_perf_recorder};
use mimoring_perf::*;
use mimoring_perf_recorder::PerfStage;

const SLOT_COUNT: usize = 4096;
const BATCHES: usize = 50;
const BATCH_SIZE: usize = 2000;
const WARMUP_BATCHES: usize = 5;

fn main() {
    let rusage_start = capture_rusage();
    let cache = get_cache_info();

    print_banner(&cache);
    section_memory_layout();

    let mut results = Vec::new();
    section_header("Write / Read / Observe Throughput");
    print_table_header();

    let path = temp_shm_path("report");
    let buf = Buffer::create(&path, bench_buffer_config(SLOT_COUNT, true)).expect("create buffer");

    let write_result = measure_batched(
        "get_write_token+release",
        BATCHES,
        BATCH_SIZE,
        WARMUP_BATCHES,
        || {
            let mut session = buf.get_write_token().expect("write token");
            session.data_mut().set::<f32>(0, "value", 1.0);
        },
    );
    print_result_row(&write_result);
    results.push(write_result);

    // Refill so the read benchmark has tokens to drain.
    for i in 0..(BATCHES * BATCH_SIZE) {
        let mut session = buf.get_write_token().expect("write token");
        session.data_mut().set::<f32>(0, "value", i as f32);
    }
    let read_result = measure_batched(
        "get_read_token (warm)",
        BATCHES,
        BATCH_SIZE,
        0,
        || {
            let _ = buf.get_read_token();
        },
    );
    print_result_row(&read_result);
    results.push(read_result);

    for i in 0..(BATCHES * BATCH_SIZE) {
        let mut session = buf.get_write_token().expect("write token");
        session.data_mut().set::<f32>(0, "value", i as f32);
    }
    let observe_result = measure_batched(
        "get_observe_token",
        BATCHES,
        BATCH_SIZE,
        WARMUP_BATCHES,
        || {
            let _ = buf.get_observe_token();
        },
    );
    print_result_row(&observe_result);
    results.push(observe_result);

    let round_trip_result = measure_batched(
        "round_trip (write+read)",
        BATCHES,
        BATCH_SIZE,
        WARMUP_BATCHES,
        || {
            let mut w = buf.get_write_token().expect("write token");
            w.data_mut().set::<f32>(0, "value", 1.0);
            drop(w);
            let _ = buf.get_read_token();
        },
    );
    print_result_row(&round_trip_result);
    results.push(round_trip_result);

    let stats = buf.get_stats();
    drop(buf);
    let _ = Buffer::teardown(&path);

    section_header("Buffer Statistics (final)");
    println!(
        "  events={}  overwrites={}  empty_len={}  filled_len={}",
        format_count(stats.event_count),
        format_count(stats.overwrite_count),
        stats.empty_queue_len,
        stats.filled_queue_len,
    );

    let rusage_end = capture_rusage();
    section_resources(&rusage_start, &rusage_end);
    section_stage_timings();
    save_results(&results, &cache);
}

fn section_stage_timings() {
    section_header("Recorded Stage Timings (this thread, nanoseconds)");
    let stages = [
        ("acquire_write", PerfStage::AcquireWrite),
        ("release_write", PerfStage::ReleaseWrite),
        ("acquire_read", PerfStage::AcquireRead),
        ("release_read", PerfStage::ReleaseRead),
        ("acquire_observe", PerfStage::AcquireObserve),
        ("release_observe", PerfStage::ReleaseObserve),
    ];
    with_perf_recorder(|recorder| {
        for (name, stage) in stages {
            let mut samples = recorder.samples(stage).to_vec();
            if samples.is_empty() {
                println!("  {name:<20} (no samples — build with --features record)");
                continue;
            }
            let stats = compute_stats(&mut samples);
            println!(
                "  {name:<20} min={} p50={} p99={} max={} n={}",
                stats.min, stats.p50, stats.p99, stats.max, stats.count,
            );
        }
    });
}

fn print_banner(cache: &CacheInfo) {
    println!("{}", "═".repeat(90));
    println!("  mimoring performance report");
    println!("{}", "═".repeat(90));
    println!(
        "  cpu: {}  ({} cores)",
        cache.cpu_brand, cache.ncpu
    );
    println!(
        "  l1d: {}  l1i: {}  l2: {}  line: {}B  ram: {}",
        format_bytes(cache.l1d_bytes),
        format_bytes(cache.l1i_bytes),
        format_bytes(cache.l2_bytes),
        cache.line_size,
        format_bytes(cache.ram_bytes),
    );
}

fn section_memory_layout() {
    section_header("Slot Layout");
    let metadata_size = std::mem::size_of::<mimoring_dtype::Metadata>();
    println!("  metadata record: {metadata_size} bytes");
    println!(
        "  slot_count={SLOT_COUNT} used by this report's throughput benchmarks"
    );
}

fn section_resources(start: &ResourceSnapshot, end: &ResourceSnapshot) {
    section_header("Resource Usage (process-wide, start → end)");
    println!(
        "  max_rss: {} → {}",
        format_bytes(start.max_rss_bytes.max(0) as u64),
        format_bytes(end.max_rss_bytes.max(0) as u64),
    );
    println!(
        "  minor_faults: {} → {}   major_faults: {} → {}",
        start.minor_faults, end.minor_faults, start.major_faults, end.major_faults,
    );
    println!(
        "  ctx_switches (vol/invol): {}/{} → {}/{}",
        start.vol_ctx_switches,
        start.invol_ctx_switches,
        end.vol_ctx_switches,
        end.invol_ctx_switches,
    );
}

fn save_results(results: &[BenchResult], cache: &CacheInfo) {
    let out = serde_json::json!({
        "cache": cache,
        "results": results,
    });
    let path = "/tmp/mimoring_perf_report.json";
    if let Ok(text) = serde_json::to_string_pretty(&out) {
        let _ = std::fs::write(path, text);
        println!("\n  wrote {path}");
    }
}
