use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use mimoring_buffer::Buffer;
use mimoring_perf::{bench_buffer_config, temp_shm_path};

fn bench_write_release(c: &mut Criterion) {
    let path = temp_shm_path("crit_write");
    let buf = Buffer::create(&path, bench_buffer_config(4096, true)).expect("create buffer");

    let mut group = c.benchmark_group("buffer");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_write_token", |b| {
        b.iter(|| {
            let mut session = buf.get_write_token().unwrap();
            session.data_mut().set::<f32>(0, "value", black_box(1.0));
        });
    });

    drop(group);
    drop(buf);
    let _ = Buffer::teardown(&path);
}

fn bench_read_existing(c: &mut Criterion) {
    let path = temp_shm_path("crit_read");
    let buf = Buffer::create(&path, bench_buffer_config(65536, true)).expect("create buffer");

    let mut group = c.benchmark_group("buffer");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_read_token (warm)", |b| {
        b.iter_custom(|iters| {
            for i in 0..iters {
                let mut session = buf.get_write_token().unwrap();
                session.data_mut().set::<f32>(0, "value", i as f32);
            }
            let start = std::time::Instant::now();
            for _ in 0..iters {
                black_box(buf.get_read_token());
            }
            start.elapsed()
        });
    });

    drop(group);
    drop(buf);
    let _ = Buffer::teardown(&path);
}

fn bench_observe(c: &mut Criterion) {
    let path = temp_shm_path("crit_observe");
    let buf = Buffer::create(&path, bench_buffer_config(65536, true)).expect("create buffer");
    for i in 0..65536 {
        let mut session = buf.get_write_token().unwrap();
        session.data_mut().set::<f32>(0, "value", i as f32);
    }

    let mut group = c.benchmark_group("buffer");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_observe_token", |b| {
        b.iter(|| black_box(buf.get_observe_token()));
    });

    drop(group);
    drop(buf);
    let _ = Buffer::teardown(&path);
}

fn bench_round_trip(c: &mut Criterion) {
    let path = temp_shm_path("crit_rt");
    let buf = Buffer::create(&path, bench_buffer_config(4096, true)).expect("create buffer");

    let mut group = c.benchmark_group("buffer");
    group.throughput(Throughput::Elements(1));

    group.bench_function("round_trip", |b| {
        b.iter(|| {
            let mut w = buf.get_write_token().unwrap();
            w.data_mut().set::<f32>(0, "value", black_box(1.0));
            drop(w);
            black_box(buf.get_read_token());
        });
    });

    drop(group);
    drop(buf);
    let _ = Buffer::teardown(&path);
}

fn bench_slot_count_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_capacity");
    group.throughput(Throughput::Elements(1));

    for &slots in &[64usize, 1024, 16384, 65536] {
        let path = temp_shm_path(&format!("crit_cap_{slots}"));
        let buf = Buffer::create(&path, bench_buffer_config(slots, true)).expect("create buffer");

        group.bench_function(format!("round_trip_slots_{slots}"), |b| {
            b.iter(|| {
                let mut w = buf.get_write_token().unwrap();
                w.data_mut().set::<f32>(0, "value", black_box(1.0));
                drop(w);
                black_box(buf.get_read_token());
            });
        });

        drop(buf);
        let _ = Buffer::teardown(&path);
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_write_release,
    bench_read_existing,
    bench_observe,
    bench_round_trip,
    bench_slot_count_scaling,
);
criterion_main!(benches);
