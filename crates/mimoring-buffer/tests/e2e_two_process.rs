//! End-to-end two-process integration test.
//!
//! Spawns the same test binary twice — once in a writer role, once in a
//! reader role — selected by an environment variable, so the buffer's
//! cross-process contract (shared mmap, shared token queues, flush
//! cascade) is exercised across real process boundaries rather than just
//! threads in one address space.

use std::env;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const ENV_ROLE: &str = "MIMORING_E2E_ROLE";
const ENV_PATH: &str = "MIMORING_E2E_PATH";
const ROLE_WRITER: &str = "writer";
const ROLE_READER: &str = "reader";

const EVENT_COUNT: u64 = 20_000;
const SLOT_COUNT: usize = 256;
const WRITER_BATCH_SIZE: u64 = 500;
const WRITER_BATCH_DELAY_US: u64 = 200;

fn test_path() -> String {
    let pid = std::process::id();
    format!("/tmp/mimoring_e2e_bus_{pid}")
}

fn dtype() -> mimoring_dtype::StructuredDtype {
    mimoring_dtype::StructuredDtype::new([("value", mimoring_dtype::ScalarType::F32)]).unwrap()
}

fn buffer_config() -> mimoring_buffer::BufferConfig {
    mimoring_buffer::BufferConfig {
        name: "e2e".into(),
        slot_count: SLOT_COUNT,
        data_length: 1,
        dtype: dtype(),
        overwrite: false,
    }
}

fn run_writer(path: &str) {
    use mimoring_buffer::Buffer;

    log!("[WRITER] creating buffer at {path}");
    let buffer = Buffer::create(path, buffer_config()).expect("writer: failed to create buffer");

    let start = Instant::now();
    for i in 0..EVENT_COUNT {
        let mut session = buffer
            .get_write_token()
            .expect("writer: unexpected shutdown before flush");
        session.data_mut().set::<f32>(0, "value", i as f32);
        drop(session);

        if (i + 1) % WRITER_BATCH_SIZE == 0 {
            std::thread::sleep(Duration::from_micros(WRITER_BATCH_DELAY_US));
        }
    }
    buffer.send_flush_event();

    let elapsed = start.elapsed();
    log!("[WRITER] published {EVENT_COUNT} events in {elapsed:?}");
}

fn run_reader(path: &str) {
    use mimoring_buffer::Buffer;

    log!("[READER] waiting for buffer at {path}");
    let open_deadline = Instant::now() + Duration::from_secs(5);
    let buffer = loop {
        match Buffer::open(path, buffer_config()) {
            Ok(b) => break b,
            Err(_) if Instant::now() < open_deadline => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => panic!("[READER] failed to open buffer: {e}"),
        }
    };
    log!("[READER] attached, reading...");

    let mut counters = Vec::with_capacity(EVENT_COUNT as usize);
    loop {
        match buffer.get_read_token() {
            Some(session) => counters.push(session.metadata().counter),
            None => break,
        }
    }

    log!("[READER] consumed {} records, flush_received={}", counters.len(), buffer.flush_received());

    assert_eq!(counters.len(), EVENT_COUNT as usize, "no-overwrite buffer must deliver every record");
    assert!(buffer.flush_received());
    let expected: Vec<u64> = (1..=EVENT_COUNT).collect();
    assert_eq!(counters, expected, "counters must be strictly increasing with no gaps");
}

#[test]
fn e2e_two_process_writer_reader() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let path = env::var(ENV_PATH).expect("path not set");
        match role.as_str() {
            ROLE_WRITER => run_writer(&path),
            ROLE_READER => run_reader(&path),
            other => panic!("unknown role: {other}"),
        }
        return;
    }

    let path = test_path();
    let exe = env::current_exe().expect("failed to get current executable path");

    let mut writer_proc = Command::new(&exe)
        .arg("--exact")
        .arg("e2e_two_process_writer_reader")
        .env(ENV_ROLE, ROLE_WRITER)
        .env(ENV_PATH, &path)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn writer process");

    std::thread::sleep(Duration::from_millis(5));

    let mut reader_proc = Command::new(&exe)
        .arg("--exact")
        .arg("e2e_two_process_writer_reader")
        .env(ENV_ROLE, ROLE_READER)
        .env(ENV_PATH, &path)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn reader process");

    let writer_status = writer_proc.wait().expect("failed to wait for writer");
    let reader_status = reader_proc.wait().expect("failed to wait for reader");

    let _ = std::fs::remove_file(&path);

    assert!(writer_status.success(), "writer process failed: {writer_status}");
    assert!(reader_status.success(), "reader process failed: {reader_status}");
}
