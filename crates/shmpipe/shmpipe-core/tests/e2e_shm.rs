//! End-to-end two-process test over POSIX named semaphores.
//!
//! The test executable spawns itself as a child with a role variable set.
//! Parent and child each own one duplex endpoint and exchange messages in
//! both directions at the same time:
//!
//! ```text
//! [parent]  ──[sink B→A]──[spawn]──[connect]──[send N / recv N]──[wait child]
//!                                     │  ▲
//!                                A→B  ▼  │  B→A
//! [child]   ──────────────[sink A→B]──[connect]──[send N / recv N]──[exit]
//! ```
//!
//! Each side retries `connect` until the other side's sink exists, and
//! retries a send while the other side's gate is still closed.
//!
//! ```bash
//! cargo test -p shmpipe-core --test e2e_shm -- --nocapture
//! ```

#![cfg(unix)]

use shmpipe_core::{BasicHeader, ChannelConfig, DuplexChannel, PosixSemaphore, TransportError};
use std::env;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Writes to stderr with immediate flush to bypass test output capture.
macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const ENV_ROLE: &str = "SHMPIPE_E2E_ROLE";
const ENV_PREFIX: &str = "SHMPIPE_E2E_PREFIX";
const ROLE_CHILD: &str = "child";

const MESSAGES: u32 = 5_000;
const CHUNK_SIZE: u32 = 128;
const NUMBER_OF_CHUNKS: u32 = 32;

type Endpoint = DuplexChannel<BasicHeader, PosixSemaphore>;

fn channel(prefix: &str, from: &str, to: &str) -> ChannelConfig {
    ChannelConfig::new(format!("{prefix}-{from}{to}"), CHUNK_SIZE, NUMBER_OF_CHUNKS)
}

fn payload(id: u32) -> Vec<u8> {
    let len = (id as usize * 13) % 300;
    (0..len).map(|i| (id as usize + i) as u8).collect()
}

/// Run one side: `me` receives on `peer → me` and sends on `me → peer`.
fn run_endpoint(prefix: &str, me: &str, peer: &str) {
    let tag = me.to_uppercase();
    let (tx, rx) = mpsc::channel();
    let endpoint = Endpoint::new(
        channel(prefix, me, peer),
        &channel(prefix, peer, me),
        move |header: &BasicHeader, reader, _, _| {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            tx.send((header.message_id, bytes))?;
            Ok(())
        },
    )
    .expect("failed to create endpoint");

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match endpoint.connect() {
            Ok(()) => break,
            Err(TransportError::PeerNotReady { .. }) if Instant::now() < deadline => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(e) => panic!("[{tag}] connect failed: {e}"),
        }
    }
    log!("[{tag}] connected");

    let start = Instant::now();
    thread::scope(|s| {
        s.spawn(|| {
            for id in 0..MESSAGES {
                let bytes = payload(id);
                let header = BasicHeader::new(id, bytes.len() as i32);
                loop {
                    match endpoint.send(&header, |w| w.write_all(&bytes)) {
                        Ok(()) => break,
                        // Peer has not opened its gate yet.
                        Err(TransportError::RemoteUnresponsive { .. })
                            if id == 0 && Instant::now() < deadline => {}
                        Err(e) => panic!("[{tag}] send {id} failed: {e}"),
                    }
                }
            }
        });

        for expected in 0..MESSAGES {
            let (id, bytes) = rx
                .recv_timeout(Duration::from_secs(10))
                .unwrap_or_else(|_| panic!("[{tag}] message {expected} never arrived"));
            assert_eq!(id, expected, "[{tag}] out of order");
            assert_eq!(bytes, payload(id), "[{tag}] payload of message {id}");
        }
    });

    let elapsed = start.elapsed();
    log!("[{tag}] exchanged {MESSAGES} messages each way in {elapsed:?}");
    assert!(!endpoint.sink().is_in_error_state());
    endpoint.dispose();
}

#[test]
fn e2e_two_process_duplex() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let prefix = env::var(ENV_PREFIX).expect("SHMPIPE_E2E_PREFIX not set");
        match role.as_str() {
            ROLE_CHILD => run_endpoint(&prefix, "b", "a"),
            other => panic!("Unknown role: {other}"),
        }
        return;
    }

    let prefix = format!("shmpipe-e2e-{}", std::process::id());
    let exe = env::current_exe().expect("Failed to get current executable path");

    log!("[PARENT] channels {prefix}-ab / {prefix}-ba, {MESSAGES} messages each way");
    let mut child = Command::new(&exe)
        .arg("--exact")
        .arg("e2e_two_process_duplex")
        .env(ENV_ROLE, ROLE_CHILD)
        .env(ENV_PREFIX, &prefix)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("Failed to spawn child process");

    run_endpoint(&prefix, "a", "b");

    let status = child.wait().expect("Failed to wait for child");
    log!("[PARENT] child exit status: {status}");
    assert!(status.success(), "Child process failed with status: {status}");
}
