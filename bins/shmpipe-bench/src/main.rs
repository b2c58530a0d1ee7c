//! Throughput benchmark across real processes.
//!
//! The parent creates one sink per pipe (`benchmark-pipe-{id}`), re-runs its
//! own executable once per pipe as a child, opens the gates and measures
//! until every message has been handled. Each child opens its pipe's source
//! and sends its share of the messages.
//!
//! ```bash
//! cargo run --release -p shmpipe-bench -- --config=bins/shmpipe-bench/bench.toml
//! ```

use anyhow::{Context, Result, bail};
use shmpipe_config::BenchConfig;
use shmpipe_core::{ChannelConfig, HeaderCodec, RingGeometry, Sink, Source, TransportError};
use shmpipe_perf::report::RunReport;
use shmpipe_perf::{BenchHeader, ResourceSnapshot, compute_stats, make_payload, mono_now_ns};
use std::env;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const ENV_ROLE: &str = "SHMPIPE_BENCH_ROLE";
const ENV_PIPE_ID: &str = "SHMPIPE_BENCH_PIPE_ID";
const ROLE_CHILD: &str = "child";

struct Args {
    config: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut config = None;
    for arg in env::args().skip(1) {
        if let Some(path) = arg.strip_prefix("--config=") {
            config = Some(path.to_string());
        } else {
            bail!("unknown argument '{arg}' (usage: shmpipe-bench [--config=PATH])");
        }
    }
    Ok(Args { config })
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let config = match args.config {
        Some(path) => BenchConfig::load(path)?,
        None => BenchConfig::default(),
    };
    init_tracing(&config.log_level);

    match env::var(ENV_ROLE).as_deref() {
        Ok(ROLE_CHILD) => {
            let pipe_id: u32 = env::var(ENV_PIPE_ID)
                .context("child started without a pipe id")?
                .parse()
                .context("invalid pipe id")?;
            run_child(&config, pipe_id)
        }
        _ => run_parent(&config),
    }
}

fn pipe_config(config: &BenchConfig, pipe_id: u32) -> ChannelConfig {
    ChannelConfig::new(
        format!("benchmark-pipe-{pipe_id}"),
        config.chunk_size,
        config.chunks_per_pipe(),
    )
    .with_shm_dir(&config.shm_dir)
}

/// Payload bytes per message, after checking that a message fits a pipe.
fn payload_len(config: &BenchConfig) -> Result<usize> {
    let header_size = HeaderCodec::<BenchHeader>::SIZE;
    let Some(payload_len) = (config.message_size as usize).checked_sub(header_size) else {
        bail!(
            "message_size {} is smaller than the {header_size}-byte header",
            config.message_size
        );
    };
    if config.pipes_count == 0 || config.messages_per_pipe() == 0 {
        bail!("need at least one pipe and one message per pipe");
    }
    if config.chunks_per_pipe() == 0 || (config.chunk_size as usize) < header_size {
        bail!(
            "{} chunks of {} bytes cannot be split across {} pipes",
            config.number_of_chunks,
            config.chunk_size,
            config.pipes_count
        );
    }

    let geometry = RingGeometry::new(
        config.chunk_size as usize,
        config.chunks_per_pipe() as usize,
        header_size,
    );
    match geometry.chunks_needed_for(payload_len as i32) {
        Some(n) if n <= geometry.number_of_chunks() => Ok(payload_len),
        _ => bail!(
            "a {}-byte message does not fit {} chunks of {} bytes",
            config.message_size,
            geometry.number_of_chunks(),
            geometry.chunk_size()
        ),
    }
}

// ─── Parent ─────────────────────────────────────────────────────────────────

/// Kills the child on drop unless it has already exited.
struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

struct Progress {
    first_ns: AtomicU64,
    check_failures: AtomicU64,
}

/// Sent by a pipe's handler once its last message is in.
struct PipeDone {
    latencies_ns: Vec<u64>,
    finished_ns: u64,
}

fn create_sink(
    config: &BenchConfig,
    pipe_id: u32,
    progress: &Arc<Progress>,
    done: mpsc::Sender<PipeDone>,
) -> Result<Sink<BenchHeader>> {
    let expected = config.messages_per_pipe();
    let progress = Arc::clone(progress);
    let mut latencies_ns = Vec::with_capacity(expected as usize);
    let mut buf = Vec::new();
    let mut handled = 0u32;

    let sink = Sink::create(&pipe_config(config, pipe_id), move |header: &BenchHeader, payload, _, _| {
        let now = mono_now_ns();
        let _ = progress
            .first_ns
            .compare_exchange(0, now, Ordering::AcqRel, Ordering::Relaxed);

        buf.resize(payload.len(), 0);
        payload.read_exact(&mut buf)?;
        latencies_ns.push(now.saturating_sub(header.ticks as u64));
        handled += 1;

        if handled == expected {
            let _ = done.send(PipeDone {
                latencies_ns: std::mem::take(&mut latencies_ns),
                finished_ns: mono_now_ns(),
            });
        }
        if !header.verify(&buf) {
            progress.check_failures.fetch_add(1, Ordering::Relaxed);
            return Err(format!(
                "check values don't match for pipe {} message {}",
                header.pipe_id, header.message_id
            )
            .into());
        }
        Ok(())
    })
    .with_context(|| format!("failed to create sink for pipe {pipe_id}"))?;
    Ok(sink)
}

fn spawn_child(pipe_id: u32) -> Result<ChildGuard> {
    let exe = env::current_exe().context("failed to locate own executable")?;
    let child = Command::new(exe)
        .args(env::args().skip(1))
        .env(ENV_ROLE, ROLE_CHILD)
        .env(ENV_PIPE_ID, pipe_id.to_string())
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("failed to spawn child for pipe {pipe_id}"))?;
    Ok(ChildGuard(child))
}

fn run_parent(config: &BenchConfig) -> Result<()> {
    payload_len(config)?;
    let rusage_start = ResourceSnapshot::capture();
    let progress = Arc::new(Progress {
        first_ns: AtomicU64::new(0),
        check_failures: AtomicU64::new(0),
    });

    info!(
        pipes = config.pipes_count,
        messages = config.messages,
        message_size = config.message_size,
        chunk_size = config.chunk_size,
        number_of_chunks = config.number_of_chunks,
        "starting benchmark"
    );

    let (done_tx, done_rx) = mpsc::channel();
    let sinks = (0..config.pipes_count)
        .map(|id| create_sink(config, id, &progress, done_tx.clone()))
        .collect::<Result<Vec<_>>>()?;
    let children = (0..config.pipes_count)
        .map(spawn_child)
        .collect::<Result<Vec<_>>>()?;
    for sink in &sinks {
        sink.open_gate()?;
    }

    let timeout = Duration::from_secs(config.run_timeout_secs);
    let deadline = Instant::now() + timeout;
    let mut latencies_ns = Vec::new();
    let mut finished_ns = 0;
    for _ in 0..config.pipes_count {
        match done_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(done) => {
                latencies_ns.extend(done.latencies_ns);
                finished_ns = finished_ns.max(done.finished_ns);
            }
            Err(_) => {
                warn!(?timeout, "benchmark timed out");
                println!("Timed out after {timeout:?}");
                return Ok(());
            }
        }
    }

    let elapsed = Duration::from_nanos(finished_ns.saturating_sub(progress.first_ns.load(Ordering::Acquire)));
    let messages = latencies_ns.len() as u64;
    let mut report = RunReport::new(
        config.pipes_count,
        messages,
        config.message_size,
        config.chunk_size,
        config.number_of_chunks,
        elapsed,
    );
    report.check_failures = progress.check_failures.load(Ordering::Relaxed);
    report.latency = compute_stats(&mut latencies_ns);
    report.resources = ResourceSnapshot::capture().since(&rusage_start);
    report.print();

    if let Some(path) = &config.report_path {
        report
            .save_json(path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "report saved");
    }

    drop(children);
    for sink in &sinks {
        sink.dispose();
    }
    Ok(())
}

// ─── Child ──────────────────────────────────────────────────────────────────

fn run_child(config: &BenchConfig, pipe_id: u32) -> Result<()> {
    let payload_size = payload_len(config)?;
    let messages = config.messages_per_pipe();
    let source = Source::<BenchHeader>::open(&pipe_config(config, pipe_id))
        .with_context(|| format!("pipe {pipe_id}: failed to open source"))?;
    debug!(pipe_id, messages, payload_size, "child sending");

    let deadline = Instant::now() + Duration::from_secs(config.run_timeout_secs);
    let mut payload = make_payload(payload_size);
    for message_id in 1..=messages {
        let header = BenchHeader::new(pipe_id as i32, message_id as i32, payload_size as i32);
        header.stamp(&mut payload);
        loop {
            match source.send(&header, |w| w.write_all(&payload)) {
                Ok(()) => break,
                Err(TransportError::RemoteUnresponsive { .. }) if Instant::now() < deadline => {
                    debug!(pipe_id, message_id, "parent not reading yet, retrying");
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("pipe {pipe_id}: send of message {message_id} failed"));
                }
            }
        }
    }

    info!(pipe_id, messages, "child done");
    source.dispose();
    Ok(())
}
