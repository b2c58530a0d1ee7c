pub mod report;

use shmpipe_core::{ChannelConfig, MessageHeader, Timeouts};
use std::sync::atomic::{AtomicUsize, Ordering};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ─── Benchmark Header ───────────────────────────────────────────────────────

/// Header used by the benchmark runner and the criterion benches.
///
/// `ticks` is the sender's monotonic clock at send time, so the receiver
/// can compute one-way latency on the same host.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, AsBytes, FromZeroes, FromBytes)]
pub struct BenchHeader {
    pub payload_size: i32,
    pub pipe_id: i32,
    pub message_id: i32,
    pub skip: u8,
    pub _pad: [u8; 3],
    pub ticks: i64,
}

impl MessageHeader for BenchHeader {
    #[inline]
    fn payload_size(&self) -> i32 {
        self.payload_size
    }

    #[inline]
    fn is_skip(&self) -> bool {
        self.skip != 0
    }

    fn skip_marker() -> Self {
        Self {
            skip: 1,
            ..Self::default()
        }
    }
}

impl BenchHeader {
    pub fn new(pipe_id: i32, message_id: i32, payload_size: i32) -> Self {
        Self {
            payload_size,
            pipe_id,
            message_id,
            ticks: mono_now_ns() as i64,
            ..Self::default()
        }
    }

    /// Values for the first and last payload byte. They change with every
    /// message, so a receiver reading at the wrong boundary notices.
    pub fn check_values(&self) -> (u8, u8) {
        let ids = (self.pipe_id + 1) ^ (self.message_id + 1);
        (ids as u8, (self.payload_size ^ ids) as u8)
    }

    /// Stamp the check values into `payload`. No-op for an empty payload.
    pub fn stamp(&self, payload: &mut [u8]) {
        let (first, last) = self.check_values();
        if let Some(b) = payload.first_mut() {
            *b = first;
        }
        if let Some(b) = payload.last_mut() {
            *b = last;
        }
    }

    pub fn verify(&self, payload: &[u8]) -> bool {
        match (payload.first(), payload.last()) {
            (Some(&first), Some(&last)) => {
                let (want_first, want_last) = self.check_values();
                if payload.len() == 1 {
                    first == want_last
                } else {
                    (first, last) == (want_first, want_last)
                }
            }
            _ => true,
        }
    }
}

pub fn make_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

// ─── Statistics ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub p999: u64,
    pub count: usize,
}

/// Summarize latency samples; `None` when there are none.
pub fn compute_stats(samples: &mut [u64]) -> Option<Stats> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_unstable();

    let count = samples.len();
    let sum: u128 = samples.iter().map(|&x| x as u128).sum();

    Some(Stats {
        min: samples[0],
        max: samples[count - 1],
        mean: sum as f64 / count as f64,
        p50: percentile_sorted(samples, 50.0),
        p90: percentile_sorted(samples, 90.0),
        p99: percentile_sorted(samples, 99.0),
        p999: percentile_sorted(samples, 99.9),
        count,
    })
}

/// Nearest-rank percentile.
fn percentile_sorted(sorted: &[u64], pct: f64) -> u64 {
    let rank = (pct / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

// ─── Clock ──────────────────────────────────────────────────────────────────

/// System-wide monotonic clock, comparable across processes on one host.
#[inline(always)]
pub fn mono_now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
}

// ─── Resource Usage ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ResourceSnapshot {
    pub vol_ctx_switches: i64,
    pub invol_ctx_switches: i64,
    pub user_time_us: i64,
    pub sys_time_us: i64,
}

impl ResourceSnapshot {
    pub fn capture() -> Self {
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
        Self {
            vol_ctx_switches: usage.ru_nvcsw as i64,
            invol_ctx_switches: usage.ru_nivcsw as i64,
            user_time_us: usage.ru_utime.tv_sec as i64 * 1_000_000 + usage.ru_utime.tv_usec as i64,
            sys_time_us: usage.ru_stime.tv_sec as i64 * 1_000_000 + usage.ru_stime.tv_usec as i64,
        }
    }

    pub fn since(&self, start: &Self) -> Self {
        Self {
            vol_ctx_switches: self.vol_ctx_switches - start.vol_ctx_switches,
            invol_ctx_switches: self.invol_ctx_switches - start.invol_ctx_switches,
            user_time_us: self.user_time_us - start.user_time_us,
            sys_time_us: self.sys_time_us - start.sys_time_us,
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Channel config for in-process benches, unique per call.
pub fn bench_channel(label: &str, chunk_size: u32, number_of_chunks: u32) -> ChannelConfig {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    ChannelConfig::new(format!("shmpipe-bench-{label}-{pid}-{n}"), chunk_size, number_of_chunks)
        .with_timeouts(Timeouts {
            send_timeout_ms: 5_000,
            ..Timeouts::default()
        })
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

pub fn format_count(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        format!("{n}")
    }
}
