use crate::{ResourceSnapshot, Stats, format_bytes, format_count};
use std::path::Path;
use std::time::Duration;

/// Outcome of one `shmpipe-bench` run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunReport {
    pub pipes: u32,
    pub messages: u64,
    pub message_size: u32,
    pub chunk_size: u32,
    pub number_of_chunks: u32,
    pub elapsed_secs: f64,
    pub mb_per_sec: f64,
    pub msg_per_sec: f64,
    pub time_per_message_us: f64,
    pub check_failures: u64,
    /// One-way send-to-handler latency in ns.
    pub latency: Option<Stats>,
    pub resources: ResourceSnapshot,
}

impl RunReport {
    pub fn new(
        pipes: u32,
        messages: u64,
        message_size: u32,
        chunk_size: u32,
        number_of_chunks: u32,
        elapsed: Duration,
    ) -> Self {
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let total_bytes = messages as f64 * message_size as f64;
        Self {
            pipes,
            messages,
            message_size,
            chunk_size,
            number_of_chunks,
            elapsed_secs: elapsed.as_secs_f64(),
            mb_per_sec: total_bytes / 1024.0 / 1024.0 / secs,
            msg_per_sec: messages as f64 / secs,
            time_per_message_us: secs * 1e6 / messages.max(1) as f64,
            check_failures: 0,
            latency: None,
            resources: ResourceSnapshot::default(),
        }
    }

    pub fn print(&self) {
        let bar = "\u{2550}".repeat(90);
        println!("\n{bar}");
        println!(
            "  pipes={}  messages={}  message_size={}  chunk_size={}  chunks={}",
            self.pipes,
            format_count(self.messages),
            format_bytes(self.message_size as u64),
            format_bytes(self.chunk_size as u64),
            self.number_of_chunks,
        );
        println!(
            "  {:.2} MB/s  {:.0} msg/s  {:.3} us/msg  elapsed {:.3}s  data {}",
            self.mb_per_sec,
            self.msg_per_sec,
            self.time_per_message_us,
            self.elapsed_secs,
            format_bytes(self.messages * self.message_size as u64),
        );
        if let Some(l) = &self.latency {
            println!(
                "  latency ns: p50={} p90={} p99={} p99.9={} max={}",
                l.p50, l.p90, l.p99, l.p999, l.max
            );
        }
        println!(
            "  ctx switches: {} voluntary, {} involuntary",
            self.resources.vol_ctx_switches, self.resources.invol_ctx_switches
        );
        if self.check_failures > 0 {
            println!("  CHECK FAILURES: {}", self.check_failures);
        }
        println!("{bar}\n");
    }

    pub fn save_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}
