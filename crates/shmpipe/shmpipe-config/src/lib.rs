mod bench;
mod channel;

pub use bench::BenchConfig;
pub use channel::{ChannelConfig, Timeouts};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid channel '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

mod defaults {
    use std::path::PathBuf;

    pub fn send_timeout_ms() -> u64 {
        500
    }

    pub fn receive_poll_ms() -> u64 {
        100
    }

    pub fn drain_timeout_ms() -> u64 {
        5_000
    }

    pub fn shm_dir() -> PathBuf {
        if cfg!(target_os = "linux") {
            PathBuf::from("/dev/shm")
        } else {
            std::env::temp_dir()
        }
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn chunk_size() -> u32 {
        1024
    }

    pub fn number_of_chunks() -> u32 {
        1024
    }

    pub fn messages() -> u32 {
        100_000
    }

    pub fn message_size() -> u32 {
        1024
    }

    pub fn pipes_count() -> u32 {
        1
    }

    pub fn run_timeout_secs() -> u64 {
        120
    }
}
