use crate::{ConfigError, defaults};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Settings for the `shmpipe-bench` binary.
#[derive(Deserialize, Debug, Clone)]
pub struct BenchConfig {
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default = "defaults::shm_dir")]
    pub shm_dir: PathBuf,
    #[serde(default = "defaults::chunk_size")]
    pub chunk_size: u32,
    /// Total across all pipes; each pipe gets an equal share.
    #[serde(default = "defaults::number_of_chunks")]
    pub number_of_chunks: u32,
    /// Total across all pipes; each pipe gets an equal share.
    #[serde(default = "defaults::messages")]
    pub messages: u32,
    /// Header plus payload, in bytes.
    #[serde(default = "defaults::message_size")]
    pub message_size: u32,
    #[serde(default = "defaults::pipes_count")]
    pub pipes_count: u32,
    #[serde(default = "defaults::run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// Where to write the JSON report, if anywhere.
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
            shm_dir: defaults::shm_dir(),
            chunk_size: defaults::chunk_size(),
            number_of_chunks: defaults::number_of_chunks(),
            messages: defaults::messages(),
            message_size: defaults::message_size(),
            pipes_count: defaults::pipes_count(),
            run_timeout_secs: defaults::run_timeout_secs(),
            report_path: None,
        }
    }
}

impl BenchConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let bench_config: BenchConfig = toml::from_str(&toml_to_str)?;
        Ok(bench_config)
    }

    pub fn chunks_per_pipe(&self) -> u32 {
        self.number_of_chunks / self.pipes_count.max(1)
    }

    pub fn messages_per_pipe(&self) -> u32 {
        self.messages / self.pipes_count.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg: BenchConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.chunk_size, 1024);
        assert_eq!(cfg.pipes_count, 1);
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.report_path.is_none());
    }

    #[test]
    fn shares_are_split_per_pipe() {
        let cfg: BenchConfig = toml::from_str(
            r#"
            pipes_count = 4
            number_of_chunks = 1024
            messages = 1000
            "#,
        )
        .unwrap();
        assert_eq!(cfg.chunks_per_pipe(), 256);
        assert_eq!(cfg.messages_per_pipe(), 250);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = BenchConfig::load("/nonexistent/shmpipe-bench.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/shmpipe-bench.toml"));
    }
}
