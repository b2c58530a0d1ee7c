use crate::{ConfigError, defaults};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Description of one unidirectional channel.
///
/// Both processes must construct it with the same `name`, `chunk_size` and
/// `number_of_chunks`; `shm_dir` must also match since the region lives
/// there as a file.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub name: String,
    pub chunk_size: u32,
    pub number_of_chunks: u32,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default = "defaults::shm_dir")]
    pub shm_dir: PathBuf,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Bound on each chunk-ready wait in `send`; expiry means the peer is
    /// unresponsive.
    #[serde(default = "defaults::send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// How often the receive loop wakes up to check for cancellation.
    #[serde(default = "defaults::receive_poll_ms")]
    pub receive_poll_ms: u64,
    /// Bound on the drain performed when an open sink is disposed.
    #[serde(default = "defaults::drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            send_timeout_ms: defaults::send_timeout_ms(),
            receive_poll_ms: defaults::receive_poll_ms(),
            drain_timeout_ms: defaults::drain_timeout_ms(),
        }
    }
}

impl Timeouts {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn receive_poll(&self) -> Duration {
        Duration::from_millis(self.receive_poll_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, chunk_size: u32, number_of_chunks: u32) -> Self {
        Self {
            name: name.into(),
            chunk_size,
            number_of_chunks,
            timeouts: Timeouts::default(),
            shm_dir: defaults::shm_dir(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_shm_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.shm_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Checks the geometry against a header of `header_size` bytes and
    /// returns the size of the shared region in bytes.
    pub fn validate(&self, header_size: usize) -> Result<usize, ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            name: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("name must not be empty".into()));
        }
        if self.number_of_chunks == 0 {
            return Err(invalid("number_of_chunks must be positive".into()));
        }
        if (self.chunk_size as usize) < header_size {
            return Err(invalid(format!(
                "message header is larger than the chunk size ({header_size} > {})",
                self.chunk_size
            )));
        }
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size must be positive".into()));
        }

        (self.chunk_size as usize)
            .checked_mul(self.number_of_chunks as usize)
            .ok_or_else(|| invalid("chunk_size * number_of_chunks overflows".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_gets_defaults() {
        let cfg: ChannelConfig = toml::from_str(
            r#"
            name = "A2B"
            chunk_size = 1024
            number_of_chunks = 64
            "#,
        )
        .unwrap();

        assert_eq!(cfg, ChannelConfig::new("A2B", 1024, 64));
        assert_eq!(cfg.timeouts.send_timeout(), Duration::from_millis(500));
        assert_eq!(cfg.timeouts.receive_poll(), Duration::from_millis(100));
    }

    #[test]
    fn partial_timeouts_keep_remaining_defaults() {
        let cfg: ChannelConfig = toml::from_str(
            r#"
            name = "B2A"
            chunk_size = 64
            number_of_chunks = 8
            shm_dir = "/tmp"

            [timeouts]
            send_timeout_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(cfg.timeouts.send_timeout_ms, 50);
        assert_eq!(cfg.timeouts.drain_timeout_ms, 5_000);
        assert_eq!(cfg.shm_dir, PathBuf::from("/tmp"));
    }

    #[test]
    fn validate_returns_region_size() {
        assert_eq!(ChannelConfig::new("ok", 16, 4).validate(12).unwrap(), 64);
    }

    #[test]
    fn header_larger_than_chunk_is_rejected() {
        let err = ChannelConfig::new("small", 8, 4).validate(12).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("12 > 8"));
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        assert!(ChannelConfig::new("", 16, 4).validate(0).is_err());
        assert!(ChannelConfig::new("zero-chunks", 16, 0).validate(0).is_err());
        assert!(ChannelConfig::new("zero-size", 0, 4).validate(0).is_err());
    }
}
