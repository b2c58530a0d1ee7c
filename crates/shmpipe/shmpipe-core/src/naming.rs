//! Names of the OS objects that make up a channel.
//!
//! Both processes derive every name from the channel's base name, so the
//! base name (plus the chunk geometry) is all they need to agree on.

use std::path::{Path, PathBuf};

pub fn chunk_ready_semaphore_name(prefix: &str) -> String {
    format!("{prefix}/sm-ch")
}

pub fn data_ready_semaphore_name(prefix: &str) -> String {
    format!("{prefix}/sm-req")
}

pub fn peer_address(global_peer_id: u16) -> String {
    format!("peer-{global_peer_id}")
}

pub fn pipe_name(prefix: &str, from_peer: &str, to_peer: &str) -> String {
    format!("{prefix}/pipe-from-{from_peer}-to-{to_peer}")
}

/// File backing the region named `name` inside `shm_dir`. Path separators
/// in the name are flattened so every region is a direct child of `shm_dir`.
pub fn region_path(shm_dir: &Path, name: &str) -> PathBuf {
    let flat: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '.' } else { c })
        .collect();
    shm_dir.join(format!("shmpipe.{flat}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semaphore_names_derive_from_prefix() {
        assert_eq!(chunk_ready_semaphore_name("A2B"), "A2B/sm-ch");
        assert_eq!(data_ready_semaphore_name("A2B"), "A2B/sm-req");
    }

    #[test]
    fn pipe_names_compose_peer_addresses() {
        let from = peer_address(1);
        let to = peer_address(42);
        assert_eq!(pipe_name("bus", &from, &to), "bus/pipe-from-peer-1-to-peer-42");
    }

    #[test]
    fn region_path_is_flat() {
        let path = region_path(Path::new("/dev/shm"), "bus/pipe-from-a-to-b");
        assert_eq!(path, PathBuf::from("/dev/shm/shmpipe.bus.pipe-from-a-to-b"));
    }
}
