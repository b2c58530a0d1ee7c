use shmpipe_config::{ChannelConfig, Timeouts};
use shmpipe_mmap::SharedRegion;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Channel name unique to this test process and call.
pub fn unique_name(tag: &str) -> String {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    format!("shmpipe-test-{}-{tag}-{n}", std::process::id())
}

pub fn temp_region(tag: &str, len: usize) -> SharedRegion {
    let path = std::env::temp_dir().join(unique_name(tag));
    SharedRegion::create(path, len).unwrap()
}

/// Config under the temp dir with timeouts short enough for tests that
/// expect a stalled peer.
pub fn test_config(tag: &str, chunk_size: u32, number_of_chunks: u32) -> ChannelConfig {
    ChannelConfig::new(unique_name(tag), chunk_size, number_of_chunks)
        .with_shm_dir(std::env::temp_dir())
        .with_timeouts(Timeouts {
            send_timeout_ms: 200,
            receive_poll_ms: 10,
            drain_timeout_ms: 2_000,
        })
}
