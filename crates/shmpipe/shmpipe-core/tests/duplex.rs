//! Two duplex endpoints in one process, trading 1,000 messages each way
//! concurrently over in-process semaphores.

use shmpipe_core::{BasicHeader, ChannelConfig, DuplexChannel, LocalSemaphore, Timeouts};
use std::io::{Read, Write};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

type Endpoint = DuplexChannel<BasicHeader, LocalSemaphore>;

const MESSAGES: u32 = 1_000;

fn config(direction: &str) -> ChannelConfig {
    ChannelConfig::new(
        format!("shmpipe-duplex-{}-{direction}", std::process::id()),
        64,
        16,
    )
    .with_shm_dir(std::env::temp_dir())
    .with_timeouts(Timeouts {
        send_timeout_ms: 2_000,
        receive_poll_ms: 10,
        drain_timeout_ms: 2_000,
    })
}

/// Payload for message `id` sent by `from`: distinct per direction and
/// varying in length so some messages span several chunks.
fn payload(from: u8, id: u32) -> Vec<u8> {
    let len = (id as usize * 7) % 150;
    (0..len).map(|i| from ^ (id as u8).wrapping_add(i as u8)).collect()
}

fn endpoint(outbound: &ChannelConfig, inbound: &ChannelConfig) -> (Endpoint, mpsc::Receiver<(u32, Vec<u8>)>) {
    let (tx, rx) = mpsc::channel();
    let channel = Endpoint::new(outbound.clone(), inbound, move |header: &BasicHeader, reader, _, _| {
        let mut bytes = Vec::with_capacity(reader.len());
        reader.read_to_end(&mut bytes)?;
        tx.send((header.message_id, bytes))?;
        Ok(())
    })
    .unwrap();
    (channel, rx)
}

fn send_all(channel: &Endpoint, from: u8) {
    for id in 0..MESSAGES {
        let bytes = payload(from, id);
        channel
            .send(&BasicHeader::new(id, bytes.len() as i32), |w| w.write_all(&bytes))
            .unwrap();
    }
}

fn receive_all(rx: &mpsc::Receiver<(u32, Vec<u8>)>, from: u8) {
    for expected in 0..MESSAGES {
        let (id, bytes) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(id, expected);
        assert_eq!(bytes, payload(from, id), "payload of message {id}");
    }
    assert!(rx.try_recv().is_err(), "unexpected extra message");
}

#[test]
fn thousand_messages_each_way() {
    let a_to_b = config("ab");
    let b_to_a = config("ba");
    let (a, a_rx) = endpoint(&a_to_b, &b_to_a);
    let (b, b_rx) = endpoint(&b_to_a, &a_to_b);

    a.connect().unwrap();
    b.connect().unwrap();

    thread::scope(|s| {
        s.spawn(|| send_all(&a, 0xa0));
        s.spawn(|| send_all(&b, 0xb0));
        s.spawn(move || receive_all(&b_rx, 0xa0));
        s.spawn(move || receive_all(&a_rx, 0xb0));
    });

    assert!(!a.sink().is_in_error_state());
    assert!(!b.sink().is_in_error_state());

    a.disconnect().unwrap();
    b.disconnect().unwrap();
    a.dispose();
    b.dispose();
}
