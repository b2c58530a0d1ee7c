//! Producer end of a channel.
//!
//! # Send protocol
//!
//! 1. Work out the chunk span `n` of the message.
//! 2. If `n` chunks starting at the cursor would run past the end of the
//!    ring, publish one-chunk skip headers until the cursor is back at 0.
//! 3. Take `n` chunk-ready permits, each wait bounded by the send timeout.
//! 4. Write header and payload at `cursor * chunk_size`.
//! 5. Advance the cursor and post `n` data-ready permits. This post is the
//!    only point at which the consumer can observe the message.
//!
//! A failure in step 3 or 4 hands the permits taken so far back to
//! chunk-ready, so the channel stays consistent and the caller may retry.

use crate::base::RingTransportBase;
use crate::error::TransportError;
use crate::io::PayloadWriter;
use shmpipe_codec::MessageHeader;
use shmpipe_config::ChannelConfig;
use shmpipe_sem::{NamedSemaphore, PosixSemaphore};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

pub struct Source<H, S = PosixSemaphore> {
    name: String,
    send_timeout: Duration,
    /// `send` and `dispose` both run under this lock.
    state: Mutex<SourceState<H, S>>,
}

struct SourceState<H, S> {
    /// `None` once disposed.
    base: Option<RingTransportBase<H, S>>,
    next_chunk_index: usize,
}

impl<H: MessageHeader, S: NamedSemaphore> Source<H, S> {
    /// Attach to the channel a `Sink` has created under `config.name`.
    pub fn open(config: &ChannelConfig) -> Result<Self, TransportError> {
        Self::open_at(config, 0)
    }

    /// Attach with the cursor at `next_chunk_index`: where an earlier source
    /// on the same sink left off, see [`detach`](Self::detach).
    pub(crate) fn open_at(
        config: &ChannelConfig,
        next_chunk_index: usize,
    ) -> Result<Self, TransportError> {
        let base = RingTransportBase::open(config)?;
        let next_chunk_index = next_chunk_index % base.geometry().number_of_chunks();
        Ok(Self {
            name: config.name.clone(),
            send_timeout: config.timeouts.send_timeout(),
            state: Mutex::new(SourceState {
                base: Some(base),
                next_chunk_index,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send one message.
    ///
    /// `write_payload` receives a writer over exactly
    /// `header.payload_size()` bytes of shared memory; it is not called for
    /// an empty payload. Concurrent callers are serialized.
    pub fn send<W>(&self, header: &H, write_payload: W) -> Result<(), TransportError>
    where
        W: FnOnce(&mut PayloadWriter<'_>) -> io::Result<()>,
    {
        let mut guard = self.lock();
        let state = &mut *guard;
        let base = state
            .base
            .as_ref()
            .ok_or_else(|| TransportError::AlreadyDisposed(self.name.clone()))?;

        let geometry = *base.geometry();
        let span = base.chunks_needed_for(header.payload_size())?;
        if span > geometry.number_of_chunks() {
            return Err(TransportError::OversizedMessage {
                payload_size: header.payload_size(),
                header_size: geometry.header_size(),
                chunk_size: geometry.chunk_size(),
                number_of_chunks: geometry.number_of_chunks(),
            });
        }

        if !geometry.fits_sequentially(state.next_chunk_index, span) {
            self.pad_to_start(base, &mut state.next_chunk_index)?;
        }

        self.publish(base, &mut state.next_chunk_index, header, span, write_payload)
    }

    /// Skip headers always take exactly one chunk, whatever size the marker
    /// declares; the receive loop reads them the same way.
    fn pad_to_start(
        &self,
        base: &RingTransportBase<H, S>,
        cursor: &mut usize,
    ) -> Result<(), TransportError> {
        let skip = H::skip_marker();
        debug_assert!(skip.is_skip(), "skip_marker() must set the skip flag");
        while *cursor != 0 {
            self.publish(base, cursor, &skip, 1, |_| Ok(()))?;
        }
        Ok(())
    }

    fn publish<W>(
        &self,
        base: &RingTransportBase<H, S>,
        cursor: &mut usize,
        header: &H,
        span: usize,
        write_payload: W,
    ) -> Result<(), TransportError>
    where
        W: FnOnce(&mut PayloadWriter<'_>) -> io::Result<()>,
    {
        self.acquire_chunks(base, span)?;

        if let Err(e) = Self::write_message(base, *cursor, header, write_payload) {
            // Nothing was published; the chunks go straight back.
            base.return_chunks(span)?;
            return Err(e);
        }

        *cursor = base.geometry().advance(*cursor, span);

        base.data_ready()
            .release(span)
            .map_err(|e| TransportError::io(base.data_ready().name(), e))
    }

    fn acquire_chunks(&self, base: &RingTransportBase<H, S>, span: usize) -> Result<(), TransportError> {
        let chunk_ready = base.chunk_ready();
        for acquired in 0..span {
            let outcome = match chunk_ready.wait(Some(self.send_timeout)) {
                Ok(true) => continue,
                Ok(false) => TransportError::RemoteUnresponsive {
                    semaphore: chunk_ready.name().to_owned(),
                    timeout: self.send_timeout,
                },
                Err(e) => TransportError::io(chunk_ready.name(), e),
            };
            // The peer is stalled or gone: give back what this call took.
            base.return_chunks(acquired)?;
            return Err(outcome);
        }
        Ok(())
    }

    fn write_message<W>(
        base: &RingTransportBase<H, S>,
        cursor: usize,
        header: &H,
        write_payload: W,
    ) -> Result<(), TransportError>
    where
        W: FnOnce(&mut PayloadWriter<'_>) -> io::Result<()>,
    {
        let geometry = base.geometry();
        let offset = geometry.offset_of(cursor);
        base.write_header(offset, header)?;

        if header.is_skip() {
            return Ok(());
        }
        // chunks_needed_for already rejected negative sizes.
        let payload_len = header.payload_size() as usize;
        if payload_len > 0 {
            let mut writer =
                PayloadWriter::new(base.region(), offset + geometry.header_size(), payload_len);
            write_payload(&mut writer).map_err(TransportError::PayloadWrite)?;
        }
        Ok(())
    }

    /// Detach from the channel. Safe to call more than once; later sends
    /// fail with `AlreadyDisposed`.
    pub fn dispose(&self) {
        if self.lock().base.take().is_some() {
            debug!(channel = %self.name, "source disposed");
        }
    }

    /// Dispose and return the chunk the next message would have gone to,
    /// or `None` if already disposed. The sink's loop waits at that chunk,
    /// so a source opened there later stays in step with it.
    pub(crate) fn detach(&self) -> Option<usize> {
        let mut state = self.lock();
        state.base.take()?;
        debug!(channel = %self.name, cursor = state.next_chunk_index, "source detached");
        Some(state.next_chunk_index)
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().base.is_none()
    }

    fn lock(&self) -> MutexGuard<'_, SourceState<H, S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_config;
    use shmpipe_codec::BasicHeader;
    use shmpipe_sem::LocalSemaphore;
    use std::io::Write;

    type Base = RingTransportBase<BasicHeader, LocalSemaphore>;
    type TestSource = Source<BasicHeader, LocalSemaphore>;

    #[test]
    fn send_times_out_while_gate_is_closed() {
        let cfg = test_config("src_closed", 32, 4);
        let _owner = Base::create(&cfg).unwrap();
        let source = TestSource::open(&cfg).unwrap();

        let err = source.send(&BasicHeader::new(1, 4), |w| w.write_all(b"ping")).unwrap_err();
        assert!(matches!(err, TransportError::RemoteUnresponsive { .. }), "{err:?}");
    }

    #[test]
    fn partial_acquire_is_rolled_back() {
        let cfg = test_config("src_rollback", 16, 4);
        let owner = Base::create(&cfg).unwrap();
        let source = TestSource::open(&cfg).unwrap();

        // Two permits available, message needs three chunks.
        owner.chunk_ready().release(2).unwrap();
        let err = source.send(&BasicHeader::new(1, 30), |_| Ok(())).unwrap_err();
        assert!(matches!(err, TransportError::RemoteUnresponsive { .. }));
        assert_eq!(owner.chunk_ready().count(), 2);
        assert_eq!(owner.data_ready().count(), 0);
    }

    #[test]
    fn oversized_and_negative_payloads_are_rejected() {
        let cfg = test_config("src_oversize", 16, 4);
        let _owner = Base::create(&cfg).unwrap();
        let source = TestSource::open(&cfg).unwrap();

        let err = source.send(&BasicHeader::new(1, 64), |_| Ok(())).unwrap_err();
        assert!(matches!(err, TransportError::OversizedMessage { .. }), "{err:?}");

        let err = source.send(&BasicHeader::new(1, -5), |_| Ok(())).unwrap_err();
        assert!(matches!(err, TransportError::NegativePayload(-5)));
    }

    #[test]
    fn failed_payload_writer_publishes_nothing() {
        let cfg = test_config("src_writer", 32, 4);
        let owner = Base::create(&cfg).unwrap();
        let source = TestSource::open(&cfg).unwrap();
        owner.chunk_ready().release(4).unwrap();

        let err = source
            .send(&BasicHeader::new(1, 4), |w| w.write_all(b"too long"))
            .unwrap_err();
        assert!(matches!(err, TransportError::PayloadWrite(_)), "{err:?}");
        assert_eq!(owner.chunk_ready().count(), 4);
        assert_eq!(owner.data_ready().count(), 0);

        // The cursor did not move: the next message lands in chunk 0.
        source.send(&BasicHeader::new(2, 4), |w| w.write_all(b"okay")).unwrap();
        assert_eq!(owner.read_header(0).unwrap().message_id, 2);
        assert_eq!(owner.data_ready().count(), 1);
    }

    #[test]
    fn wraparound_pads_with_skip_chunks() {
        let cfg = test_config("src_wrap", 16, 4);
        let owner = Base::create(&cfg).unwrap();
        let source = TestSource::open(&cfg).unwrap();
        owner.chunk_ready().release(4).unwrap();

        // Three single-chunk messages leave the cursor at chunk 3.
        for id in 0..3 {
            source.send(&BasicHeader::new(id, 0), |_| Ok(())).unwrap();
        }
        // Simulate the consumer returning chunks 0 and 1.
        for _ in 0..3 {
            owner.data_ready().wait(None).unwrap();
        }
        owner.chunk_ready().release(2).unwrap();

        // Two-chunk message: chunk 3 becomes a skip, message goes to 0..2.
        source.send(&BasicHeader::new(7, 16), |w| w.write_all(&[0xab; 16])).unwrap();

        assert!(owner.read_header(48).unwrap().is_skip());
        assert_eq!(owner.read_header(0).unwrap().message_id, 7);
        assert_eq!(owner.data_ready().count(), 3);
        assert_eq!(owner.chunk_ready().count(), 0);
    }

    #[test]
    fn dispose_is_idempotent_and_blocks_sends() {
        let cfg = test_config("src_dispose", 16, 4);
        let _owner = Base::create(&cfg).unwrap();
        let source = TestSource::open(&cfg).unwrap();

        source.dispose();
        source.dispose();
        assert!(source.is_disposed());
        let err = source.send(&BasicHeader::new(1, 0), |_| Ok(())).unwrap_err();
        assert!(matches!(err, TransportError::AlreadyDisposed(_)));
    }

    #[test]
    fn source_opened_at_detach_point_continues_the_ring() {
        let cfg = test_config("src_detach", 16, 4);
        let owner = Base::create(&cfg).unwrap();
        owner.chunk_ready().release(4).unwrap();

        let first = TestSource::open(&cfg).unwrap();
        first.send(&BasicHeader::new(1, 4), |w| w.write_all(b"one!")).unwrap();
        assert_eq!(first.detach(), Some(1));
        assert_eq!(first.detach(), None);
        assert!(first.is_disposed());

        let second = TestSource::open_at(&cfg, 1).unwrap();
        second.send(&BasicHeader::new(2, 4), |w| w.write_all(b"two!")).unwrap();
        assert_eq!(owner.read_header(16).unwrap().message_id, 2);
        assert_eq!(owner.data_ready().count(), 2);
    }
}
