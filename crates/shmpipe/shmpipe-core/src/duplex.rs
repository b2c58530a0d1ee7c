//! Two unidirectional channels behind one endpoint.
//!
//! Each endpoint owns the sink of its inbound channel and, while connected,
//! a source on the peer's inbound channel. Both endpoints must exist before
//! either connects, since `connect` opens what the peer's sink created.
//!
//! The peer's sink keeps its read position across our disconnects, so a
//! reconnect opens the new source at the chunk the old one stopped at. An
//! endpoint whose peer has recreated its channels must be rebuilt instead.
//!
//! ```text
//!   endpoint A                         endpoint B
//!   source ── outbound (A→B) ──▶ sink
//!   sink   ◀── inbound (B→A) ── source
//! ```

use crate::error::TransportError;
use crate::io::{PayloadReader, PayloadWriter};
use crate::sink::{HandlerResult, Sink};
use crate::source::Source;
use shmpipe_codec::MessageHeader;
use shmpipe_config::ChannelConfig;
use shmpipe_mmap::SharedRegion;
use shmpipe_sem::{NamedSemaphore, PosixSemaphore};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

pub struct DuplexChannel<H: MessageHeader, S: NamedSemaphore = PosixSemaphore> {
    outbound: ChannelConfig,
    sink: Sink<H, S>,
    link: Mutex<Link<H, S>>,
}

struct Link<H, S> {
    source: Option<Arc<Source<H, S>>>,
    /// Outbound chunk the peer's sink reads next.
    resume_at: usize,
}

impl<H: MessageHeader, S: NamedSemaphore> DuplexChannel<H, S> {
    /// Create the inbound channel and start receiving on it. The gate stays
    /// closed until [`connect`](Self::connect).
    pub fn new<F>(
        outbound: ChannelConfig,
        inbound: &ChannelConfig,
        handler: F,
    ) -> Result<Self, TransportError>
    where
        F: FnMut(&H, &mut PayloadReader<'_>, usize, &SharedRegion) -> HandlerResult + Send + 'static,
    {
        let sink = Sink::create(inbound, handler)?;
        Ok(Self {
            outbound,
            sink,
            link: Mutex::new(Link {
                source: None,
                resume_at: 0,
            }),
        })
    }

    /// Open the outbound channel and start accepting inbound messages.
    pub fn connect(&self) -> Result<(), TransportError> {
        let mut link = self.lock();
        if link.source.is_some() {
            return Err(TransportError::AlreadyConnected);
        }

        let outbound = Source::open_at(&self.outbound, link.resume_at)?;
        self.sink.open_gate()?;
        link.source = Some(Arc::new(outbound));
        debug!(
            outbound = %self.outbound.name,
            inbound = %self.sink.name(),
            resume_at = link.resume_at,
            "duplex connected"
        );
        Ok(())
    }

    /// Drain the inbound channel and detach from the outbound one. No-op
    /// when not connected.
    pub fn disconnect(&self) -> Result<(), TransportError> {
        {
            let mut link = self.lock();
            let Some(source) = link.source.take() else {
                return Ok(());
            };
            // Sends still holding the source either finish first or fail
            // with AlreadyDisposed, so the cursor is final.
            if let Some(cursor) = source.detach() {
                link.resume_at = cursor;
            }
        }

        // Not under the link lock: the inbound handler may be calling `send`.
        let drained = self.sink.close_gate();
        debug!(outbound = %self.outbound.name, "duplex disconnected");
        drained
    }

    pub fn is_connected(&self) -> bool {
        self.lock().source.is_some()
    }

    pub fn send<W>(&self, header: &H, write_payload: W) -> Result<(), TransportError>
    where
        W: FnOnce(&mut PayloadWriter<'_>) -> io::Result<()>,
    {
        let source = self.lock().source.clone().ok_or(TransportError::NotConnected)?;
        source.send(header, write_payload)
    }

    /// The inbound sink, for its error state and error hook.
    pub fn sink(&self) -> &Sink<H, S> {
        &self.sink
    }

    /// Disconnect, then tear down the inbound channel. Idempotent.
    pub fn dispose(&self) {
        if let Err(e) = self.disconnect() {
            warn!(outbound = %self.outbound.name, error = %e, "disconnect during dispose failed");
        }
        self.sink.dispose();
    }

    fn lock(&self) -> MutexGuard<'_, Link<H, S>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
