//! Consumer end of a channel.
//!
//! The sink owns the channel: it creates the region and both semaphores,
//! and removes them again on disposal. A dedicated thread runs the receive
//! loop:
//!
//! ```text
//!   wait data-ready (bounded, re-check cancellation on timeout)
//!     → read header at cursor
//!     → wait the remaining n-1 data-ready permits (unbounded)
//!     → call handler unless it is a skip header
//!     → cursor += n, post n chunk-ready permits
//! ```
//!
//! Chunks are returned whatever the handler does, so a failing handler can
//! never wedge the producer. Transport faults (a header that points outside
//! the ring, a semaphore error) are different: they put the sink into its
//! error state and the loop exits.

use crate::base::RingTransportBase;
use crate::error::TransportError;
use crate::io::PayloadReader;
use shmpipe_codec::MessageHeader;
use shmpipe_config::{ChannelConfig, Timeouts};
use shmpipe_mmap::SharedRegion;
use shmpipe_sem::{NamedSemaphore, PosixSemaphore};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// What a message handler reports back. Errors are logged, never propagated.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub(crate) type BoxedHandler<H> =
    Box<dyn FnMut(&H, &mut PayloadReader<'_>, usize, &SharedRegion) -> HandlerResult + Send>;

type ErrorHook = Arc<dyn Fn(&TransportError) + Send + Sync>;

pub struct Sink<H: MessageHeader, S: NamedSemaphore = PosixSemaphore> {
    name: String,
    timeouts: Timeouts,
    shared: Arc<Shared<H, S>>,
    state: Mutex<SinkState>,
}

/// State the receive thread sees.
struct Shared<H, S> {
    /// Taken (and dropped) by `dispose` after the loop has been joined.
    base: Mutex<Option<Arc<RingTransportBase<H, S>>>>,
    cancel: AtomicBool,
    failed: AtomicBool,
    errors: Mutex<ErrorSlot>,
}

#[derive(Default)]
struct ErrorSlot {
    hook: Option<ErrorHook>,
    /// The fault that stopped the loop, for hooks registered afterwards.
    fault: Option<Arc<TransportError>>,
}

struct SinkState {
    worker: Option<JoinHandle<()>>,
    gate_open: bool,
    disposed: bool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<H: MessageHeader, S: NamedSemaphore> Sink<H, S> {
    /// Create the channel and start the receive loop.
    ///
    /// The handler runs on the loop thread with the header, a reader over
    /// the payload, the payload's byte offset in the region, and the region
    /// itself. No producer can write until [`open_gate`](Self::open_gate).
    pub fn create<F>(config: &ChannelConfig, handler: F) -> Result<Self, TransportError>
    where
        F: FnMut(&H, &mut PayloadReader<'_>, usize, &SharedRegion) -> HandlerResult + Send + 'static,
    {
        let base = Arc::new(RingTransportBase::<H, S>::create(config)?);
        let shared = Arc::new(Shared {
            base: Mutex::new(Some(Arc::clone(&base))),
            cancel: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            errors: Mutex::new(ErrorSlot::default()),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            let poll = config.timeouts.receive_poll();
            let handler: BoxedHandler<H> = Box::new(handler);
            thread::Builder::new()
                .name(format!("shmpipe-sink:{}", config.name))
                .spawn(move || receive_loop(&shared, &base, handler, poll))
                .map_err(|e| TransportError::io(format!("receive loop of '{}'", config.name), e))?
        };

        debug!(channel = %config.name, "sink listening");
        Ok(Self {
            name: config.name.clone(),
            timeouts: config.timeouts,
            shared,
            state: Mutex::new(SinkState {
                worker: Some(worker),
                gate_open: false,
                disposed: false,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the receive loop has stopped on a transport fault.
    pub fn is_in_error_state(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }

    /// Register a callback for the fault that ends the receive loop,
    /// replacing any earlier one.
    ///
    /// The hook runs on the loop thread when the fault happens, or at once
    /// on the caller's thread if the loop has already failed. Either way it
    /// is called at most once, with no sink lock held.
    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        let hook: ErrorHook = Arc::new(hook);
        let fault = {
            let mut errors = lock(&self.shared.errors);
            errors.hook = Some(Arc::clone(&hook));
            errors.fault.clone()
        };
        if let Some(fault) = fault {
            hook(fault.as_ref());
        }
    }

    /// Grant the producer the whole ring. No-op if already open.
    pub fn open_gate(&self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        let base = self.live_base(&state)?;
        if state.gate_open {
            return Ok(());
        }

        let count = base.geometry().number_of_chunks();
        base.return_chunks(count)?;
        state.gate_open = true;
        debug!(channel = %self.name, chunks = count, "gate opened");
        Ok(())
    }

    /// Take the whole ring back, blocking until every in-flight chunk has
    /// been consumed. No-op if already closed.
    pub fn close_gate(&self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        let base = self.live_base(&state)?;
        if !state.gate_open {
            return Ok(());
        }

        let count = base.geometry().number_of_chunks();
        self.reclaim(&base, count, None)?;
        state.gate_open = false;
        debug!(channel = %self.name, "gate closed");
        Ok(())
    }

    pub fn is_gate_open(&self) -> bool {
        lock(&self.state).gate_open
    }

    /// Stop the receive loop and remove the channel's OS objects.
    ///
    /// An open gate is drained first, bounded by the drain timeout, so
    /// messages already sent are handled before the region goes away. Safe
    /// to call repeatedly and after the sink has failed.
    pub fn dispose(&self) {
        let mut state = lock(&self.state);
        if state.disposed {
            return;
        }
        state.disposed = true;

        let base = lock(&self.shared.base).clone();
        if state.gate_open && !self.is_in_error_state() {
            if let Some(base) = base {
                let count = base.geometry().number_of_chunks();
                let deadline = Instant::now() + self.timeouts.drain_timeout();
                if let Err(e) = self.reclaim(&base, count, Some(deadline)) {
                    warn!(channel = %self.name, error = %e, "drain on dispose incomplete");
                }
            }
        }
        state.gate_open = false;

        self.shared.cancel.store(true, Ordering::Release);
        if let Some(worker) = state.worker.take() {
            if worker.join().is_err() {
                error!(channel = %self.name, "receive loop panicked");
            }
        }

        // The loop has exited, so this is the last reference to the base.
        lock(&self.shared.base).take();
        debug!(channel = %self.name, "sink disposed");
    }

    fn live_base(&self, state: &SinkState) -> Result<Arc<RingTransportBase<H, S>>, TransportError> {
        if state.disposed {
            return Err(TransportError::AlreadyDisposed(self.name.clone()));
        }
        if self.is_in_error_state() {
            return Err(TransportError::SinkFailed(self.name.clone()));
        }
        lock(&self.shared.base)
            .clone()
            .ok_or_else(|| TransportError::AlreadyDisposed(self.name.clone()))
    }

    /// Acquire `count` chunk-ready permits. Polls so that a receive loop
    /// failing mid-drain turns into `SinkFailed` instead of a hang.
    fn reclaim(
        &self,
        base: &RingTransportBase<H, S>,
        count: usize,
        deadline: Option<Instant>,
    ) -> Result<(), TransportError> {
        let chunk_ready = base.chunk_ready();
        let poll = self.timeouts.receive_poll();
        let mut reclaimed = 0;

        while reclaimed < count {
            if chunk_ready
                .wait(Some(poll))
                .map_err(|e| TransportError::io(chunk_ready.name(), e))?
            {
                reclaimed += 1;
                continue;
            }
            if self.is_in_error_state() {
                return Err(TransportError::SinkFailed(self.name.clone()));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(TransportError::RemoteUnresponsive {
                    semaphore: chunk_ready.name().to_owned(),
                    timeout: self.timeouts.drain_timeout(),
                });
            }
        }
        Ok(())
    }
}

impl<H: MessageHeader, S: NamedSemaphore> Drop for Sink<H, S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn receive_loop<H: MessageHeader, S: NamedSemaphore>(
    shared: &Shared<H, S>,
    base: &RingTransportBase<H, S>,
    mut handler: BoxedHandler<H>,
    poll: Duration,
) {
    let mut cursor = 0usize;

    while !shared.cancel.load(Ordering::Acquire) {
        let data_ready = base.data_ready();
        match data_ready.wait(Some(poll)) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                shared.fail(base.name(), TransportError::io(data_ready.name(), e));
                return;
            }
        }
        if shared.cancel.load(Ordering::Acquire) {
            return;
        }

        match receive_one(base, &mut handler, cursor) {
            Ok(span) => cursor = base.geometry().advance(cursor, span),
            Err(e) => {
                shared.fail(base.name(), e);
                return;
            }
        }
    }
}

/// Handle the message at `cursor` and return its chunk span. The first
/// data-ready permit has already been taken by the caller.
fn receive_one<H: MessageHeader, S: NamedSemaphore>(
    base: &RingTransportBase<H, S>,
    handler: &mut BoxedHandler<H>,
    cursor: usize,
) -> Result<usize, TransportError> {
    let geometry = base.geometry();
    let offset = geometry.offset_of(cursor);
    let header = base.read_header(offset)?;

    // Producers publish every skip as a single chunk.
    let span = if header.is_skip() {
        Some(1)
    } else {
        geometry.chunks_needed_for(header.payload_size())
    };
    let span = span
        .filter(|&span| geometry.fits_sequentially(cursor, span))
        .ok_or_else(|| {
            TransportError::corruption(
                base.name(),
                format!(
                    "header at chunk {cursor} declares {} payload bytes",
                    header.payload_size()
                ),
            )
        })?;

    // The producer posts a message's permits together, so these are
    // already on their way.
    let data_ready = base.data_ready();
    for _ in 1..span {
        data_ready
            .wait(None)
            .map_err(|e| TransportError::io(data_ready.name(), e))?;
    }

    if !header.is_skip() {
        let payload_offset = offset + geometry.header_size();
        let mut reader =
            PayloadReader::new(base.region(), payload_offset, header.payload_size() as usize);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            handler(&header, &mut reader, payload_offset, base.region())
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(channel = %base.name(), error = %e, "message handler failed"),
            Err(_) => warn!(channel = %base.name(), "message handler panicked"),
        }
    }

    base.return_chunks(span)?;
    Ok(span)
}

impl<H, S> Shared<H, S> {
    fn fail(&self, channel: &str, e: TransportError) {
        error!(channel, error = %e, "receive loop stopped");
        let fault = Arc::new(e);
        let hook = {
            let mut errors = lock(&self.errors);
            errors.fault = Some(Arc::clone(&fault));
            errors.hook.clone()
        };
        // Set after the fault is stored, so anyone who sees the error state
        // also sees the fault.
        self.failed.store(true, Ordering::Release);
        if let Some(hook) = hook {
            hook(fault.as_ref());
        }
    }
}
