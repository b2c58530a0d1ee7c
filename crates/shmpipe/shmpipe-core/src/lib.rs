//! Same-host message transport over a shared-memory ring.
//!
//! A channel is one shared region split into equal chunks plus two named
//! counting semaphores. The [`Sink`] creates and owns all three; a
//! [`Source`] in another process opens them by name and writes messages
//! (a fixed-size header followed by the payload) into runs of whole chunks.
//! [`DuplexChannel`] pairs one of each for two-way traffic.

mod base;
mod duplex;
mod error;
mod io;
pub mod naming;
mod ring;
mod sink;
mod source;

#[cfg(test)]
mod test_support;

pub use duplex::DuplexChannel;
pub use error::TransportError;
pub use io::{PayloadReader, PayloadWriter};
pub use ring::RingGeometry;
pub use sink::{HandlerResult, Sink};
pub use source::Source;

pub use shmpipe_codec::{BasicHeader, HeaderCodec, MessageHeader};
pub use shmpipe_config::{ChannelConfig, ConfigError, Timeouts};
pub use shmpipe_mmap::SharedRegion;
pub use shmpipe_sem::{LocalSemaphore, NamedSemaphore, PosixSemaphore};
