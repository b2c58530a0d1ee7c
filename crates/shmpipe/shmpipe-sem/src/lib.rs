//! Named counting semaphores.
//!
//! Flow control between the two ends of a pipe uses two counting semaphores
//! that both processes find by name. [`NamedSemaphore`] abstracts the
//! operations the transport needs so that the OS primitive
//! ([`PosixSemaphore`]) can be swapped for an in-process one
//! ([`LocalSemaphore`]) in tests that do not fork.

mod local;
mod posix;

pub use local::LocalSemaphore;
pub use posix::PosixSemaphore;

use std::io;
use std::time::Duration;

pub(crate) fn over_capacity(name: &str, count: usize, capacity: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("release on '{name}' would raise the count to {count}, past its capacity of {capacity}"),
    )
}

/// A counting semaphore addressed by a name both peers agree on.
///
/// Exactly one side creates the semaphore (the owner); the other opens it.
/// Dropping the owner's handle removes the name.
///
/// `capacity` is the most permits the protocol ever has outstanding. A
/// release that pushes the count past it fails with
/// `io::ErrorKind::InvalidInput` instead of corrupting the flow control.
pub trait NamedSemaphore: Sized + Send + Sync + 'static {
    /// Create the semaphore with a count of zero. A stale semaphore left
    /// behind under the same name is replaced.
    fn create(name: &str, capacity: usize) -> io::Result<Self>;

    /// Open a semaphore created by another party. Fails with
    /// `io::ErrorKind::NotFound` when nobody has created it yet.
    fn open(name: &str, capacity: usize) -> io::Result<Self>;

    /// Decrement the count, blocking while it is zero.
    ///
    /// Returns `Ok(false)` if `timeout` elapsed first; `None` waits forever.
    fn wait(&self, timeout: Option<Duration>) -> io::Result<bool>;

    /// Increment the count by `count`. Fails if that would exceed the
    /// capacity.
    fn release(&self, count: usize) -> io::Result<()>;

    fn name(&self) -> &str;
}
