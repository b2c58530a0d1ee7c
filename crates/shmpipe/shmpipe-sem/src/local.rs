use crate::{NamedSemaphore, over_capacity};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

/// In-process stand-in for [`PosixSemaphore`](crate::PosixSemaphore).
///
/// Names resolve through a process-wide registry, so a producer and a
/// consumer living in the same test binary find each other exactly like
/// two processes would through the OS.
pub struct LocalSemaphore {
    name: String,
    counter: Arc<Counter>,
    owner: bool,
}

struct Counter {
    count: Mutex<usize>,
    available: Condvar,
    capacity: usize,
}

fn registry() -> MutexGuard<'static, HashMap<String, Arc<Counter>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Counter>>>> = OnceLock::new();
    REGISTRY
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

impl Counter {
    fn new(capacity: usize) -> Self {
        Self {
            count: Mutex::new(0),
            available: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocalSemaphore {
    /// Current count; only meaningful in tests that have quiesced both ends.
    pub fn count(&self) -> usize {
        *self.counter.lock()
    }
}

impl NamedSemaphore for LocalSemaphore {
    fn create(name: &str, capacity: usize) -> io::Result<Self> {
        let counter = Arc::new(Counter::new(capacity));
        registry().insert(name.to_owned(), Arc::clone(&counter));
        Ok(Self {
            name: name.to_owned(),
            counter,
            owner: true,
        })
    }

    /// The capacity is the creator's; `_capacity` is not consulted.
    fn open(name: &str, _capacity: usize) -> io::Result<Self> {
        let counter = registry().get(name).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no semaphore named '{name}'"))
        })?;
        Ok(Self {
            name: name.to_owned(),
            counter,
            owner: false,
        })
    }

    fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut count = self.counter.lock();
        while *count == 0 {
            match deadline {
                None => {
                    count = self
                        .counter
                        .available
                        .wait(count)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    count = self
                        .counter
                        .available
                        .wait_timeout(count, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        *count -= 1;
        Ok(true)
    }

    fn release(&self, count: usize) -> io::Result<()> {
        let mut current = self.counter.lock();
        let raised = *current + count;
        if raised > self.counter.capacity {
            return Err(over_capacity(&self.name, raised, self.counter.capacity));
        }
        *current = raised;
        drop(current);
        self.counter.available.notify_all();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LocalSemaphore {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        let mut registry = registry();
        // Only unregister if the name still maps to our counter.
        if registry
            .get(&self.name)
            .is_some_and(|c| Arc::ptr_eq(c, &self.counter))
        {
            registry.remove(&self.name);
        }
    }
}
