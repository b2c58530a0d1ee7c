use crate::{NamedSemaphore, over_capacity};
use std::ffi::CString;
use std::io;
use std::time::Duration;
use tracing::{debug, warn};

/// POSIX named semaphore (`sem_open`).
///
/// Logical names may contain `/` (e.g. `bench/sm-ch`); they are mapped to a
/// single-component OS name with a leading slash, as `sem_open` requires.
pub struct PosixSemaphore {
    name: String,
    os_name: CString,
    sem: *mut libc::sem_t,
    capacity: usize,
    owner: bool,
}

// SAFETY: POSIX semaphores are designed for concurrent use from any thread;
// the handle is only closed in `Drop`.
unsafe impl Send for PosixSemaphore {}
unsafe impl Sync for PosixSemaphore {}

/// Longest name accepted by `sem_open` on Linux (NAME_MAX minus the `sem.`
/// prefix glibc adds under /dev/shm).
const MAX_OS_NAME: usize = 251;

/// Map a logical name to the OS name: leading `/`, no other separators.
pub(crate) fn os_name(name: &str) -> io::Result<CString> {
    let mangled: String = std::iter::once('/')
        .chain(name.chars().map(|c| if c == '/' || c == '\\' { '.' } else { c }))
        .collect();

    if mangled.len() > MAX_OS_NAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("semaphore name '{name}' is longer than {MAX_OS_NAME} bytes"),
        ));
    }
    CString::new(mangled).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("semaphore name '{name}' contains a NUL byte"),
        )
    })
}

impl PosixSemaphore {
    fn open_raw(os_name: &CString, create: bool) -> io::Result<*mut libc::sem_t> {
        // SAFETY: `os_name` is a valid NUL-terminated string; the variadic
        // mode and initial value are only read when O_CREAT is set.
        let sem = unsafe {
            if create {
                libc::sem_open(
                    os_name.as_ptr(),
                    libc::O_CREAT | libc::O_EXCL,
                    0o600 as libc::c_uint,
                    0 as libc::c_uint,
                )
            } else {
                libc::sem_open(os_name.as_ptr(), 0)
            }
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(sem)
    }

    #[cfg(target_os = "linux")]
    fn timed_wait(&self, timeout: Duration) -> io::Result<bool> {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `now` is a valid out-pointer.
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let total_ns = now.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
        let deadline = libc::timespec {
            tv_sec: now.tv_sec
                + timeout.as_secs() as libc::time_t
                + (total_ns / 1_000_000_000) as libc::time_t,
            tv_nsec: (total_ns % 1_000_000_000) as libc::c_long,
        };

        loop {
            // SAFETY: `self.sem` is open until drop; `deadline` is valid.
            if unsafe { libc::sem_timedwait(self.sem, &deadline) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => return Ok(false),
                _ => return Err(err),
            }
        }
    }

    // macOS has no sem_timedwait; poll with sem_trywait instead.
    #[cfg(not(target_os = "linux"))]
    fn timed_wait(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            // SAFETY: `self.sem` is open until drop.
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => {}
                _ => return Err(err),
            }
            if std::time::Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }
}

impl PosixSemaphore {
    /// Waiters only lower the count, so a value above capacity right after a
    /// post means permits were released twice somewhere.
    #[cfg(target_os = "linux")]
    fn check_capacity(&self) -> io::Result<()> {
        let mut value: libc::c_int = 0;
        // SAFETY: `self.sem` is open until drop; `value` is a valid out-pointer.
        if unsafe { libc::sem_getvalue(self.sem, &mut value) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let value = value.max(0) as usize;
        if value > self.capacity {
            return Err(over_capacity(&self.name, value, self.capacity));
        }
        Ok(())
    }

    // sem_getvalue is not implemented on macOS.
    #[cfg(not(target_os = "linux"))]
    fn check_capacity(&self) -> io::Result<()> {
        Ok(())
    }
}

impl NamedSemaphore for PosixSemaphore {
    fn create(name: &str, capacity: usize) -> io::Result<Self> {
        let os_name = os_name(name)?;
        let sem = match Self::open_raw(&os_name, true) {
            Ok(sem) => sem,
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                warn!(name, "replacing stale semaphore");
                // SAFETY: valid NUL-terminated name.
                unsafe { libc::sem_unlink(os_name.as_ptr()) };
                Self::open_raw(&os_name, true)?
            }
            Err(e) => return Err(e),
        };

        debug!(name, "created semaphore");
        Ok(Self {
            name: name.to_owned(),
            os_name,
            sem,
            capacity,
            owner: true,
        })
    }

    fn open(name: &str, capacity: usize) -> io::Result<Self> {
        let os_name = os_name(name)?;
        let sem = Self::open_raw(&os_name, false)?;

        debug!(name, "opened semaphore");
        Ok(Self {
            name: name.to_owned(),
            os_name,
            sem,
            capacity,
            owner: false,
        })
    }

    fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let Some(timeout) = timeout else {
            loop {
                // SAFETY: `self.sem` is open until drop.
                if unsafe { libc::sem_wait(self.sem) } == 0 {
                    return Ok(true);
                }
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EINTR) {
                    return Err(err);
                }
            }
        };
        self.timed_wait(timeout)
    }

    fn release(&self, count: usize) -> io::Result<()> {
        if count > self.capacity {
            return Err(over_capacity(&self.name, count, self.capacity));
        }
        for _ in 0..count {
            // SAFETY: `self.sem` is open until drop.
            if unsafe { libc::sem_post(self.sem) } != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        self.check_capacity()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for PosixSemaphore {
    fn drop(&mut self) {
        // SAFETY: the handle came from a successful sem_open and is closed once.
        unsafe { libc::sem_close(self.sem) };
        if self.owner {
            // SAFETY: valid NUL-terminated name.
            unsafe { libc::sem_unlink(self.os_name.as_ptr()) };
            debug!(name = %self.name, "removed semaphore");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unique_name(tag: &str) -> String {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("shmpipe-sem-test/{tag}-{}-{n}", std::process::id())
    }

    #[test]
    fn os_name_is_single_component() {
        let name = os_name("bench/pipe-from-a-to-b/sm-ch").unwrap();
        assert_eq!(name.to_str().unwrap(), "/bench.pipe-from-a-to-b.sm-ch");
        assert!(os_name("bad\0name").is_err());
        assert!(os_name(&"x".repeat(300)).is_err());
    }

    #[test]
    fn open_before_create_is_not_found() {
        let err = PosixSemaphore::open(&unique_name("missing"), 4).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn release_then_wait_across_handles() {
        let name = unique_name("pair");
        let owner = PosixSemaphore::create(&name, 4).unwrap();
        let peer = PosixSemaphore::open(&name, 4).unwrap();

        assert!(!owner.wait(Some(Duration::from_millis(10))).unwrap());
        peer.release(2).unwrap();
        assert!(owner.wait(Some(Duration::from_millis(10))).unwrap());
        assert!(owner.wait(None).unwrap());
        assert!(!owner.wait(Some(Duration::from_millis(10))).unwrap());
    }

    #[test]
    fn owner_drop_unlinks_name() {
        let name = unique_name("unlink");
        drop(PosixSemaphore::create(&name, 1).unwrap());
        assert!(PosixSemaphore::open(&name, 1).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn release_past_capacity_is_reported() {
        let name = unique_name("capacity");
        let owner = PosixSemaphore::create(&name, 2).unwrap();
        let peer = PosixSemaphore::open(&name, 2).unwrap();

        peer.release(2).unwrap();
        let err = owner.release(1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(peer.release(3).unwrap_err().kind(), io::ErrorKind::InvalidInput);
    }
}
