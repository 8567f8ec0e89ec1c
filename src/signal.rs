//! Signalable primitives: the wake/wait pair a mailbox thread sleeps on
//!
//! Author: Moroya Sakamoto

use core::hint;
use core::sync::atomic::{AtomicU32, Ordering};

/// Something another thread can wake
pub trait Signable: Sync {
    fn signal(&self);
}

/// A [`Signable`] the owning thread can block on
pub trait Waiter: Signable {
    /// Block until signaled. One `signal` releases exactly one `wait`.
    fn wait(&self);
}

impl<S: Signable + ?Sized> Signable for &S {
    fn signal(&self) {
        (**self).signal();
    }
}

impl<W: Waiter + ?Sized> Waiter for &W {
    fn wait(&self) {
        (**self).wait();
    }
}

/// Counting semaphore that busy-waits. Works without an OS.
#[derive(Debug, Default)]
pub struct SpinSemaphore {
    count: AtomicU32,
}

impl SpinSemaphore {
    /// Semaphore with no pending signal
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
        }
    }

    /// Take one count if available
    pub fn try_wait(&self) -> bool {
        let mut cur = self.count.load(Ordering::Relaxed);
        while cur > 0 {
            match self
                .count
                .compare_exchange_weak(cur, cur - 1, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
        false
    }

    /// Outstanding signals
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Signable for SpinSemaphore {
    fn signal(&self) {
        self.count.fetch_add(1, Ordering::Release);
    }
}

impl Waiter for SpinSemaphore {
    fn wait(&self) {
        while !self.try_wait() {
            hint::spin_loop();
        }
    }
}

#[cfg(any(test, feature = "std"))]
mod os {
    use std::sync::{Condvar, Mutex, PoisonError};
    use std::time::{Duration, Instant};

    use super::{Signable, Waiter};

    /// Counting semaphore that parks the thread
    #[derive(Debug, Default)]
    pub struct Semaphore {
        count: Mutex<u32>,
        cond: Condvar,
    }

    impl Semaphore {
        /// Semaphore with no pending signal
        pub const fn new() -> Self {
            Self {
                count: Mutex::new(0),
                cond: Condvar::new(),
            }
        }

        /// Wait at most `timeout`; false if it elapsed without a signal
        pub fn timed_wait(&self, timeout: Duration) -> bool {
            let deadline = Instant::now() + timeout;
            let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
            while *count == 0 {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                count = self
                    .cond
                    .wait_timeout(count, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            *count -= 1;
            true
        }
    }

    impl Signable for Semaphore {
        fn signal(&self) {
            let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
            *count += 1;
            // Notify under the lock: a woken waiter may free this semaphore
            // as soon as it can reacquire the mutex.
            self.cond.notify_one();
        }
    }

    impl Waiter for Semaphore {
        fn wait(&self) {
            let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
            while *count == 0 {
                count = self
                    .cond
                    .wait(count)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            *count -= 1;
        }
    }
}

#[cfg(any(test, feature = "std"))]
pub use os::Semaphore;

/// Waiter used when none is named: parks with `std`, spins without
#[cfg(any(test, feature = "std"))]
pub type DefaultWaiter = Semaphore;
#[cfg(not(any(test, feature = "std")))]
pub type DefaultWaiter = SpinSemaphore;
