//! Generation-counter wait/wake protocol for blocked allocators.
//!
//! `core`/`no_std` has no condition variable, so the default backend here
//! is a spinning busy-wait gated by a generation counter: a waiter reads
//! the generation before giving up on its first probe, spins until either
//! the generation advances or its own re-probe of the zones succeeds.
//! This is correct but wasteful off of bare metal, so hosts that link
//! `std` (tests, userspace harnesses) can opt into [`StdCondvarBackend`]
//! via the `std-wait` feature for real thread parking.

use core::sync::atomic::{AtomicU64, Ordering};

use super::collaborators::WaitBackend;

/// Default backend: spins, yielding the core, until `wake_all` bumps the
/// generation past the value observed at wait-start.
pub struct SpinWaitBackend {
    generation: AtomicU64,
}

impl SpinWaitBackend {
    pub const fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
        }
    }
}

impl Default for SpinWaitBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitBackend for SpinWaitBackend {
    fn wait(&self, since: u64) {
        while self.generation.load(Ordering::Acquire) == since {
            core::hint::spin_loop();
        }
    }

    fn wake_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// `std::sync::Condvar`-backed wait queue, for host tests that exercise
/// genuine cross-thread blocking (allocator thread parks, a free from
/// another thread wakes it).
#[cfg(feature = "std-wait")]
pub struct StdCondvarBackend {
    state: std::sync::Mutex<u64>,
    condvar: std::sync::Condvar,
}

#[cfg(feature = "std-wait")]
impl StdCondvarBackend {
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(0),
            condvar: std::sync::Condvar::new(),
        }
    }
}

#[cfg(feature = "std-wait")]
impl Default for StdCondvarBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std-wait")]
impl super::collaborators::WaitBackend for StdCondvarBackend {
    fn wait(&self, since: u64) {
        let guard = self.state.lock().unwrap();
        let _unused = self
            .condvar
            .wait_while(guard, |gen| *gen == since)
            .unwrap();
    }

    fn wake_all(&self) {
        let mut guard = self.state.lock().unwrap();
        *guard += 1;
        self.condvar.notify_all();
    }

    fn generation(&self) -> u64 {
        *self.state.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_all_advances_generation() {
        let backend = SpinWaitBackend::new();
        let g0 = backend.generation();
        backend.wake_all();
        assert!(backend.generation() > g0);
    }

    #[test]
    fn wait_returns_immediately_once_woken() {
        let backend = SpinWaitBackend::new();
        let g0 = backend.generation();
        backend.wake_all();
        // Already advanced past g0, so this must not spin forever.
        backend.wait(g0);
    }

    #[cfg(feature = "std-wait")]
    #[test]
    fn std_condvar_backend_wakes_parked_thread() {
        use std::sync::Arc;
        let backend = Arc::new(StdCondvarBackend::new());
        let g0 = backend.generation();
        let waiter = {
            let backend = backend.clone();
            std::thread::spawn(move || {
                backend.wait(g0);
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        backend.wake_all();
        waiter.join().unwrap();
    }
}
