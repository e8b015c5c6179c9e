//! Iteration Control Signal
//!
//! One [`Control`] is shared by every thread of one iteration. Flags move
//! from false to true at most once; counters only grow.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Keeps the wrapped value on its own cache line
#[derive(Debug, Default)]
#[repr(align(64))]
pub(crate) struct CachePadded<T>(pub(crate) T);

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> std::ops::DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Outcome of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Condition reached
    Reached,
    /// A participant aborted the iteration
    Aborted,
    /// Deadline passed first
    TimedOut,
}

/// Start/stop signal and rendezvous counters for one iteration
#[derive(Debug)]
pub struct Control {
    start: CachePadded<AtomicBool>,
    stop: CachePadded<AtomicBool>,
    abort: CachePadded<AtomicBool>,
    ready: CachePadded<AtomicU32>,
    done: CachePadded<AtomicU32>,
    setup: CachePadded<AtomicU32>,
    teardown: CachePadded<AtomicU32>,
    participants: u32,
}

impl Control {
    /// Control for `participants` threads
    pub fn new(participants: u32) -> Self {
        Self {
            start: CachePadded::default(),
            stop: CachePadded::default(),
            abort: CachePadded::default(),
            ready: CachePadded::default(),
            done: CachePadded::default(),
            setup: CachePadded::default(),
            teardown: CachePadded::default(),
            participants,
        }
    }

    /// Number of threads in the iteration
    pub fn participants(&self) -> u32 {
        self.participants
    }

    /// Whether the measured window is open
    #[inline]
    pub fn is_started(&self) -> bool {
        self.start.load(Ordering::Acquire)
    }

    /// Whether the measured window is closed
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Whether a participant gave up on the iteration
    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    /// Open the measured window
    pub fn start(&self) {
        self.start.store(true, Ordering::Release);
    }

    /// Close the measured window
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Abandon the iteration; releases every waiter
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    /// Signal that this thread reached the start line
    pub fn announce_ready(&self) {
        self.ready.fetch_add(1, Ordering::AcqRel);
    }

    /// Whether every participant reached the start line
    pub fn all_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) >= self.participants
    }

    /// Signal that this thread finished its measured window
    pub fn announce_done(&self) {
        self.done.fetch_add(1, Ordering::AcqRel);
    }

    /// Whether every participant finished its measured window
    pub fn all_done(&self) -> bool {
        self.done.load(Ordering::Acquire) >= self.participants
    }

    /// Block until the window opens. Returns false on abort.
    pub fn wait_started(&self) -> bool {
        spin_until(|| self.is_started() || self.is_aborted());
        !self.is_aborted()
    }

    /// Barrier after per-iteration setup. Returns false on abort.
    pub fn rendezvous_setup(&self) -> bool {
        self.rendezvous(&self.setup)
    }

    /// Barrier before per-iteration teardown. Returns false on abort.
    pub fn rendezvous_teardown(&self) -> bool {
        self.rendezvous(&self.teardown)
    }

    fn rendezvous(&self, counter: &AtomicU32) -> bool {
        counter.fetch_add(1, Ordering::AcqRel);
        spin_until(|| counter.load(Ordering::Acquire) >= self.participants || self.is_aborted());
        !self.is_aborted()
    }

    /// Scheduler side: wait until every participant is ready
    pub fn wait_ready(&self, deadline: Instant) -> WaitOutcome {
        self.wait_for(deadline, || self.all_ready())
    }

    /// Sleep until `deadline`, waking early on abort
    pub fn sleep_until(&self, deadline: Instant) -> WaitOutcome {
        loop {
            if self.is_aborted() {
                return WaitOutcome::Aborted;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::Reached;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(10)));
        }
    }

    fn wait_for(&self, deadline: Instant, mut condition: impl FnMut() -> bool) -> WaitOutcome {
        let mut spins = 0u32;
        loop {
            if condition() {
                return WaitOutcome::Reached;
            }
            if self.is_aborted() {
                return WaitOutcome::Aborted;
            }
            if Instant::now() >= deadline {
                return WaitOutcome::TimedOut;
            }
            backoff(&mut spins);
        }
    }
}

fn spin_until(mut condition: impl FnMut() -> bool) {
    let mut spins = 0u32;
    while !condition() {
        backoff(&mut spins);
    }
}

#[inline]
fn backoff(spins: &mut u32) {
    if *spins < 64 {
        std::hint::spin_loop();
    } else if *spins < 256 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_micros(50));
    }
    *spins = spins.saturating_add(1);
}
