//! Wall-clock time sources.
//!
//! Sessions never read a global clock. Each one is handed a `Clock` at open,
//! and the clock's epoch is what makes timestamps from different sessions
//! comparable. Production code shares one `SystemClock` per process;
//! tests use `ManualClock` so pacing runs in virtual time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

pub trait Clock: Send + Sync {
    /// Monotonic nanoseconds.
    fn now_ns(&self) -> i64;

    /// Block the calling thread until `now_ns() >= deadline_ns`.
    fn sleep_until_ns(&self, deadline_ns: i64);

    /// Origin subtracted from every delivered timestamp.
    fn epoch_ns(&self) -> i64;
}

// ============================================================================
// System Clock
// ============================================================================

pub struct SystemClock {
    origin: Instant,
    epoch_ns: i64,
}

static SHARED_CLOCK: Lazy<Arc<SystemClock>> = Lazy::new(|| Arc::new(SystemClock::new()));

impl SystemClock {
    pub fn new() -> Self {
        // now_ns() counts from `origin`, so the epoch is zero in that timebase
        Self {
            origin: Instant::now(),
            epoch_ns: 0,
        }
    }

    /// The process-wide clock. Created on first call, then passed into sessions.
    pub fn shared() -> Arc<SystemClock> {
        SHARED_CLOCK.clone()
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ns(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    fn sleep_until_ns(&self, deadline_ns: i64) {
        let now = self.now_ns();
        if deadline_ns > now {
            std::thread::sleep(Duration::from_nanos((deadline_ns - now) as u64));
        }
    }

    fn epoch_ns(&self) -> i64 {
        self.epoch_ns
    }
}

// ============================================================================
// Manual Clock
// ============================================================================

/// Virtual clock: sleeping jumps straight to the deadline.
#[derive(Debug)]
pub struct ManualClock {
    now_ns: AtomicI64,
    epoch_ns: i64,
}

impl ManualClock {
    pub fn new(start_ns: i64) -> Self {
        Self {
            now_ns: AtomicI64::new(start_ns),
            epoch_ns: start_ns,
        }
    }

    pub fn advance(&self, delta_ns: i64) {
        self.now_ns.fetch_add(delta_ns.max(0), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> i64 {
        self.now_ns.load(Ordering::SeqCst)
    }

    fn sleep_until_ns(&self, deadline_ns: i64) {
        self.now_ns.fetch_max(deadline_ns, Ordering::SeqCst);
    }

    fn epoch_ns(&self) -> i64 {
        self.epoch_ns
    }
}
