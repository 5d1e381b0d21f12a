//! Cross-thread control: commands into the worker, status out of it.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{MediaError, Result};
use crate::frame_cache::CacheStats;

/// How often blocking reads look at the interrupt flags.
pub const INTERRUPT_POLL: Duration = Duration::from_millis(20);

/// Intents posted by caller threads. The worker drains them once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Play { looping: bool },
    Pause(bool),
    Stop,
    Seek(i64),
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackState {
    Idle,
    Opening,
    /// Opened, not playing
    Waiting,
    Active,
    Paused,
    Resetting,
    Stopping,
    Stopped,
    /// Worker has exited
    Killed,
}

// ============================================================================
// Interrupt
// ============================================================================

/// Flags a blocking read can poll to give up early.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    kill: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kill(&self) {
        self.kill.store(true, Ordering::SeqCst);
    }

    pub fn set_stopping(&self, stopping: bool) {
        self.stopping.store(stopping, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.kill.load(Ordering::SeqCst) || self.stopping.load(Ordering::SeqCst)
    }

    pub fn is_killed(&self) -> bool {
        self.kill.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_raised() {
            Err(MediaError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Block for `duration` like a slow read would, waking every poll
    /// interval to see whether it should give up.
    pub fn wait(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(INTERRUPT_POLL));
        }
    }
}

// ============================================================================
// Shared Status
// ============================================================================

/// What callers can observe while the worker runs.
#[derive(Debug)]
pub struct SharedStatus {
    state: Mutex<PlaybackState>,
    position_ms: AtomicI64,
    cache: Mutex<CacheStats>,
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self {
            state: Mutex::new(PlaybackState::Idle),
            position_ms: AtomicI64::new(0),
            cache: Mutex::new(CacheStats::default()),
        }
    }
}

impl SharedStatus {
    pub fn state(&self) -> PlaybackState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: PlaybackState) {
        *self.state.lock() = state;
    }

    pub fn position_ms(&self) -> i64 {
        self.position_ms.load(Ordering::Relaxed)
    }

    pub fn set_position_ms(&self, ms: i64) {
        self.position_ms.store(ms, Ordering::Relaxed);
    }

    pub fn cache(&self) -> CacheStats {
        self.cache.lock().clone()
    }

    pub fn set_cache(&self, stats: CacheStats) {
        *self.cache.lock() = stats;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_flags() {
        let interrupt = Interrupt::new();
        assert!(interrupt.check().is_ok());

        let shared = interrupt.clone();
        shared.set_stopping(true);
        assert!(interrupt.is_raised());
        assert!(!interrupt.is_killed());
        assert!(matches!(interrupt.check(), Err(MediaError::Interrupted)));

        shared.set_stopping(false);
        assert!(interrupt.check().is_ok());
        shared.kill();
        assert!(interrupt.is_killed());
    }

    #[test]
    fn test_wait_wakes_on_kill() {
        let interrupt = Interrupt::new();
        let killer = interrupt.clone();
        let started = Instant::now();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            killer.kill();
        });
        let result = interrupt.wait(Duration::from_secs(10));
        handle.join().unwrap();
        assert!(matches!(result, Err(MediaError::Interrupted)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_completes() {
        let interrupt = Interrupt::new();
        assert!(interrupt.wait(Duration::from_millis(5)).is_ok());
    }

    #[test]
    fn test_shared_status() {
        let status = SharedStatus::default();
        assert_eq!(status.state(), PlaybackState::Idle);
        status.set_state(PlaybackState::Active);
        status.set_position_ms(1_500);
        assert_eq!(status.state(), PlaybackState::Active);
        assert_eq!(status.position_ms(), 1_500);
    }
}
