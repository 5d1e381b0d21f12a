//! Presentation Clock
//!
//! Maps decoded PTS onto wall-clock delivery deadlines. The schedule only
//! moves forward: the gap between two consecutive minimum PTS values is
//! added to the deadline, with reordering (negative gaps) and discontinuities
//! (gaps over three seconds) both treated as zero.

use crate::clock::Clock;

/// Gaps larger than this are treated as a seek/discontinuity, not a wait.
pub const MAX_PTS_GAP_NS: i64 = 3_000_000_000;

/// Longest single sleep before control flags are looked at again.
pub const SLEEP_SLICE_NS: i64 = 200_000_000;

#[derive(Debug, Clone)]
pub struct PresentationClock {
    /// Offset accumulated across loop and reset boundaries
    pub base_ts: i64,
    /// First PTS of the current pass
    pub start_ts: i64,
    /// PTS of the frame currently due
    pub next_pts_ns: i64,
    /// Wall-clock instant playback logically began
    pub play_sys_ts: Option<i64>,
    /// Wall-clock deadline of the next tick
    pub next_ns: Option<i64>,
    epoch_ns: i64,
}

impl PresentationClock {
    pub fn new(epoch_ns: i64) -> Self {
        Self {
            base_ts: 0,
            start_ts: 0,
            next_pts_ns: 0,
            play_sys_ts: None,
            next_ns: None,
            epoch_ns,
        }
    }

    /// Move the schedule to the earliest ready PTS.
    pub fn advance_to(&mut self, min_next_ns: i64) {
        let mut delta = min_next_ns.saturating_sub(self.next_pts_ns);
        if delta < 0 {
            delta = 0;
        }
        if delta > MAX_PTS_GAP_NS {
            delta = 0;
        }

        if let Some(next) = self.next_ns.as_mut() {
            *next += delta;
        }
        self.next_pts_ns = min_next_ns;
    }

    /// A frame may go out once the schedule has reached its PTS.
    pub fn can_play(&self, pts: i64) -> bool {
        pts <= self.next_pts_ns
    }

    /// Delivered timestamp for a frame with the given decode-time PTS.
    pub fn timestamp(&self, pts: i64) -> i64 {
        let play_sys_ts = self.play_sys_ts.unwrap_or(self.epoch_ns);
        self.base_ts
            .saturating_add(pts.saturating_sub(self.start_ts))
            .saturating_add(play_sys_ts - self.epoch_ns)
    }

    /// Sleep toward the next deadline, at most one slice at a time.
    ///
    /// Returns true when the deadline was not reached yet; the caller should
    /// look at its commands and come back rather than deliver anything.
    pub fn sleep_to(&mut self, clock: &dyn Clock) -> bool {
        let now = clock.now_ns();
        match self.next_ns {
            None => {
                self.next_ns = Some(now);
                false
            }
            Some(next) => {
                if next > now && next - now > SLEEP_SLICE_NS {
                    clock.sleep_until_ns(now + SLEEP_SLICE_NS);
                    true
                } else {
                    clock.sleep_until_ns(next);
                    false
                }
            }
        }
    }

    /// Re-anchor the schedule at the start of a new pass.
    ///
    /// `end_pts` is the end of the last decoded frame of the previous pass and
    /// `first_pts` the earliest PTS of the new one.
    pub fn rebase(&mut self, end_pts: i64, first_pts: i64, active: bool, now_ns: i64) {
        let offset = end_pts.saturating_sub(self.next_pts_ns);
        self.base_ts += (end_pts - self.start_ts).max(0);

        self.start_ts = first_pts;
        self.next_pts_ns = first_pts;

        if active {
            if self.play_sys_ts.is_none() {
                self.play_sys_ts = Some(now_ns);
            }
            if let Some(next) = self.next_ns.as_mut() {
                *next += offset.max(0);
            }
        } else {
            self.play_sys_ts = Some(now_ns);
            self.next_ns = None;
        }
    }

    /// Re-anchor after a seek: the frame at `first_pts` is due right away and
    /// keeps the timestamp line continuous with what was already delivered.
    pub fn reanchor(&mut self, first_pts: i64, now_ns: i64) {
        let delivered_until = self.timestamp(self.next_pts_ns);
        self.start_ts = first_pts;
        self.next_pts_ns = first_pts;
        self.play_sys_ts = Some(now_ns);
        self.base_ts = 0;
        let fresh = self.timestamp(first_pts);
        if fresh < delivered_until {
            self.base_ts = delivered_until - fresh;
        }
        self.next_ns = None;
    }

    /// Shift the wall-clock origin forward by time spent paused.
    pub fn shift(&mut self, paused_ns: i64) {
        if paused_ns <= 0 {
            return;
        }
        if let Some(play) = self.play_sys_ts.as_mut() {
            *play += paused_ns;
        }
        if let Some(next) = self.next_ns.as_mut() {
            *next += paused_ns;
        }
    }
}
