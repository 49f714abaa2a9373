//! Frame pacing for the tick loop.
//!
//! Each tick is anchored at its start time and the next one is due one
//! packet interval later, on the monotonic clock. The interval shrinks when
//! a v1.20+ keyboard is attached because that firmware takes more packets
//! per frame.

use std::time::{Duration, Instant};

use crate::error::{KeyglowError, Result};
use crate::protocol::{FIRMWARE_V120, MIN_TICK_SLEEP, PACKETS_PER_FRAME, PACKETS_PER_FRAME_V120};

/// Packets per frame for the attached firmware versions. Highest wins.
pub fn packet_multiplier<I>(firmware_versions: I) -> u32
where
    I: IntoIterator<Item = u16>,
{
    if firmware_versions.into_iter().any(|v| v >= FIRMWARE_V120) {
        PACKETS_PER_FRAME_V120
    } else {
        PACKETS_PER_FRAME
    }
}

/// Time between ticks: `1e9 / fps / multiplier` nanoseconds.
pub fn frame_interval(fps: u32, multiplier: u32) -> Duration {
    let nanos = 1_000_000_000 / u64::from(fps.max(1)) / u64::from(multiplier.max(1));
    Duration::from_nanos(nanos)
}

/// Absolute deadline of the next tick, never sooner than [`MIN_TICK_SLEEP`] from `now`.
pub fn next_deadline(tick_start: Instant, now: Instant, interval: Duration) -> Instant {
    let deadline = tick_start + interval;
    let earliest = now + MIN_TICK_SLEEP;
    deadline.max(earliest)
}

/// Sleep until `deadline`. Short or interrupted sleeps are resumed.
pub fn sleep_until(deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        spin_sleep::sleep(deadline - now);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Uninitialized,
    Running,
}

/// Tick clock for the daemon loop.
#[derive(Debug)]
pub struct FrameScheduler {
    fps: u32,
    state: SchedulerState,
    tick_start: Option<Instant>,
    multiplier: u32,
}

impl FrameScheduler {
    pub fn new(fps: u32) -> Self {
        FrameScheduler {
            fps,
            state: SchedulerState::Uninitialized,
            tick_start: None,
            multiplier: PACKETS_PER_FRAME,
        }
    }

    pub fn start(&mut self) {
        if self.state == SchedulerState::Uninitialized {
            log::debug!("[tick] {} fps", self.fps);
            self.state = SchedulerState::Running;
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Multiplier used for the most recent deadline.
    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    /// Mark the start of a tick.
    pub fn begin_tick(&mut self) -> Result<Instant> {
        self.require_running()?;
        let now = Instant::now();
        self.tick_start = Some(now);
        Ok(now)
    }

    /// Deadline of the next tick, given the firmware seen during this one.
    pub fn end_tick<I>(&mut self, firmware_versions: I) -> Result<Instant>
    where
        I: IntoIterator<Item = u16>,
    {
        self.require_running()?;
        let start = self
            .tick_start
            .take()
            .ok_or_else(|| KeyglowError::Scheduler("end_tick without begin_tick".into()))?;
        let multiplier = packet_multiplier(firmware_versions);
        if multiplier != self.multiplier {
            log::debug!("[tick] {multiplier} packets per frame");
            self.multiplier = multiplier;
        }
        Ok(next_deadline(
            start,
            Instant::now(),
            frame_interval(self.fps, multiplier),
        ))
    }

    fn require_running(&self) -> Result<()> {
        match self.state {
            SchedulerState::Running => Ok(()),
            SchedulerState::Uninitialized => {
                Err(KeyglowError::Scheduler("scheduler not started".into()))
            }
        }
    }
}
