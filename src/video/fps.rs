//! Frame-rate estimation and limiting.
//!
//! Three small pieces, all pure: a ring of recent release timestamps for
//! the raw rate, one-dimensional Kalman smoothers for the displayed FPS
//! number and the reactive delta-time, and the fractional accumulator that
//! implements a virtual (slower-than-hardware) refresh rate.

use crate::ticks;

/// How many timestamps the raw-rate window holds.
pub(crate) const WINDOW: usize = 32;

/// Circular window of the most recent frame timestamps.
pub(crate) struct FpsWindow {
    stamps: [u32; WINDOW],
    head: usize,
    len: usize,
}

impl FpsWindow {
    pub fn new() -> FpsWindow {
        FpsWindow {
            stamps: [0; WINDOW],
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, stamp: u32) {
        self.stamps[self.head] = stamp;
        self.head = (self.head + 1) % WINDOW;
        if self.len < WINDOW {
            self.len += 1;
        }
    }

    /// Frames per second over the window: oldest stamp against newest.
    /// Wrapping subtraction keeps this correct across counter wrap.
    pub fn rate(&self) -> f32 {
        if self.len < 2 {
            return 0.0;
        }
        let newest = self.stamps[(self.head + WINDOW - 1) % WINDOW];
        let oldest = if self.len == WINDOW {
            self.stamps[self.head]
        } else {
            self.stamps[0]
        };
        let span = newest.wrapping_sub(oldest);
        if span == 0 {
            return 0.0;
        }
        (self.len - 1) as f32 * ticks::TICKS_PER_SECOND as f32 / span as f32
    }
}

/// One-dimensional Kalman smoother.
pub(crate) struct Kalman {
    x: f32,
    p: f32,
    q: f32,
    r: f32,
    primed: bool,
}

impl Kalman {
    /// `q` is process noise (how fast the estimate may wander), `r` is
    /// measurement noise (how little one sample is trusted).
    pub fn new(q: f32, r: f32) -> Kalman {
        Kalman {
            x: 0.0,
            p: 1.0,
            q,
            r,
            primed: false,
        }
    }

    pub fn update(&mut self, z: f32) -> f32 {
        if !self.primed {
            self.x = z;
            self.primed = true;
            return self.x;
        }
        self.p += self.q;
        let k = self.p / (self.p + self.r);
        self.x += k * (z - self.x);
        self.p *= 1.0 - k;
        self.x
    }

    pub fn value(&self) -> f32 {
        self.x
    }
}

/// The displayed FPS number: a slow Kalman over the raw window rate whose
/// published value only refreshes a few times a second, so it is readable
/// on screen.
pub(crate) struct SmoothedFps {
    filter: Kalman,
    shown: f32,
    last_snapshot: u32,
}

/// Snapshot interval of the published number.
const SNAPSHOT_TICKS: u32 = ticks::TICKS_PER_SECOND / 4;

impl SmoothedFps {
    pub fn new() -> SmoothedFps {
        SmoothedFps {
            filter: Kalman::new(0.08, 0.8),
            shown: 0.0,
            last_snapshot: 0,
        }
    }

    pub fn update(&mut self, raw: f32, now: u32) {
        self.filter.update(raw);
        if now.wrapping_sub(self.last_snapshot) >= SNAPSHOT_TICKS {
            self.shown = self.filter.value();
            self.last_snapshot = now;
        }
    }

    pub fn shown(&self) -> f32 {
        self.shown
    }
}

/// Frame-skip accumulator for a virtual refresh rate below the hardware's.
///
/// Gains `target / actual` per vertical interrupt and presents only on
/// reaching one, so a 20 fps target on 60 Hz hardware presents every third
/// interrupt.
pub(crate) struct FrameLimiter {
    target: f32,
    accum: f32,
}

impl FrameLimiter {
    pub fn new() -> FrameLimiter {
        FrameLimiter {
            target: 0.0,
            accum: 0.0,
        }
    }

    /// A target of 0 turns limiting off.
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
        self.accum = 0.0;
    }

    /// Called once per vertical interrupt; true means present this one.
    pub fn step(&mut self, actual_hz: f32) -> bool {
        if self.target <= 0.0 || actual_hz <= 0.0 {
            return true;
        }
        self.accum += self.target / actual_hz;
        if self.accum >= 1.0 {
            self.accum -= libm::floorf(self.accum);
            true
        } else {
            false
        }
    }
}
