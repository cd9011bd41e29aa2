//! The free-running tick counter.
//!
//! COP0 Count increments at half the CPU clock and wraps about every 91
//! seconds; durations must therefore be computed with wrapping subtraction,
//! which [`since`] packages.

use crate::vr4300;

/// Tick rate of the counter: half the CPU clock.
pub const TICKS_PER_SECOND: u32 = 46_875_000;

const TICKS_PER_MS: u32 = TICKS_PER_SECOND / 1000;

/// Reads the counter.
#[inline]
pub fn now() -> u32 {
    vr4300::read_count()
}

/// Converts milliseconds to ticks. Saturates rather than wrapping for
/// nonsensically large inputs.
pub fn from_ms(ms: u32) -> u32 {
    ms.saturating_mul(TICKS_PER_MS)
}

/// Converts ticks to whole milliseconds.
pub fn to_ms(t: u32) -> u32 {
    t / TICKS_PER_MS
}

/// Ticks elapsed since `earlier`, correct across counter wrap.
pub fn since(earlier: u32) -> u32 {
    now().wrapping_sub(earlier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vr4300;

    #[test]
    fn ms_round_trip() {
        assert_eq!(from_ms(1), 46_875);
        assert_eq!(to_ms(from_ms(200)), 200);
    }

    #[test]
    fn since_survives_wrap() {
        let _g = crate::util::testing::lock();
        vr4300::emu_set_count(5);
        assert_eq!(since(0xFFFF_FFF0), 21);
    }
}
