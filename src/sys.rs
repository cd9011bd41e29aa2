//! Boot-ROM flags: facts about the machine that the IPL leaves in low RDRAM.

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        const TV_TYPE_FLAG: usize = 0x8000_0300u32 as i32 as isize as usize;
        const CONSOLE_FLAG: usize = 0x8000_0308u32 as i32 as isize as usize;

        fn raw_tv_flag() -> u32 {
            unsafe { core::ptr::read_volatile(TV_TYPE_FLAG as *const u32) }
        }

        fn raw_console_flag() -> u32 {
            unsafe { core::ptr::read_volatile(CONSOLE_FLAG as *const u32) }
        }
    } else {
        use core::sync::atomic::{AtomicU32, Ordering};

        static TV_TYPE_EMU: AtomicU32 = AtomicU32::new(1);
        static CONSOLE_EMU: AtomicU32 = AtomicU32::new(0);

        fn raw_tv_flag() -> u32 {
            TV_TYPE_EMU.load(Ordering::Relaxed)
        }

        fn raw_console_flag() -> u32 {
            CONSOLE_EMU.load(Ordering::Relaxed)
        }
    }
}

/// The television standard the machine was built for. Fixed for the life of
/// the process; it decides the video clock and the scan-out presets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TvType {
    Pal,
    Ntsc,
    Mpal,
}

impl TvType {
    /// The video/DAC master clock for this standard, in Hz.
    pub fn video_clock(self) -> u32 {
        match self {
            TvType::Pal => 49_656_530,
            TvType::Ntsc => 48_681_812,
            TvType::Mpal => 48_628_316,
        }
    }
}

/// Reads the TV-standard boot flag.
pub fn tv_type() -> TvType {
    match raw_tv_flag() {
        0 => TvType::Pal,
        2 => TvType::Mpal,
        _ => TvType::Ntsc,
    }
}

/// True on the platform variant (the set-top derivative with USB
/// controllers behind the MIPS interface).
pub fn is_variant_console() -> bool {
    raw_console_flag() != 0
}

#[cfg(test)]
pub(crate) fn emu_set_tv_type(t: TvType) {
    let raw = match t {
        TvType::Pal => 0,
        TvType::Ntsc => 1,
        TvType::Mpal => 2,
    };
    TV_TYPE_EMU.store(raw, Ordering::Relaxed);
}

#[cfg(test)]
pub(crate) fn emu_set_variant_console(on: bool) {
    CONSOLE_EMU.store(on as u32, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clocks_differ_per_standard() {
        assert!(TvType::Pal.video_clock() > TvType::Ntsc.video_clock());
        assert!(TvType::Ntsc.video_clock() > TvType::Mpal.video_clock());
    }

    #[test]
    fn unknown_flag_values_fall_back_to_ntsc() {
        let _g = crate::util::testing::lock();
        TV_TYPE_EMU.store(7, Ordering::Relaxed);
        assert_eq!(tv_type(), TvType::Ntsc);
        emu_set_tv_type(TvType::Pal);
        assert_eq!(tv_type(), TvType::Pal);
        emu_set_tv_type(TvType::Ntsc);
    }
}
