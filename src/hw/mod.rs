//! Register files of the target SoC.
//!
//! Fixed physical addresses, one module per peripheral. On the real machine
//! the accessors materialize each block at its base address through the
//! uncached segment; on hosted builds they return process-global in-memory
//! blocks so the drivers (and their tests) exercise the same register
//! traffic either way.

pub mod mmio;

pub mod ai;
pub mod mi;
pub mod pi;
pub mod vi;

pub mod misc;

pub use self::mmio::Reg32;

/// Physical base of the signal processor register file.
pub const SP_BASE: u32 = 0x0404_0000;
/// Physical base of the MIPS interface (interrupt multiplexer).
pub const MI_BASE: u32 = 0x0430_0000;
/// Physical base of the video interface.
pub const VI_BASE: u32 = 0x0440_0000;
/// Physical base of the audio interface.
pub const AI_BASE: u32 = 0x0450_0000;
/// Physical base of the peripheral interface.
pub const PI_BASE: u32 = 0x0460_0000;
/// Physical base of the serial interface.
pub const SI_BASE: u32 = 0x0480_0000;
/// Physical bases of the platform-variant USB controllers.
pub const USB0_BASE: u32 = 0x0490_0000;
pub const USB1_BASE: u32 = 0x04A0_0000;

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        use self::mmio::kseg1;

        pub fn mi() -> &'static mi::MiRegisters {
            unsafe { &*(kseg1(MI_BASE) as *const mi::MiRegisters) }
        }

        pub fn vi() -> &'static vi::ViRegisters {
            unsafe { &*(kseg1(VI_BASE) as *const vi::ViRegisters) }
        }

        pub fn ai() -> &'static ai::AiRegisters {
            unsafe { &*(kseg1(AI_BASE) as *const ai::AiRegisters) }
        }

        pub fn pi() -> &'static pi::PiRegisters {
            unsafe { &*(kseg1(PI_BASE) as *const pi::PiRegisters) }
        }

        pub fn sp() -> &'static misc::SpRegisters {
            unsafe { &*(kseg1(SP_BASE) as *const misc::SpRegisters) }
        }

        pub fn si() -> &'static misc::SiRegisters {
            unsafe { &*(kseg1(SI_BASE) as *const misc::SiRegisters) }
        }

        pub fn usb0() -> &'static misc::UsbRegisters {
            unsafe { &*(kseg1(USB0_BASE) as *const misc::UsbRegisters) }
        }

        pub fn usb1() -> &'static misc::UsbRegisters {
            unsafe { &*(kseg1(USB1_BASE) as *const misc::UsbRegisters) }
        }
    } else {
        static MI_EMU: mi::MiRegisters = mi::MiRegisters::zeroed();
        static VI_EMU: vi::ViRegisters = vi::ViRegisters::zeroed();
        static AI_EMU: ai::AiRegisters = ai::AiRegisters::zeroed();
        static PI_EMU: pi::PiRegisters = pi::PiRegisters::zeroed();
        static SP_EMU: misc::SpRegisters = misc::SpRegisters::zeroed();
        static SI_EMU: misc::SiRegisters = misc::SiRegisters::zeroed();
        static USB0_EMU: misc::UsbRegisters = misc::UsbRegisters::zeroed();
        static USB1_EMU: misc::UsbRegisters = misc::UsbRegisters::zeroed();

        pub fn mi() -> &'static mi::MiRegisters {
            &MI_EMU
        }

        pub fn vi() -> &'static vi::ViRegisters {
            &VI_EMU
        }

        pub fn ai() -> &'static ai::AiRegisters {
            &AI_EMU
        }

        pub fn pi() -> &'static pi::PiRegisters {
            &PI_EMU
        }

        pub fn sp() -> &'static misc::SpRegisters {
            &SP_EMU
        }

        pub fn si() -> &'static misc::SiRegisters {
            &SI_EMU
        }

        pub fn usb0() -> &'static misc::UsbRegisters {
            &USB0_EMU
        }

        pub fn usb1() -> &'static misc::UsbRegisters {
            &USB1_EMU
        }
    }
}
