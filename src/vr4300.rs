//! Augmented VR4300 operations.
//!
//! # Coprocessor 0
//!
//! The Status register carries the global interrupt-enable bit and the
//! per-line interrupt masks; Cause carries the pending lines; Count runs at
//! half the CPU clock and Compare is the timer. All four are plain 32-bit
//! moves to/from coprocessor 0.
//!
//! Writes to Status take effect after the instruction hazard clears, so
//! `write_status` pads the pipeline before returning. This matters: the
//! interrupt nesting counter must only be updated once the hardware is
//! actually masked.
//!
//! # Hosted stand-in
//!
//! On anything that is not the real machine, the coprocessor registers are
//! backed by process-global atomics. The driver state machines do not care,
//! and this lets the whole crate run under `cargo test`.

/// Bit layout of the Status register, as far as this crate is concerned.
pub mod status {
    /// Global interrupt enable.
    pub const IE: u32 = 1 << 0;
    /// Interrupt mask: the RCP aggregate line (MI multiplexes the devices).
    pub const IM_RCP: u32 = 1 << 10;
    /// Interrupt mask: the cartridge line.
    pub const IM_CART: u32 = 1 << 11;
    /// Interrupt mask: the pre-NMI (reset button) line.
    pub const IM_PRENMI: u32 = 1 << 12;
    /// Interrupt mask: the Compare timer line.
    pub const IM_TIMER: u32 = 1 << 15;
}

/// Bit layout of the Cause register pending-interrupt field.
pub mod cause {
    pub const IP_RCP: u32 = 1 << 10;
    pub const IP_CART: u32 = 1 << 11;
    pub const IP_PRENMI: u32 = 1 << 12;
    pub const IP_TIMER: u32 = 1 << 15;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        use core::arch::asm;

        /// Reads the COP0 Status register.
        #[inline(always)]
        pub fn read_status() -> u32 {
            let v: u32;
            unsafe {
                asm!("mfc0 {0}, $12", out(reg) v, options(nomem, nostack));
            }
            v
        }

        /// Writes the COP0 Status register and waits out the hazard, so the
        /// new mask is in force when this returns.
        #[inline(always)]
        pub fn write_status(v: u32) {
            unsafe {
                asm!(
                    "mtc0 {0}, $12",
                    "nop",
                    "nop",
                    in(reg) v,
                    options(nomem, nostack),
                );
            }
        }

        /// Reads the COP0 Count register (half CPU clock).
        #[inline(always)]
        pub fn read_count() -> u32 {
            let v: u32;
            unsafe {
                asm!("mfc0 {0}, $9", out(reg) v, options(nomem, nostack));
            }
            v
        }

        /// Reads the COP0 Compare register.
        #[inline(always)]
        pub fn read_compare() -> u32 {
            let v: u32;
            unsafe {
                asm!("mfc0 {0}, $11", out(reg) v, options(nomem, nostack));
            }
            v
        }

        /// Writes the COP0 Compare register. This also acknowledges a
        /// pending timer interrupt.
        #[inline(always)]
        pub fn write_compare(v: u32) {
            unsafe {
                asm!(
                    "mtc0 {0}, $11",
                    "nop",
                    in(reg) v,
                    options(nomem, nostack),
                );
            }
        }

        /// Full memory barrier. Orders MMIO against surrounding accesses.
        #[inline(always)]
        pub fn sync() {
            unsafe {
                asm!("sync", options(nostack));
            }
        }

        /// Writes back and invalidates the data-cache lines covering
        /// `[addr, addr + len)`. Lines are 16 bytes.
        pub fn data_cache_writeback_invalidate(addr: usize, len: usize) {
            let mut line = addr & !15;
            let end = addr + len;
            while line < end {
                unsafe {
                    // Hit_Writeback_Invalidate_D
                    asm!("cache 0x15, 0({0})", in(reg) line, options(nostack));
                }
                line += 16;
            }
            sync();
        }
    } else {
        use core::sync::atomic::{AtomicU32, Ordering};

        static STATUS: AtomicU32 = AtomicU32::new(0);
        static CAUSE: AtomicU32 = AtomicU32::new(0);
        static COUNT: AtomicU32 = AtomicU32::new(0);
        static COMPARE: AtomicU32 = AtomicU32::new(0);

        pub fn read_status() -> u32 {
            STATUS.load(Ordering::SeqCst)
        }

        pub fn write_status(v: u32) {
            STATUS.store(v, Ordering::SeqCst)
        }

        pub fn read_count() -> u32 {
            COUNT.load(Ordering::SeqCst)
        }

        pub fn read_compare() -> u32 {
            COMPARE.load(Ordering::SeqCst)
        }

        pub fn write_compare(v: u32) {
            COMPARE.store(v, Ordering::SeqCst);
            // On hardware, writing Compare clears the pending timer line.
            CAUSE.fetch_and(!cause::IP_TIMER, Ordering::SeqCst);
        }

        pub fn sync() {
            core::sync::atomic::fence(Ordering::SeqCst)
        }

        pub fn data_cache_writeback_invalidate(_addr: usize, _len: usize) {}

        /// Test control for the emulated counter.
        #[cfg(test)]
        pub(crate) fn emu_set_count(v: u32) {
            COUNT.store(v, Ordering::SeqCst)
        }
    }
}
