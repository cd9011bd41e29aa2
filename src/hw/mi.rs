//! MIPS interface: the interrupt multiplexer for the RCP devices.

use super::Reg32;

#[repr(C)]
pub struct MiRegisters {
    /// Mode/init register; also the acknowledge point for the rasterizer.
    pub mode: Reg32,
    /// RCP version, read-only.
    pub version: Reg32,
    /// Pending-interrupt bits, one per device, read-only.
    pub interrupt: Reg32,
    /// Device mask. Reads as one bit per device; writes are set/clear pairs.
    pub mask: Reg32,
}

#[cfg(not(target_os = "none"))]
impl MiRegisters {
    pub const fn zeroed() -> Self {
        MiRegisters {
            mode: Reg32::new(0),
            version: Reg32::new(0),
            interrupt: Reg32::new(0),
            mask: Reg32::new(0),
        }
    }
}

/// Pending/mask read bits, one per device.
pub const INTR_SP: u32 = 1 << 0;
pub const INTR_SI: u32 = 1 << 1;
pub const INTR_AI: u32 = 1 << 2;
pub const INTR_VI: u32 = 1 << 3;
pub const INTR_PI: u32 = 1 << 4;
pub const INTR_DP: u32 = 1 << 5;
/// Platform-variant USB controllers (absent on the retail console).
pub const INTR_USB0: u32 = 1 << 6;
pub const INTR_USB1: u32 = 1 << 7;

/// Mask-register write encoding: bit pairs, clear then set, in device order.
pub const MASK_CLR_SP: u32 = 1 << 0;
pub const MASK_SET_SP: u32 = 1 << 1;
pub const MASK_CLR_SI: u32 = 1 << 2;
pub const MASK_SET_SI: u32 = 1 << 3;
pub const MASK_CLR_AI: u32 = 1 << 4;
pub const MASK_SET_AI: u32 = 1 << 5;
pub const MASK_CLR_VI: u32 = 1 << 6;
pub const MASK_SET_VI: u32 = 1 << 7;
pub const MASK_CLR_PI: u32 = 1 << 8;
pub const MASK_SET_PI: u32 = 1 << 9;
pub const MASK_CLR_DP: u32 = 1 << 10;
pub const MASK_SET_DP: u32 = 1 << 11;
pub const MASK_CLR_USB0: u32 = 1 << 12;
pub const MASK_SET_USB0: u32 = 1 << 13;
pub const MASK_CLR_USB1: u32 = 1 << 14;
pub const MASK_SET_USB1: u32 = 1 << 15;

/// Mode-register write bit acknowledging the rasterizer interrupt.
pub const MODE_CLR_DP_INTERRUPT: u32 = 1 << 11;

#[cfg(not(target_os = "none"))]
impl MiRegisters {
    /// Applies the set/clear pair encoding to the emulated mask register,
    /// so hosted tests observe the same read-back the hardware gives.
    pub fn emu_apply_mask_write(&self, w: u32) {
        let mut m = self.mask.read();
        for dev in 0..8 {
            let clr = 1 << (2 * dev);
            let set = 1 << (2 * dev + 1);
            if w & set != 0 {
                m |= 1 << dev;
            } else if w & clr != 0 {
                m &= !(1 << dev);
            }
        }
        self.mask.write(m);
    }
}
