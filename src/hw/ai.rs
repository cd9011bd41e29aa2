//! Audio interface: the sample DMA engine.

use super::Reg32;

#[repr(C)]
pub struct AiRegisters {
    /// Physical address of the next sample buffer. Writing while a buffer
    /// is already pending makes the queue two deep.
    pub dram_addr: Reg32,
    /// Byte length of the next buffer; the write latches `dram_addr`.
    pub length: Reg32,
    /// DMA enable.
    pub control: Reg32,
    /// Busy/full status; writing any value acknowledges the interrupt.
    pub status: Reg32,
    /// DAC rate divisor, derived from the video clock.
    pub dacrate: Reg32,
    /// Bit rate divisor.
    pub samplesize: Reg32,
}

#[cfg(not(target_os = "none"))]
impl AiRegisters {
    pub const fn zeroed() -> Self {
        AiRegisters {
            dram_addr: Reg32::new(0),
            length: Reg32::new(0),
            control: Reg32::new(0),
            status: Reg32::new(0),
            dacrate: Reg32::new(0),
            samplesize: Reg32::new(0),
        }
    }
}

/// Both queue slots are occupied.
pub const STATUS_FULL: u32 = 1 << 31;
/// A transfer is in progress.
pub const STATUS_BUSY: u32 = 1 << 30;

/// Control-register DMA enable.
pub const CONTROL_DMA_ON: u32 = 1;

/// Maximum value of the bit-rate divisor.
pub const SAMPLESIZE_MAX: u32 = 16383;
