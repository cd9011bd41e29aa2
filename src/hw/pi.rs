//! Peripheral interface: the cartridge-bus DMA engine.

use super::Reg32;

#[repr(C)]
pub struct PiRegisters {
    /// RDRAM side of the transfer, physical address.
    pub dram_addr: Reg32,
    /// Peripheral-bus side of the transfer.
    pub cart_addr: Reg32,
    /// Writing `n - 1` starts an n-byte transfer from the bus into RDRAM.
    pub rd_len: Reg32,
    /// Writing `n - 1` starts an n-byte transfer from RDRAM onto the bus.
    pub wr_len: Reg32,
    /// Busy/error bits; write to reset the engine or acknowledge the
    /// interrupt.
    pub status: Reg32,
}

#[cfg(not(target_os = "none"))]
impl PiRegisters {
    pub const fn zeroed() -> Self {
        PiRegisters {
            dram_addr: Reg32::new(0),
            cart_addr: Reg32::new(0),
            rd_len: Reg32::new(0),
            wr_len: Reg32::new(0),
            status: Reg32::new(0),
        }
    }
}

/// Status read bits.
pub const STATUS_DMA_BUSY: u32 = 1 << 0;
pub const STATUS_IO_BUSY: u32 = 1 << 1;
pub const STATUS_ERROR: u32 = 1 << 2;
pub const STATUS_INTERRUPT: u32 = 1 << 3;

/// Status write bits.
pub const WSTATUS_RESET: u32 = 1 << 0;
pub const WSTATUS_CLEAR_INTERRUPT: u32 = 1 << 1;
