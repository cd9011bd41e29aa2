//! Register files this core only ever acknowledges: the signal processor,
//! the serial interface, and the platform-variant USB controllers. Their
//! full programming models belong to external collaborators; the interrupt
//! dispatcher just needs the status registers.

use super::Reg32;

#[repr(C)]
pub struct SpRegisters {
    pub mem_addr: Reg32,
    pub dram_addr: Reg32,
    pub rd_len: Reg32,
    pub wr_len: Reg32,
    /// Writing [`SP_WSTATUS_CLEAR_INTR`] acknowledges the interrupt.
    pub status: Reg32,
}

/// Status write bit acknowledging the signal-processor interrupt.
pub const SP_WSTATUS_CLEAR_INTR: u32 = 1 << 3;

#[repr(C)]
pub struct SiRegisters {
    pub dram_addr: Reg32,
    pub pif_ad_rd64b: Reg32,
    _reserved0: Reg32,
    _reserved1: Reg32,
    pub pif_ad_wr64b: Reg32,
    _reserved2: Reg32,
    /// Writing any value acknowledges the interrupt.
    pub status: Reg32,
}

#[repr(C)]
pub struct UsbRegisters {
    /// Writing any value acknowledges the controller's interrupt.
    pub status: Reg32,
}

#[cfg(not(target_os = "none"))]
impl SpRegisters {
    pub const fn zeroed() -> Self {
        SpRegisters {
            mem_addr: Reg32::new(0),
            dram_addr: Reg32::new(0),
            rd_len: Reg32::new(0),
            wr_len: Reg32::new(0),
            status: Reg32::new(0),
        }
    }
}

#[cfg(not(target_os = "none"))]
impl SiRegisters {
    pub const fn zeroed() -> Self {
        SiRegisters {
            dram_addr: Reg32::new(0),
            pif_ad_rd64b: Reg32::new(0),
            _reserved0: Reg32::new(0),
            _reserved1: Reg32::new(0),
            pif_ad_wr64b: Reg32::new(0),
            _reserved2: Reg32::new(0),
            status: Reg32::new(0),
        }
    }
}

#[cfg(not(target_os = "none"))]
impl UsbRegisters {
    pub const fn zeroed() -> Self {
        UsbRegisters {
            status: Reg32::new(0),
        }
    }
}
