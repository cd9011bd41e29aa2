//! Utility code; candidates for factoring out.

pub mod irq_cell;
