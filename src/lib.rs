//! Core runtime for the 64-bit RCP-based game console.
//!
//! This crate gives bare-metal application code a coherent set of services
//! over the machine's memory-mapped peripherals:
//!
//! - [`interrupt`]: nested critical sections and per-source IRQ dispatch.
//! - [`video`]: a multi-buffered frame presentation pipeline driven by the
//!   vertical-blank interrupt.
//! - [`audio`]: a ring of DMA-owned stereo buffers behind a pull-style
//!   producer interface, driven by the audio interface interrupt.
//! - [`dma`]: block transfers and 32-bit PIO between RDRAM and the
//!   peripheral (cartridge) bus.
//!
//! # Wiring
//!
//! The crate does not own the exception vector; the application's boot stub
//! does. For the driver to work, the stub must route the CPU interrupt cause
//! bits to the dispatch entry points, in the simplest case:
//!
//! ```ignore
//! // from the general exception handler, with Cause in `cause`:
//! if cause & cause::IP_RCP != 0 { rcp64::interrupt::dispatch_rcp(); }
//! if cause & cause::IP_PRENMI != 0 { rcp64::interrupt::dispatch_prenmi(); }
//! if cause & cause::IP_CART != 0 { rcp64::interrupt::dispatch_cart(); }
//! if cause & cause::IP_TIMER != 0 { rcp64::interrupt::dispatch_timer(); }
//! ```
//!
//! Everything else is ordinary function calls: `interrupt::init()` once at
//! boot (after `mem::init_heap`), then `video::init` / `audio::init` as the
//! application requires.
//!
//! On hosted builds (tests) the hardware layer is replaced by in-memory
//! register blocks and an emulated coprocessor 0, so the state machines in
//! this crate run under `cargo test` unchanged.

#![no_std]
// Inline assembly for this CPU family is still feature-gated on the
// (nightly) toolchains that can target it at all.
#![cfg_attr(target_os = "none", feature(asm_experimental_arch))]

extern crate alloc;

#[cfg(test)]
#[macro_use]
extern crate std;

#[cfg(all(target_os = "none", feature = "panic-halt"))]
extern crate panic_halt;

pub mod audio;
pub mod dma;
pub mod interrupt;
pub mod video;

pub mod mem;
pub mod sys;
pub mod ticks;

pub mod hw;
mod util;
mod vr4300;

/// A pixel of a 16 bpp framebuffer: RGBA 5-5-5-1, the hardware's native
/// packing.
pub type Pixel16 = u16;

/// A pixel of a 32 bpp framebuffer: RGBA 8-8-8-8.
pub type Pixel32 = u32;

/// One stereo PCM sample as the audio interface consumes it: interleaved
/// signed 16-bit, left then right.
pub type Sample = i16;
