//! Audio playback: a ring of DMA-owned stereo buffers behind a producer
//! interface.
//!
//! The audio interface fetches interleaved 16-bit stereo from RDRAM through
//! a two-deep address queue and interrupts every time it moves on to the
//! next buffer. The IRQ feeder keeps that queue topped up from buffers the
//! producer has released, or -- if a fill callback is installed -- by
//! pulling samples on demand. With neither, the hardware simply falls
//! silent; underrun is not an error.
//!
//! Buffers live in uncached memory so producer stores are visible to the
//! engine without cache maintenance. Interrupts must be initialized before
//! [`init`].

mod ring;

use alloc::vec::Vec;

use crate::hw;
use crate::hw::ai;
use crate::interrupt::{self, Source};
use crate::mem::{self, UncachedBytes};
use crate::sys;
use crate::ticks;
use crate::util::irq_cell::IrqCell;
use crate::Sample;

use self::ring::Ring;

/// A pull-style sample source, invoked from interrupt context with one
/// whole buffer to fill.
pub type FillCallback = fn(&mut [Sample]);

/// The effective sample source. Pausing parks the user's callback here so
/// it can be restored verbatim.
#[derive(Copy, Clone)]
enum Fill {
    None,
    User(FillCallback),
    Paused { saved: FillCallback },
}

/// Streaming state of [`push`]: the slot being filled and how far it got.
struct Partial {
    slot: usize,
    offset: usize,
}

struct AudioState {
    regs: &'static ai::AiRegisters,
    /// Negotiated sample rate after divisor rounding.
    frequency: u32,
    /// Stereo sample pairs per buffer (each buffer holds twice this many
    /// `Sample`s).
    buf_len: usize,
    buffers: Vec<UncachedBytes>,
    ring: Ring,
    fill: Fill,
    partial: Option<Partial>,
}

static AUDIO: IrqCell<Option<AudioState>> = IrqCell::new(None);

/// The engine glitches on buffers ending exactly at a 8 KiB boundary (an
/// address-counter carry bug); such buffers are nudged up four bytes into
/// the slack allocated for the purpose.
pub(crate) fn shifted_start(base: usize, payload_len: usize) -> usize {
    if (base + payload_len) & 0x1FFF == 0 {
        base + 4
    } else {
        base
    }
}

impl AudioState {
    fn payload_bytes(&self) -> usize {
        self.buf_len * 2 * core::mem::size_of::<Sample>()
    }

    fn samples_per_buffer(&self) -> usize {
        self.buf_len * 2
    }

    fn buffer_start(&self, slot: usize) -> usize {
        shifted_start(self.buffers[slot].addr(), self.payload_bytes())
    }

    fn buffer_ptr(&self, slot: usize) -> *mut Sample {
        self.buffer_start(slot) as *mut Sample
    }

    /// Ticks one buffer takes to drain.
    fn buffer_period(&self) -> u32 {
        (self.buf_len as u64 * ticks::TICKS_PER_SECOND as u64
            / self.frequency as u64) as u32
    }
}

/// Brings the audio interface up at (approximately) `frequency` Hz with
/// `n_buffers` ring slots.
///
/// The DAC divisor is derived from the TV standard's video clock, so the
/// delivered rate differs slightly from the request; [`frequency`] reports
/// the negotiated value.
///
/// # Panics
///
/// If already initialized, if `n_buffers` is outside `[1, 32]`, or if
/// memory runs out.
pub fn init(frequency: u32, n_buffers: usize) {
    assert!(frequency > 0, "audio frequency must be positive");
    assert!(
        n_buffers >= 1 && n_buffers <= 32,
        "audio buffer count out of range"
    );

    let clock = sys::tv_type().video_clock();
    let dacrate = (2 * clock / frequency + 1) / 2 - 1;
    let bitrate = core::cmp::min(dacrate / 66, ai::SAMPLESIZE_MAX);
    let negotiated = 2 * clock / (2 * clock / frequency + 1);

    // About 40 ms of audio per buffer, in whole 8-sample groups.
    let buf_len = (negotiated as usize / 25) / 8 * 8;
    assert!(buf_len > 0, "audio frequency too low");
    let payload = buf_len * 2 * core::mem::size_of::<Sample>();

    let mut buffers = Vec::with_capacity(n_buffers);
    for _ in 0..n_buffers {
        // Four bytes of slack for the boundary nudge, four more to keep the
        // allocation itself a multiple of eight.
        let buf = UncachedBytes::alloc(payload + 8, 16);
        unsafe {
            core::ptr::write_bytes(
                shifted_start(buf.addr(), payload) as *mut u8,
                0,
                payload,
            )
        };
        buffers.push(buf);
    }

    let regs = hw::ai();
    regs.dacrate.write(dacrate);
    regs.samplesize.write(bitrate);
    regs.control.write(ai::CONTROL_DMA_ON);

    AUDIO.with(|a| {
        assert!(a.is_none(), "audio already initialized; close it first");
        *a = Some(AudioState {
            regs,
            frequency: negotiated,
            buf_len,
            buffers,
            ring: Ring::new(n_buffers),
            fill: Fill::None,
            partial: None,
        });
    });

    interrupt::register(Source::Ai, ai_handler);
    interrupt::set_enabled(Source::Ai, true);
}

/// Tears the audio system down, releasing every buffer and masking the
/// source. Calling it again is a no-op.
pub fn close() {
    let st = AUDIO.with(|a| a.take());
    if let Some(st) = st {
        interrupt::set_enabled(Source::Ai, false);
        interrupt::unregister(Source::Ai, ai_handler);
        // Buffers free through their original (pre-nudge) addresses.
        drop(st);
    }
}

/// The negotiated sample rate in Hz, or 0 while closed.
pub fn frequency() -> u32 {
    AUDIO.with(|a| a.as_ref().map(|st| st.frequency).unwrap_or(0))
}

/// Stereo sample pairs per ring buffer, or 0 while closed.
pub fn buffer_length() -> usize {
    AUDIO.with(|a| a.as_ref().map(|st| st.buf_len).unwrap_or(0))
}

/// Installs (or clears) the pull-style sample source. If playback is
/// paused, the new callback parks until unpause.
pub fn set_fill_callback(cb: Option<FillCallback>) {
    AUDIO.with(|a| {
        let st = a.as_mut().expect("audio not initialized");
        st.fill = match (cb, &st.fill) {
            (None, _) => Fill::None,
            (Some(f), Fill::Paused { .. }) => Fill::Paused { saved: f },
            (Some(f), _) => Fill::User(f),
        };
    })
}

/// Swaps the live fill callback for a silence generator (`true`) or
/// restores the remembered one (`false`). Without an installed callback
/// this has no effect.
pub fn pause(p: bool) {
    AUDIO.with(|a| {
        let st = a.as_mut().expect("audio not initialized");
        st.fill = match (p, &st.fill) {
            (true, &Fill::User(f)) => Fill::Paused { saved: f },
            (false, &Fill::Paused { saved }) => Fill::User(saved),
            (_, &Fill::User(f)) => Fill::User(f),
            (_, &Fill::Paused { saved }) => Fill::Paused { saved },
            (_, Fill::None) => Fill::None,
        };
    })
}

/// Whether a producer release would complete without blocking.
pub fn can_write() -> bool {
    AUDIO.with(|a| {
        a.as_ref().map(|st| st.ring.can_write()).unwrap_or(false)
    })
}

/// Zero-copy producer hand-off: blocks until a ring slot frees, presents
/// it to `f` for filling, and releases it on return.
///
/// The spin between probes runs with interrupts enabled, so the feeder can
/// retire buffers underneath the wait.
pub fn write_with(f: impl FnOnce(&mut [Sample])) {
    let (slot, ptr, len) = loop {
        let got = AUDIO.with(|a| {
            let st = a.as_mut().expect("audio not initialized");
            if st.ring.can_write() {
                let slot = st.ring.producer_slot();
                Some((slot, st.buffer_ptr(slot), st.samples_per_buffer()))
            } else {
                None
            }
        });
        if let Some(got) = got {
            break got;
        }
    };

    // The slot's full bit is clear, so the feeder will not queue it while
    // the producer scribbles.
    f(unsafe { core::slice::from_raw_parts_mut(ptr, len) });

    AUDIO.with(|a| {
        let st = a.as_mut().expect("audio closed during write");
        let released = st.ring.release();
        debug_assert_eq!(released, slot);
        // A ring that drained to idle raises no more interrupts; restart
        // the feeder by hand.
        if st.ring.queued() < 2 {
            feed(st);
        }
    });
}

/// Blocking producer copy of exactly one buffer of interleaved samples
/// (`2 * buffer_length()` of them).
pub fn write(samples: &[Sample]) {
    write_with(|buf| {
        assert_eq!(
            samples.len(),
            buf.len(),
            "write takes exactly one buffer of interleaved samples"
        );
        buf.copy_from_slice(samples);
    })
}

/// Blocking release of one buffer of silence.
pub fn write_silence() {
    write_with(|buf| {
        for s in buf.iter_mut() {
            *s = 0;
        }
    })
}

/// Streams `samples` into the ring, fragmenting across buffer boundaries
/// and retaining a partially filled buffer across calls. Returns how many
/// samples were consumed; with `blocking` the answer is `samples.len()`.
pub fn push(samples: &[Sample], blocking: bool) -> usize {
    let mut written = 0;
    while written < samples.len() {
        let dst = AUDIO.with(|a| {
            let st = a.as_mut().expect("audio not initialized");
            let per_buf = st.samples_per_buffer();
            match st.partial {
                Some(ref p) => Some((p.offset, st.buffer_ptr(p.slot), per_buf)),
                None => {
                    if st.ring.can_write() {
                        let slot = st.ring.producer_slot();
                        st.partial = Some(Partial { slot, offset: 0 });
                        Some((0, st.buffer_ptr(slot), per_buf))
                    } else {
                        None
                    }
                }
            }
        });

        let (offset, ptr, per_buf) = match dst {
            Some(d) => d,
            None if blocking => continue, // interrupts enabled between probes
            None => break,
        };

        let chunk = core::cmp::min(per_buf - offset, samples.len() - written);
        unsafe {
            core::ptr::copy_nonoverlapping(
                samples.as_ptr().add(written),
                ptr.add(offset),
                chunk,
            );
        }
        written += chunk;

        AUDIO.with(|a| {
            let st = a.as_mut().expect("audio closed during push");
            if let Some(p) = st.partial.as_mut() {
                p.offset += chunk;
                if p.offset == per_buf {
                    st.partial = None;
                    st.ring.release();
                    if st.ring.queued() < 2 {
                        feed(st);
                    }
                }
            }
        });
    }
    written
}

/// The AI interrupt: one buffer finished (or the queue has room).
fn ai_handler() {
    AUDIO.with(|a| {
        if let Some(st) = a.as_mut() {
            feed(st);
        }
    })
}

/// Tops up the hardware's two-deep queue.
fn feed(st: &mut AudioState) {
    // Cooperate with reset: if less than one buffer-period remains in the
    // grace window, schedule nothing more and let the output fade.
    if let Some(elapsed) = interrupt::exception_reset_time() {
        if elapsed.saturating_add(st.buffer_period())
            > interrupt::RESET_TIME_LENGTH
        {
            return;
        }
    }

    if st.ring.queued() == 2 {
        if st.regs.status.read() & ai::STATUS_FULL != 0 {
            // Both queue slots still occupied; nothing to account for.
            return;
        }
        // One buffer finished since we last looked: retire it.
        st.ring.drain_one();
    }

    while st.ring.queued() < 2 {
        let next = st.ring.next_to_queue();
        if !st.ring.is_full(next) {
            let n = st.samples_per_buffer();
            let buf = unsafe {
                core::slice::from_raw_parts_mut(st.buffer_ptr(next), n)
            };
            match st.fill {
                Fill::User(f) => f(buf),
                Fill::Paused { .. } => {
                    for s in buf.iter_mut() {
                        *s = 0;
                    }
                }
                Fill::None => break,
            }
            st.ring.set_full(next);
        }
        // The full bit is set before the address ever reaches the engine.
        st.regs.dram_addr.write(mem::physical_of(st.buffer_start(next)));
        st.regs.length.write(st.payload_bytes() as u32);
        st.ring.mark_queued();
    }
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    AUDIO.reset_for_test(None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing;

    fn fresh(freq: u32, n: usize) {
        crate::interrupt::reset_for_test();
        crate::sys::emu_set_tv_type(crate::sys::TvType::Ntsc);
        crate::interrupt::init();
        reset_for_test();
        let regs = hw::ai();
        regs.dram_addr.write(0);
        regs.length.write(0);
        regs.control.write(0);
        regs.status.write(0);
        init(freq, n);
    }

    fn snapshot() -> (u8, usize) {
        AUDIO.with(|a| {
            let st = a.as_ref().unwrap();
            (st.ring.queued(), st.ring.empty_cursor())
        })
    }

    fn buffer_addr(slot: usize) -> usize {
        AUDIO.with(|a| a.as_ref().unwrap().buffer_start(slot))
    }

    fn buffer_copy(slot: usize) -> std::vec::Vec<Sample> {
        AUDIO.with(|a| {
            let st = a.as_ref().unwrap();
            let n = st.samples_per_buffer();
            unsafe {
                core::slice::from_raw_parts(st.buffer_ptr(slot) as *const Sample, n)
            }
            .to_vec()
        })
    }

    fn fill_pattern(buf: &mut [Sample]) {
        for s in buf.iter_mut() {
            *s = 0x1234;
        }
    }

    #[test]
    fn divisors_come_from_the_video_clock() {
        let _g = testing::lock();
        fresh(32000, 4);

        // NTSC clock 48_681_812 at a 32 kHz request.
        assert_eq!(hw::ai().dacrate.read(), 1520);
        assert_eq!(hw::ai().samplesize.read(), 1520 / 66);
        assert_eq!(frequency(), 31_995); // 97_363_624 / 3043, floored
        assert_eq!(buffer_length(), 1272); // ~40 ms in whole 8-sample groups
        close();
    }

    #[test]
    fn fill_callback_keeps_the_hardware_fed() {
        let _g = testing::lock();
        fresh(32000, 4);
        set_fill_callback(Some(fill_pattern));

        // Four IRQ cycles against a 4-slot ring. The first interrupt
        // finds the queue empty and fills both hardware slots.
        ai_handler();
        assert_eq!(snapshot(), (2, 0));
        assert_eq!(hw::ai().dram_addr.read(), crate::mem::physical_of(buffer_addr(1)));
        assert_eq!(hw::ai().length.read(), (buffer_length() * 4) as u32);

        // Each later interrupt retires one drained buffer and queues the
        // next; the status register reads not-full throughout.
        ai_handler();
        assert_eq!(snapshot(), (2, 1));
        assert_eq!(hw::ai().dram_addr.read(), crate::mem::physical_of(buffer_addr(2)));

        ai_handler();
        assert_eq!(snapshot(), (2, 2));
        assert_eq!(hw::ai().dram_addr.read(), crate::mem::physical_of(buffer_addr(3)));

        ai_handler();
        // `empty` advanced exactly three times across the four interrupts.
        assert_eq!(snapshot(), (2, 3));
        assert_eq!(hw::ai().dram_addr.read(), crate::mem::physical_of(buffer_addr(0)));

        for slot in 0..4 {
            assert!(
                buffer_copy(slot).iter().all(|&s| s == 0x1234),
                "slot {} must carry synthesized samples",
                slot
            );
        }
        close();
    }

    #[test]
    fn hardware_queue_stalls_when_status_reads_full() {
        let _g = testing::lock();
        fresh(32000, 4);
        set_fill_callback(Some(fill_pattern));

        ai_handler();
        assert_eq!(snapshot(), (2, 0));

        // A spurious interrupt with both slots still occupied must not
        // over-retire.
        hw::ai().status.write(ai::STATUS_FULL);
        ai_handler();
        assert_eq!(snapshot(), (2, 0));
        close();
    }

    #[test]
    fn producer_underrun_falls_silent_without_asserting() {
        let _g = testing::lock();
        fresh(32000, 2);

        // One produced buffer, no fill callback.
        let samples = std::vec![0x5A5A; buffer_length() * 2];
        write(&samples);

        // The release kick-started the feeder.
        assert_eq!(snapshot(), (1, 0));
        assert_eq!(hw::ai().dram_addr.read(), crate::mem::physical_of(buffer_addr(0)));
        let programmed = hw::ai().dram_addr.read();

        // The next interrupt finds nothing full and programs no new DMA.
        ai_handler();
        assert_eq!(snapshot(), (1, 0));
        assert_eq!(hw::ai().dram_addr.read(), programmed);
        assert_eq!(buffer_copy(0), samples);
        close();
    }

    #[test]
    fn pause_swaps_in_silence_and_restores_verbatim() {
        let _g = testing::lock();
        fresh(32000, 4);
        set_fill_callback(Some(fill_pattern));

        pause(true);
        ai_handler();
        assert!(buffer_copy(0).iter().all(|&s| s == 0));

        pause(false);
        ai_handler(); // retires slot 0, synthesizes slot 2
        assert!(buffer_copy(2).iter().all(|&s| s == 0x1234));

        // Pause without a callback installed has no effect.
        set_fill_callback(None);
        pause(true);
        pause(false);
        assert!(AUDIO.with(|a| matches!(
            a.as_ref().unwrap().fill,
            Fill::None
        )));
        close();
    }

    #[test]
    fn push_fragments_across_buffer_boundaries() {
        let _g = testing::lock();
        fresh(32000, 4);

        let per_buf = buffer_length() * 2;
        let stream = std::vec![7i16; per_buf + per_buf / 2];

        let n = push(&stream, false);
        assert_eq!(n, stream.len(), "plenty of ring space");
        // One whole buffer released (and kick-started), half a buffer
        // retained for the next call.
        assert_eq!(snapshot(), (1, 0));
        assert!(AUDIO.with(|a| {
            let st = a.as_ref().unwrap();
            matches!(st.partial, Some(Partial { slot: 1, offset }) if offset == per_buf / 2)
        }));

        // Completing the slot releases it.
        let n = push(&std::vec![7i16; per_buf / 2], false);
        assert_eq!(n, per_buf / 2);
        assert!(AUDIO.with(|a| a.as_ref().unwrap().partial.is_none()));
        close();
    }

    #[test]
    fn nonblocking_push_stops_at_a_full_ring() {
        let _g = testing::lock();
        fresh(32000, 1);

        let per_buf = buffer_length() * 2;
        let stream = std::vec![3i16; per_buf * 2];
        let n = push(&stream, false);
        // One buffer fits; it immediately queues, and the single-slot ring
        // then refuses more until the hardware drains.
        assert_eq!(n, per_buf);
        close();
    }

    #[test]
    fn buffers_never_end_on_the_forbidden_boundary() {
        let _g = testing::lock();
        fresh(44100, 8);

        let payload = buffer_length() * 4;
        for slot in 0..8 {
            assert!(
                (buffer_addr(slot) + payload) & 0x1FFF != 0,
                "slot {} ends on a carry-bug boundary",
                slot
            );
        }
        close();

        // The nudge rule itself.
        assert_eq!(shifted_start(0x1000, 0x1000), 0x1004);
        assert_eq!(shifted_start(0x1008, 0x1000), 0x1008);
    }

    #[test]
    fn feeder_winds_down_inside_the_reset_grace_window() {
        let _g = testing::lock();
        fresh(32000, 4);
        set_fill_callback(Some(fill_pattern));

        // Pre-NMI fires; almost the whole grace window elapses.
        crate::vr4300::emu_set_count(10_000);
        crate::interrupt::dispatch_prenmi();
        crate::vr4300::emu_set_count(10_000 + crate::interrupt::RESET_TIME_LENGTH - 1000);

        ai_handler();
        assert_eq!(snapshot(), (0, 0), "no buffer fits before the reset");
        close();
    }
}
