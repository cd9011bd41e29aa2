//! Video display management: multi-buffered presentation on the vertical
//! blank.
//!
//! The scan-out engine reads one framebuffer continuously; everything else
//! is software convention. Producers acquire surfaces with [`get`] /
//! [`try_get`], draw (or hand them to the rasterizer), and release them
//! with [`show`]; the vertical-blank interrupt walks released surfaces in
//! ring order and retargets the engine's origin register during the blank,
//! the only tear-free moment. Late releases block later ones: frames are
//! presented in ring order, never reordered.
//!
//! Interrupts must be initialized before [`init`].

mod fps;
mod mode;
mod slots;

pub use self::mode::{
    Depth, Filters, Gamma, Interlace, Resolution, VideoConfig,
    RESOLUTION_256X240, RESOLUTION_320X240, RESOLUTION_512X480,
    RESOLUTION_640X480,
};

use alloc::vec::Vec;

use crate::hw;
use crate::hw::vi;
use crate::interrupt::{self, Source};
use crate::mem::{self, UncachedBytes};
use crate::sys;
use crate::ticks;
use crate::util::irq_cell::IrqCell;

use self::fps::{FpsWindow, FrameLimiter, Kalman, SmoothedFps};
use self::mode::TvPreset;
use self::slots::SlotArbiter;

/// Bounded probe count of [`get`]: enough for an externally queued
/// rasterizer to finish a frame, while still returning on a misconfigured
/// pipeline instead of hanging it.
const GET_RETRIES: usize = 200;

struct VideoState {
    regs: &'static vi::ViRegisters,
    config: VideoConfig,
    preset: &'static TvPreset,
    framebuffers: Vec<UncachedBytes>,
    slots: SlotArbiter,
    window: FpsWindow,
    delta: Kalman,
    smoothed: SmoothedFps,
    limiter: FrameLimiter,
    last_present: Option<u32>,
}

static VIDEO: IrqCell<Option<VideoState>> = IrqCell::new(None);

/// An acquired framebuffer. Draw into it, then pass it back to [`show`];
/// consuming it there is what keeps a slot from being released twice.
pub struct Framebuffer {
    slot: usize,
    ptr: *mut u8,
    width: u32,
    height: u32,
    depth: Depth,
}

impl Framebuffer {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }

    /// Bytes per line (surfaces are tightly packed).
    pub fn stride(&self) -> usize {
        self.width as usize * self.depth.bytes()
    }

    /// The uncached CPU address of the pixel data. The rasterizer
    /// collaborator points its color image here.
    pub fn address(&self) -> usize {
        self.ptr as usize
    }

    /// The physical address, as DMA engines want it.
    pub fn physical_address(&self) -> u32 {
        mem::physical_of(self.ptr as usize)
    }

    /// The pixels as RGBA 5-5-5-1 words.
    ///
    /// # Panics
    ///
    /// If the display is not 16 bpp.
    pub fn pixels16(&mut self) -> &mut [crate::Pixel16] {
        assert!(self.depth == Depth::Bpp16, "display is not 16 bpp");
        let n = self.width as usize * self.height as usize;
        unsafe {
            core::slice::from_raw_parts_mut(self.ptr as *mut crate::Pixel16, n)
        }
    }

    /// The pixels as RGBA 8-8-8-8 words.
    ///
    /// # Panics
    ///
    /// If the display is not 32 bpp.
    pub fn pixels32(&mut self) -> &mut [crate::Pixel32] {
        assert!(self.depth == Depth::Bpp32, "display is not 32 bpp");
        let n = self.width as usize * self.height as usize;
        unsafe {
            core::slice::from_raw_parts_mut(self.ptr as *mut crate::Pixel32, n)
        }
    }
}

/// Brings the display up: allocates the framebuffers, merges the TV preset
/// with the user configuration, programs the scan-out engine inside a
/// masked section, and hooks the vertical-blank interrupt.
///
/// # Panics
///
/// If already initialized; if `config.buffers` is outside `[1, 32]`; if
/// memory runs out; or on mode combinations the hardware mishandles (16
/// bpp at widths of 320 or less cannot bypass the resampler -- use
/// `Filters::Resample`).
pub fn init(config: VideoConfig) {
    assert!(
        config.buffers >= 1 && config.buffers <= 32,
        "framebuffer count out of range"
    );
    // Known-buggy combination: with the scaler bypassed the fetch unit
    // mangles narrow 16 bpp lines.
    assert!(
        !(config.depth == Depth::Bpp16
            && config.resolution.width <= 320
            && config.filters == Filters::Disabled),
        "16 bpp widths of 320 or less cannot run with filters disabled; use Filters::Resample"
    );

    let preset = mode::preset_for(sys::tv_type());
    let width = config.resolution.width;
    let height = config.resolution.height;

    // Two lines of slack: the engine over-reads at frame end.
    let fb_bytes = width as usize * (height as usize + 2) * config.depth.bytes();
    let mut framebuffers = Vec::with_capacity(config.buffers);
    for _ in 0..config.buffers {
        let fb = UncachedBytes::alloc(fb_bytes, 64);
        unsafe { core::ptr::write_bytes(fb.as_mut_ptr(), 0, fb_bytes) };
        framebuffers.push(fb);
    }

    let regs = hw::vi();
    let serrate = config.resolution.interlace != Interlace::Off;

    // The whole mode change must hit the engine as one unit.
    interrupt::disable();
    regs.origin.write(mem::physical_of(framebuffers[0].addr()));
    regs.width.write(width);
    regs.v_int.write(2);
    regs.v_current.write(0);
    regs.burst.write(preset.burst);
    // Interlaced signals drop the extra half-line.
    regs.v_sync.write(preset.v_sync - serrate as u32);
    regs.h_sync.write(preset.h_sync);
    regs.h_sync_leap.write(preset.leap);
    regs.h_video.write(preset.h_video);
    regs.v_video.write(preset.v_video);
    regs.v_burst.write(preset.v_burst);
    regs.x_scale.write(0x400 * width / 640);
    let field_lines = if config.resolution.interlace == Interlace::Full {
        height / 2
    } else {
        height
    };
    regs.y_scale.write(0x400 * field_lines / preset.visible_lines);
    regs.ctrl.write(mode::control_word(&config, sys::is_variant_console()));
    interrupt::enable();

    VIDEO.with(|v| {
        assert!(v.is_none(), "video already initialized; close it first");
        *v = Some(VideoState {
            regs,
            config,
            preset,
            framebuffers,
            slots: SlotArbiter::new(config.buffers),
            window: FpsWindow::new(),
            delta: Kalman::new(0.05, 0.3),
            smoothed: SmoothedFps::new(),
            limiter: FrameLimiter::new(),
            last_present: None,
        });
    });

    interrupt::register(Source::Vi, vi_handler);
    interrupt::set_enabled(Source::Vi, true);
}

/// Shuts the display down, blanking the output and freeing every
/// framebuffer. Calling it again is a no-op.
pub fn close() {
    let st = VIDEO.with(|v| v.take());
    if let Some(st) = st {
        interrupt::set_enabled(Source::Vi, false);
        interrupt::unregister(Source::Vi, vi_handler);
        st.regs.ctrl.write(vi::CTRL_TYPE_BLANK);
        drop(st);
    }
}

/// Non-blocking surface acquire: the first slot (scanning from one past
/// the displayed one) that no producer holds and no release is pending on.
pub fn try_get() -> Option<Framebuffer> {
    VIDEO.with(|v| {
        v.as_mut().and_then(|st| {
            st.slots.try_acquire().map(|slot| st.surface(slot))
        })
    })
}

/// Blocking surface acquire: [`try_get`] in a bounded spin. Interrupts are
/// enabled between probes, so the vertical blank can vacate a slot during
/// the wait. Returns `None` if none frees within the bound (or the display
/// is closed).
pub fn get() -> Option<Framebuffer> {
    for _ in 0..GET_RETRIES {
        if let Some(fb) = try_get() {
            return Some(fb);
        }
    }
    None
}

/// Releases a drawn surface for presentation and stamps the frame-rate
/// window. The release order does not change presentation order; the blank
/// consumes releases in ring order.
pub fn show(fb: Framebuffer) {
    VIDEO.with(|v| {
        let st = v.as_mut().expect("video not initialized");
        st.slots.release(fb.slot);
        st.window.push(ticks::now());
    })
}

/// Width in pixels, or 0 while closed.
pub fn width() -> u32 {
    VIDEO.with(|v| v.as_ref().map(|st| st.config.resolution.width).unwrap_or(0))
}

/// Height in pixels, or 0 while closed.
pub fn height() -> u32 {
    VIDEO.with(|v| {
        v.as_ref().map(|st| st.config.resolution.height).unwrap_or(0)
    })
}

/// Configured pixel depth; `None` while closed.
pub fn bit_depth() -> Option<Depth> {
    VIDEO.with(|v| v.as_ref().map(|st| st.config.depth))
}

/// Number of framebuffers, or 0 while closed.
pub fn buffer_count() -> usize {
    VIDEO.with(|v| v.as_ref().map(|st| st.config.buffers).unwrap_or(0))
}

/// The smoothed frames-per-second estimate (released frames, not scan-out
/// rate). Updates a few times a second.
pub fn fps() -> f32 {
    VIDEO.with(|v| v.as_ref().map(|st| st.smoothed.shown()).unwrap_or(0.0))
}

/// The reactive estimate of seconds between presented frames.
pub fn delta_time() -> f32 {
    VIDEO.with(|v| v.as_ref().map(|st| st.delta.value()).unwrap_or(0.0))
}

/// The hardware vertical interrupt rate for the current TV standard.
pub fn refresh_rate() -> f32 {
    VIDEO.with(|v| v.as_ref().map(|st| st.preset.refresh_hz).unwrap_or(0.0))
}

/// Caps presentation at `target` frames per second by skipping vertical
/// blanks (0 disables the cap). Producers throttle naturally as released
/// frames back up.
pub fn set_fps_limit(target: f32) {
    VIDEO.with(|v| {
        let st = v.as_mut().expect("video not initialized");
        st.limiter.set_target(target);
    })
}

/// The uncached address of the surface currently being scanned out, or
/// `None` while closed.
pub fn showing_address() -> Option<usize> {
    VIDEO.with(|v| {
        v.as_ref().map(|st| {
            st.framebuffers[st.slots.now_showing() as usize].addr()
        })
    })
}

impl VideoState {
    fn surface(&self, slot: usize) -> Framebuffer {
        Framebuffer {
            slot,
            ptr: self.framebuffers[slot].as_mut_ptr(),
            width: self.config.resolution.width,
            height: self.config.resolution.height,
            depth: self.config.depth,
        }
    }

    /// Ticks of one scan-out cycle.
    fn frame_ticks(&self) -> u32 {
        (ticks::TICKS_PER_SECOND as f32 / self.preset.refresh_hz) as u32
    }

    /// The vertical-blank step.
    fn vblank(&mut self) {
        // A machine committing to reset stops presenting: if one more
        // scan-out cycle would run past the grace window, leave the engine
        // on the current frame.
        if let Some(elapsed) = interrupt::exception_reset_time() {
            if elapsed.saturating_add(self.frame_ticks())
                > interrupt::RESET_TIME_LENGTH
            {
                return;
            }
        }

        let field = self.regs.v_current.read() & 1;

        // Full-frame interlace presents on the even field only; the odd
        // field re-scans the current frame's other half.
        let field_skip =
            self.config.resolution.interlace == Interlace::Full && field != 0;

        if !field_skip && self.limiter.step(self.preset.refresh_hz) {
            if self.slots.present_next().is_some() {
                let now = ticks::now();
                if let Some(last) = self.last_present {
                    let dt = now.wrapping_sub(last) as f32
                        / ticks::TICKS_PER_SECOND as f32;
                    self.delta.update(dt);
                }
                self.last_present = Some(now);
                self.smoothed.update(self.window.rate(), now);
            }
        }

        self.program_origin(field);
    }

    /// Points the engine at the current surface; the odd field of a
    /// full-interlaced frame starts one line down.
    fn program_origin(&self, field: u32) {
        let slot = self.slots.now_showing() as usize;
        let mut addr = mem::physical_of(self.framebuffers[slot].addr());
        if self.config.resolution.interlace == Interlace::Full && field != 0 {
            addr += (self.config.resolution.width as usize
                * self.config.depth.bytes()) as u32;
        }
        self.regs.origin.write(addr);
    }
}

/// The vertical-blank interrupt: wire [`Source::Vi`]'s dispatch here (done
/// by [`init`]).
fn vi_handler() {
    VIDEO.with(|v| {
        if let Some(st) = v.as_mut() {
            st.vblank();
        }
    })
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    VIDEO.reset_for_test(None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing;

    fn fresh(config: VideoConfig) {
        crate::interrupt::reset_for_test();
        crate::sys::emu_set_tv_type(crate::sys::TvType::Ntsc);
        crate::sys::emu_set_variant_console(false);
        crate::interrupt::init();
        reset_for_test();
        let regs = hw::vi();
        regs.ctrl.write(0);
        regs.origin.write(0);
        regs.v_current.write(0);
        init(config);
    }

    fn double_buffer_config() -> VideoConfig {
        VideoConfig::default()
    }

    fn vblank() {
        vi_handler();
    }

    fn fb_physical(slot: usize) -> u32 {
        VIDEO.with(|v| {
            mem::physical_of(v.as_ref().unwrap().framebuffers[slot].addr())
        })
    }

    #[test]
    fn init_programs_the_mode_registers() {
        let _g = testing::lock();
        fresh(double_buffer_config());

        let regs = hw::vi();
        assert_eq!(regs.width.read(), 320);
        assert_eq!(regs.burst.read(), 0x03E5_2239);
        assert_eq!(regs.v_sync.read(), 0x20D, "progressive keeps the half-line");
        assert_eq!(regs.x_scale.read(), 0x200);
        assert_eq!(regs.y_scale.read(), 0x400);
        assert_eq!(regs.origin.read(), fb_physical(0));
        assert_eq!(regs.ctrl.read() & 0b11, 2, "16 bpp");
        close();
        assert_eq!(hw::vi().ctrl.read(), 0, "closed display blanks the output");
    }

    #[test]
    fn double_buffer_steady_state_presents_in_order() {
        let _g = testing::lock();
        fresh(double_buffer_config());

        // Acquire/release A, then B, then reacquire A after the blank
        // vacates it.
        let a = get().expect("first surface");
        let a_slot = a.slot;
        show(a);
        vblank();
        assert_eq!(hw::vi().origin.read(), fb_physical(a_slot));

        let b = get().expect("second surface");
        let b_slot = b.slot;
        assert_ne!(a_slot, b_slot);
        show(b);
        vblank();
        assert_eq!(hw::vi().origin.read(), fb_physical(b_slot));

        let again = get().expect("vacated surface");
        assert_eq!(again.slot, a_slot);
        drop(again);
        close();
    }

    #[test]
    fn presentation_waits_for_the_ring_order_release() {
        let _g = testing::lock();
        let mut config = double_buffer_config();
        config.buffers = 3;
        fresh(config);

        let first = try_get().unwrap();
        let second = try_get().unwrap();
        let (fs, ss) = (first.slot, second.slot);

        show(second);
        vblank();
        // The earlier slot has not been released; nothing presents.
        assert_eq!(hw::vi().origin.read(), fb_physical(0));

        show(first);
        vblank();
        assert_eq!(hw::vi().origin.read(), fb_physical(fs));
        vblank();
        assert_eq!(hw::vi().origin.read(), fb_physical(ss));
        close();
    }

    #[test]
    fn single_buffer_hands_out_the_displayed_surface() {
        let _g = testing::lock();
        let mut config = double_buffer_config();
        config.buffers = 1;
        fresh(config);

        // The only slot, then a bounded refusal.
        let only = get().expect("the single surface");
        assert_eq!(only.slot, 0);
        assert!(get().is_none(), "second get must give up after its spin");
        show(only);
        close();
    }

    #[test]
    fn get_without_init_returns_nothing() {
        let _g = testing::lock();
        crate::interrupt::reset_for_test();
        crate::interrupt::init();
        reset_for_test();
        assert!(get().is_none());
    }

    #[test]
    fn full_interlace_skips_the_odd_field_and_offsets_origin() {
        let _g = testing::lock();
        let mut config = double_buffer_config();
        config.resolution = RESOLUTION_640X480;
        config.depth = Depth::Bpp32;
        fresh(config);

        assert_eq!(hw::vi().v_sync.read(), 0x20C, "interlace drops a half-line");
        assert!(hw::vi().ctrl.read() & vi::CTRL_SERRATE != 0);

        let fb = get().unwrap();
        let slot = fb.slot;
        show(fb);

        // Odd field: no presentation, but the second half-frame of the
        // current surface is scanned one line down.
        hw::vi().v_current.write(1);
        vblank();
        assert_eq!(hw::vi().origin.read(), fb_physical(0) + 640 * 4);

        // Even field: the released frame goes up.
        hw::vi().v_current.write(0);
        vblank();
        assert_eq!(hw::vi().origin.read(), fb_physical(slot));
        close();
    }

    #[test]
    fn fps_limit_skips_blanks_but_keeps_ring_order() {
        let _g = testing::lock();
        let mut config = double_buffer_config();
        config.buffers = 4;
        fresh(config);
        set_fps_limit(30.0);

        let fb = get().unwrap();
        let slot = fb.slot;
        show(fb);

        // 30 on 60 Hz: every other blank presents.
        vblank();
        assert_eq!(hw::vi().origin.read(), fb_physical(0), "first blank skipped");
        vblank();
        assert_eq!(hw::vi().origin.read(), fb_physical(slot));
        close();
    }

    #[test]
    fn presentation_halts_inside_the_reset_grace_window() {
        let _g = testing::lock();
        fresh(double_buffer_config());

        crate::vr4300::emu_set_count(5_000);
        crate::interrupt::dispatch_prenmi();
        crate::vr4300::emu_set_count(
            5_000 + crate::interrupt::RESET_TIME_LENGTH - 100,
        );

        let fb = get().unwrap();
        show(fb);
        vblank();
        assert_eq!(
            hw::vi().origin.read(),
            fb_physical(0),
            "no retarget once the machine commits to reset"
        );
        close();
    }

    #[test]
    fn delta_time_tracks_uniform_presents() {
        let _g = testing::lock();
        fresh(double_buffer_config());

        let period = ticks::TICKS_PER_SECOND / 60;
        for i in 0..40u32 {
            crate::vr4300::emu_set_count(i * period);
            if let Some(fb) = try_get() {
                show(fb);
            }
            vblank();
        }
        let dt = delta_time();
        assert!(
            (dt - 1.0 / 60.0).abs() < 0.001,
            "delta_time {} for a 60 Hz cadence",
            dt
        );
        assert!(fps() > 0.0);
        close();
    }

    #[test]
    #[should_panic(expected = "use Filters::Resample")]
    fn buggy_filter_combination_asserts() {
        let _g = testing::lock();
        let mut config = double_buffer_config();
        config.filters = Filters::Disabled;
        fresh(config);
    }

    #[test]
    fn close_twice_is_a_no_op() {
        let _g = testing::lock();
        fresh(double_buffer_config());
        close();
        close();
    }
}
