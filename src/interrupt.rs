//! Interrupt management: critical sections and per-source dispatch.
//!
//! Hardware events reach application code exactly one way: the boot stub's
//! exception vector decodes the Cause register and calls one of the
//! `dispatch_*` entry points below, which acknowledges the device and fans
//! the event out to registered handlers.
//!
//! # Critical sections
//!
//! [`disable`]/[`enable`] nest. The first `disable` snapshots the Status
//! word and masks the global enable; the matching outermost `enable`
//! restores it. The nesting counter only ever moves while the hardware is
//! masked, so a late-arriving interrupt can never observe a half-updated
//! counter.
//!
//! # Wiring
//!
//! This crate does not own the exception vector. In the simplest case the
//! application's stub looks like:
//!
//! ```ignore
//! let pending = cause & status_mask;
//! if pending & cause::IP_RCP != 0 { interrupt::dispatch_rcp(); }
//! if pending & cause::IP_PRENMI != 0 { interrupt::dispatch_prenmi(); }
//! if pending & cause::IP_CART != 0 { interrupt::dispatch_cart(); }
//! if pending & cause::IP_TIMER != 0 { interrupt::dispatch_timer(); }
//! ```

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use arrayvec::ArrayVec;

use crate::hw;
use crate::hw::mi;
use crate::ticks;
use crate::util::irq_cell::IrqCell;
use crate::vr4300::{self, status};

/// The Cause register's pending-line bits, for the application's exception
/// stub to route on.
pub use crate::vr4300::cause;

/// An interrupt callback. Identity for [`unregister`] is the function
/// pointer itself.
pub type IrqHandler = fn();

/// The interrupt sources this machine has.
///
/// The first eight arrive multiplexed on the RCP line through the MIPS
/// interface; `Timer`, `Cart` and `Prenmi` are dedicated CPU lines. `Usb0`
/// and `Usb1` exist only on the platform-variant console and never fire on
/// retail units.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Source {
    Ai,
    Vi,
    Pi,
    Dp,
    Si,
    Sp,
    Usb0,
    Usb1,
    Timer,
    Cart,
    Prenmi,
}

/// Answer from [`state`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    Uninitialized,
    Enabled,
    Disabled,
}

/// Ticks of warning the machine gives between the pre-NMI signal and the
/// actual reset: about half a second. Schedulers use what is left of this
/// window to wind down cleanly.
pub const RESET_TIME_LENGTH: u32 = ticks::TICKS_PER_SECOND / 2;

const MAX_HANDLERS: usize = 8;
const MAX_RESET_HANDLERS: usize = 4;

type HandlerList = ArrayVec<[IrqHandler; MAX_HANDLERS]>;

struct Handlers {
    ai: HandlerList,
    vi: HandlerList,
    pi: HandlerList,
    dp: HandlerList,
    si: HandlerList,
    sp: HandlerList,
    usb0: HandlerList,
    usb1: HandlerList,
    timer: HandlerList,
    cart: HandlerList,
    /// Reset handlers live in a smaller bound; overflowing it is a
    /// programmer error per the contract.
    reset: ArrayVec<[IrqHandler; MAX_RESET_HANDLERS]>,
}

impl Handlers {
    fn new() -> Self {
        Handlers {
            ai: ArrayVec::new(),
            vi: ArrayVec::new(),
            pi: ArrayVec::new(),
            dp: ArrayVec::new(),
            si: ArrayVec::new(),
            sp: ArrayVec::new(),
            usb0: ArrayVec::new(),
            usb1: ArrayVec::new(),
            timer: ArrayVec::new(),
            cart: ArrayVec::new(),
            reset: ArrayVec::new(),
        }
    }

    fn list_mut(&mut self, source: Source) -> &mut HandlerList {
        match source {
            Source::Ai => &mut self.ai,
            Source::Vi => &mut self.vi,
            Source::Pi => &mut self.pi,
            Source::Dp => &mut self.dp,
            Source::Si => &mut self.si,
            Source::Sp => &mut self.sp,
            Source::Usb0 => &mut self.usb0,
            Source::Usb1 => &mut self.usb1,
            Source::Timer => &mut self.timer,
            Source::Cart => &mut self.cart,
            Source::Prenmi => panic!("reset handlers have their own slots"),
        }
    }
}

/// Nesting depth: negative before [`init`], zero while enabled, `k` after
/// `k` nested disables.
static DEPTH: AtomicI32 = AtomicI32::new(-1);

/// Status snapshot from the 0 -> 1 depth transition. Only written while
/// interrupts are masked.
static SAVED_STATUS: AtomicU32 = AtomicU32::new(0);

static HANDLERS: IrqCell<Option<Handlers>> = IrqCell::new(None);

static PRENMI_STAMPED: AtomicBool = AtomicBool::new(false);
static PRENMI_STAMP: AtomicU32 = AtomicU32::new(0);

/// Consecutive cartridge dispatches with no other interrupt activity. The
/// cartridge line is level-triggered and acknowledged by the handler; a
/// handler that forgets leaves the dispatcher spinning, which the debug
/// build makes visible instead of hanging silently.
static CART_STORM: AtomicU32 = AtomicU32::new(0);

const ALL_MASK_CLR: u32 = mi::MASK_CLR_SP
    | mi::MASK_CLR_SI
    | mi::MASK_CLR_AI
    | mi::MASK_CLR_VI
    | mi::MASK_CLR_PI
    | mi::MASK_CLR_DP
    | mi::MASK_CLR_USB0
    | mi::MASK_CLR_USB1;

fn mi_mask_write(bits: u32) {
    #[cfg(target_os = "none")]
    hw::mi().mask.write(bits);
    // The emulated mask register applies the set/clear pairs itself so
    // read-back behaves like the hardware.
    #[cfg(not(target_os = "none"))]
    hw::mi().emu_apply_mask_write(bits);
}

/// Brings the interrupt system up: every device masked at the multiplexer,
/// handler tables empty, depth zero, and the RCP, cartridge and pre-NMI
/// lines unmasked at the CPU.
///
/// The first call wins; later calls are no-ops.
pub fn init() {
    if DEPTH.load(Ordering::Relaxed) >= 0 {
        return;
    }

    mi_mask_write(ALL_MASK_CLR);
    HANDLERS.with(|h| *h = Some(Handlers::new()));

    let sr = vr4300::read_status();
    // Depth becomes "enabled" before the hardware unmasks, mirroring the
    // enable() ordering rule.
    DEPTH.store(0, Ordering::Relaxed);
    vr4300::write_status(
        sr | status::IE | status::IM_RCP | status::IM_CART | status::IM_PRENMI,
    );
}

/// Enters a critical section. Nests; a no-op before [`init`].
pub fn disable() {
    let depth = DEPTH.load(Ordering::Relaxed);
    if depth < 0 {
        return;
    }
    let sr = vr4300::read_status();
    vr4300::write_status(sr & !status::IE);
    // The counter only moves once the hardware is actually masked.
    if depth == 0 {
        SAVED_STATUS.store(sr, Ordering::Relaxed);
    }
    DEPTH.store(depth + 1, Ordering::Relaxed);
}

/// Leaves a critical section, restoring the snapshotted enable bit when the
/// outermost one unwinds.
///
/// # Panics
///
/// On underflow: more `enable` calls than `disable` calls is a programmer
/// error.
pub fn enable() {
    let depth = DEPTH.load(Ordering::Relaxed);
    if depth < 0 {
        return;
    }
    assert!(depth > 0, "unbalanced interrupt enable");
    // Counter first, then unmask, so an interrupt arriving during the
    // transition sees a consistent depth.
    DEPTH.store(depth - 1, Ordering::Relaxed);
    if depth == 1 {
        let saved = SAVED_STATUS.load(Ordering::Relaxed);
        let sr = vr4300::read_status();
        vr4300::write_status((sr & !status::IE) | (saved & status::IE));
    }
}

/// Reports whether interrupts are uninitialized, enabled, or inside a
/// critical section.
pub fn state() -> State {
    let depth = DEPTH.load(Ordering::Relaxed);
    if depth < 0 {
        State::Uninitialized
    } else if depth == 0 {
        State::Enabled
    } else {
        State::Disabled
    }
}

/// Registers `handler` for `source`. Most recently registered handlers are
/// dispatched first.
///
/// # Panics
///
/// If [`init`] has not run, or a list is full (for `Source::Prenmi`, more
/// than four reset handlers).
pub fn register(source: Source, handler: IrqHandler) {
    HANDLERS.with(|h| {
        let h = h.as_mut().expect("interrupt system not initialized");
        if source == Source::Prenmi {
            assert!(
                h.reset.len() < MAX_RESET_HANDLERS,
                "too many reset handlers"
            );
            h.reset.push(handler);
        } else {
            let list = h.list_mut(source);
            assert!(
                list.len() < MAX_HANDLERS,
                "too many handlers for interrupt source"
            );
            list.push(handler);
        }
    })
}

/// Removes the most recently registered occurrence of `handler` from
/// `source`'s list. Unknown handlers are ignored.
pub fn unregister(source: Source, handler: IrqHandler) {
    HANDLERS.with(|h| {
        let h = h.as_mut().expect("interrupt system not initialized");
        if source == Source::Prenmi {
            for i in (0..h.reset.len()).rev() {
                if h.reset[i] as usize == handler as usize {
                    h.reset.remove(i);
                    return;
                }
            }
        } else {
            let list = h.list_mut(source);
            for i in (0..list.len()).rev() {
                if list[i] as usize == handler as usize {
                    list.remove(i);
                    return;
                }
            }
        }
    })
}

/// Unmasks or masks one source at its controller: the MIPS interface for
/// RCP devices, the Status register interrupt masks for the CPU lines.
pub fn set_enabled(source: Source, on: bool) {
    match source {
        Source::Sp => mi_mask_write(pick(on, mi::MASK_SET_SP, mi::MASK_CLR_SP)),
        Source::Si => mi_mask_write(pick(on, mi::MASK_SET_SI, mi::MASK_CLR_SI)),
        Source::Ai => mi_mask_write(pick(on, mi::MASK_SET_AI, mi::MASK_CLR_AI)),
        Source::Vi => mi_mask_write(pick(on, mi::MASK_SET_VI, mi::MASK_CLR_VI)),
        Source::Pi => mi_mask_write(pick(on, mi::MASK_SET_PI, mi::MASK_CLR_PI)),
        Source::Dp => mi_mask_write(pick(on, mi::MASK_SET_DP, mi::MASK_CLR_DP)),
        Source::Usb0 => {
            mi_mask_write(pick(on, mi::MASK_SET_USB0, mi::MASK_CLR_USB0))
        }
        Source::Usb1 => {
            mi_mask_write(pick(on, mi::MASK_SET_USB1, mi::MASK_CLR_USB1))
        }
        Source::Timer => cop0_mask(status::IM_TIMER, on),
        Source::Cart => cop0_mask(status::IM_CART, on),
        Source::Prenmi => cop0_mask(status::IM_PRENMI, on),
    }
}

fn pick(on: bool, set: u32, clr: u32) -> u32 {
    if on {
        set
    } else {
        clr
    }
}

fn cop0_mask(bit: u32, on: bool) {
    disable();
    let sr = vr4300::read_status();
    vr4300::write_status(if on { sr | bit } else { sr & !bit });
    enable();
}

/// Arms the COP0 Compare timer. Timer handlers call this to set their next
/// deadline; the write doubles as the interrupt acknowledgement.
pub fn set_compare(deadline: u32) {
    vr4300::write_compare(deadline);
}

/// Ticks elapsed since the pre-NMI signal fired, or `None` if the machine
/// is not resetting. Compare against [`RESET_TIME_LENGTH`].
pub fn exception_reset_time() -> Option<u32> {
    if PRENMI_STAMPED.load(Ordering::Acquire) {
        Some(ticks::since(PRENMI_STAMP.load(Ordering::Relaxed)))
    } else {
        None
    }
}

fn run_handlers(source: Source) {
    // Copy the list out so a handler may register/unregister without
    // aliasing the table mid-walk.
    let list =
        HANDLERS.with(|h| h.as_mut().map(|h| h.list_mut(source).clone()));
    if let Some(list) = list {
        for f in list.iter().rev() {
            f();
        }
    }
}

/// Entry point for the RCP aggregate line: reads the masked device status,
/// acknowledges each pending device, and walks its handlers.
pub fn dispatch_rcp() {
    CART_STORM.store(0, Ordering::Relaxed);

    let mi = hw::mi();
    let pending = mi.interrupt.read() & mi.mask.read();

    if pending & mi::INTR_SP != 0 {
        hw::sp().status.write(crate::hw::misc::SP_WSTATUS_CLEAR_INTR);
        run_handlers(Source::Sp);
    }
    if pending & mi::INTR_SI != 0 {
        hw::si().status.write(0);
        run_handlers(Source::Si);
    }
    if pending & mi::INTR_AI != 0 {
        hw::ai().status.write(0);
        run_handlers(Source::Ai);
    }
    if pending & mi::INTR_VI != 0 {
        // The scan-out engine is acknowledged by writing the current-line
        // register back to itself.
        let vi = hw::vi();
        vi.v_current.write(vi.v_current.read());
        run_handlers(Source::Vi);
    }
    if pending & mi::INTR_PI != 0 {
        hw::pi().status.write(crate::hw::pi::WSTATUS_CLEAR_INTERRUPT);
        run_handlers(Source::Pi);
    }
    if pending & mi::INTR_DP != 0 {
        // The rasterizer is acknowledged through the shared mode register.
        mi.mode.write(mi::MODE_CLR_DP_INTERRUPT);
        run_handlers(Source::Dp);
    }
    if pending & mi::INTR_USB0 != 0 {
        hw::usb0().status.write(0);
        run_handlers(Source::Usb0);
    }
    if pending & mi::INTR_USB1 != 0 {
        hw::usb1().status.write(0);
        run_handlers(Source::Usb1);
    }
}

/// Entry point for the pre-NMI line. The hardware keeps the line asserted
/// until the NMI actually lands, so there is no acknowledgement; the first
/// edge is stamped and later invocations do nothing. Reset handlers run at
/// most once per reset.
pub fn dispatch_prenmi() {
    if PRENMI_STAMPED.swap(true, Ordering::AcqRel) {
        return;
    }
    PRENMI_STAMP.store(ticks::now(), Ordering::Relaxed);

    let list = HANDLERS.with(|h| h.as_mut().map(|h| h.reset.clone()));
    if let Some(list) = list {
        for f in list.iter().rev() {
            f();
        }
    }
}

/// Entry point for the cartridge line. Acknowledgement is the handler's
/// duty (the device behind the bus decides how); the debug build trips an
/// assertion if nobody does and the line storms.
pub fn dispatch_cart() {
    let storm = CART_STORM.fetch_add(1, Ordering::Relaxed) + 1;
    debug_assert!(
        storm < 128,
        "cartridge interrupt storming; a handler must acknowledge the device"
    );
    run_handlers(Source::Cart);
}

/// Entry point for the COP0 Compare timer line.
pub fn dispatch_timer() {
    CART_STORM.store(0, Ordering::Relaxed);
    // Rewriting Compare acknowledges the line; handlers re-arm it with
    // `set_compare` if they want another tick.
    vr4300::write_compare(vr4300::read_compare());
    run_handlers(Source::Timer);
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    DEPTH.store(-1, Ordering::SeqCst);
    SAVED_STATUS.store(0, Ordering::SeqCst);
    PRENMI_STAMPED.store(false, Ordering::SeqCst);
    PRENMI_STAMP.store(0, Ordering::SeqCst);
    CART_STORM.store(0, Ordering::SeqCst);
    HANDLERS.reset_for_test(None);
    vr4300::write_status(0);
    let mi = hw::mi();
    mi.mode.write(0);
    mi.interrupt.write(0);
    mi.mask.write(0);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::vec::Vec;

    use super::*;
    use crate::util::testing;

    static ORDER: Mutex<Vec<u8>> = Mutex::new(Vec::new());

    fn note_1() {
        ORDER.lock().unwrap().push(1);
    }

    fn note_2() {
        ORDER.lock().unwrap().push(2);
    }

    fn take_order() -> Vec<u8> {
        core::mem::replace(&mut *ORDER.lock().unwrap(), Vec::new())
    }

    fn fresh() {
        reset_for_test();
        take_order();
        init();
    }

    #[test]
    fn nesting_balance_controls_the_enable_bit() {
        let _g = testing::lock();
        fresh();

        assert_eq!(state(), State::Enabled);
        assert!(vr4300::read_status() & status::IE != 0);

        disable();
        assert_eq!(state(), State::Disabled);
        assert!(vr4300::read_status() & status::IE == 0);

        disable();
        enable();
        // Still one level deep: must stay masked.
        assert!(vr4300::read_status() & status::IE == 0);

        enable();
        assert_eq!(state(), State::Enabled);
        assert!(vr4300::read_status() & status::IE != 0);
    }

    #[test]
    #[should_panic(expected = "unbalanced interrupt enable")]
    fn enable_underflow_asserts() {
        let _g = testing::lock();
        fresh();
        enable();
    }

    #[test]
    fn init_is_idempotent_and_preinit_sections_are_noops() {
        let _g = testing::lock();
        reset_for_test();

        assert_eq!(state(), State::Uninitialized);
        // Tolerated before init, per the source's behavior.
        disable();
        enable();
        assert_eq!(state(), State::Uninitialized);

        init();
        disable();
        init(); // later calls must not reset the depth
        assert_eq!(state(), State::Disabled);
        enable();
    }

    #[test]
    fn registration_order_is_dispatch_order_reversed() {
        let _g = testing::lock();
        fresh();

        register(Source::Ai, note_1);
        register(Source::Ai, note_2);
        set_enabled(Source::Ai, true);

        hw::mi().interrupt.write(mi::INTR_AI);
        dispatch_rcp();
        // Most recently registered runs first.
        assert_eq!(take_order(), vec![2, 1]);

        unregister(Source::Ai, note_2);
        dispatch_rcp();
        assert_eq!(take_order(), vec![1]);
    }

    #[test]
    fn duplicate_registration_unregisters_one_at_a_time() {
        let _g = testing::lock();
        fresh();

        register(Source::Vi, note_1);
        register(Source::Vi, note_1);
        unregister(Source::Vi, note_1);
        set_enabled(Source::Vi, true);

        hw::mi().interrupt.write(mi::INTR_VI);
        dispatch_rcp();
        assert_eq!(take_order(), vec![1]);
    }

    #[test]
    fn masked_sources_do_not_dispatch() {
        let _g = testing::lock();
        fresh();

        register(Source::Pi, note_1);
        hw::mi().interrupt.write(mi::INTR_PI);
        dispatch_rcp();
        assert_eq!(take_order(), vec![]);

        set_enabled(Source::Pi, true);
        dispatch_rcp();
        assert_eq!(take_order(), vec![1]);

        set_enabled(Source::Pi, false);
        dispatch_rcp();
        assert_eq!(take_order(), vec![]);
    }

    #[test]
    fn vi_ack_writes_current_line_back() {
        let _g = testing::lock();
        fresh();

        set_enabled(Source::Vi, true);
        hw::vi().v_current.write(0x107);
        hw::mi().interrupt.write(mi::INTR_VI);
        dispatch_rcp();
        assert_eq!(hw::vi().v_current.read(), 0x107);
    }

    #[test]
    fn prenmi_fires_reset_handlers_once() {
        let _g = testing::lock();
        fresh();
        crate::vr4300::emu_set_count(1000);

        register(Source::Prenmi, note_1);
        assert_eq!(exception_reset_time(), None);

        dispatch_prenmi();
        dispatch_prenmi();
        dispatch_prenmi();
        assert_eq!(take_order(), vec![1]);

        crate::vr4300::emu_set_count(1500);
        assert_eq!(exception_reset_time(), Some(500));
    }

    #[test]
    #[should_panic(expected = "too many reset handlers")]
    fn reset_handler_slots_are_bounded() {
        let _g = testing::lock();
        fresh();
        for _ in 0..5 {
            register(Source::Prenmi, note_1);
        }
    }

    #[test]
    fn cart_storm_guard_resets_on_other_activity() {
        let _g = testing::lock();
        fresh();

        register(Source::Cart, note_1);
        set_enabled(Source::Cart, true);
        for _ in 0..100 {
            dispatch_cart();
        }
        // Any other dispatch proves the machine is making progress.
        dispatch_rcp();
        for _ in 0..100 {
            dispatch_cart();
        }
        assert_eq!(take_order().len(), 200);
    }

    #[test]
    fn cop0_masks_follow_set_enabled() {
        let _g = testing::lock();
        fresh();

        set_enabled(Source::Timer, true);
        assert!(vr4300::read_status() & status::IM_TIMER != 0);
        set_enabled(Source::Timer, false);
        assert!(vr4300::read_status() & status::IM_TIMER == 0);
        // The global enable must survive the round trip.
        assert!(vr4300::read_status() & status::IE != 0);
    }
}
