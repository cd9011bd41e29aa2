//! Interrupt-masked cells for process-wide driver state.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::interrupt;

/// Protects a `T` that is shared between the application and interrupt
/// handlers.
///
/// On this machine there is exactly one core and handlers are not
/// reentrant, so the correct exclusion primitive is not a lock but the
/// interrupt disable/enable critical section: while the nesting counter is
/// positive, nothing can preempt the borrow. `IrqCell` packages that
/// discipline. A borrow flag catches the one remaining way to misuse it --
/// borrowing the same cell again from code already inside `with` -- and
/// turns it into a diagnosable panic instead of aliased `&mut`.
pub(crate) struct IrqCell<T> {
    borrowed: AtomicBool,
    contents: UnsafeCell<T>,
}

// Safety: access to the contents only happens inside `with`, which masks
// interrupts and excludes reentry via the borrow flag.
unsafe impl<T: Send> Sync for IrqCell<T> {}

impl<T> IrqCell<T> {
    pub const fn new(contents: T) -> Self {
        IrqCell {
            borrowed: AtomicBool::new(false),
            contents: UnsafeCell::new(contents),
        }
    }

    /// Runs `body` on the contents with interrupts masked.
    ///
    /// # Panics
    ///
    /// If the cell is already borrowed, which means a handler or a nested
    /// call is trying to re-enter driver state that is mid-update.
    pub fn with<R>(&self, body: impl FnOnce(&mut T) -> R) -> R {
        interrupt::disable();
        // Re-enable on the way out even if `body` panics; on the target a
        // panic halts anyway, but hosted tests unwind through here.
        let _reenable = scopeguard::guard((), |_| interrupt::enable());

        let was = self.borrowed.swap(true, Ordering::Acquire);
        assert!(!was, "driver state borrowed reentrantly");
        let _unborrow = scopeguard::guard((), |_| {
            self.borrowed.store(false, Ordering::Release)
        });

        // Safety: interrupts are masked and the borrow flag is ours, so
        // this is the only live reference.
        body(unsafe { &mut *self.contents.get() })
    }

    /// Clobbers the contents, ignoring any stale borrow left behind by a
    /// panicked test.
    #[cfg(test)]
    pub fn reset_for_test(&self, contents: T) {
        self.borrowed.store(false, Ordering::Release);
        unsafe { *self.contents.get() = contents };
    }
}
