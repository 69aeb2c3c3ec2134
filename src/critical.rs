//! Pluggable critical-section capability.
//!
//! The scheduler never hardcodes how mutual exclusion is obtained; it is
//! handed an implementation of [`CriticalSection`] at construction.

use std::cell::Cell;
use std::marker::PhantomData;
use std::mem;

use spin::mutex::SpinMutex;

/// Enter/exit pair guarding the scheduler's shared state.
///
/// # Safety
///
/// Between `enter` and the matching `exit`, no other context that can reach
/// the same scheduler may be between its own `enter` and `exit`. Sections are
/// never nested by the scheduler and are never held across a callback.
pub unsafe trait CriticalSection {
    /// State returned by `enter` and handed back to `exit`.
    type Token;

    fn enter(&self) -> Self::Token;

    fn exit(&self, token: Self::Token);
}

/// RAII guard closing a section on every path.
pub(crate) struct SectionGuard<'a, C: CriticalSection> {
    section: &'a C,
    token: Option<C::Token>,
}

impl<'a, C: CriticalSection> SectionGuard<'a, C> {
    pub(crate) fn enter(section: &'a C) -> Self {
        let token = section.enter();
        SectionGuard {
            section,
            token: Some(token),
        }
    }
}

impl<C: CriticalSection> Drop for SectionGuard<'_, C> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.section.exit(token);
        }
    }
}

/// No-op section for single-context builds and tests.
///
/// Not `Sync`, so a scheduler built on it cannot be shared between threads.
#[derive(Debug, Default)]
pub struct NoCriticalSection {
    _single_context: PhantomData<Cell<()>>,
}

impl NoCriticalSection {
    pub const fn new() -> Self {
        NoCriticalSection {
            _single_context: PhantomData,
        }
    }
}

// SAFETY: the type is `!Sync`, so only one thread can ever reach it, and the
// scheduler never runs a section re-entrantly on that thread.
unsafe impl CriticalSection for NoCriticalSection {
    type Token = ();

    fn enter(&self) -> Self::Token {}

    fn exit(&self, _token: ()) {}
}

/// Spin lock for hosted, multi-threaded use.
#[derive(Debug, Default)]
pub struct SpinCriticalSection {
    lock: SpinMutex<()>,
}

impl SpinCriticalSection {
    pub const fn new() -> Self {
        SpinCriticalSection {
            lock: SpinMutex::new(()),
        }
    }
}

// SAFETY: `SpinMutex` admits one holder at a time; the guard is forgotten in
// `enter` and the lock released in the matching `exit`.
unsafe impl CriticalSection for SpinCriticalSection {
    type Token = ();

    fn enter(&self) -> Self::Token {
        mem::forget(self.lock.lock());
    }

    fn exit(&self, _token: ()) {
        // SAFETY: only reached from the guard of a successful `enter`.
        unsafe { self.lock.force_unlock() }
    }
}

/// Platform critical section from the `critical-section` crate.
///
/// On bare metal this typically masks interrupts, which makes `start`/`stop`
/// safe to call from interrupt handlers.
#[cfg(feature = "critical-section")]
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalCriticalSection;

// SAFETY: the platform implementation guarantees exclusion, and the
// scheduler releases in reverse order of acquisition.
#[cfg(feature = "critical-section")]
unsafe impl CriticalSection for GlobalCriticalSection {
    type Token = critical_section::RestoreState;

    fn enter(&self) -> Self::Token {
        // SAFETY: paired with `release` in `exit`; sections are not nested.
        unsafe { critical_section::acquire() }
    }

    fn exit(&self, token: Self::Token) {
        // SAFETY: `token` came from the matching `acquire` above.
        unsafe { critical_section::release(token) }
    }
}
