//! The per-frame lock/fill/unlock/display state machine.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex};

use crate::format::BufferFormat;

/// Where a video surface is in its per-frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CycleState {
    /// Between frames; both initial and terminal state.
    #[default]
    Idle,
    /// The native decoder holds the buffer and is writing a frame.
    Locked,
    /// The frame is written and ready for (or undergoing) display.
    Displaying,
}

/// A one-permit semaphore serializing the writer and display sides.
///
/// This is the sole mechanism keeping the native filling thread and the
/// render-reading side from touching the same plane memory concurrently.
/// Wakeups go through `notify_one`; strict fairness is not guaranteed and
/// not required, as each side holds the permit only briefly.
struct Permit {
    available: Mutex<bool>,
    cv: Condvar,
}

impl Permit {
    const fn new() -> Self {
        Self {
            available: Mutex::new(true),
            cv: Condvar::new(),
        }
    }

    /// Block until the permit is free, then take it.
    fn acquire(&self) {
        let mut available = self
            .available
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while !*available {
            available = self
                .cv
                .wait(available)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        *available = false;
    }

    /// Return the permit, waking one waiter.
    fn release(&self) {
        let mut available = self
            .available
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *available {
            // Protocol violation by the engine; tolerated to stay live.
            log::warn!("render-cycle permit released while not held");
        }
        *available = true;
        self.cv.notify_one();
    }
}

/// Receiver of displayable frames.
///
/// Invoked synchronously from [`RenderCycle::display`] on a native engine
/// thread (never the event dispatch thread) while the cycle holds the
/// permit, so the planes are stable for the duration of the call. The call
/// must return promptly: the engine needs its thread back, and slow consumers
/// cause visible stutter upstream.
pub trait RenderCallback: Send + Sync {
    /// Consume one finished frame.
    fn on_frame(&self, planes: &[*const u8], format: &BufferFormat);
}

/// The lock → fill → unlock → display cycle for one attached video surface.
///
/// All four operations are driven by native engine threads. A panicking
/// render callback is caught and logged; the cycle still returns to
/// [`CycleState::Idle`], since a stuck cycle would deadlock the native
/// decoder permanently.
pub struct RenderCycle {
    permit: Permit,
    state: Mutex<CycleState>,
}

impl RenderCycle {
    /// A fresh cycle in the idle state with the permit available.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            permit: Permit::new(),
            state: Mutex::new(CycleState::Idle),
        }
    }

    /// Current cycle state.
    #[must_use]
    pub fn state(&self) -> CycleState {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn set_state(&self, expected: CycleState, next: CycleState, op: &str) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *state != expected {
            log::warn!("{op} invoked in state {:?} (expected {expected:?})", *state);
        }
        *state = next;
    }

    /// Writer side: block until the previous display cycle has released the
    /// permit, then enter [`CycleState::Locked`].
    ///
    /// After this returns, the native decoder may write into the current
    /// frame buffer's planes.
    pub fn lock(&self) {
        self.permit.acquire();
        self.set_state(CycleState::Idle, CycleState::Locked, "lock");
    }

    /// Writer side: the decoder finished writing; release the permit so the
    /// display side may read, and enter [`CycleState::Displaying`].
    pub fn unlock(&self) {
        self.set_state(CycleState::Locked, CycleState::Displaying, "unlock");
        self.permit.release();
    }

    /// Display side: deliver the finished frame to `callback` and return to
    /// [`CycleState::Idle`].
    ///
    /// Holds the permit across the callback so the writer cannot relock the
    /// planes mid-read. The callback is panic-isolated; the cycle reaches
    /// idle on every path.
    pub fn display(
        &self,
        callback: &dyn RenderCallback,
        planes: &[*const u8],
        format: &BufferFormat,
    ) {
        self.permit.acquire();
        let call = panic::catch_unwind(AssertUnwindSafe(|| callback.on_frame(planes, format)));
        if call.is_err() {
            log::error!("render callback panicked; frame dropped");
        }
        // Idle is published before the permit so a waiting lock() observes a
        // consistent state the moment it wakes.
        self.set_state(CycleState::Displaying, CycleState::Idle, "display");
        self.permit.release();
    }

    /// Surface detach / format change: force the cycle back to idle.
    ///
    /// If the engine abandoned a frame mid-cycle the permit is restored so
    /// the next `lock` cannot deadlock.
    pub fn reset(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *state == CycleState::Locked {
            // The writer never called unlock; reclaim its permit.
            self.permit.release();
        }
        *state = CycleState::Idle;
    }
}

impl Default for RenderCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RenderCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderCycle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
