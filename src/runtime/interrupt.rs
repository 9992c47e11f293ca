//! Host Thread Interruption
//!
//! The embedding engine may interrupt a thread that is blocked waiting for a
//! compilation (for example to deliver a safepoint or a cancellation request
//! of its own). Every thread owns an interrupt flag reachable through
//! [`current`]; an [`InterruptHandle`] can be sent to other threads.
//!
//! Interrupting sets the flag and, if the thread is currently blocked on a
//! [`Wake`] source, wakes it. A blocking wait consumes the flag and reports
//! [`Interrupted`]; callers that must keep waiting loop and re-raise the
//! flag once the wait finally succeeds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Something a blocked thread is waiting on and that can be woken.
///
/// Implementations must acquire the lock guarding their wait condition
/// before notifying, so a wake-up cannot slip between the waiter's
/// condition check and its wait.
pub trait Wake: Send + Sync {
    fn wake(&self);
}

/// A blocking wait was interrupted by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

#[derive(Default)]
struct InterruptState {
    flag: AtomicBool,
    blocked_on: Mutex<Option<Arc<dyn Wake>>>,
}

thread_local! {
    static CURRENT: Arc<InterruptState> = Arc::new(InterruptState::default());
}

/// Handle to the calling thread's interrupt state.
pub fn current() -> InterruptHandle {
    CURRENT.with(|state| InterruptHandle(Arc::clone(state)))
}

/// Sendable handle to one thread's interrupt state.
#[derive(Clone)]
pub struct InterruptHandle(Arc<InterruptState>);

impl InterruptHandle {
    /// Set the interrupt flag and wake the thread if it is blocked.
    pub fn interrupt(&self) {
        self.0.flag.store(true, Ordering::SeqCst);
        let blocked_on = self.0.blocked_on.lock().clone();
        if let Some(source) = blocked_on {
            source.wake();
        }
    }

    /// Check the flag without clearing it.
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.0.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set.
    #[inline]
    pub fn take(&self) -> bool {
        self.0.flag.swap(false, Ordering::SeqCst)
    }

    /// Register `source` as what this thread is blocked on until the guard drops.
    pub(crate) fn block_on(&self, source: Arc<dyn Wake>) -> BlockedOn<'_> {
        *self.0.blocked_on.lock() = Some(source);
        BlockedOn { handle: self }
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// Registration of a blocking wait; clears itself on drop.
pub(crate) struct BlockedOn<'a> {
    handle: &'a InterruptHandle,
}

impl Drop for BlockedOn<'_> {
    fn drop(&mut self) {
        *self.handle.0.blocked_on.lock() = None;
    }
}

/// Run `wait` until it stops reporting [`Interrupted`].
///
/// Every interruption observed along the way is remembered and the flag is
/// raised again before returning, so the host still sees it afterwards.
pub fn uninterruptibly<T>(mut wait: impl FnMut() -> Result<T, Interrupted>) -> T {
    let mut interrupted = false;
    let result = loop {
        match wait() {
            Ok(value) => break value,
            Err(Interrupted) => interrupted = true,
        }
    };
    if interrupted {
        current().interrupt();
    }
    result
}
