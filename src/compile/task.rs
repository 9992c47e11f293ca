//! Compile Tasks
//!
//! A [`CompileTask`] is one request to compile one target at one tier. Its
//! lifecycle is an atomic state machine:
//!
//! ```text
//! Queued ──► Running ──► Completed
//!   │           │   ├──► Failed
//!   │           └──────► Cancelled
//!   └──────────────────► Cancelled
//! ```
//!
//! Every transition is a compare-and-swap, so when a worker finishing the
//! task races a canceller exactly one of them wins. The loser observes a
//! terminal state and does nothing.
//!
//! The outcome is published separately through the task's completion
//! signal. Waiters block on that signal only; it is never shared with the
//! worker pool.
//!
//! A task also records whether a worker currently owns it. A task cancelled
//! while running stays attached until its worker returns from the compiler,
//! and keeps the target's slot occupied until then.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::target::{CallTarget, Tier};
use crate::runtime::compiler::CompiledArtifact;
use crate::runtime::error::CompileError;
use crate::runtime::interrupt::{self, Interrupted, Wake};

/// Handle returned by submission
pub type TaskHandle = Arc<CompileTask>;

/// Identifier of a compile task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a compile task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskState {
    /// Waiting for a worker
    Queued = 0,
    /// A worker is compiling
    Running = 1,
    /// Code was produced and installed
    Completed = 2,
    /// The compiler failed
    Failed = 3,
    /// Cancelled before completion
    Cancelled = 4,
}

impl TaskState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }
}

impl From<u8> for TaskState {
    fn from(v: u8) -> Self {
        match v {
            0 => TaskState::Queued,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            3 => TaskState::Failed,
            _ => TaskState::Cancelled,
        }
    }
}

/// What a terminal task ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed(CompiledArtifact),
    Failed(CompileError),
    Cancelled,
}

impl TaskOutcome {
    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Completed(_) => TaskState::Completed,
            TaskOutcome::Failed(_) => TaskState::Failed,
            TaskOutcome::Cancelled => TaskState::Cancelled,
        }
    }
}

/// One-shot completion signal
struct Signal {
    outcome: Mutex<Option<TaskOutcome>>,
    cond: Condvar,
}

impl Signal {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            cond: Condvar::new(),
        }
    }
}

impl Wake for Signal {
    fn wake(&self) {
        let _guard = self.outcome.lock();
        self.cond.notify_all();
    }
}

/// A cancellable request to compile one target at one tier.
pub struct CompileTask {
    id: TaskId,
    target: Arc<CallTarget>,
    tier: Tier,
    state: AtomicU8,
    /// A worker owns the task (set before `Queued -> Running`)
    attached: AtomicBool,
    completion: Arc<Signal>,
}

impl CompileTask {
    pub(crate) fn new(target: Arc<CallTarget>, tier: Tier) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::next(),
            target,
            tier,
            state: AtomicU8::new(TaskState::Queued as u8),
            attached: AtomicBool::new(false),
            completion: Arc::new(Signal::new()),
        })
    }

    /// A task that is already terminal with `Cancelled`.
    pub(crate) fn cancelled(target: Arc<CallTarget>, tier: Tier) -> Arc<Self> {
        let task = Self::new(target, tier);
        task.state.store(TaskState::Cancelled as u8, Ordering::Release);
        task.publish(TaskOutcome::Cancelled);
        task
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn target(&self) -> &Arc<CallTarget> {
        &self.target
    }

    #[inline]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Attempt a single state transition. Returns true if this call won.
    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Queued -> Running. Fails if the task was cancelled first.
    ///
    /// On success the calling worker owns the task until [`detach`](Self::detach).
    pub(crate) fn try_start(&self) -> bool {
        self.attached.store(true, Ordering::SeqCst);
        if self.transition(TaskState::Queued, TaskState::Running) {
            true
        } else {
            self.attached.store(false, Ordering::SeqCst);
            false
        }
    }

    /// Release worker ownership once the worker is done with the task.
    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    /// Whether a worker is still executing this task.
    #[inline]
    pub fn has_worker(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Whether the task still holds its target's compile slot: it is live,
    /// or it was cancelled while running and the worker has not returned.
    #[inline]
    pub fn occupies_slot(&self) -> bool {
        // State first: a worker attaches before it can move to Running
        match self.state() {
            TaskState::Queued | TaskState::Running => true,
            TaskState::Cancelled => self.has_worker(),
            TaskState::Completed | TaskState::Failed => false,
        }
    }

    /// Running -> Completed/Failed. Fails if a canceller won the race.
    pub(crate) fn try_finish(&self, to: TaskState) -> bool {
        debug_assert!(matches!(to, TaskState::Completed | TaskState::Failed));
        self.transition(TaskState::Running, to)
    }

    /// Queued/Running -> Cancelled.
    ///
    /// Returns the state the task was cancelled from, only for the call that
    /// performed the transition. The caller that wins is responsible for
    /// publishing the outcome.
    pub(crate) fn cancel(&self) -> Option<TaskState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if TaskState::from(current).is_terminal() {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                TaskState::Cancelled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(TaskState::from(current)),
                Err(actual) => current = actual,
            }
        }
    }

    /// Publish the terminal outcome and wake every waiter.
    pub(crate) fn publish(&self, outcome: TaskOutcome) {
        let mut slot = self.completion.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.completion.cond.notify_all();
    }

    /// The published outcome, if the task has finished.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.completion.outcome.lock().clone()
    }

    /// Block until the task's outcome is published.
    ///
    /// Returns `Err(Interrupted)` if the calling thread's interrupt flag is
    /// set before or during the wait; the flag is consumed.
    pub fn await_completion(&self) -> Result<TaskOutcome, Interrupted> {
        self.wait_until(None)
            .map(|outcome| outcome.unwrap_or(TaskOutcome::Cancelled))
    }

    /// Like [`await_completion`](Self::await_completion) but gives up after
    /// `timeout`, returning `Ok(None)`.
    pub fn await_completion_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<TaskOutcome>, Interrupted> {
        self.await_completion_until(Instant::now() + timeout)
    }

    pub fn await_completion_until(
        &self,
        deadline: Instant,
    ) -> Result<Option<TaskOutcome>, Interrupted> {
        self.wait_until(Some(deadline))
    }

    fn wait_until(&self, deadline: Option<Instant>) -> Result<Option<TaskOutcome>, Interrupted> {
        let handle = interrupt::current();
        let source: Arc<dyn Wake> = self.completion.clone();
        let _blocked = handle.block_on(source);

        let mut slot = self.completion.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return Ok(Some(outcome.clone()));
            }
            if handle.take() {
                return Err(Interrupted);
            }
            match deadline {
                None => self.completion.cond.wait(&mut slot),
                Some(deadline) => {
                    if self.completion.cond.wait_until(&mut slot, deadline).timed_out() {
                        return Ok(slot.clone());
                    }
                }
            }
        }
    }
}

impl fmt::Debug for CompileTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileTask")
            .field("id", &self.id)
            .field("target", &self.target.name())
            .field("tier", &self.tier)
            .field("state", &self.state())
            .field("has_worker", &self.has_worker())
            .finish()
    }
}
