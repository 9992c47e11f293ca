//! Compile Queue
//!
//! Accepts compilation requests, runs them on a pool of background workers
//! and lets callers cancel or wait for them.
//!
//! ## Guarantees
//!
//! - At most one live (queued or running) task per target. Submitting a
//!   target that already has one returns the existing handle.
//! - At most one compiler invocation per target. A task cancelled while
//!   running keeps the target's slot until its worker returns, so a
//!   resubmission in that window gets the cancelled handle back.
//! - Cancellation and completion race through a CAS on the task state;
//!   exactly one wins. No code is installed from a cancelled task.
//! - Waiters block on the task's own completion signal, never on a lock the
//!   workers need.
//!
//! ## Worker Pipeline
//!
//! ```text
//! pop ─► Queued→Running ─► plan inlining ─► compile ─► Running→Completed
//!            │                  │               │           │
//!         (lost)           (cancelled)     (cancelled)      ├─ install code
//!            ▼                  ▼               ▼           ├─ dequeue inlined callees
//!         discard            discard         discard        └─ publish
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::pool::{spawn_workers, PendingQueue};
use super::registry::{CallTargetRegistry, Slot};
use super::target::{CallTarget, Tier};
use super::task::{CompileTask, TaskHandle, TaskOutcome, TaskState};
use crate::inlining::{DecisionTree, DequeueCoordinator, InliningPlanner, TaskCanceller};
use crate::runtime::compiler::{CompileRequest, CompiledArtifact, Compiler, DebugContext};
use crate::runtime::error::{CompileError, RuntimeError, RuntimeResult};
use crate::runtime::interrupt;
use crate::runtime::listener::{CancelSource, CompilationListener, ListenerDispatcher};
use crate::runtime::RuntimeContext;

/// Reason attached to cancellations made by shutdown
const SHUTDOWN_REASON: &str = "runtime shutdown";

/// Snapshot of queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Tasks created by submission
    pub submitted: u64,
    /// Submissions answered with an existing live task
    pub reused: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Cancellations made because the target was inlined elsewhere
    pub dequeued_inlined: u64,
    /// Tasks currently waiting for a worker
    pub queued: usize,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Compile Queue Statistics:")?;
        writeln!(f, "  Submitted:          {}", self.submitted)?;
        writeln!(f, "  Reused:             {}", self.reused)?;
        writeln!(f, "  Completed:          {}", self.completed)?;
        writeln!(f, "  Failed:             {}", self.failed)?;
        writeln!(f, "  Cancelled:          {}", self.cancelled)?;
        writeln!(f, "  Dequeued (inlined): {}", self.dequeued_inlined)?;
        write!(f, "  Still queued:       {}", self.queued)
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    reused: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    dequeued_inlined: AtomicU64,
}

/// State shared between the queue handle and its workers
struct QueueShared {
    pending: PendingQueue,
    registry: Arc<CallTargetRegistry>,
    planner: InliningPlanner,
    compiler: Arc<dyn Compiler>,
    listeners: Arc<ListenerDispatcher>,
    compilation_exceptions_are_thrown: bool,
    counters: Counters,
}

pub struct CompileQueue {
    shared: Arc<QueueShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl CompileQueue {
    /// Create the queue and start its workers.
    pub fn new(context: &RuntimeContext, registry: Arc<CallTargetRegistry>) -> Self {
        let config = context.config();
        let shared = Arc::new(QueueShared {
            pending: PendingQueue::new(config.queue_ordering),
            registry,
            planner: InliningPlanner::new(config.inlining.clone()),
            compiler: Arc::clone(context.compiler()),
            listeners: Arc::clone(context.listeners()),
            compilation_exceptions_are_thrown: config.compilation_exceptions_are_thrown,
            counters: Counters::default(),
        });

        let num_threads = config.effective_compiler_threads();
        let workers = {
            let shared = Arc::clone(&shared);
            spawn_workers(num_threads, move |id| worker_loop(&shared, id))
        };

        info!(
            target: "tierjit::queue",
            threads = num_threads,
            ordering = ?config.queue_ordering,
            "Compile queue started"
        );

        Self {
            shared,
            workers: Mutex::new(workers),
            num_threads,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn registry(&self) -> &Arc<CallTargetRegistry> {
        &self.shared.registry
    }

    /// Request compilation of `target`.
    ///
    /// Returns the target's live task if it has one. While a cancelled task
    /// is still inside the compiler that task is returned instead of a new
    /// one. After shutdown the returned task is already cancelled.
    pub fn submit(&self, target: &Arc<CallTarget>, last_tier: bool) -> TaskHandle {
        let shared = &self.shared;
        let tier = Tier::from_last_tier(last_tier);

        if shared.pending.is_closed() {
            debug!(target: "tierjit::queue", name = %target.name(), "Submission after shutdown");
            return CompileTask::cancelled(Arc::clone(target), tier);
        }

        match shared
            .registry
            .install_or_reuse(target, || CompileTask::new(Arc::clone(target), tier))
        {
            Slot::Reused(task) => {
                shared.counters.reused.fetch_add(1, Ordering::Relaxed);
                trace!(
                    target: "tierjit::queue",
                    name = %target.name(),
                    task_id = task.id().as_u64(),
                    "Reusing live task"
                );
                task
            }
            Slot::Installed(task) => {
                shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
                if shared.pending.push(Arc::clone(&task)) {
                    debug!(
                        target: "tierjit::queue",
                        name = %target.name(),
                        ?tier,
                        task_id = task.id().as_u64(),
                        "Queued compilation"
                    );
                } else {
                    // Lost the race with shutdown
                    shared.cancel_task(&task, &CancelSource::Shutdown, SHUTDOWN_REASON);
                }
                task
            }
        }
    }

    /// Cancel the live task of `target`.
    ///
    /// Returns true only if this call moved a queued or running task to
    /// `Cancelled`.
    pub fn cancel_installed_task(
        &self,
        target: &Arc<CallTarget>,
        source: CancelSource,
        reason: &str,
    ) -> bool {
        self.shared.cancel_installed_task(target, source, reason)
    }

    /// Hand a submitted task over to the caller's completion policy.
    ///
    /// With `may_be_async` the call returns immediately. Otherwise it blocks
    /// until the task is terminal, absorbing host interruptions and
    /// re-raising them afterwards. A failure is returned only if compilation
    /// exceptions are configured to be thrown and the failure is not a
    /// transient bailout.
    pub fn finish_compilation(
        &self,
        target: &Arc<CallTarget>,
        task: &TaskHandle,
        may_be_async: bool,
    ) -> RuntimeResult<()> {
        self.shared.listeners.on_compilation_queued(target, task.tier());
        if may_be_async {
            return Ok(());
        }

        match interrupt::uninterruptibly(|| task.await_completion()) {
            TaskOutcome::Completed(_) | TaskOutcome::Cancelled => Ok(()),
            TaskOutcome::Failed(error) => {
                if error.is_rethrowable() && self.shared.compilation_exceptions_are_thrown {
                    return Err(RuntimeError::Compilation {
                        target: target.name().to_string(),
                        source: error,
                    });
                }
                debug!(
                    target: "tierjit::queue",
                    name = %target.name(),
                    %error,
                    "Absorbed compilation failure"
                );
                Ok(())
            }
        }
    }

    /// Wait up to `timeout` for the live task of `target` to finish.
    ///
    /// Returns immediately if there is no live task or it was cancelled.
    /// Host interruptions are absorbed until the deadline and re-raised
    /// afterwards.
    pub fn wait_for_compilation(&self, target: &Arc<CallTarget>, timeout: Duration) -> RuntimeResult<()> {
        let Some(task) = self.shared.registry.live_task(target) else {
            return Ok(());
        };
        if task.is_cancelled() {
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        match interrupt::uninterruptibly(|| task.await_completion_until(deadline)) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::Timeout {
                target: target.name().to_string(),
                waited: timeout,
            }),
        }
    }

    /// Number of tasks waiting for a worker
    pub fn queue_size(&self) -> usize {
        self.shared.pending.queued()
    }

    pub fn is_compiling(&self, target: &CallTarget) -> bool {
        self.shared.registry.is_compiling(target)
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.shared.counters;
        QueueStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            reused: c.reused.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            dequeued_inlined: c.dequeued_inlined.load(Ordering::Relaxed),
            queued: self.queue_size(),
        }
    }

    /// Stop accepting work, cancel everything still queued and join the
    /// workers. Running compilations finish first. Idempotent.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        let Some(drained) = shared.pending.close() else {
            return;
        };

        let mut cancelled = 0;
        for task in &drained {
            if shared.cancel_task(task, &CancelSource::Shutdown, SHUTDOWN_REASON) {
                cancelled += 1;
            }
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }

        shared.listeners.on_shutdown();
        shared.compiler.shutdown();
        info!(target: "tierjit::queue", cancelled, "Compile queue shut down");
    }
}

impl TaskCanceller for CompileQueue {
    fn cancel_installed_task(
        &self,
        target: &Arc<CallTarget>,
        source: CancelSource,
        reason: &str,
    ) -> bool {
        self.shared.cancel_installed_task(target, source, reason)
    }
}

impl Drop for CompileQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl QueueShared {
    /// Cancel `task` if it is still live. The winner notifies listeners and
    /// publishes the outcome. A task that never started is unbound here; a
    /// running one is unbound by its worker.
    fn cancel_task(&self, task: &Arc<CompileTask>, source: &CancelSource, reason: &str) -> bool {
        let Some(from) = task.cancel() else {
            return false;
        };
        let target = task.target();
        if from == TaskState::Queued {
            self.registry.clear_if(target, task);
        }
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "tierjit::queue",
            name = %target.name(),
            task_id = task.id().as_u64(),
            %source,
            reason,
            "Cancelled compilation"
        );
        self.listeners.on_compilation_dequeued(target, source, reason);
        task.publish(TaskOutcome::Cancelled);
        true
    }

    /// Run one task to a terminal state (or discover it already is).
    fn run_task(&self, task: &Arc<CompileTask>) {
        let target = task.target();
        let tier = task.tier();

        if !task.try_start() {
            trace!(
                target: "tierjit::worker",
                name = %target.name(),
                task_id = task.id().as_u64(),
                "Skipping task cancelled while queued"
            );
            self.registry.clear_if(target, task);
            return;
        }

        self.listeners.on_compilation_started(target, tier);
        let debug = DebugContext::open(target, tier);
        let result = {
            let _entered = debug.span.enter();
            self.compile(task, &debug)
        };

        match result {
            Ok((artifact, tree)) => self.complete(task, artifact, &tree),
            Err(CompileError::Cancelled) => {
                // Either a checkpoint saw a cancellation that already
                // published, or the compiler gave up on its own.
                let source = CancelSource::Host("compiler".into());
                self.cancel_task(task, &source, "compiler abandoned compilation");
            }
            Err(error) => self.fail(task, error),
        }

        self.registry.clear_if(target, task);
        task.detach();
    }

    fn compile(
        &self,
        task: &CompileTask,
        debug: &DebugContext,
    ) -> Result<(CompiledArtifact, DecisionTree), CompileError> {
        if task.is_cancelled() {
            return Err(CompileError::Cancelled);
        }
        let policy = self.planner.policy_for(task.tier());
        let tree = self.planner.build_decision_tree(task.target(), policy.as_ref());
        if task.is_cancelled() {
            return Err(CompileError::Cancelled);
        }

        let artifact = {
            let request = CompileRequest::new(task, &tree, debug);
            match panic::catch_unwind(AssertUnwindSafe(|| self.compiler.compile(&request))) {
                Ok(result) => result?,
                Err(payload) => return Err(CompileError::Internal(panic_message(payload.as_ref()))),
            }
        };

        if task.is_cancelled() {
            return Err(CompileError::Cancelled);
        }
        Ok((artifact, tree))
    }

    fn complete(&self, task: &Arc<CompileTask>, artifact: CompiledArtifact, tree: &DecisionTree) {
        let target = task.target();
        let tier = task.tier();

        if !task.try_finish(TaskState::Completed) {
            trace!(
                target: "tierjit::worker",
                name = %target.name(),
                task_id = task.id().as_u64(),
                "Discarding code of cancelled task"
            );
            return;
        }

        self.registry.install_code(target, tier, &artifact);
        let dequeued = DequeueCoordinator::new(self).dequeue_inlined(tree, target);
        self.counters
            .dequeued_inlined
            .fetch_add(dequeued as u64, Ordering::Relaxed);
        self.registry.clear_if(target, task);
        self.counters.completed.fetch_add(1, Ordering::Relaxed);

        debug!(
            target: "tierjit::worker",
            name = %target.name(),
            ?tier,
            task_id = task.id().as_u64(),
            code_size = artifact.code_size,
            dequeued,
            "Compilation completed"
        );
        self.listeners.on_compilation_succeeded(target, tier, &artifact);
        task.publish(TaskOutcome::Completed(artifact));
    }

    fn fail(&self, task: &Arc<CompileTask>, error: CompileError) {
        let target = task.target();
        let tier = task.tier();

        if !task.try_finish(TaskState::Failed) {
            return;
        }

        self.registry.clear_if(target, task);
        self.counters.failed.fetch_add(1, Ordering::Relaxed);

        if error.is_transient_bailout() {
            debug!(target: "tierjit::worker", name = %target.name(), ?tier, %error, "Compilation bailed out");
        } else {
            warn!(target: "tierjit::worker", name = %target.name(), ?tier, %error, "Compilation failed");
        }
        self.listeners.on_compilation_failed(target, tier, &error);
        task.publish(TaskOutcome::Failed(error));
    }
}

impl TaskCanceller for QueueShared {
    fn cancel_installed_task(
        &self,
        target: &Arc<CallTarget>,
        source: CancelSource,
        reason: &str,
    ) -> bool {
        match self.registry.live_task(target) {
            Some(task) => self.cancel_task(&task, &source, reason),
            None => false,
        }
    }
}

fn worker_loop(shared: &QueueShared, id: usize) {
    trace!(target: "tierjit::worker", id, "Worker started");
    while let Some(task) = shared.pending.pop_blocking() {
        shared.run_task(&task);
    }
    trace!(target: "tierjit::worker", id, "Worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("compiler panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("compiler panicked: {}", s)
    } else {
        "compiler panicked".to_string()
    }
}
