//! The runtime facade handed to the embedding engine.

use std::sync::Arc;
use std::time::Duration;

use super::context::RuntimeContext;
use super::error::RuntimeResult;
use super::listener::{CancelSource, CompilationListener};
use crate::compile::{CallTarget, CallTargetRegistry, CompileQueue, QueueStats, TaskHandle};
use crate::frames::{FrameWalker, LogicalFrame};

/// Tiered JIT runtime: compilation scheduling plus stack walking.
///
/// # Example
///
/// ```ignore
/// let runtime = JitRuntime::new(
///     RuntimeContext::builder()
///         .compiler(ProviderDescriptor::new("backend", 0, compiler))
///         .build()?,
/// );
/// let task = runtime.submit_for_compilation(&target, true);
/// runtime.finish_compilation(&target, &task, false)?;
/// ```
pub struct JitRuntime {
    context: Arc<RuntimeContext>,
    registry: Arc<CallTargetRegistry>,
    queue: CompileQueue,
    walker: FrameWalker,
}

impl JitRuntime {
    pub fn new(context: RuntimeContext) -> Self {
        let context = Arc::new(context);
        let registry = Arc::new(CallTargetRegistry::new());
        let queue = CompileQueue::new(&context, Arc::clone(&registry));
        let walker = FrameWalker::from_context(&context);
        Self {
            context,
            registry,
            queue,
            walker,
        }
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.context
    }

    pub fn registry(&self) -> &Arc<CallTargetRegistry> {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Compilation
    // ------------------------------------------------------------------

    pub fn submit_for_compilation(&self, target: &Arc<CallTarget>, last_tier: bool) -> TaskHandle {
        self.queue.submit(target, last_tier)
    }

    pub fn finish_compilation(
        &self,
        target: &Arc<CallTarget>,
        task: &TaskHandle,
        may_be_async: bool,
    ) -> RuntimeResult<()> {
        self.queue.finish_compilation(target, task, may_be_async)
    }

    pub fn cancel_installed_task(
        &self,
        target: &Arc<CallTarget>,
        source: CancelSource,
        reason: &str,
    ) -> bool {
        self.queue.cancel_installed_task(target, source, reason)
    }

    pub fn wait_for_compilation(&self, target: &Arc<CallTarget>, timeout: Duration) -> RuntimeResult<()> {
        self.queue.wait_for_compilation(target, timeout)
    }

    pub fn compilation_queue_size(&self) -> usize {
        self.queue.queue_size()
    }

    pub fn is_compiling(&self, target: &CallTarget) -> bool {
        self.queue.is_compiling(target)
    }

    pub fn is_code_valid(&self, target: &CallTarget) -> bool {
        self.registry.is_code_valid(target)
    }

    /// Invalidate installed code (e.g. on deoptimization).
    pub fn invalidate(&self, target: &CallTarget) -> bool {
        self.registry.invalidate(target)
    }

    /// Drop everything recorded about `target`, including its installed
    /// code. Returns false while a task is still bound to it.
    pub fn forget(&self, target: &CallTarget) -> bool {
        self.registry.remove(target)
    }

    /// Drop the state of targets that no longer exist. Returns how many.
    pub fn sweep_dead_targets(&self) -> usize {
        self.registry.sweep()
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    // ------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------

    /// Visit logical frames of the calling thread, innermost first.
    pub fn iterate_frames<T>(&self, visitor: impl FnMut(&LogicalFrame) -> Option<T>) -> Option<T> {
        self.walker.iterate(visitor, 0)
    }

    pub fn get_current_frame(&self) -> Option<LogicalFrame> {
        self.walker.get_current_frame()
    }

    pub fn get_caller_frame(&self) -> Option<LogicalFrame> {
        self.walker.get_caller_frame()
    }

    // ------------------------------------------------------------------
    // Listeners and capabilities
    // ------------------------------------------------------------------

    pub fn add_listener(&self, listener: Arc<dyn CompilationListener>) {
        self.context.listeners().add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn CompilationListener>) -> bool {
        self.context.listeners().remove(listener)
    }

    pub fn capability<T: std::any::Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.context.capability::<T>()
    }

    /// Cancel queued work and stop the compiler threads. Idempotent.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}
