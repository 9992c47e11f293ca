//! Compilation listeners.
//!
//! Listeners observe the scheduler; they never influence it. A panicking
//! listener is logged and skipped, the remaining listeners still run and
//! the scheduling operation that fired the event carries on.

use std::borrow::Cow;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::compiler::CompiledArtifact;
use super::error::CompileError;
use crate::compile::{CallSiteId, CallTarget, Tier};

/// Who asked for a compilation to be dequeued.
#[derive(Debug, Clone)]
pub enum CancelSource {
    /// The target was inlined into `caller` at `call_site`.
    Inlined {
        caller: Arc<CallTarget>,
        call_site: Option<CallSiteId>,
    },
    /// The compile queue is shutting down.
    Shutdown,
    /// The embedding engine, with a free-form description.
    Host(Cow<'static, str>),
}

impl fmt::Display for CancelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelSource::Inlined {
                caller,
                call_site: Some(site),
            } => write!(f, "{} at call site {}", caller.name(), site),
            CancelSource::Inlined {
                caller,
                call_site: None,
            } => write!(f, "{}", caller.name()),
            CancelSource::Shutdown => write!(f, "shutdown"),
            CancelSource::Host(what) => write!(f, "{}", what),
        }
    }
}

/// Observability hooks invoked by the scheduler.
///
/// All methods default to no-ops.
#[allow(unused_variables)]
pub trait CompilationListener: Send + Sync {
    /// A compilation was handed to `finish_compilation`.
    fn on_compilation_queued(&self, target: &CallTarget, tier: Tier) {}

    /// A worker started compiling `target`.
    fn on_compilation_started(&self, target: &CallTarget, tier: Tier) {}

    /// A queued or running compilation was cancelled.
    fn on_compilation_dequeued(&self, target: &CallTarget, source: &CancelSource, reason: &str) {}

    /// Code for `target` was produced and installed.
    fn on_compilation_succeeded(&self, target: &CallTarget, tier: Tier, artifact: &CompiledArtifact) {}

    /// The compiler failed on `target`.
    fn on_compilation_failed(&self, target: &CallTarget, tier: Tier, error: &CompileError) {}

    /// The runtime is shutting down.
    fn on_shutdown(&self) {}
}

/// Fan-out of events to every registered listener.
#[derive(Default)]
pub struct ListenerDispatcher {
    listeners: RwLock<Vec<Arc<dyn CompilationListener>>>,
}

impl ListenerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn CompilationListener>) {
        self.listeners.write().push(listener);
    }

    /// Remove a listener previously added (compared by identity).
    pub fn remove(&self, listener: &Arc<dyn CompilationListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dispatch(&self, event: &'static str, f: impl Fn(&dyn CompilationListener)) {
        // Snapshot so listeners may add/remove listeners re-entrantly
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(listener.as_ref())));
            if outcome.is_err() {
                warn!(target: "tierjit::listener", event, "Listener panicked; event dropped for this listener");
            }
        }
    }
}

impl CompilationListener for ListenerDispatcher {
    fn on_compilation_queued(&self, target: &CallTarget, tier: Tier) {
        self.dispatch("queued", |l| l.on_compilation_queued(target, tier));
    }

    fn on_compilation_started(&self, target: &CallTarget, tier: Tier) {
        self.dispatch("started", |l| l.on_compilation_started(target, tier));
    }

    fn on_compilation_dequeued(&self, target: &CallTarget, source: &CancelSource, reason: &str) {
        self.dispatch("dequeued", |l| l.on_compilation_dequeued(target, source, reason));
    }

    fn on_compilation_succeeded(&self, target: &CallTarget, tier: Tier, artifact: &CompiledArtifact) {
        self.dispatch("succeeded", |l| l.on_compilation_succeeded(target, tier, artifact));
    }

    fn on_compilation_failed(&self, target: &CallTarget, tier: Tier, error: &CompileError) {
        self.dispatch("failed", |l| l.on_compilation_failed(target, tier, error));
    }

    fn on_shutdown(&self) {
        self.dispatch("shutdown", |l| l.on_shutdown());
    }
}

/// Listener that logs every event through `tracing`.
///
/// Installed by default when `trace_compilation` is enabled.
#[derive(Debug, Default)]
pub struct TracingListener;

impl CompilationListener for TracingListener {
    fn on_compilation_queued(&self, target: &CallTarget, tier: Tier) {
        debug!(target: "tierjit::trace", name = %target.name(), ?tier, "Compilation queued");
    }

    fn on_compilation_started(&self, target: &CallTarget, tier: Tier) {
        debug!(target: "tierjit::trace", name = %target.name(), ?tier, "Compilation started");
    }

    fn on_compilation_dequeued(&self, target: &CallTarget, source: &CancelSource, reason: &str) {
        info!(target: "tierjit::trace", name = %target.name(), %source, reason, "Compilation dequeued");
    }

    fn on_compilation_succeeded(&self, target: &CallTarget, tier: Tier, artifact: &CompiledArtifact) {
        info!(
            target: "tierjit::trace",
            name = %target.name(),
            ?tier,
            code_size = artifact.code_size,
            inlined = artifact.inlined_calls,
            "Compilation succeeded"
        );
    }

    fn on_compilation_failed(&self, target: &CallTarget, tier: Tier, error: &CompileError) {
        warn!(target: "tierjit::trace", name = %target.name(), ?tier, %error, "Compilation failed");
    }

    fn on_shutdown(&self) {
        info!(target: "tierjit::trace", "Runtime shutdown");
    }
}
