//! The code generator seam.
//!
//! The runtime never generates code itself. A [`Compiler`] receives the
//! target, the inlining plan chosen for this attempt and the tier, and
//! returns a [`CompiledArtifact`] or a [`CompileError`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::error::CompileError;
use crate::compile::{CallTarget, CompileTask, Tier};
use crate::inlining::DecisionTree;

/// Monotonic identifier of one compilation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompilationId(u64);

impl CompilationId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CompilationId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Per-attempt diagnostic context.
///
/// Carries the compilation id and a `tracing` span that the compiler can
/// enter to attribute its own log output to this attempt.
#[derive(Debug, Clone)]
pub struct DebugContext {
    pub id: CompilationId,
    pub span: tracing::Span,
}

impl DebugContext {
    pub(crate) fn open(target: &CallTarget, tier: Tier) -> Self {
        let id = CompilationId::next();
        let span = tracing::debug_span!(
            target: "tierjit::compile",
            "compile",
            id = id.as_u64(),
            name = %target.name(),
            ?tier
        );
        Self { id, span }
    }
}

/// Everything the compiler gets for one attempt.
pub struct CompileRequest<'a> {
    pub target: &'a Arc<CallTarget>,
    pub inlining: &'a DecisionTree,
    pub tier: Tier,
    pub debug: &'a DebugContext,
    task: &'a CompileTask,
}

impl<'a> CompileRequest<'a> {
    pub(crate) fn new(
        task: &'a CompileTask,
        inlining: &'a DecisionTree,
        debug: &'a DebugContext,
    ) -> Self {
        Self {
            target: task.target(),
            inlining,
            tier: task.tier(),
            debug,
            task,
        }
    }

    /// Cancellation check for long-running passes.
    ///
    /// Compilers should poll this between passes and return
    /// [`CompileError::Cancelled`] once it reports true.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    /// `Err(CompileError::Cancelled)` if the task was cancelled.
    #[inline]
    pub fn checkpoint(&self) -> Result<(), CompileError> {
        if self.is_cancelled() {
            Err(CompileError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of a successful compilation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompiledArtifact {
    /// Size of the generated code in bytes
    pub code_size: usize,
    /// Number of call sites folded into the root
    pub inlined_calls: usize,
}

/// External code generator.
pub trait Compiler: Send + Sync {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledArtifact, CompileError>;

    /// Release compiler resources. Called once when the runtime shuts down.
    fn shutdown(&self) {}
}
