//! TierJIT - Tiered JIT Compilation Runtime
//!
//! This library is the runtime half of a tiered just-in-time compiler for a
//! managed-language execution engine. It decides when a hot call target is
//! compiled and at which tier, schedules that work on background threads,
//! cancels work made redundant by inlining, and reconstructs logical call
//! frames for introspection and deoptimization.
//!
//! Code generation itself is out of scope: it is supplied by the embedder as
//! a [`Compiler`](runtime::Compiler).
//!
//! # Architecture
//!
//! 1. **Compilation Scheduling** (`compile` module)
//!    - Call targets and their call sites
//!    - Compile tasks with an atomic lifecycle and a completion signal
//!    - Per-target registry enforcing one live task per target
//!    - Worker pool draining a tier-ordered queue
//!
//! 2. **Inlining** (`inlining` module)
//!    - Tier-dependent inlining policies
//!    - Bounded, arena-allocated decision trees
//!    - Cancellation of queued compiles for callees that were inlined
//!
//! 3. **Stack Walking** (`frames` module)
//!    - Classification of raw frames into logical frames
//!    - A thread-local shadow stack as the default introspector
//!
//! 4. **Runtime** (`runtime` module)
//!    - Configuration, errors, listeners, provider selection
//!    - Host interruption for blocking waits
//!    - The [`JitRuntime`] facade
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tierjit::compile::CallTarget;
//! use tierjit::runtime::{
//!     CompileError, CompileRequest, CompiledArtifact, Compiler, JitRuntime, ProviderDescriptor,
//!     RuntimeConfig, RuntimeContext,
//! };
//!
//! struct Backend;
//!
//! impl Compiler for Backend {
//!     fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledArtifact, CompileError> {
//!         request.checkpoint()?;
//!         Ok(CompiledArtifact {
//!             code_size: request.target.size() as usize * 8,
//!             inlined_calls: request.inlining.inlined_count(),
//!         })
//!     }
//! }
//!
//! let context = RuntimeContext::builder()
//!     .config(RuntimeConfig { compiler_threads: 1, ..Default::default() })
//!     .compiler(ProviderDescriptor::new("backend", 0, Arc::new(Backend) as Arc<dyn Compiler>))
//!     .build()
//!     .unwrap();
//! let runtime = JitRuntime::new(context);
//!
//! let target = CallTarget::new("fib", 42);
//! let task = runtime.submit_for_compilation(&target, true);
//! runtime.finish_compilation(&target, &task, false).unwrap();
//! assert!(runtime.is_code_valid(&target));
//! ```

pub mod compile;
pub mod frames;
pub mod inlining;
pub mod runtime;

pub use compile::{CallTarget, CompileQueue, CompileTask, TaskHandle, TaskState, Tier};
pub use frames::{FrameWalker, LogicalFrame, ShadowStack, StackIntrospector};
pub use inlining::{DecisionTree, DequeueCoordinator, InliningPlanner, InliningPolicy};
pub use runtime::{
    CancelSource, CompilationListener, CompileError, Compiler, JitRuntime, RuntimeConfig,
    RuntimeContext, RuntimeError,
};
