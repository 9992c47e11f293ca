//! Runtime plumbing: configuration, errors, collaborator seams, listeners,
//! host interruption and the [`JitRuntime`] facade.

pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod interrupt;
pub mod jit;
pub mod listener;
pub mod providers;

pub use compiler::{CompilationId, CompileRequest, CompiledArtifact, Compiler, DebugContext};
pub use config::{InliningConfig, QueueOrdering, RuntimeConfig};
pub use context::{RuntimeContext, RuntimeContextBuilder};
pub use error::{CompileError, ConfigError, RuntimeError, RuntimeResult};
pub use interrupt::{InterruptHandle, Interrupted};
pub use jit::JitRuntime;
pub use listener::{CancelSource, CompilationListener, ListenerDispatcher, TracingListener};
pub use providers::{Capabilities, ProviderDescriptor, ProviderRegistry};
