//! Compilation Scheduling
//!
//! Call targets, compile tasks and the queue that runs them on background
//! workers.

mod pool;
pub mod queue;
pub mod registry;
pub mod target;
pub mod task;

pub use queue::{CompileQueue, QueueStats};
pub use registry::{CallTargetRegistry, InstalledCode, TargetState};
pub use target::{CallSite, CallSiteId, CallTarget, TargetId, Tier};
pub use task::{CompileTask, TaskHandle, TaskId, TaskOutcome, TaskState};
