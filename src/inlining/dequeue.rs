//! Dequeue Coordinator
//!
//! Once a target compiles successfully, every callee that was inlined into
//! it (directly or transitively) no longer needs a compilation of its own.
//! The coordinator walks the decision tree and cancels those callees' live
//! tasks. Subtrees under a call site that was not inlined are left alone.

use std::sync::Arc;

use tracing::debug;

use super::decision::DecisionTree;
use crate::compile::CallTarget;
use crate::runtime::listener::CancelSource;

/// Reason attached to every cancellation made by the coordinator
pub const INLINED_REASON: &str = "inlined into caller";

/// Anything that can cancel a target's live compile task.
pub trait TaskCanceller {
    /// Returns true if this call cancelled a live task.
    fn cancel_installed_task(
        &self,
        target: &Arc<CallTarget>,
        source: CancelSource,
        reason: &str,
    ) -> bool;
}

pub struct DequeueCoordinator<'a> {
    canceller: &'a dyn TaskCanceller,
}

impl<'a> DequeueCoordinator<'a> {
    pub fn new(canceller: &'a dyn TaskCanceller) -> Self {
        Self { canceller }
    }

    /// Cancel the live tasks of every callee inlined into `compiled`.
    ///
    /// Returns the number of tasks actually cancelled.
    pub fn dequeue_inlined(&self, tree: &DecisionTree, compiled: &Arc<CallTarget>) -> usize {
        let mut cancelled = 0;
        let mut stack = vec![tree.root()];

        while let Some(id) = stack.pop() {
            let node = tree.node(id);
            if !node.should_inline {
                continue;
            }

            if !node.is_root() && node.target.id() != compiled.id() {
                let source = CancelSource::Inlined {
                    caller: Arc::clone(compiled),
                    call_site: node.call_site,
                };
                if self
                    .canceller
                    .cancel_installed_task(&node.target, source, INLINED_REASON)
                {
                    cancelled += 1;
                }
            }

            stack.extend(node.children().iter().rev().copied());
        }

        if cancelled > 0 {
            debug!(
                target: "tierjit::dequeue",
                name = %compiled.name(),
                cancelled,
                "Dequeued inlined callees"
            );
        }
        cancelled
    }
}
