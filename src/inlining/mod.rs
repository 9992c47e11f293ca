//! Inlining
//!
//! Per-compilation inlining plans and the cancellation of compiles they make
//! redundant.

pub mod decision;
pub mod dequeue;
pub mod planner;
pub mod policy;

pub use decision::{CallProfile, DecisionTree, InliningDecision, NodeId, MAX_TREE_NODES};
pub use dequeue::{DequeueCoordinator, TaskCanceller, INLINED_REASON};
pub use planner::InliningPlanner;
pub use policy::{InliningCandidate, InliningPolicy, NoInliningPolicy, ProfileGuidedPolicy};
