//! Logical frame reconstruction.
//!
//! Raw frames come in three kinds. Per raw frame, innermost first:
//!
//! - **OSR**: never exposed. It marks a duplicate of the call-target frame
//!   that follows, so it bumps the skip counter.
//! - **call node**: remembered as the pending call node of the next
//!   call-target frame.
//! - **call target**: consumed by the skip counter if it is positive;
//!   otherwise it becomes a [`LogicalFrame`] paired with the pending call
//!   node (which is then cleared) and is handed to the visitor. A `Some`
//!   from the visitor ends the walk.
//!
//! The walk only reads the calling thread's stack and never blocks.

use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::trace;

use super::introspect::{FrameMethods, InspectedFrame, StackIntrospector};
use crate::compile::{CallSiteId, CallTarget};
use crate::runtime::RuntimeContext;

/// One reconstructed frame of guest execution
#[derive(Debug, Clone)]
pub struct LogicalFrame {
    pub call_target: Arc<CallTarget>,
    /// Call node the target was dispatched from, if it was on the stack
    pub call_node: Option<CallSiteId>,
    /// The target was entered through on-stack replacement
    pub is_osr: bool,
}

pub struct FrameWalker {
    introspector: Arc<dyn StackIntrospector>,
    methods: FrameMethods,
}

impl FrameWalker {
    pub fn new(introspector: Arc<dyn StackIntrospector>) -> Self {
        let methods = introspector.frame_methods();
        Self {
            introspector,
            methods,
        }
    }

    /// Walker over the context's selected introspector
    pub fn from_context(context: &RuntimeContext) -> Self {
        Self::new(Arc::clone(context.introspector()))
    }

    /// Visit logical frames innermost first, skipping the first `skip`.
    ///
    /// Returns the first `Some` produced by `visitor`, or `None` if the
    /// stack is exhausted first.
    pub fn iterate<T>(
        &self,
        mut visitor: impl FnMut(&LogicalFrame) -> Option<T>,
        skip: usize,
    ) -> Option<T> {
        let methods = self.methods;
        let mut skip = skip;
        let mut pending_call_node: Option<CallSiteId> = None;
        let mut result = None;

        let mut classify = |frame: &InspectedFrame| -> ControlFlow<()> {
            if frame.is_method(methods.osr) {
                skip += 1;
            } else if frame.is_method(methods.call_target) {
                if skip > 0 {
                    skip -= 1;
                    return ControlFlow::Continue(());
                }
                let Some(target) = frame.target.as_ref() else {
                    trace!(target: "tierjit::frames", "Call-target frame without a target");
                    return ControlFlow::Continue(());
                };
                let logical = LogicalFrame {
                    call_target: Arc::clone(target),
                    call_node: pending_call_node.take(),
                    is_osr: frame.osr_entry,
                };
                if let Some(value) = visitor(&logical) {
                    result = Some(value);
                    return ControlFlow::Break(());
                }
            } else if frame.is_method(methods.call_node) {
                pending_call_node = frame.call_site;
            }
            ControlFlow::Continue(())
        };

        let all = methods.all();
        self.introspector.walk(&all, &all, 0, &mut classify);
        result
    }

    /// The innermost logical frame
    pub fn get_current_frame(&self) -> Option<LogicalFrame> {
        self.iterate(|frame| Some(frame.clone()), 0)
    }

    /// The logical frame that called the current one
    pub fn get_caller_frame(&self) -> Option<LogicalFrame> {
        self.iterate(|frame| Some(frame.clone()), 1)
    }
}
