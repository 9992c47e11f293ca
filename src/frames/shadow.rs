//! Shadow Stack
//!
//! Default [`StackIntrospector`]: the embedding engine mirrors guest calls
//! on a thread-local stack by holding frame guards for the duration of each
//! call. Dropping a guard pops its frame.
//!
//! ```ignore
//! let _target = ShadowStack::enter_target(&callee);
//! // ... execute callee ...
//! ```

use std::cell::RefCell;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::sync::Arc;

use super::introspect::{walk_frames, FrameMethods, InspectedFrame, MethodId, StackIntrospector};
use crate::compile::{CallSiteId, CallTarget};

thread_local! {
    static FRAMES: RefCell<Vec<InspectedFrame>> = const { RefCell::new(Vec::new()) };
}

/// Thread-local stack of guest frames
#[derive(Debug, Default, Clone, Copy)]
pub struct ShadowStack;

impl ShadowStack {
    fn push(frame: InspectedFrame) -> FrameGuard {
        let depth = FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            frames.push(frame);
            frames.len()
        });
        FrameGuard {
            depth,
            _not_send: PhantomData,
        }
    }

    /// Push a call-target frame
    pub fn enter_target(target: &Arc<CallTarget>) -> FrameGuard {
        Self::push(InspectedFrame {
            method: FrameMethods::default().call_target,
            target: Some(Arc::clone(target)),
            call_site: None,
            osr_entry: false,
        })
    }

    /// Push a call-target frame entered through on-stack replacement
    pub fn enter_osr_target(target: &Arc<CallTarget>) -> FrameGuard {
        Self::push(InspectedFrame {
            method: FrameMethods::default().call_target,
            target: Some(Arc::clone(target)),
            call_site: None,
            osr_entry: true,
        })
    }

    /// Push a call-node frame
    pub fn enter_call_node(call_site: CallSiteId) -> FrameGuard {
        Self::push(InspectedFrame {
            method: FrameMethods::default().call_node,
            target: None,
            call_site: Some(call_site),
            osr_entry: false,
        })
    }

    /// Push an OSR frame for a loop of `target`
    pub fn enter_osr(target: &Arc<CallTarget>) -> FrameGuard {
        Self::push(InspectedFrame {
            method: FrameMethods::default().osr,
            target: Some(Arc::clone(target)),
            call_site: None,
            osr_entry: true,
        })
    }

    /// Push a frame of an arbitrary method
    pub fn enter_method(method: MethodId) -> FrameGuard {
        Self::push(InspectedFrame {
            method,
            target: None,
            call_site: None,
            osr_entry: false,
        })
    }

    /// Number of frames on the calling thread's shadow stack
    pub fn depth() -> usize {
        FRAMES.with(|frames| frames.borrow().len())
    }
}

impl StackIntrospector for ShadowStack {
    fn frame_methods(&self) -> FrameMethods {
        FrameMethods::default()
    }

    fn walk(
        &self,
        matching: &[MethodId],
        anchors: &[MethodId],
        start_depth: usize,
        visitor: &mut dyn FnMut(&InspectedFrame) -> ControlFlow<()>,
    ) {
        // Visitors may push frames of their own
        let snapshot = FRAMES.with(|frames| frames.borrow().clone());
        walk_frames(snapshot.iter().rev(), matching, anchors, start_depth, visitor);
    }
}

/// Pops its frame (and anything pushed above it) on drop.
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct FrameGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| frames.borrow_mut().truncate(self.depth - 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::FrameWalker;

    #[test]
    fn test_guards_push_and_pop() {
        let t = CallTarget::new("t", 1);
        assert_eq!(ShadowStack::depth(), 0);
        {
            let _outer = ShadowStack::enter_target(&t);
            let _node = ShadowStack::enter_call_node(CallSiteId::from_raw(1));
            assert_eq!(ShadowStack::depth(), 2);
        }
        assert_eq!(ShadowStack::depth(), 0);
    }

    #[test]
    fn test_walk_is_innermost_first() {
        let main = CallTarget::new("main", 10);
        let helper = CallTarget::new("helper", 3);
        let site = main.add_call_site(&helper);

        let _main = ShadowStack::enter_target(&main);
        let _node = ShadowStack::enter_call_node(site.id());
        let _helper = ShadowStack::enter_target(&helper);

        let walker = FrameWalker::new(Arc::new(ShadowStack));
        let current = walker.get_current_frame().unwrap();
        assert_eq!(current.call_target.name(), "helper");
        assert_eq!(current.call_node, None);

        let caller = walker.get_caller_frame().unwrap();
        assert_eq!(caller.call_target.name(), "main");
        assert_eq!(caller.call_node, Some(site.id()));
    }

    #[test]
    fn test_other_threads_see_their_own_stack() {
        let t = CallTarget::new("t", 1);
        let _frame = ShadowStack::enter_target(&t);

        let depth = std::thread::spawn(ShadowStack::depth).join().unwrap();
        assert_eq!(depth, 0);
    }
}
