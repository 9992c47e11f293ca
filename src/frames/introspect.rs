//! Raw stack introspection.
//!
//! A [`StackIntrospector`] yields the raw frames of the calling thread,
//! innermost first, filtered to a set of method identities. Three of those
//! identities are well known to the frame walker (see [`FrameMethods`]).

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use crate::compile::{CallSiteId, CallTarget};

/// Identity of the method a raw frame is executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method:{}", self.0)
    }
}

/// The three frame methods the walker classifies on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMethods {
    /// Frame of a call node dispatching to a target
    pub call_node: MethodId,
    /// Frame of a call target executing its body
    pub call_target: MethodId,
    /// Frame of an on-stack-replacement entry
    pub osr: MethodId,
}

impl FrameMethods {
    pub fn all(&self) -> [MethodId; 3] {
        [self.call_node, self.call_target, self.osr]
    }
}

impl Default for FrameMethods {
    fn default() -> Self {
        Self {
            call_node: MethodId(1),
            call_target: MethodId(2),
            osr: MethodId(3),
        }
    }
}

/// One raw frame as seen by the introspector
#[derive(Debug, Clone)]
pub struct InspectedFrame {
    pub method: MethodId,
    /// Executing target, for call-target and OSR frames
    pub target: Option<Arc<CallTarget>>,
    /// Dispatching call site, for call-node frames
    pub call_site: Option<CallSiteId>,
    /// The target was entered through on-stack replacement
    pub osr_entry: bool,
}

impl InspectedFrame {
    #[inline]
    pub fn is_method(&self, method: MethodId) -> bool {
        self.method == method
    }
}

/// Raw native-stack driver.
pub trait StackIntrospector: Send + Sync {
    /// Method identities this introspector reports frames with
    fn frame_methods(&self) -> FrameMethods;

    /// Visit the calling thread's frames, innermost first.
    ///
    /// Iteration starts at the first frame whose method is in `anchors`
    /// (immediately if `anchors` is empty), skips `start_depth` matching
    /// frames and then passes every frame whose method is in `matching` to
    /// `visitor` until it breaks or the stack is exhausted.
    fn walk(
        &self,
        matching: &[MethodId],
        anchors: &[MethodId],
        start_depth: usize,
        visitor: &mut dyn FnMut(&InspectedFrame) -> ControlFlow<()>,
    );
}

/// Apply the [`StackIntrospector::walk`] filtering rules to an
/// innermost-first frame sequence.
pub(crate) fn walk_frames<'a>(
    frames: impl IntoIterator<Item = &'a InspectedFrame>,
    matching: &[MethodId],
    anchors: &[MethodId],
    start_depth: usize,
    visitor: &mut dyn FnMut(&InspectedFrame) -> ControlFlow<()>,
) {
    let mut anchored = anchors.is_empty();
    let mut to_skip = start_depth;

    for frame in frames {
        if !anchored {
            if !anchors.contains(&frame.method) {
                continue;
            }
            anchored = true;
        }
        if !matching.contains(&frame.method) {
            continue;
        }
        if to_skip > 0 {
            to_skip -= 1;
            continue;
        }
        if visitor(frame).is_break() {
            return;
        }
    }
}

/// A fixed, recorded stack.
///
/// Frames are given innermost first. Useful for replaying a captured stack
/// and for exercising walkers without a live engine.
#[derive(Debug, Clone, Default)]
pub struct SyntheticStack {
    methods: FrameMethods,
    frames: Vec<InspectedFrame>,
}

impl SyntheticStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_methods(methods: FrameMethods) -> Self {
        Self {
            methods,
            frames: Vec::new(),
        }
    }

    /// Append a call-target frame (one level further out)
    pub fn call_target(mut self, target: &Arc<CallTarget>) -> Self {
        self.frames.push(InspectedFrame {
            method: self.methods.call_target,
            target: Some(Arc::clone(target)),
            call_site: None,
            osr_entry: false,
        });
        self
    }

    /// Append a call-target frame entered through OSR
    pub fn osr_call_target(mut self, target: &Arc<CallTarget>) -> Self {
        self.frames.push(InspectedFrame {
            method: self.methods.call_target,
            target: Some(Arc::clone(target)),
            call_site: None,
            osr_entry: true,
        });
        self
    }

    /// Append a call-node frame
    pub fn call_node(mut self, call_site: CallSiteId) -> Self {
        self.frames.push(InspectedFrame {
            method: self.methods.call_node,
            target: None,
            call_site: Some(call_site),
            osr_entry: false,
        });
        self
    }

    /// Append an OSR frame
    pub fn osr(mut self, target: &Arc<CallTarget>) -> Self {
        self.frames.push(InspectedFrame {
            method: self.methods.osr,
            target: Some(Arc::clone(target)),
            call_site: None,
            osr_entry: true,
        });
        self
    }

    /// Append a frame of some other method
    pub fn other(mut self, method: MethodId) -> Self {
        self.frames.push(InspectedFrame {
            method,
            target: None,
            call_site: None,
            osr_entry: false,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl StackIntrospector for SyntheticStack {
    fn frame_methods(&self) -> FrameMethods {
        self.methods
    }

    fn walk(
        &self,
        matching: &[MethodId],
        anchors: &[MethodId],
        start_depth: usize,
        visitor: &mut dyn FnMut(&InspectedFrame) -> ControlFlow<()>,
    ) {
        walk_frames(&self.frames, matching, anchors, start_depth, visitor);
    }
}
