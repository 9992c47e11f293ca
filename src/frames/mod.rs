//! Stack Walking
//!
//! Reconstructs logical guest frames from the raw frames reported by a
//! [`StackIntrospector`].

pub mod introspect;
pub mod shadow;
pub mod walker;

pub use introspect::{FrameMethods, InspectedFrame, MethodId, StackIntrospector, SyntheticStack};
pub use shadow::{FrameGuard, ShadowStack};
pub use walker::{FrameWalker, LogicalFrame};
