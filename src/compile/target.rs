//! Call targets and their call sites.
//!
//! A [`CallTarget`] is the root of an executable AST as seen by the
//! scheduler: a name, a size, an invocation counter and the call sites found
//! in its body. The embedding engine owns targets; call sites refer to their
//! callees weakly so mutually recursive targets do not keep each other alive.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Stable identifier of a call target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TargetId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a call site (a call node in some target's AST)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSiteId(u64);

impl CallSiteId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CallSiteId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a call site ID from a raw u64
    pub fn from_raw(id: u64) -> Self {
        CallSiteId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallSiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optimization tier of a compilation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Tier {
    /// Fast, cheap compile without inlining
    FirstTier = 0,
    /// Fully optimized compile with profile-guided inlining
    LastTier = 1,
}

impl Tier {
    #[inline]
    pub fn from_last_tier(last_tier: bool) -> Self {
        if last_tier {
            Tier::LastTier
        } else {
            Tier::FirstTier
        }
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        matches!(self, Tier::LastTier)
    }
}

/// A call node inside a target's body
pub struct CallSite {
    id: CallSiteId,
    callee: Weak<CallTarget>,
    call_count: AtomicU64,
}

impl CallSite {
    pub fn id(&self) -> CallSiteId {
        self.id
    }

    /// The callee, if the engine still holds it.
    pub fn callee(&self) -> Option<Arc<CallTarget>> {
        self.callee.upgrade()
    }

    #[inline]
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_call(&self) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Overwrite the call counter (profile import)
    pub fn set_call_count(&self, count: u64) {
        self.call_count.store(count, Ordering::Relaxed);
    }
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSite")
            .field("id", &self.id)
            .field("callee", &self.callee.upgrade().map(|c| c.id()))
            .field("call_count", &self.call_count())
            .finish()
    }
}

/// A compilable unit
pub struct CallTarget {
    id: TargetId,
    name: String,
    /// Size of the AST in nodes, used for inlining budgets
    size: u32,
    call_count: AtomicU64,
    call_sites: RwLock<Vec<Arc<CallSite>>>,
}

impl CallTarget {
    pub fn new(name: impl Into<String>, size: u32) -> Arc<Self> {
        Arc::new(CallTarget {
            id: TargetId::next(),
            name: name.into(),
            size,
            call_count: AtomicU64::new(0),
            call_sites: RwLock::new(Vec::new()),
        })
    }

    #[inline]
    pub fn id(&self) -> TargetId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Record one invocation and return the new count
    #[inline]
    pub fn record_call(&self) -> u64 {
        self.call_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Add a call site calling `callee` from this target's body.
    pub fn add_call_site(&self, callee: &Arc<CallTarget>) -> Arc<CallSite> {
        let site = Arc::new(CallSite {
            id: CallSiteId::next(),
            callee: Arc::downgrade(callee),
            call_count: AtomicU64::new(0),
        });
        self.call_sites.write().push(Arc::clone(&site));
        site
    }

    /// Snapshot of this target's call sites in body order.
    pub fn call_sites(&self) -> Vec<Arc<CallSite>> {
        self.call_sites.read().clone()
    }

    pub fn call_site(&self, id: CallSiteId) -> Option<Arc<CallSite>> {
        self.call_sites.read().iter().find(|s| s.id == id).cloned()
    }
}

impl fmt::Debug for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallTarget")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("call_count", &self.call_count())
            .finish()
    }
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = CallTarget::new("a", 1);
        let b = CallTarget::new("a", 1);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_call_sites() {
        let caller = CallTarget::new("caller", 10);
        let callee = CallTarget::new("callee", 5);

        let site = caller.add_call_site(&callee);
        site.record_call();
        site.record_call();

        assert_eq!(caller.call_sites().len(), 1);
        assert_eq!(site.call_count(), 2);
        assert_eq!(site.callee().unwrap().id(), callee.id());
        assert!(caller.call_site(site.id()).is_some());
    }

    #[test]
    fn test_mutual_recursion_does_not_leak() {
        let a = CallTarget::new("a", 1);
        let b = CallTarget::new("b", 1);
        a.add_call_site(&b);
        let back = b.add_call_site(&a);

        let weak_a = Arc::downgrade(&a);
        drop(a);
        assert!(weak_a.upgrade().is_none());
        assert!(back.callee().is_none());
    }

    #[test]
    fn test_tier_from_flag() {
        assert_eq!(Tier::from_last_tier(true), Tier::LastTier);
        assert_eq!(Tier::from_last_tier(false), Tier::FirstTier);
        assert!(Tier::FirstTier < Tier::LastTier);
    }
}
