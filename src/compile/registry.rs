//! Call Target Registry
//!
//! Per-target compilation state, keyed by [`TargetId`]:
//!
//! - the single compile task holding the target's slot, if any
//! - the installed-code record and whether it is still valid
//!
//! The slot is the one piece of state that submission, cancellation and
//! completion all touch. It sits behind a per-target mutex so those
//! operations serialize per target without contending across targets.
//! Readers always take a snapshot (`Arc` clone) and release the lock before
//! acting on it.
//!
//! Entries hold only a weak reference to their target. Entries whose target
//! is gone are swept when the map has doubled since the last sweep, or
//! dropped explicitly with [`CallTargetRegistry::remove`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::target::{CallTarget, TargetId, Tier};
use super::task::CompileTask;
use crate::runtime::compiler::CompiledArtifact;

/// Registry size below which dead entries are never swept
const MIN_SWEEP_THRESHOLD: usize = 64;

/// What was installed by the last successful compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledCode {
    pub tier: Tier,
    pub code_size: usize,
}

/// Compilation state of one target
#[derive(Debug)]
pub struct TargetState {
    target: Weak<CallTarget>,
    live_task: Mutex<Option<Arc<CompileTask>>>,
    installed: Mutex<Option<InstalledCode>>,
    valid: AtomicBool,
}

impl TargetState {
    fn new(target: &Arc<CallTarget>) -> Self {
        Self {
            target: Arc::downgrade(target),
            live_task: Mutex::new(None),
            installed: Mutex::new(None),
            valid: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn is_code_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn installed(&self) -> Option<InstalledCode> {
        self.installed.lock().clone()
    }

    /// The target is still referenced by the engine (or a bound task)
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }
}

/// Result of [`CallTargetRegistry::install_or_reuse`]
pub(crate) enum Slot {
    /// The target's slot is held by this task
    Reused(Arc<CompileTask>),
    /// A fresh task was bound
    Installed(Arc<CompileTask>),
}

#[derive(Debug)]
pub struct CallTargetRegistry {
    entries: DashMap<TargetId, Arc<TargetState>>,
    sweep_at: AtomicUsize,
}

impl Default for CallTargetRegistry {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            sweep_at: AtomicUsize::new(MIN_SWEEP_THRESHOLD),
        }
    }
}

impl CallTargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the state of `target`.
    fn state(&self, target: &Arc<CallTarget>) -> Arc<TargetState> {
        let id = target.id();
        if let Some(entry) = self.entries.get(&id) {
            return Arc::clone(entry.value());
        }

        if self.entries.len() >= self.sweep_at.load(Ordering::Relaxed) {
            self.sweep();
        }

        Arc::clone(
            self.entries
                .entry(id)
                .or_insert_with(|| Arc::new(TargetState::new(target)))
                .value(),
        )
    }

    /// State of `target`, if any was ever recorded
    pub fn get(&self, target: &CallTarget) -> Option<Arc<TargetState>> {
        self.entries.get(&target.id()).map(|e| Arc::clone(e.value()))
    }

    /// Snapshot of the task holding the target's slot
    pub fn live_task(&self, target: &CallTarget) -> Option<Arc<CompileTask>> {
        self.get(target)
            .and_then(|state| state.live_task.lock().clone())
    }

    /// Return the task holding the slot, or bind the one produced by `make`.
    ///
    /// A bound task holds the slot while it is live, and also after being
    /// cancelled while running until its worker detaches. `make` runs under
    /// the per-target lock, so two racing submitters cannot both install.
    pub(crate) fn install_or_reuse(
        &self,
        target: &Arc<CallTarget>,
        make: impl FnOnce() -> Arc<CompileTask>,
    ) -> Slot {
        let state = self.state(target);
        let mut slot = state.live_task.lock();
        if let Some(existing) = slot.as_ref() {
            if existing.occupies_slot() {
                return Slot::Reused(Arc::clone(existing));
            }
        }
        let task = make();
        *slot = Some(Arc::clone(&task));
        Slot::Installed(task)
    }

    /// Unbind `task` if it is still the one bound to `target`.
    pub(crate) fn clear_if(&self, target: &CallTarget, task: &Arc<CompileTask>) -> bool {
        let Some(state) = self.get(target) else {
            return false;
        };
        let mut slot = state.live_task.lock();
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, task) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn install_code(&self, target: &Arc<CallTarget>, tier: Tier, artifact: &CompiledArtifact) {
        let state = self.state(target);
        *state.installed.lock() = Some(InstalledCode {
            tier,
            code_size: artifact.code_size,
        });
        state.valid.store(true, Ordering::Release);
        debug!(
            target: "tierjit::queue",
            name = %target.name(),
            ?tier,
            code_size = artifact.code_size,
            "Installed code"
        );
    }

    pub fn is_code_valid(&self, target: &CallTarget) -> bool {
        self.get(target).is_some_and(|s| s.is_code_valid())
    }

    pub fn installed_code(&self, target: &CallTarget) -> Option<InstalledCode> {
        self.get(target).and_then(|s| s.installed())
    }

    /// Mark installed code as invalid. Returns true if it was valid.
    pub fn invalidate(&self, target: &CallTarget) -> bool {
        let was_valid = self
            .get(target)
            .is_some_and(|s| s.valid.swap(false, Ordering::AcqRel));
        if was_valid {
            debug!(target: "tierjit::queue", name = %target.name(), "Invalidated code");
        }
        was_valid
    }

    /// Whether a task still holds the slot of `target`
    pub fn is_compiling(&self, target: &CallTarget) -> bool {
        self.live_task(target).is_some_and(|t| t.occupies_slot())
    }

    /// Drop all state of `target`.
    ///
    /// Refused (returns false) while a task is bound to the target.
    pub fn remove(&self, target: &CallTarget) -> bool {
        let removed = self
            .entries
            .remove_if(&target.id(), |_, state| state.live_task.lock().is_none())
            .is_some();
        if removed {
            debug!(target: "tierjit::queue", name = %target.name(), "Forgot target");
        }
        removed
    }

    /// Drop the entries of targets that no longer exist.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, state| state.is_alive());
        let after = self.entries.len();
        self.sweep_at
            .store((after * 2).max(MIN_SWEEP_THRESHOLD), Ordering::Relaxed);

        let removed = before.saturating_sub(after);
        if removed > 0 {
            debug!(target: "tierjit::queue", removed, remaining = after, "Swept dead targets");
        }
        removed
    }

    /// Number of targets with recorded state
    pub fn targets_tracked(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_then_reuse() {
        let registry = CallTargetRegistry::new();
        let target = CallTarget::new("t", 10);

        let first = match registry.install_or_reuse(&target, || {
            CompileTask::new(target.clone(), Tier::FirstTier)
        }) {
            Slot::Installed(task) => task,
            Slot::Reused(_) => panic!("expected a fresh task"),
        };

        match registry.install_or_reuse(&target, || panic!("must not create")) {
            Slot::Reused(task) => assert!(Arc::ptr_eq(&task, &first)),
            Slot::Installed(_) => panic!("expected reuse"),
        }
        assert!(registry.is_compiling(&target));
        assert_eq!(registry.targets_tracked(), 1);
    }

    #[test]
    fn test_terminal_task_is_replaced() {
        let registry = CallTargetRegistry::new();
        let target = CallTarget::new("t", 10);
        let first = CompileTask::new(target.clone(), Tier::FirstTier);
        registry.install_or_reuse(&target, || first.clone());
        first.cancel();

        assert!(!registry.is_compiling(&target));
        match registry.install_or_reuse(&target, || CompileTask::new(target.clone(), Tier::LastTier)) {
            Slot::Installed(task) => assert!(!Arc::ptr_eq(&task, &first)),
            Slot::Reused(_) => panic!("terminal task must not be reused"),
        }
    }

    #[test]
    fn test_clear_if_only_clears_matching() {
        let registry = CallTargetRegistry::new();
        let target = CallTarget::new("t", 10);
        let bound = CompileTask::new(target.clone(), Tier::FirstTier);
        let stranger = CompileTask::new(target.clone(), Tier::FirstTier);
        registry.install_or_reuse(&target, || bound.clone());

        assert!(!registry.clear_if(&target, &stranger));
        assert!(registry.live_task(&target).is_some());
        assert!(registry.clear_if(&target, &bound));
        assert!(registry.live_task(&target).is_none());
    }

    #[test]
    fn test_install_and_invalidate() {
        let registry = CallTargetRegistry::new();
        let target = CallTarget::new("t", 10);
        assert!(!registry.is_code_valid(&target));
        assert!(!registry.invalidate(&target));

        let artifact = CompiledArtifact {
            code_size: 64,
            inlined_calls: 0,
        };
        registry.install_code(&target, Tier::LastTier, &artifact);
        assert!(registry.is_code_valid(&target));
        assert_eq!(
            registry.installed_code(&target),
            Some(InstalledCode {
                tier: Tier::LastTier,
                code_size: 64
            })
        );

        assert!(registry.invalidate(&target));
        assert!(!registry.is_code_valid(&target));
        assert!(registry.installed_code(&target).is_some());
    }

    #[test]
    fn test_cancelled_running_task_holds_slot() {
        let registry = CallTargetRegistry::new();
        let target = CallTarget::new("t", 10);
        let running = CompileTask::new(target.clone(), Tier::FirstTier);
        registry.install_or_reuse(&target, || running.clone());

        assert!(running.try_start());
        running.cancel();
        assert!(registry.is_compiling(&target));
        match registry.install_or_reuse(&target, || panic!("worker still attached")) {
            Slot::Reused(task) => assert!(Arc::ptr_eq(&task, &running)),
            Slot::Installed(_) => panic!("expected the cancelled task to hold the slot"),
        }

        running.detach();
        assert!(!registry.is_compiling(&target));
        match registry.install_or_reuse(&target, || CompileTask::new(target.clone(), Tier::FirstTier)) {
            Slot::Installed(task) => assert!(!Arc::ptr_eq(&task, &running)),
            Slot::Reused(_) => panic!("detached task must not be reused"),
        }
    }

    #[test]
    fn test_sweep_drops_dead_targets() {
        let registry = CallTargetRegistry::new();
        let artifact = CompiledArtifact::default();
        let kept = CallTarget::new("kept", 10);
        registry.install_code(&kept, Tier::FirstTier, &artifact);

        for i in 0..3 {
            let target = CallTarget::new(format!("temp{}", i), 10);
            let task = CompileTask::new(target.clone(), Tier::FirstTier);
            registry.install_or_reuse(&target, || task.clone());
            registry.install_code(&target, Tier::FirstTier, &artifact);
            registry.clear_if(&target, &task);
        }
        assert_eq!(registry.targets_tracked(), 4);

        assert_eq!(registry.sweep(), 3);
        assert_eq!(registry.targets_tracked(), 1);
        assert!(registry.is_code_valid(&kept));
    }

    #[test]
    fn test_bound_task_keeps_entry_alive() {
        let registry = CallTargetRegistry::new();
        let target = CallTarget::new("t", 10);
        let task = CompileTask::new(target.clone(), Tier::FirstTier);
        registry.install_or_reuse(&target, || task.clone());
        drop(target);

        assert_eq!(registry.sweep(), 0);
        assert!(!registry.remove(task.target()));

        registry.clear_if(task.target(), &task);
        assert!(registry.remove(task.target()));
        assert_eq!(registry.targets_tracked(), 0);
    }

    #[test]
    fn test_churn_stays_bounded() {
        let registry = CallTargetRegistry::new();
        let artifact = CompiledArtifact::default();

        for i in 0..1_000 {
            let target = CallTarget::new(format!("eval{}", i), 10);
            registry.install_code(&target, Tier::FirstTier, &artifact);
        }

        assert!(registry.targets_tracked() <= MIN_SWEEP_THRESHOLD);
    }
}
