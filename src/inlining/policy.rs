//! Inlining Policies
//!
//! A policy answers one question per call site: fold this callee into the
//! caller or not. Structural limits (depth, node count, recursion) are
//! enforced by the planner before a policy is consulted. The planner also
//! reports how much callee code is already inlined so a policy can spend a
//! size budget.

use crate::compile::{CallSite, CallTarget};
use crate::runtime::config::InliningConfig;

/// A call site being considered for inlining
#[derive(Debug)]
pub struct InliningCandidate<'a> {
    pub caller: &'a CallTarget,
    pub call_site: &'a CallSite,
    pub callee: &'a CallTarget,
    /// Depth the callee would be inlined at (root's direct callees are 1)
    pub depth: usize,
    /// Summed size of the callees already inlined into the root
    pub inlined_size: u64,
}

/// Chooses which call sites to inline
pub trait InliningPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn should_inline(&self, candidate: &InliningCandidate<'_>) -> bool;
}

/// Never inlines. Used for first-tier compiles.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInliningPolicy;

impl InliningPolicy for NoInliningPolicy {
    fn name(&self) -> &'static str {
        "no-inlining"
    }

    fn should_inline(&self, _candidate: &InliningCandidate<'_>) -> bool {
        false
    }
}

/// Inlines call sites that are hot enough and callees that are small enough,
/// until the root's inlining budget is spent.
#[derive(Debug, Clone)]
pub struct ProfileGuidedPolicy {
    min_call_count: u64,
    max_callee_size: u32,
    budget: u64,
}

impl ProfileGuidedPolicy {
    pub fn new(config: &InliningConfig) -> Self {
        Self {
            min_call_count: config.min_call_count,
            max_callee_size: config.max_callee_size,
            budget: config.budget,
        }
    }
}

impl InliningPolicy for ProfileGuidedPolicy {
    fn name(&self) -> &'static str {
        "profile-guided"
    }

    fn should_inline(&self, candidate: &InliningCandidate<'_>) -> bool {
        let size = candidate.callee.size();
        candidate.call_site.call_count() >= self.min_call_count
            && size <= self.max_callee_size
            && candidate.inlined_size.saturating_add(u64::from(size)) <= self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate_for<'a>(
        caller: &'a CallTarget,
        site: &'a CallSite,
        callee: &'a CallTarget,
    ) -> InliningCandidate<'a> {
        InliningCandidate {
            caller,
            call_site: site,
            callee,
            depth: 1,
            inlined_size: 0,
        }
    }

    #[test]
    fn test_profile_guided_thresholds() {
        let policy = ProfileGuidedPolicy::new(&InliningConfig {
            min_call_count: 10,
            max_callee_size: 50,
            ..Default::default()
        });

        let caller = CallTarget::new("caller", 100);
        let small = CallTarget::new("small", 20);
        let big = CallTarget::new("big", 500);

        let hot_small = caller.add_call_site(&small);
        hot_small.set_call_count(10);
        let cold_small = caller.add_call_site(&small);
        cold_small.set_call_count(9);
        let hot_big = caller.add_call_site(&big);
        hot_big.set_call_count(1_000);

        assert!(policy.should_inline(&candidate_for(&caller, &hot_small, &small)));
        assert!(!policy.should_inline(&candidate_for(&caller, &cold_small, &small)));
        assert!(!policy.should_inline(&candidate_for(&caller, &hot_big, &big)));
    }

    #[test]
    fn test_profile_guided_budget() {
        let policy = ProfileGuidedPolicy::new(&InliningConfig {
            min_call_count: 1,
            max_callee_size: 50,
            budget: 100,
            ..Default::default()
        });

        let caller = CallTarget::new("caller", 100);
        let callee = CallTarget::new("callee", 40);
        let site = caller.add_call_site(&callee);
        site.set_call_count(10);

        let mut candidate = candidate_for(&caller, &site, &callee);
        candidate.inlined_size = 60;
        assert!(policy.should_inline(&candidate));
        candidate.inlined_size = 61;
        assert!(!policy.should_inline(&candidate));
        candidate.inlined_size = u64::MAX;
        assert!(!policy.should_inline(&candidate));
    }

    #[test]
    fn test_no_inlining() {
        let caller = CallTarget::new("caller", 100);
        let callee = CallTarget::new("callee", 1);
        let site = caller.add_call_site(&callee);
        site.set_call_count(u64::MAX);

        assert!(!NoInliningPolicy.should_inline(&candidate_for(&caller, &site, &callee)));
    }
}
