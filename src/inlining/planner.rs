//! Inlining Planner
//!
//! Picks the policy for a tier and expands a target's call graph into a
//! [`DecisionTree`]. Expansion is breadth-first over an explicit queue and
//! is bounded three ways:
//!
//! - nodes deeper than `max_depth` are not expanded
//! - the tree never grows past `max_nodes`
//! - a callee already on the path from the root is never inlined again, so
//!   mutual recursion terminates
//!
//! The size of every callee inlined so far is summed and handed to the
//! policy with each candidate.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace};

use super::decision::{CallProfile, DecisionTree};
use super::policy::{InliningCandidate, InliningPolicy, NoInliningPolicy, ProfileGuidedPolicy};
use crate::compile::{CallTarget, Tier};
use crate::runtime::config::InliningConfig;

pub struct InliningPlanner {
    config: InliningConfig,
    first_tier: Arc<dyn InliningPolicy>,
    last_tier: Arc<dyn InliningPolicy>,
}

impl InliningPlanner {
    pub fn new(config: InliningConfig) -> Self {
        let last_tier = Arc::new(ProfileGuidedPolicy::new(&config));
        Self {
            config,
            first_tier: Arc::new(NoInliningPolicy),
            last_tier,
        }
    }

    /// Replace the last-tier policy
    pub fn with_last_tier_policy(mut self, policy: Arc<dyn InliningPolicy>) -> Self {
        self.last_tier = policy;
        self
    }

    pub fn config(&self) -> &InliningConfig {
        &self.config
    }

    /// The policy for a compilation at `tier`.
    pub fn policy_for(&self, tier: Tier) -> Arc<dyn InliningPolicy> {
        match tier {
            Tier::FirstTier => Arc::clone(&self.first_tier),
            Tier::LastTier => Arc::clone(&self.last_tier),
        }
    }

    /// Expand `target`'s call sites into a decision tree under `policy`.
    pub fn build_decision_tree(
        &self,
        target: &Arc<CallTarget>,
        policy: &dyn InliningPolicy,
    ) -> DecisionTree {
        let mut tree = DecisionTree::with_node_limit(Arc::clone(target), self.config.max_nodes);
        let mut pending = VecDeque::from([tree.root()]);
        let mut truncated = false;
        let mut inlined_size = 0u64;

        'expand: while let Some(node) = pending.pop_front() {
            let depth = tree.node(node).depth;
            if depth >= self.config.max_depth {
                continue;
            }
            let caller = Arc::clone(&tree.node(node).target);

            for site in caller.call_sites() {
                if tree.is_full() {
                    truncated = true;
                    break 'expand;
                }
                // Dropped by the engine
                let Some(callee) = site.callee() else {
                    continue;
                };

                let recursive = tree.is_on_path(node, callee.id());
                let inline = !recursive
                    && policy.should_inline(&InliningCandidate {
                        caller: &caller,
                        call_site: &site,
                        callee: &callee,
                        depth: depth + 1,
                        inlined_size,
                    });

                if recursive {
                    trace!(
                        target: "tierjit::inlining",
                        name = %callee.name(),
                        depth = depth + 1,
                        "Refusing recursive inline"
                    );
                }

                let profile = CallProfile {
                    call_count: site.call_count(),
                    callee_size: callee.size(),
                };
                let Some(child) = tree.push_child(node, site.id(), callee, inline, profile) else {
                    truncated = true;
                    break 'expand;
                };
                if inline {
                    inlined_size = inlined_size.saturating_add(u64::from(profile.callee_size));
                    pending.push_back(child);
                }
            }
        }

        debug!(
            target: "tierjit::inlining",
            name = %target.name(),
            policy = policy.name(),
            nodes = tree.len(),
            inlined = tree.inlined_count(),
            inlined_size,
            truncated,
            "Built inlining tree"
        );
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::TargetId;

    fn hot_site(caller: &Arc<CallTarget>, callee: &Arc<CallTarget>) {
        caller.add_call_site(callee).set_call_count(1_000);
    }

    fn planner() -> InliningPlanner {
        InliningPlanner::new(InliningConfig {
            min_call_count: 10,
            ..Default::default()
        })
    }

    #[test]
    fn test_policy_by_tier() {
        let planner = planner();
        assert_eq!(planner.policy_for(Tier::FirstTier).name(), "no-inlining");
        assert_eq!(planner.policy_for(Tier::LastTier).name(), "profile-guided");
    }

    #[test]
    fn test_first_tier_inlines_nothing() {
        let planner = planner();
        let root = CallTarget::new("root", 10);
        let callee = CallTarget::new("callee", 5);
        hot_site(&root, &callee);

        let policy = planner.policy_for(Tier::FirstTier);
        let tree = planner.build_decision_tree(&root, policy.as_ref());

        // The call site is recorded but not inlined or expanded
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.inlined_count(), 0);
    }

    #[test]
    fn test_transitive_inlining() {
        let planner = planner();
        let root = CallTarget::new("root", 10);
        let a = CallTarget::new("a", 5);
        let b = CallTarget::new("b", 5);
        hot_site(&root, &a);
        hot_site(&a, &b);

        let policy = planner.policy_for(Tier::LastTier);
        let tree = planner.build_decision_tree(&root, policy.as_ref());

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.inlined_count(), 2);
        let na = tree.children(tree.root())[0];
        let nb = tree.children(na)[0];
        assert_eq!(tree.node(nb).target.id(), b.id());
        assert_eq!(tree.node(nb).depth, 2);
    }

    #[test]
    fn test_mutual_recursion_terminates() {
        let planner = planner();
        let a = CallTarget::new("a", 5);
        let b = CallTarget::new("b", 5);
        hot_site(&a, &b);
        hot_site(&b, &a);

        let policy = planner.policy_for(Tier::LastTier);
        let tree = planner.build_decision_tree(&a, policy.as_ref());

        // a -> b (inlined) -> a (refused)
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.inlined_count(), 1);
        let nb = tree.children(tree.root())[0];
        let back = tree.children(nb)[0];
        assert!(!tree.node(back).should_inline);
        assert!(tree.children(back).is_empty());
    }

    #[test]
    fn test_depth_bound() {
        let planner = InliningPlanner::new(InliningConfig {
            max_depth: 2,
            min_call_count: 10,
            ..Default::default()
        });
        let chain: Vec<_> = (0..6).map(|i| CallTarget::new(format!("t{i}"), 5)).collect();
        for pair in chain.windows(2) {
            hot_site(&pair[0], &pair[1]);
        }

        let policy = planner.policy_for(Tier::LastTier);
        let tree = planner.build_decision_tree(&chain[0], policy.as_ref());

        assert_eq!(tree.len(), 3);
        assert!(tree.iter().all(|(_, n)| n.depth <= 2));
    }

    #[test]
    fn test_node_bound() {
        let planner = InliningPlanner::new(InliningConfig {
            max_nodes: 4,
            min_call_count: 10,
            ..Default::default()
        });
        let root = CallTarget::new("root", 10);
        let leaves: Vec<_> = (0..10).map(|i| CallTarget::new(format!("leaf{i}"), 1)).collect();
        for leaf in &leaves {
            hot_site(&root, leaf);
        }

        let policy = planner.policy_for(Tier::LastTier);
        let tree = planner.build_decision_tree(&root, policy.as_ref());
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_budget_bounds_inlined_size() {
        let planner = InliningPlanner::new(InliningConfig {
            min_call_count: 10,
            budget: 25,
            ..Default::default()
        });
        let root = CallTarget::new("root", 10);
        let leaves: Vec<_> = (0..4).map(|i| CallTarget::new(format!("leaf{i}"), 10)).collect();
        for leaf in &leaves {
            hot_site(&root, leaf);
        }

        let policy = planner.policy_for(Tier::LastTier);
        let tree = planner.build_decision_tree(&root, policy.as_ref());

        // Two leaves fit, the rest are recorded but not inlined
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.inlined_count(), 2);
        let inlined: Vec<_> = tree
            .children(tree.root())
            .iter()
            .map(|&n| tree.node(n).should_inline)
            .collect();
        assert_eq!(inlined, [true, true, false, false]);
    }

    /// Inlines only direct callees of the root
    struct RootCallsOnly {
        root: TargetId,
    }

    impl InliningPolicy for RootCallsOnly {
        fn name(&self) -> &'static str {
            "root-calls-only"
        }

        fn should_inline(&self, candidate: &InliningCandidate<'_>) -> bool {
            candidate.depth == 1 && candidate.caller.id() == self.root
        }
    }

    #[test]
    fn test_custom_policy_sees_depth_and_caller() {
        let planner = planner();
        let root = CallTarget::new("root", 10);
        let a = CallTarget::new("a", 5);
        let b = CallTarget::new("b", 5);
        hot_site(&root, &a);
        hot_site(&a, &b);

        let policy = RootCallsOnly { root: root.id() };
        let tree = planner.build_decision_tree(&root, &policy);

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.inlined_count(), 1);
        let na = tree.children(tree.root())[0];
        let nb = tree.children(na)[0];
        assert!(tree.node(na).should_inline);
        assert!(!tree.node(nb).should_inline);
    }

    #[test]
    fn test_dead_callee_skipped() {
        let planner = planner();
        let root = CallTarget::new("root", 10);
        {
            let gone = CallTarget::new("gone", 1);
            hot_site(&root, &gone);
        }

        let policy = planner.policy_for(Tier::LastTier);
        let tree = planner.build_decision_tree(&root, policy.as_ref());
        assert_eq!(tree.len(), 1);
    }
}
