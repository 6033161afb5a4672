//! The rule driver. A [`Rule`] pattern-matches one operator at a time and
//! rewrites the tree in place; [`apply_rule`] walks the plan recursively,
//! resuming wherever a modification says to continue.

use crate::plan::{OpId, Plan};

pub trait Rule {
    fn name(&self) -> &'static str;

    /// Whether this rule applies at `op` (whose parent is `parent`,
    /// `None` at the root).
    fn matches(&self, plan: &Plan, op: OpId, parent: Option<OpId>) -> bool;

    /// Rewrites the tree at a matched `op`. Returns the cursor to resume
    /// traversal from as `(next, next_parent)`, or `None` to stop this
    /// rule entirely.
    fn modify(
        &mut self,
        plan: &mut Plan,
        op: OpId,
        parent: Option<OpId>,
    ) -> Option<(OpId, Option<OpId>)>;
}

/// Runs `rule` over the whole plan starting at the root. Returns whether
/// the plan was modified.
pub fn apply_rule(rule: &mut dyn Rule, plan: &mut Plan) -> bool {
    let root = plan.root();
    optimize(rule, plan, root, None)
}

fn optimize(rule: &mut dyn Rule, plan: &mut Plan, op: OpId, parent: Option<OpId>) -> bool {
    if rule.matches(plan, op, parent) {
        log::trace!("rule {} matched at {}", rule.name(), op);
        let Some((next, next_parent)) = rule.modify(plan, op, parent) else {
            return true;
        };
        optimize(rule, plan, next, next_parent);
        return true;
    }

    let mut modified = false;
    if let Some(input) = plan.input(op) {
        modified = optimize(rule, plan, input, Some(op));
    } else if plan.is_binary(op) {
        // children are re-read between the two descents: rewriting the
        // left subtree may have relinked this node
        if let Some(left) = plan.left(op) {
            modified |= optimize(rule, plan, left, Some(op));
        }
        if let Some(right) = plan.right(op) {
            modified |= optimize(rule, plan, right, Some(op));
        }
    }
    modified
}
