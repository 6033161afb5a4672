//! The logical rewrite rules: breaking up compound selections, pushing
//! selections down, synthesizing theta joins from selections over
//! products, and inserting projections.

use crate::plan::{Op, OpId, Plan};
use crate::predicate;
use crate::rewrite::Rule;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Splits a selection whose predicate is `p1 and p2 and ... and pn` into a
/// chain of single-predicate selections, `p1` at the bottom, `pn` on top.
pub struct BreakUpSelections;

impl Rule for BreakUpSelections {
    fn name(&self) -> &'static str {
        "break-up-selections"
    }

    fn matches(&self, plan: &Plan, op: OpId, _parent: Option<OpId>) -> bool {
        match plan.node(op) {
            Op::Select { predicate, .. } => predicate::is_compound(predicate),
            _ => false,
        }
    }

    fn modify(
        &mut self,
        plan: &mut Plan,
        op: OpId,
        parent: Option<OpId>,
    ) -> Option<(OpId, Option<OpId>)> {
        let (input, predicate) = match plan.node(op) {
            Op::Select { input, predicate } => (*input, predicate.clone()),
            _ => unreachable!("matched a selection"),
        };

        // build the chain bottom-up
        let mut chain = Vec::new();
        let mut below = input;
        for part in predicate.split(" and ") {
            below = plan.alloc(Op::Select {
                input: below,
                predicate: part.to_owned(),
            });
            chain.push(below);
        }

        let bottom = chain[0];
        let top = *chain.last().expect("compound predicates have >= 2 parts");
        plan.replace(parent, op, Some(op), top, Some(bottom));

        // resume below the bottom-most selection of the new chain
        Some((plan.input(bottom).expect("selection is unary"), Some(bottom)))
    }
}

/// Pushes a selection below its child whenever everything the predicate
/// references is still available down there. A selection above a binary
/// child that both sides could absorb is duplicated down each side. Every
/// selection is pushed repeatedly until no move remains, then tagged so
/// the rule never reconsiders it.
#[derive(Default)]
pub struct PushDownSelection {
    pushed: HashSet<OpId>,
}

impl PushDownSelection {
    pub fn new() -> Self {
        Self::default()
    }

    fn provides_all(plan: &Plan, attrs: &BTreeSet<String>, below: OpId) -> bool {
        attrs.iter().all(|a| plan.has_attribute(below, a))
    }

    /// Marks the selection fully pushed and restarts from the root.
    fn fully_pushed(&mut self, plan: &Plan, op: OpId) -> Option<(OpId, Option<OpId>)> {
        self.pushed.insert(op);
        Some((plan.root(), None))
    }
}

impl Rule for PushDownSelection {
    fn name(&self) -> &'static str {
        "push-down-selection"
    }

    fn matches(&self, plan: &Plan, op: OpId, _parent: Option<OpId>) -> bool {
        matches!(plan.node(op), Op::Select { .. }) && !self.pushed.contains(&op)
    }

    fn modify(
        &mut self,
        plan: &mut Plan,
        op: OpId,
        parent: Option<OpId>,
    ) -> Option<(OpId, Option<OpId>)> {
        let predicate = plan
            .node(op)
            .selection_predicate()
            .expect("matched a selection")
            .to_owned();
        let Ok(schema) = plan.schema_of(op) else {
            return self.fully_pushed(plan, op);
        };
        let attrs = predicate::referenced_attributes(&predicate, &schema);

        let child = plan.input(op).expect("selection is unary");
        if let Some(grandchild) = plan.input(child) {
            if Self::provides_all(plan, &attrs, grandchild) {
                plan.move_op(parent, op, child, true);
                return Some((op, Some(child)));
            }
            self.fully_pushed(plan, op)
        } else if plan.is_binary(child) {
            let left = plan.left(child).expect("binary");
            let right = plan.right(child).expect("binary");
            let push_left = Self::provides_all(plan, &attrs, left);
            let push_right = Self::provides_all(plan, &attrs, right);

            if push_left && push_right {
                // both sides provide the attributes: duplicate the
                // selection down each side
                let sel_left = plan.alloc(Op::Select {
                    input: child,
                    predicate: predicate.clone(),
                });
                let sel_right = plan.alloc(Op::Select {
                    input: child,
                    predicate,
                });
                plan.delete(parent, op);
                plan.put(child, sel_left, true);
                plan.put(child, sel_right, false);
                Some((child, parent))
            } else if push_left {
                plan.move_op(parent, op, child, true);
                Some((op, Some(child)))
            } else if push_right {
                plan.move_op(parent, op, child, false);
                Some((op, Some(child)))
            } else {
                self.fully_pushed(plan, op)
            }
        } else {
            // the selection already sits on a leaf relation
            self.fully_pushed(plan, op)
        }
    }
}

/// Replaces `σ_θ(A × B)` with `A ⋈_θ B` when θ compares one attribute of
/// each side of the product.
pub struct ReplaceByJoin;

impl Rule for ReplaceByJoin {
    fn name(&self) -> &'static str {
        "replace-by-join"
    }

    fn matches(&self, plan: &Plan, op: OpId, _parent: Option<OpId>) -> bool {
        let Op::Select { input, predicate } = plan.node(op) else {
            return false;
        };
        let Op::Product { left, right } = plan.node(*input) else {
            return false;
        };
        let Some((lhs, rhs)) = split_once_on_comparison(predicate) else {
            return false;
        };
        (plan.has_attribute(*left, lhs) && plan.has_attribute(*right, rhs))
            || (plan.has_attribute(*left, rhs) && plan.has_attribute(*right, lhs))
    }

    fn modify(
        &mut self,
        plan: &mut Plan,
        op: OpId,
        parent: Option<OpId>,
    ) -> Option<(OpId, Option<OpId>)> {
        let (product, theta) = match plan.node(op) {
            Op::Select { input, predicate } => (*input, predicate.clone()),
            _ => unreachable!("matched a selection"),
        };
        let (left, right) = match plan.node(product) {
            Op::Product { left, right } => (*left, *right),
            _ => unreachable!("matched a product"),
        };
        let join = plan.alloc(Op::ThetaJoin { left, right, theta });
        plan.replace(parent, op, Some(product), join, Some(join));
        Some((join, parent))
    }
}

/// Splits `predicate` at its first comparison operator, returning the two
/// trimmed operands if there are exactly two.
fn split_once_on_comparison(predicate: &str) -> Option<(&str, &str)> {
    use chalkdb_rel::CmpOp;
    for (token, _) in CmpOp::TOKENS {
        if predicate.contains(token) {
            let mut parts = predicate.split(token);
            let lhs = parts.next()?.trim();
            let rhs = parts.next()?.trim();
            if parts.next().is_some() {
                return None;
            }
            return Some((lhs, rhs));
        }
    }
    None
}

/// Annotates every node with the attributes its ancestors require, then
/// inserts a projection above each node that produces more than that.
pub struct InsertProjections {
    required: HashMap<OpId, BTreeSet<String>>,
    processed: HashSet<OpId>,
}

impl InsertProjections {
    pub fn new(plan: &Plan) -> Self {
        let mut rule = InsertProjections {
            required: HashMap::new(),
            processed: HashSet::new(),
        };
        rule.annotate(plan, plan.root(), None);
        rule
    }

    /// Attributes `op` itself needs to see in its input: a selection or
    /// join needs its predicate's attributes, a projection its projected
    /// ones. Everything else is undemanding.
    fn own_requirements(plan: &Plan, op: OpId) -> BTreeSet<String> {
        let schema = match plan.schema_of(op) {
            Ok(s) => s,
            Err(_) => return BTreeSet::new(),
        };
        match plan.node(op) {
            Op::Select { predicate, .. } => predicate::referenced_attributes(predicate, &schema),
            Op::ThetaJoin { theta, .. } => predicate::referenced_attributes(theta, &schema),
            Op::Project { attrs, .. } => attrs.iter().cloned().collect(),
            _ => BTreeSet::new(),
        }
    }

    fn annotate(&mut self, plan: &Plan, op: OpId, parent: Option<OpId>) {
        let mut required = Self::own_requirements(plan, op);
        if let Some(parent) = parent {
            for attr in &self.required[&parent] {
                if plan.has_attribute(op, attr) {
                    required.insert(attr.clone());
                }
            }
        }
        self.required.insert(op, required);
        for child in plan.children(op) {
            self.annotate(plan, child, Some(op));
        }
    }

    /// The subset of `required[parent]` that `op` can provide.
    fn provided(&self, plan: &Plan, op: OpId, parent: OpId) -> BTreeSet<String> {
        self.required
            .get(&parent)
            .map(|required| {
                required
                    .iter()
                    .filter(|attr| plan.has_attribute(op, attr))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Rule for InsertProjections {
    fn name(&self) -> &'static str {
        "insert-projections"
    }

    fn matches(&self, plan: &Plan, op: OpId, parent: Option<OpId>) -> bool {
        let Some(parent) = parent else {
            return false;
        };
        if self.processed.contains(&op) || plan.node(parent).is_project() {
            return false;
        }
        // skip positions where the operator below provides the very same
        // attributes; the projection belongs further down
        let here = self.provided(plan, op, parent);
        if let Some(input) = plan.input(op) {
            if here == self.provided(plan, input, op) {
                return false;
            }
        } else if plan.is_binary(op) {
            let left = plan.left(op).expect("binary");
            let right = plan.right(op).expect("binary");
            if here == self.provided(plan, left, op) && here == self.provided(plan, right, op) {
                return false;
            }
        }
        true
    }

    fn modify(
        &mut self,
        plan: &mut Plan,
        op: OpId,
        parent: Option<OpId>,
    ) -> Option<(OpId, Option<OpId>)> {
        let parent = parent.expect("matched only below a parent");
        self.processed.insert(op);

        let provided = self.provided(plan, op, parent);
        let proj = plan.alloc(Op::Project {
            input: op,
            attrs: provided.iter().cloned().collect(),
        });
        self.required.insert(proj, provided);

        if plan.is_binary(parent) {
            let on_left = plan.left(parent) == Some(op);
            plan.put(parent, proj, on_left);
        } else {
            plan.put(parent, proj, true);
        }
        Some((op, Some(proj)))
    }
}
