//! Lowering logical operators to their physical counterparts. Each
//! lowering is an ordinary rewrite rule; [`compile`] runs them in a fixed
//! order, trying index-based selections before the scan-based catch-all.

use crate::plan::{Op, OpId, Plan};
use crate::predicate::{self, Predicate};
use crate::rewrite::{apply_rule, Rule};
use chalkdb_rel::Relation;

pub struct CompileSetOperator;

impl Rule for CompileSetOperator {
    fn name(&self) -> &'static str {
        "compile-set-operator"
    }

    fn matches(&self, plan: &Plan, op: OpId, _parent: Option<OpId>) -> bool {
        matches!(plan.node(op), Op::SetOp { .. })
    }

    fn modify(
        &mut self,
        plan: &mut Plan,
        op: OpId,
        parent: Option<OpId>,
    ) -> Option<(OpId, Option<OpId>)> {
        let (kind, left, right) = match plan.node(op) {
            Op::SetOp { kind, left, right } => (*kind, *left, *right),
            _ => unreachable!("matched a set operator"),
        };
        let physical = plan.alloc(Op::HashSetOp { kind, left, right });
        plan.replace(parent, op, Some(op), physical, Some(physical));
        Some((physical, parent))
    }
}

pub struct CompileSelectionScan;

impl Rule for CompileSelectionScan {
    fn name(&self) -> &'static str {
        "compile-selection-scan"
    }

    fn matches(&self, plan: &Plan, op: OpId, _parent: Option<OpId>) -> bool {
        matches!(plan.node(op), Op::Select { .. })
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
        let physical = plan.alloc(Op::ScanSelect { input, predicate });
        plan.replace(parent, op, Some(op), physical, Some(physical));
        Some((input, Some(physical)))
    }
}

/// Lowers a selection to an index-based one. Applies only when the
/// selection touches a single attribute, nothing but selections and
/// projections separate it from a leaf, and that leaf has an index on the
/// referenced attribute. Among several candidate selections above the same
/// leaf, the one with the smallest estimated result is placed on the
/// index; the rest are stacked above it as scans.
pub struct CompileSelectionIndex;

impl CompileSelectionIndex {
    /// Walks from `op` down to the leaf, provided the path only crosses
    /// selections and projections.
    fn leaf_below(plan: &Plan, op: OpId) -> Option<OpId> {
        let mut cursor = plan.input(op)?;
        while !plan.is_leaf(cursor) {
            let node = plan.node(cursor);
            if !node.is_select() && !node.is_project() {
                return None;
            }
            cursor = plan.input(cursor)?;
        }
        Some(cursor)
    }

    fn leaf_relation(plan: &Plan, leaf: OpId) -> &Relation {
        match plan.node(leaf) {
            Op::Relation(rel) => rel,
            _ => unreachable!("leaf operators wrap relations"),
        }
    }

    /// Whether `predicate` can use an index of the leaf relation.
    fn usable_index(plan: &Plan, op: OpId, leaf: OpId, predicate: &str) -> bool {
        let Ok(schema) = plan.schema_of(op) else {
            return false;
        };
        let rel = Self::leaf_relation(plan, leaf);
        predicate::referenced_attributes(predicate, &schema)
            .iter()
            .any(|attr| rel.has_index_on(attr))
    }

    /// Estimated cardinality of an index-based selection: the number of
    /// matching index entries, or the relation size when the predicate
    /// does not probe cleanly.
    fn estimated_result_size(plan: &Plan, leaf: OpId, predicate: &str) -> usize {
        let rel = Self::leaf_relation(plan, leaf);
        let fallback = rel.len();
        let Ok(parsed) = Predicate::parse(predicate) else {
            return fallback;
        };
        let Some((attr, op, key)) = parsed.as_index_probe(rel.schema()) else {
            return fallback;
        };
        let Some(domain) = rel.attribute_domain(&attr) else {
            return fallback;
        };
        let Some(key) = key.coerce(domain) else {
            return fallback;
        };
        match rel.index_on(&attr) {
            Some(index) => index.lookup(op, &key).len(),
            None => fallback,
        }
    }
}

impl Rule for CompileSelectionIndex {
    fn name(&self) -> &'static str {
        "compile-selection-index"
    }

    fn matches(&self, plan: &Plan, op: OpId, _parent: Option<OpId>) -> bool {
        let Op::Select { predicate, .. } = plan.node(op) else {
            return false;
        };
        let Ok(schema) = plan.schema_of(op) else {
            return false;
        };
        if predicate::referenced_attributes(predicate, &schema).len() != 1 {
            return false;
        }
        let Some(leaf) = Self::leaf_below(plan, op) else {
            return false;
        };
        Self::usable_index(plan, op, leaf, predicate)
    }

    fn modify(
        &mut self,
        plan: &mut Plan,
        op: OpId,
        parent: Option<OpId>,
    ) -> Option<(OpId, Option<OpId>)> {
        let leaf = Self::leaf_below(plan, op).expect("matched above a leaf");

        // every selection on the way down is a candidate to restack
        let mut selections = vec![op];
        let mut cursor = plan.input(op).expect("selection is unary");
        while !plan.is_leaf(cursor) {
            if plan.node(cursor).is_select() {
                selections.push(cursor);
            }
            cursor = plan.input(cursor).expect("checked in matches");
        }

        let predicates: Vec<String> = selections
            .iter()
            .map(|sel| {
                plan.node(*sel)
                    .selection_predicate()
                    .expect("selection")
                    .to_owned()
            })
            .collect();

        // pick the indexed selection with the smallest estimated result;
        // min_by_key keeps the first on ties
        let picked = predicates
            .iter()
            .enumerate()
            .filter(|(i, pred)| Self::usable_index(plan, selections[*i], leaf, pred))
            .min_by_key(|(_, pred)| Self::estimated_result_size(plan, leaf, pred))
            .map(|(i, _)| i)
            .expect("matches guarantees an indexed candidate");

        log::trace!(
            "index selection picked `{}` over {} candidates",
            predicates[picked],
            predicates.len()
        );

        // rebuild the chain directly above the leaf: the picked selection
        // runs on the index, the others scan on top of it
        let mut next = plan.alloc(Op::IndexSelect {
            input: leaf,
            predicate: predicates[picked].clone(),
        });
        for (i, pred) in predicates.iter().enumerate() {
            if i != picked {
                next = plan.alloc(Op::ScanSelect {
                    input: next,
                    predicate: pred.clone(),
                });
            }
        }

        plan.replace(parent, op, Some(leaf), next, Some(leaf));
        Some((plan.root(), None))
    }
}

pub struct CompileProjection;

impl Rule for CompileProjection {
    fn name(&self) -> &'static str {
        "compile-projection"
    }

    fn matches(&self, plan: &Plan, op: OpId, _parent: Option<OpId>) -> bool {
        matches!(plan.node(op), Op::Project { .. })
    }

    fn modify(
        &mut self,
        plan: &mut Plan,
        op: OpId,
        parent: Option<OpId>,
    ) -> Option<(OpId, Option<OpId>)> {
        let (input, attrs) = match plan.node(op) {
            Op::Project { input, attrs } => (*input, attrs.clone()),
            _ => unreachable!("matched a projection"),
        };
        let physical = plan.alloc(Op::ScanProject { input, attrs });
        plan.replace(parent, op, Some(op), physical, Some(physical));
        Some((input, Some(physical)))
    }
}

pub struct CompileCartesianProduct;

impl Rule for CompileCartesianProduct {
    fn name(&self) -> &'static str {
        "compile-cartesian-product"
    }

    fn matches(&self, plan: &Plan, op: OpId, _parent: Option<OpId>) -> bool {
        matches!(plan.node(op), Op::Product { .. })
    }

    fn modify(
        &mut self,
        plan: &mut Plan,
        op: OpId,
        parent: Option<OpId>,
    ) -> Option<(OpId, Option<OpId>)> {
        let (left, right) = match plan.node(op) {
            Op::Product { left, right } => (*left, *right),
            _ => unreachable!("matched a product"),
        };
        let physical = plan.alloc(Op::NestedLoopProduct { left, right });
        plan.replace(parent, op, Some(op), physical, Some(physical));
        Some((physical, parent))
    }
}

pub struct CompileRenamingRelation;

impl Rule for CompileRenamingRelation {
    fn name(&self) -> &'static str {
        "compile-renaming-relation"
    }

    fn matches(&self, plan: &Plan, op: OpId, _parent: Option<OpId>) -> bool {
        matches!(plan.node(op), Op::RenameRelation { .. })
    }

    fn modify(
        &mut self,
        plan: &mut Plan,
        op: OpId,
        parent: Option<OpId>,
    ) -> Option<(OpId, Option<OpId>)> {
        let (input, name) = match plan.node(op) {
            Op::RenameRelation { input, name } => (*input, name.clone()),
            _ => unreachable!("matched a rename"),
        };
        let physical = plan.alloc(Op::ScanRenameRelation { input, name });
        plan.replace(parent, op, Some(op), physical, Some(physical));
        Some((physical, parent))
    }
}

pub struct CompileRenamingAttributes;

impl Rule for CompileRenamingAttributes {
    fn name(&self) -> &'static str {
        "compile-renaming-attributes"
    }

    fn matches(&self, plan: &Plan, op: OpId, _parent: Option<OpId>) -> bool {
        matches!(plan.node(op), Op::RenameAttributes { .. })
    }

    fn modify(
        &mut self,
        plan: &mut Plan,
        op: OpId,
        parent: Option<OpId>,
    ) -> Option<(OpId, Option<OpId>)> {
        let (input, changes) = match plan.node(op) {
            Op::RenameAttributes { input, changes } => (*input, changes.clone()),
            _ => unreachable!("matched a rename"),
        };
        let physical = plan.alloc(Op::ScanRenameAttributes { input, changes });
        plan.replace(parent, op, Some(op), physical, Some(physical));
        Some((physical, parent))
    }
}

pub struct CompileThetaJoin;

impl Rule for CompileThetaJoin {
    fn name(&self) -> &'static str {
        "compile-theta-join"
    }

    fn matches(&self, plan: &Plan, op: OpId, _parent: Option<OpId>) -> bool {
        matches!(plan.node(op), Op::ThetaJoin { .. })
    }

    fn modify(
        &mut self,
        plan: &mut Plan,
        op: OpId,
        parent: Option<OpId>,
    ) -> Option<(OpId, Option<OpId>)> {
        let (left, right, theta) = match plan.node(op) {
            Op::ThetaJoin { left, right, theta } => (*left, *right, theta.clone()),
            _ => unreachable!("matched a join"),
        };
        let physical = plan.alloc(Op::NestedLoopJoin { left, right, theta });
        plan.replace(parent, op, Some(op), physical, Some(physical));
        Some((physical, parent))
    }
}

pub struct CompileGrouping;

impl Rule for CompileGrouping {
    fn name(&self) -> &'static str {
        "compile-grouping"
    }

    fn matches(&self, plan: &Plan, op: OpId, _parent: Option<OpId>) -> bool {
        matches!(plan.node(op), Op::Group { .. })
    }

    fn modify(
        &mut self,
        plan: &mut Plan,
        op: OpId,
        parent: Option<OpId>,
    ) -> Option<(OpId, Option<OpId>)> {
        let (input, group_by, aggregates) = match plan.node(op) {
            Op::Group {
                input,
                group_by,
                aggregates,
            } => (*input, group_by.clone(), aggregates.clone()),
            _ => unreachable!("matched a grouping"),
        };
        let physical = plan.alloc(Op::HashGroup {
            input,
            group_by,
            aggregates,
        });
        plan.replace(parent, op, Some(op), physical, Some(physical));
        Some((physical, parent))
    }
}

/// Lowers every logical operator in `plan` to its physical counterpart.
/// Index-based selections are tried first; the scan-based rule catches the
/// rest. After this pass the plan evaluates.
pub fn compile(plan: &mut Plan) {
    let mut rules: Vec<Box<dyn Rule>> = vec![
        Box::new(CompileSetOperator),
        Box::new(CompileSelectionIndex),
        Box::new(CompileSelectionScan),
        Box::new(CompileProjection),
        Box::new(CompileCartesianProduct),
        Box::new(CompileRenamingRelation),
        Box::new(CompileRenamingAttributes),
        Box::new(CompileThetaJoin),
        Box::new(CompileGrouping),
    ];
    for rule in rules.iter_mut() {
        let modified = apply_rule(rule.as_mut(), plan);
        log::trace!("compile rule {} modified={}", rule.name(), modified);
    }
    debug_assert!(plan.is_fully_physical());
}
