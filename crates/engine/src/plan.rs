//! Arena-allocated operator trees.
//!
//! Operators are a closed enum covering both the logical variants and
//! their physical counterparts; nodes live in a flat arena and reference
//! children by [`OpId`]. Rewrite rules mutate child links in place and the
//! structural helpers update the root whenever an edit reaches it. Parents
//! are never stored; traversals pass them down explicitly.

use crate::aggregate::{parse_aggregations, Aggregate};
use crate::errors::PlanError;
use chalkdb_rel::{is_identifier, Relation, Schema, SchemaError};
use itertools::Itertools;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u32);

impl OpId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpKind {
    Intersection,
    Union,
    Difference,
}

impl SetOpKind {
    pub fn symbol(self) -> &'static str {
        match self {
            SetOpKind::Intersection => "∩",
            SetOpKind::Union => "∪",
            SetOpKind::Difference => "−",
        }
    }
}

/// An `new<-old` attribute rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamePair {
    pub new_name: String,
    pub old_name: String,
}

impl RenamePair {
    /// Parses `new<-old`; both sides must be identifiers.
    pub fn parse(change: &str) -> Result<RenamePair, SchemaError> {
        let (new_name, old_name) = change
            .split_once("<-")
            .ok_or_else(|| SchemaError::InvalidIdentifier(change.to_owned()))?;
        let (new_name, old_name) = (new_name.trim(), old_name.trim());
        for side in [new_name, old_name] {
            if !is_identifier(side) {
                return Err(SchemaError::InvalidIdentifier(side.to_owned()));
            }
        }
        Ok(RenamePair {
            new_name: new_name.to_owned(),
            old_name: old_name.to_owned(),
        })
    }
}

impl fmt::Display for RenamePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<-{}", self.new_name, self.old_name)
    }
}

/// One node of a plan. The first group of variants is logical (what to
/// compute), the second physical (how). Only physical variants evaluate.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Leaf wrapping a base relation.
    Relation(Relation),

    // logical
    Select { input: OpId, predicate: String },
    Project { input: OpId, attrs: Vec<String> },
    Product { left: OpId, right: OpId },
    ThetaJoin { left: OpId, right: OpId, theta: String },
    RenameRelation { input: OpId, name: String },
    RenameAttributes { input: OpId, changes: Vec<RenamePair> },
    Group { input: OpId, group_by: Vec<String>, aggregates: Vec<Aggregate> },
    SetOp { kind: SetOpKind, left: OpId, right: OpId },

    // physical
    ScanSelect { input: OpId, predicate: String },
    IndexSelect { input: OpId, predicate: String },
    ScanProject { input: OpId, attrs: Vec<String> },
    NestedLoopProduct { left: OpId, right: OpId },
    NestedLoopJoin { left: OpId, right: OpId, theta: String },
    ScanRenameRelation { input: OpId, name: String },
    ScanRenameAttributes { input: OpId, changes: Vec<RenamePair> },
    HashGroup { input: OpId, group_by: Vec<String>, aggregates: Vec<Aggregate> },
    HashSetOp { kind: SetOpKind, left: OpId, right: OpId },
}

impl Op {
    pub fn is_physical(&self) -> bool {
        matches!(
            self,
            Op::Relation(_)
                | Op::ScanSelect { .. }
                | Op::IndexSelect { .. }
                | Op::ScanProject { .. }
                | Op::NestedLoopProduct { .. }
                | Op::NestedLoopJoin { .. }
                | Op::ScanRenameRelation { .. }
                | Op::ScanRenameAttributes { .. }
                | Op::HashGroup { .. }
                | Op::HashSetOp { .. }
        )
    }

    /// Any selection variant, logical or physical.
    pub fn is_select(&self) -> bool {
        matches!(
            self,
            Op::Select { .. } | Op::ScanSelect { .. } | Op::IndexSelect { .. }
        )
    }

    /// Any projection variant, logical or physical.
    pub fn is_project(&self) -> bool {
        matches!(self, Op::Project { .. } | Op::ScanProject { .. })
    }

    pub fn selection_predicate(&self) -> Option<&str> {
        match self {
            Op::Select { predicate, .. }
            | Op::ScanSelect { predicate, .. }
            | Op::IndexSelect { predicate, .. } => Some(predicate),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Op::Relation(_) => "Relation",
            Op::Select { .. } => "Selection",
            Op::Project { .. } => "Projection",
            Op::Product { .. } => "CartesianProduct",
            Op::ThetaJoin { .. } => "ThetaJoin",
            Op::RenameRelation { .. } => "RenameRelation",
            Op::RenameAttributes { .. } => "RenameAttributes",
            Op::Group { .. } => "Grouping",
            Op::SetOp { .. } => "SetOperator",
            Op::ScanSelect { .. } => "ScanSelect",
            Op::IndexSelect { .. } => "IndexSelect",
            Op::ScanProject { .. } => "ScanProject",
            Op::NestedLoopProduct { .. } => "NestedLoopProduct",
            Op::NestedLoopJoin { .. } => "NestedLoopJoin",
            Op::ScanRenameRelation { .. } => "ScanRenameRelation",
            Op::ScanRenameAttributes { .. } => "ScanRenameAttributes",
            Op::HashGroup { .. } => "HashGroup",
            Op::HashSetOp { .. } => "HashSetOp",
        }
    }

    fn input_slot(&self) -> Option<OpId> {
        match self {
            Op::Select { input, .. }
            | Op::Project { input, .. }
            | Op::RenameRelation { input, .. }
            | Op::RenameAttributes { input, .. }
            | Op::Group { input, .. }
            | Op::ScanSelect { input, .. }
            | Op::IndexSelect { input, .. }
            | Op::ScanProject { input, .. }
            | Op::ScanRenameRelation { input, .. }
            | Op::ScanRenameAttributes { input, .. }
            | Op::HashGroup { input, .. } => Some(*input),
            _ => None,
        }
    }

    fn binary_slots(&self) -> Option<(OpId, OpId)> {
        match self {
            Op::Product { left, right }
            | Op::ThetaJoin { left, right, .. }
            | Op::SetOp { left, right, .. }
            | Op::NestedLoopProduct { left, right }
            | Op::NestedLoopJoin { left, right, .. }
            | Op::HashSetOp { left, right, .. } => Some((*left, *right)),
            _ => None,
        }
    }
}

/// A query plan: an operator arena plus the id of its root.
#[derive(Debug, Clone)]
pub struct Plan {
    nodes: Vec<Op>,
    root: OpId,
}

/// Accumulates operators bottom-up, then pins the root with
/// [`PlanBuilder::finish`].
#[derive(Debug, Default)]
pub struct PlanBuilder {
    nodes: Vec<Op>,
}

fn parse_name_list(text: &str) -> Vec<String> {
    text.split(',').map(|s| s.trim().to_owned()).collect()
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, op: Op) -> OpId {
        let id = OpId(self.nodes.len() as u32);
        self.nodes.push(op);
        id
    }

    pub fn relation(&mut self, relation: Relation) -> OpId {
        self.push(Op::Relation(relation))
    }

    pub fn select(&mut self, input: OpId, predicate: impl Into<String>) -> OpId {
        self.push(Op::Select {
            input,
            predicate: predicate.into(),
        })
    }

    /// `attrs` is a comma-separated attribute list.
    pub fn project(&mut self, input: OpId, attrs: &str) -> OpId {
        self.push(Op::Project {
            input,
            attrs: parse_name_list(attrs),
        })
    }

    pub fn product(&mut self, left: OpId, right: OpId) -> OpId {
        self.push(Op::Product { left, right })
    }

    pub fn theta_join(&mut self, left: OpId, right: OpId, theta: impl Into<String>) -> OpId {
        self.push(Op::ThetaJoin {
            left,
            right,
            theta: theta.into(),
        })
    }

    pub fn rename_relation(&mut self, input: OpId, name: impl Into<String>) -> OpId {
        self.push(Op::RenameRelation {
            input,
            name: name.into(),
        })
    }

    /// `changes` is a comma-separated list of `new<-old` renames.
    pub fn rename_attributes(&mut self, input: OpId, changes: &str) -> Result<OpId, PlanError> {
        let changes = parse_name_list(changes)
            .into_iter()
            .map(|c| RenamePair::parse(&c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.push(Op::RenameAttributes { input, changes }))
    }

    /// `group_by` is a comma-separated attribute list, `aggregations` a
    /// comma-separated list of `fn(attr)` forms (possibly empty).
    pub fn group(
        &mut self,
        input: OpId,
        group_by: &str,
        aggregations: &str,
    ) -> Result<OpId, PlanError> {
        let aggregates = parse_aggregations(aggregations)?;
        Ok(self.push(Op::Group {
            input,
            group_by: parse_name_list(group_by),
            aggregates,
        }))
    }

    pub fn set_op(&mut self, kind: SetOpKind, left: OpId, right: OpId) -> OpId {
        self.push(Op::SetOp { kind, left, right })
    }

    pub fn intersection(&mut self, left: OpId, right: OpId) -> OpId {
        self.set_op(SetOpKind::Intersection, left, right)
    }

    pub fn union(&mut self, left: OpId, right: OpId) -> OpId {
        self.set_op(SetOpKind::Union, left, right)
    }

    pub fn difference(&mut self, left: OpId, right: OpId) -> OpId {
        self.set_op(SetOpKind::Difference, left, right)
    }

    pub fn finish(self, root: OpId) -> Plan {
        Plan {
            nodes: self.nodes,
            root,
        }
    }
}

impl Plan {
    pub fn root(&self) -> OpId {
        self.root
    }

    pub fn node(&self, id: OpId) -> &Op {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: OpId) -> &mut Op {
        &mut self.nodes[id.index()]
    }

    /// Allocates a new node; used by rules while rewriting. Replaced nodes
    /// simply become unreachable.
    pub fn alloc(&mut self, op: Op) -> OpId {
        let id = OpId(self.nodes.len() as u32);
        self.nodes.push(op);
        id
    }

    pub fn is_leaf(&self, id: OpId) -> bool {
        matches!(self.node(id), Op::Relation(_))
    }

    pub fn is_unary(&self, id: OpId) -> bool {
        self.node(id).input_slot().is_some()
    }

    pub fn is_binary(&self, id: OpId) -> bool {
        self.node(id).binary_slots().is_some()
    }

    pub fn input(&self, id: OpId) -> Option<OpId> {
        self.node(id).input_slot()
    }

    pub fn left(&self, id: OpId) -> Option<OpId> {
        self.node(id).binary_slots().map(|(l, _)| l)
    }

    pub fn right(&self, id: OpId) -> Option<OpId> {
        self.node(id).binary_slots().map(|(_, r)| r)
    }

    pub fn children(&self, id: OpId) -> Vec<OpId> {
        match self.node(id) {
            op if op.input_slot().is_some() => vec![op.input_slot().expect("unary")],
            op => op
                .binary_slots()
                .map(|(l, r)| vec![l, r])
                .unwrap_or_default(),
        }
    }

    /// True when every reachable node is physical.
    pub fn is_fully_physical(&self) -> bool {
        self.reachable(self.root)
            .iter()
            .all(|id| self.node(*id).is_physical())
    }

    fn reachable(&self, from: OpId) -> Vec<OpId> {
        let mut out = vec![from];
        let mut i = 0;
        while i < out.len() {
            out.extend(self.children(out[i]));
            i += 1;
        }
        out
    }

    /// Whether the sub-plan rooted at `id` produces attribute `name`.
    pub fn has_attribute(&self, id: OpId, name: &str) -> bool {
        self.schema_of(id)
            .map(|s| s.has_attribute(name))
            .unwrap_or(false)
    }

    /// Derives the output schema of the sub-plan rooted at `id`.
    ///
    /// Purely a function of child schemas and operator parameters, and the
    /// place where structural integrity is enforced: set operators demand
    /// identical child schemas, products reject overlapping attribute
    /// names, renames insist on identifiers and existing attributes.
    pub fn schema_of(&self, id: OpId) -> Result<Schema, PlanError> {
        match self.node(id) {
            Op::Relation(rel) => Ok(rel.schema().clone()),
            Op::Select { input, .. }
            | Op::ScanSelect { input, .. }
            | Op::IndexSelect { input, .. } => self.schema_of(*input),
            Op::Project { input, attrs } | Op::ScanProject { input, attrs } => {
                Ok(self.schema_of(*input)?.project(attrs)?)
            }
            Op::Product { left, right }
            | Op::NestedLoopProduct { left, right }
            | Op::ThetaJoin { left, right, .. }
            | Op::NestedLoopJoin { left, right, .. } => {
                Ok(self.schema_of(*left)?.concat(&self.schema_of(*right)?)?)
            }
            Op::RenameRelation { input, name } | Op::ScanRenameRelation { input, name } => {
                if !is_identifier(name) {
                    return Err(SchemaError::InvalidIdentifier(name.clone()).into());
                }
                self.schema_of(*input)
            }
            Op::RenameAttributes { input, changes }
            | Op::ScanRenameAttributes { input, changes } => {
                let mut schema = self.schema_of(*input)?;
                for change in changes {
                    schema = schema.rename(&change.new_name, &change.old_name)?;
                }
                Ok(schema)
            }
            Op::Group {
                input,
                group_by,
                aggregates,
            }
            | Op::HashGroup {
                input,
                group_by,
                aggregates,
            } => {
                let child = self.schema_of(*input)?;
                let mut attrs = Vec::new();
                for attr in child.iter() {
                    if group_by.iter().any(|g| *g == attr.name) {
                        attrs.push((attr.name.clone(), attr.domain));
                    }
                }
                for agg in aggregates {
                    attrs.push((agg.column_name(), agg.output_domain()));
                }
                Ok(Schema::new(attrs)?)
            }
            Op::SetOp { left, right, .. } | Op::HashSetOp { left, right, .. } => {
                let l = self.schema_of(*left)?;
                let r = self.schema_of(*right)?;
                if l != r {
                    return Err(PlanError::SetSchemaMismatch {
                        left: l.to_string(),
                        right: r.to_string(),
                    });
                }
                Ok(l)
            }
        }
    }

    /// Redirects whichever child link of `parent` points at `from` to
    /// point at `to`.
    fn relink(&mut self, parent: OpId, from: OpId, to: OpId) {
        match self.node_mut(parent) {
            Op::Select { input, .. }
            | Op::Project { input, .. }
            | Op::RenameRelation { input, .. }
            | Op::RenameAttributes { input, .. }
            | Op::Group { input, .. }
            | Op::ScanSelect { input, .. }
            | Op::IndexSelect { input, .. }
            | Op::ScanProject { input, .. }
            | Op::ScanRenameRelation { input, .. }
            | Op::ScanRenameAttributes { input, .. }
            | Op::HashGroup { input, .. } => {
                debug_assert_eq!(*input, from);
                *input = to;
            }
            Op::Product { left, right }
            | Op::ThetaJoin { left, right, .. }
            | Op::SetOp { left, right, .. }
            | Op::NestedLoopProduct { left, right }
            | Op::NestedLoopJoin { left, right, .. }
            | Op::HashSetOp { left, right, .. } => {
                debug_assert!(*left == from || *right == from);
                if *left == from {
                    *left = to;
                } else {
                    *right = to;
                }
            }
            Op::Relation(_) => unreachable!("a leaf has no children to relink"),
        }
    }

    /// Sets the single child of a unary operator.
    pub fn set_input(&mut self, id: OpId, child: OpId) {
        let current = self.input(id).expect("set_input on a non-unary operator");
        if current != child {
            self.relink(id, current, child);
        }
    }

    /// Replaces the chain `top_old ..= bottom_old` under `parent` with the
    /// chain `top_new ..= bottom_new`. With `parent == None` the root is
    /// replaced. `bottom_old`/`bottom_new == None` swaps a whole subtree.
    pub fn replace(
        &mut self,
        parent: Option<OpId>,
        top_old: OpId,
        bottom_old: Option<OpId>,
        top_new: OpId,
        bottom_new: Option<OpId>,
    ) {
        match parent {
            Some(p) => self.relink(p, top_old, top_new),
            None => self.root = top_new,
        }
        if let (Some(bottom_old), Some(bottom_new)) = (bottom_old, bottom_new) {
            if let Some(child) = self.input(bottom_old) {
                self.set_input(bottom_new, child);
            } else if let Some((l, r)) = self.node(bottom_old).binary_slots() {
                let (nl, nr) = self
                    .node(bottom_new)
                    .binary_slots()
                    .expect("binary bottom replaced by non-binary operator");
                self.relink(bottom_new, nl, l);
                let (_, nr2) = self.node(bottom_new).binary_slots().expect("binary");
                debug_assert_eq!(nr2, nr);
                self.relink(bottom_new, nr, r);
            }
            // a leaf bottom has no child links to forward
        }
    }

    /// Unlinks the unary operator `op`, attaching its child to `parent`.
    pub fn delete(&mut self, parent: Option<OpId>, op: OpId) {
        let child = self.input(op).expect("delete only supports unary operators");
        match parent {
            Some(p) => self.relink(p, op, child),
            None => self.root = child,
        }
    }

    /// Inserts the unary operator `op` directly below `new_parent` (on the
    /// `left` side when `new_parent` is binary).
    pub fn put(&mut self, new_parent: OpId, op: OpId, left: bool) {
        debug_assert!(self.is_unary(op), "put only supports unary operators");
        let grandchild = if let Some(input) = self.input(new_parent) {
            input
        } else {
            let (l, r) = self
                .node(new_parent)
                .binary_slots()
                .expect("put below a leaf operator");
            if left {
                l
            } else {
                r
            }
        };
        self.relink(new_parent, grandchild, op);
        self.set_input(op, grandchild);
    }

    /// Moves the unary operator `op` from under `old_parent` to directly
    /// below `new_parent`.
    pub fn move_op(&mut self, old_parent: Option<OpId>, op: OpId, new_parent: OpId, left: bool) {
        self.delete(old_parent, op);
        self.put(new_parent, op, left);
    }

    fn fmt_expr(&self, id: OpId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node(id) {
            Op::Relation(rel) => f.write_str(rel.name()),
            Op::Select { input, predicate } => {
                write!(f, "σ_[{predicate}](")?;
                self.fmt_expr(*input, f)?;
                f.write_str(")")
            }
            Op::ScanSelect { input, predicate } => {
                write!(f, "σ_ScanBased[{predicate}](")?;
                self.fmt_expr(*input, f)?;
                f.write_str(")")
            }
            Op::IndexSelect { input, predicate } => {
                write!(f, "σ_IndexBased[{predicate}](")?;
                self.fmt_expr(*input, f)?;
                f.write_str(")")
            }
            Op::Project { input, attrs } | Op::ScanProject { input, attrs } => {
                write!(f, "π_[{}](", attrs.iter().join(", "))?;
                self.fmt_expr(*input, f)?;
                f.write_str(")")
            }
            Op::Product { left, right } | Op::NestedLoopProduct { left, right } => {
                f.write_str("(")?;
                self.fmt_expr(*left, f)?;
                f.write_str(") × (")?;
                self.fmt_expr(*right, f)?;
                f.write_str(")")
            }
            Op::ThetaJoin { left, right, theta } | Op::NestedLoopJoin { left, right, theta } => {
                f.write_str("(")?;
                self.fmt_expr(*left, f)?;
                write!(f, ") ⋈_[{theta}] (")?;
                self.fmt_expr(*right, f)?;
                f.write_str(")")
            }
            Op::RenameRelation { input, name } | Op::ScanRenameRelation { input, name } => {
                write!(f, "ρ_[{name}](")?;
                self.fmt_expr(*input, f)?;
                f.write_str(")")
            }
            Op::RenameAttributes { input, changes }
            | Op::ScanRenameAttributes { input, changes } => {
                write!(f, "ρ_[{}](", changes.iter().join(", "))?;
                self.fmt_expr(*input, f)?;
                f.write_str(")")
            }
            Op::Group {
                input,
                group_by,
                aggregates,
            }
            | Op::HashGroup {
                input,
                group_by,
                aggregates,
            } => {
                let labels = group_by
                    .iter()
                    .cloned()
                    .chain(aggregates.iter().map(|a| a.label()))
                    .join(", ");
                write!(f, "γ_[{labels}](")?;
                self.fmt_expr(*input, f)?;
                f.write_str(")")
            }
            Op::SetOp { kind, left, right } | Op::HashSetOp { kind, left, right } => {
                f.write_str("(")?;
                self.fmt_expr(*left, f)?;
                write!(f, ") {} (", kind.symbol())?;
                self.fmt_expr(*right, f)?;
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_expr(self.root, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chalkdb_rel::{row, Domain};
    use pretty_assertions::assert_eq;

    fn rel(name: &str, attrs: &[(&str, Domain)]) -> Relation {
        Relation::new(name, Schema::new(attrs.to_vec()).unwrap())
    }

    #[test]
    fn schema_derivation_is_bottom_up() {
        let mut b = PlanBuilder::new();
        let r = b.relation(rel("R", &[("a", Domain::Int), ("b", Domain::Int)]));
        let s = b.relation(rel("S", &[("c", Domain::Int), ("d", Domain::Str)]));
        let prod = b.product(r, s);
        let sel = b.select(prod, "a == 2");
        let proj = b.project(sel, "a, d");
        let plan = b.finish(proj);

        let schema = plan.schema_of(plan.root()).unwrap();
        assert_eq!(schema.names().collect::<Vec<_>>(), ["a", "d"]);
    }

    #[test]
    fn product_rejects_overlapping_attributes() {
        let mut b = PlanBuilder::new();
        let r = b.relation(rel("R", &[("a", Domain::Int)]));
        let s = b.relation(rel("S", &[("a", Domain::Int)]));
        let prod = b.product(r, s);
        let plan = b.finish(prod);
        assert!(matches!(
            plan.schema_of(plan.root()),
            Err(PlanError::Schema(SchemaError::DuplicateAttribute(_)))
        ));
    }

    #[test]
    fn set_op_demands_identical_schemas() {
        let mut b = PlanBuilder::new();
        let r = b.relation(rel("R", &[("a", Domain::Int)]));
        let s = b.relation(rel("S", &[("a", Domain::Str)]));
        let u = b.union(r, s);
        let plan = b.finish(u);
        assert!(matches!(
            plan.schema_of(plan.root()),
            Err(PlanError::SetSchemaMismatch { .. })
        ));
    }

    #[test]
    fn rename_attributes_applies_in_order() {
        let mut b = PlanBuilder::new();
        let r = b.relation(rel("R", &[("a", Domain::Int), ("b", Domain::Int)]));
        let ren = b.rename_attributes(r, "x<-a, y<-b").unwrap();
        let plan = b.finish(ren);
        let schema = plan.schema_of(plan.root()).unwrap();
        assert_eq!(schema.names().collect::<Vec<_>>(), ["x", "y"]);
    }

    #[test]
    fn grouping_schema_names_aggregate_columns() {
        let mut b = PlanBuilder::new();
        let r = b.relation(rel("R", &[("g", Domain::Int), ("v", Domain::Int)]));
        let grp = b.group(r, "g", "sum(v), count(*), avg(v)").unwrap();
        let plan = b.finish(grp);
        let schema = plan.schema_of(plan.root()).unwrap();
        assert_eq!(
            schema.names().collect::<Vec<_>>(),
            ["g", "sum_v", "count_star", "avg_v"]
        );
        assert_eq!(schema.domain_of("avg_v"), Some(Domain::Float));
        assert_eq!(schema.domain_of("sum_v"), Some(Domain::Int));
    }

    #[test]
    fn structural_edits_update_the_root() {
        // build σ(R), then delete the selection: root becomes the leaf
        let mut b = PlanBuilder::new();
        let mut r_rel = rel("R", &[("a", Domain::Int)]);
        r_rel.add_tuple(row![1]).unwrap();
        let r = b.relation(r_rel);
        let sel = b.select(r, "a == 1");
        let mut plan = b.finish(sel);

        plan.delete(None, sel);
        assert_eq!(plan.root(), r);

        // put the selection back above the leaf via the root path
        let sel2 = plan.alloc(Op::Select {
            input: r,
            predicate: "a == 1".into(),
        });
        plan.replace(None, r, None, sel2, None);
        assert_eq!(plan.root(), sel2);
        assert_eq!(plan.input(sel2), Some(r));
    }

    #[test]
    fn display_renders_the_expression() {
        let mut b = PlanBuilder::new();
        let r = b.relation(rel("R", &[("a", Domain::Int)]));
        let s = b.relation(rel("S", &[("c", Domain::Int)]));
        let prod = b.product(r, s);
        let sel = b.select(prod, "a == 2");
        let plan = b.finish(sel);
        assert_eq!(plan.to_string(), "σ_[a == 2]((R) × (S))");
    }
}
