//! Graphviz rendering of plans. The exact encoding is incidental; labels
//! follow the usual relational-algebra symbols with the access method as a
//! suffix, and the graph is laid out bottom-up.

use crate::plan::{Op, OpId, Plan};
use itertools::Itertools;
use std::fmt::Write;

fn fill_color(op: &Op) -> Option<&'static str> {
    match op {
        Op::Select { .. } | Op::ScanSelect { .. } | Op::IndexSelect { .. } => Some("#FFD479"),
        Op::Project { .. } | Op::ScanProject { .. } => Some("#76D6FF"),
        Op::Product { .. } | Op::NestedLoopProduct { .. } => Some("#D4FB79"),
        Op::ThetaJoin { .. } | Op::NestedLoopJoin { .. } => Some("#FFFC79"),
        Op::RenameRelation { .. }
        | Op::RenameAttributes { .. }
        | Op::ScanRenameRelation { .. }
        | Op::ScanRenameAttributes { .. } => Some("#FF8AD8"),
        Op::Group { .. } | Op::HashGroup { .. } => Some("#7A81FF"),
        Op::SetOp { .. } | Op::HashSetOp { .. } => Some("#FF7E79"),
        Op::Relation(_) => None,
    }
}

fn label(plan: &Plan, id: OpId) -> String {
    match plan.node(id) {
        Op::Relation(rel) => {
            let indexed = rel.indexed_attributes().collect::<Vec<_>>();
            if indexed.is_empty() {
                rel.name().to_owned()
            } else {
                format!("{}\nIndex on: {}", rel.name(), indexed.join(", "))
            }
        }
        Op::Select { predicate, .. } => format!("σ_[{predicate}]"),
        Op::ScanSelect { predicate, .. } => format!("σ_ScanBased[{predicate}]"),
        Op::IndexSelect { predicate, .. } => format!("σ_IndexBased[{predicate}]"),
        Op::Project { attrs, .. } => format!("π_[{}]", attrs.iter().join(", ")),
        Op::ScanProject { attrs, .. } => format!("π_ScanBased[{}]", attrs.iter().join(", ")),
        Op::Product { .. } => "×".to_owned(),
        Op::NestedLoopProduct { .. } => "×_NestedLoop".to_owned(),
        Op::ThetaJoin { theta, .. } => format!("⋈_[{theta}]"),
        Op::NestedLoopJoin { theta, .. } => format!("⋈_NestedLoop[{theta}]"),
        Op::RenameRelation { name, .. } => format!("ρ_[{name}]"),
        Op::ScanRenameRelation { name, .. } => format!("ρ_ScanBased[{name}]"),
        Op::RenameAttributes { changes, .. } => format!("ρ_[{}]", changes.iter().join(", ")),
        Op::ScanRenameAttributes { changes, .. } => {
            format!("ρ_ScanBased[{}]", changes.iter().join(", "))
        }
        Op::Group {
            group_by,
            aggregates,
            ..
        } => format!(
            "γ_[{}]",
            group_by
                .iter()
                .cloned()
                .chain(aggregates.iter().map(|a| a.label()))
                .join(", ")
        ),
        Op::HashGroup {
            group_by,
            aggregates,
            ..
        } => format!(
            "γ_HashBased[{}]",
            group_by
                .iter()
                .cloned()
                .chain(aggregates.iter().map(|a| a.label()))
                .join(", ")
        ),
        Op::SetOp { kind, .. } => kind.symbol().to_owned(),
        Op::HashSetOp { kind, .. } => format!("{}_HashBased", kind.symbol()),
    }
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// Emits Graphviz source for the plan, edges pointing from child to
/// parent, laid out bottom-up.
pub fn plan_to_dot(plan: &Plan) -> String {
    let mut out = String::new();
    out.push_str("digraph {\n  rankdir=BT;\n");
    emit(plan, plan.root(), &mut out);
    out.push_str("}\n");
    out
}

fn emit(plan: &Plan, id: OpId, out: &mut String) {
    let node = plan.node(id);
    let attrs = match fill_color(node) {
        Some(color) => format!(" style=filled fillcolor=\"{color}\""),
        None => String::new(),
    };
    let _ = writeln!(out, "  {id} [label=\"{}\"{attrs}];", escape(&label(plan, id)));
    for child in plan.children(id) {
        emit(plan, child, out);
        let _ = writeln!(out, "  {child} -> {id};");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanBuilder;
    use chalkdb_rel::{row, Domain, Relation, Schema};

    #[test]
    fn renders_nodes_edges_and_index_annotations() {
        let schema = Schema::new([("a", Domain::Int)]).unwrap();
        let mut rel = Relation::new("R", schema);
        rel.add_tuple(row![1]).unwrap();
        rel.build_index("a").unwrap();

        let mut b = PlanBuilder::new();
        let leaf = b.relation(rel);
        let sel = b.select(leaf, "a == 1");
        let plan = b.finish(sel);

        let dot = plan_to_dot(&plan);
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("rankdir=BT"));
        assert!(dot.contains("σ_[a == 1]"));
        assert!(dot.contains("R\\nIndex on: a"));
        assert!(dot.contains(&format!("{leaf} -> {sel};")));
    }
}
