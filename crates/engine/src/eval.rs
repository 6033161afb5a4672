//! Pull-model evaluation of physical plans. Each operator materializes
//! its children into relations and produces a new relation named
//! `"Result"`; there is no pipelining. Logical operators refuse to
//! evaluate; run [`crate::compile::compile`] first.

use crate::aggregate::Aggregate;
use crate::errors::PlanError;
use crate::plan::{Op, OpId, Plan, SetOpKind};
use crate::predicate::Predicate;
use chalkdb_rel::{Relation, Schema, SchemaError, Tuple};
use indexmap::IndexMap;

/// Evaluates the whole plan.
pub fn evaluate(plan: &Plan) -> Result<Relation, PlanError> {
    evaluate_at(plan, plan.root())
}

/// Evaluates the sub-plan rooted at `op`.
pub fn evaluate_at(plan: &Plan, op: OpId) -> Result<Relation, PlanError> {
    match plan.node(op) {
        Op::Relation(rel) => Ok(rel.clone()),
        Op::ScanSelect { input, predicate } => {
            let child = evaluate_at(plan, *input)?;
            filter_by_predicate(&child, predicate, plan.schema_of(op)?)
        }
        Op::IndexSelect { input, predicate } => {
            // use the index when the input is the indexed leaf itself;
            // otherwise this degrades to a scan
            if let Op::Relation(rel) = plan.node(*input) {
                if let Some(result) = index_lookup(rel, predicate)? {
                    return Ok(result);
                }
            }
            let child = evaluate_at(plan, *input)?;
            filter_by_predicate(&child, predicate, plan.schema_of(op)?)
        }
        Op::ScanProject { input, attrs } => {
            let child = evaluate_at(plan, *input)?;
            let schema = plan.schema_of(op)?;
            let positions = attrs
                .iter()
                .map(|name| {
                    child
                        .attribute_index(name)
                        .ok_or_else(|| SchemaError::UnknownAttribute(name.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let mut out = Relation::new("Result", schema);
            for tuple in child.iter() {
                out.add_tuple(positions.iter().map(|&i| tuple[i].clone()).collect())?;
            }
            Ok(out)
        }
        Op::NestedLoopProduct { left, right } => {
            let l = evaluate_at(plan, *left)?;
            let r = evaluate_at(plan, *right)?;
            let mut out = Relation::new("Result", plan.schema_of(op)?);
            for lt in l.iter() {
                for rt in r.iter() {
                    let mut tuple = lt.clone();
                    tuple.extend(rt.iter().cloned());
                    out.add_tuple(tuple)?;
                }
            }
            Ok(out)
        }
        Op::NestedLoopJoin { left, right, theta } => {
            let l = evaluate_at(plan, *left)?;
            let r = evaluate_at(plan, *right)?;
            let schema = plan.schema_of(op)?;
            let parsed = Predicate::parse(theta)?;
            let mut out = Relation::new("Result", schema.clone());
            for lt in l.iter() {
                for rt in r.iter() {
                    let mut tuple = lt.clone();
                    tuple.extend(rt.iter().cloned());
                    let lookup =
                        |name: &str| schema.index_of(name).map(|i| tuple[i].clone());
                    if parsed.eval(&lookup)? {
                        out.add_tuple(tuple)?;
                    }
                }
            }
            Ok(out)
        }
        Op::ScanRenameRelation { input, name } => {
            let child = evaluate_at(plan, *input)?;
            let mut out = Relation::new(name.clone(), plan.schema_of(op)?);
            for tuple in child.iter() {
                out.add_tuple(tuple.clone())?;
            }
            Ok(out)
        }
        Op::ScanRenameAttributes { input, .. } => {
            let child = evaluate_at(plan, *input)?;
            let mut out = Relation::new("Result", plan.schema_of(op)?);
            for tuple in child.iter() {
                out.add_tuple(tuple.clone())?;
            }
            Ok(out)
        }
        Op::HashGroup {
            input,
            group_by,
            aggregates,
        } => {
            let child = evaluate_at(plan, *input)?;
            hash_group(&child, group_by, aggregates, plan.schema_of(op)?)
        }
        Op::HashSetOp { kind, left, right } => {
            let l = evaluate_at(plan, *left)?;
            let r = evaluate_at(plan, *right)?;
            let schema = plan.schema_of(op)?;
            let mut out = Relation::new("Result", schema);
            match kind {
                SetOpKind::Intersection => {
                    for tuple in l.iter().filter(|t| r.contains(t)) {
                        out.add_tuple(tuple.clone())?;
                    }
                }
                SetOpKind::Union => {
                    for tuple in l.iter().chain(r.iter()) {
                        out.add_tuple(tuple.clone())?;
                    }
                }
                SetOpKind::Difference => {
                    for tuple in l.iter().filter(|t| !r.contains(t)) {
                        out.add_tuple(tuple.clone())?;
                    }
                }
            }
            Ok(out)
        }
        logical => Err(PlanError::NotCompiled(logical.kind_name())),
    }
}

fn filter_by_predicate(
    child: &Relation,
    predicate: &str,
    schema: Schema,
) -> Result<Relation, PlanError> {
    let parsed = Predicate::parse(predicate)?;
    let mut out = Relation::new("Result", schema);
    for tuple in child.iter() {
        let lookup = |name: &str| child.attribute_index(name).map(|i| tuple[i].clone());
        if parsed.eval(&lookup)? {
            out.add_tuple(tuple.clone())?;
        }
    }
    Ok(out)
}

/// Answers an index-based selection straight from the leaf's index.
/// Returns `None` when the predicate does not probe an indexed attribute.
fn index_lookup(rel: &Relation, predicate: &str) -> Result<Option<Relation>, PlanError> {
    let parsed = Predicate::parse(predicate)?;
    let Some((attr, op, key)) = parsed.as_index_probe(rel.schema()) else {
        return Ok(None);
    };
    let Some(index) = rel.index_on(&attr) else {
        return Ok(None);
    };
    let Some(domain) = rel.attribute_domain(&attr) else {
        return Ok(None);
    };
    let key = match key.coerce(domain) {
        Some(key) => key,
        // a key outside the column domain matches nothing
        None => return Ok(Some(Relation::new("Result", rel.schema().clone()))),
    };
    let mut out = Relation::new("Result", rel.schema().clone());
    for tuple in index.lookup(op, &key) {
        out.add_tuple(tuple.clone())?;
    }
    Ok(Some(out))
}

fn hash_group(
    child: &Relation,
    group_by: &[String],
    aggregates: &[Aggregate],
    schema: Schema,
) -> Result<Relation, PlanError> {
    let key_positions = group_by
        .iter()
        .map(|name| {
            child
                .attribute_index(name)
                .ok_or_else(|| SchemaError::UnknownAttribute(name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut groups: IndexMap<Tuple, Vec<&Tuple>> = IndexMap::new();
    for tuple in child.iter() {
        let key: Tuple = key_positions.iter().map(|&i| tuple[i].clone()).collect();
        groups.entry(key).or_default().push(tuple);
    }

    let agg_positions = aggregates
        .iter()
        .map(|agg| match &agg.attribute {
            Some(attr) => child
                .attribute_index(attr)
                .map(Some)
                .ok_or_else(|| SchemaError::UnknownAttribute(attr.clone())),
            None => Ok(None),
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;

    let mut out = Relation::new("Result", schema);
    for (key, bucket) in &groups {
        let mut tuple = key.clone();
        for (agg, pos) in aggregates.iter().zip(&agg_positions) {
            tuple.push(agg.apply(bucket, *pos)?);
        }
        out.add_tuple(tuple)?;
    }
    Ok(out)
}
