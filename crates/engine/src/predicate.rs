//! A small evaluator for selection and join predicates: comparisons over
//! attributes and literals, conjoined with `and`. No parentheses, no
//! disjunction, no arithmetic. Parsing happens before evaluation starts,
//! so a malformed predicate surfaces to the caller and the query never
//! runs.

use crate::errors::PlanError;
use chalkdb_rel::{is_identifier, CmpOp, Schema, Value};
use std::collections::BTreeSet;
use std::fmt;

/// One side of a comparison: a name resolved against bindings at
/// evaluation time, or a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Name(String),
    Literal(Value),
}

impl Term {
    fn parse(text: &str, predicate: &str) -> Result<Term, PlanError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(parse_error(predicate, "missing operand"));
        }
        if (text.starts_with('\'') && text.ends_with('\'') && text.len() >= 2)
            || (text.starts_with('"') && text.ends_with('"') && text.len() >= 2)
        {
            return Ok(Term::Literal(Value::from(&text[1..text.len() - 1])));
        }
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Term::Literal(Value::Int(i)));
        }
        if let Ok(f) = text.parse::<f64>() {
            return Ok(Term::Literal(Value::from(f)));
        }
        if is_identifier(text) {
            return Ok(Term::Name(text.to_owned()));
        }
        Err(parse_error(predicate, &format!("bad operand `{text}`")))
    }

    fn resolve(&self, lookup: &impl Fn(&str) -> Option<Value>) -> Result<Value, PlanError> {
        match self {
            Term::Name(name) => lookup(name).ok_or_else(|| PlanError::UnboundName(name.clone())),
            Term::Literal(value) => Ok(value.clone()),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Name(n) => f.write_str(n),
            Term::Literal(v) => v.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub lhs: Term,
    pub op: CmpOp,
    pub rhs: Term,
}

/// A conjunction of comparisons.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    conjuncts: Vec<Comparison>,
}

fn parse_error(predicate: &str, reason: &str) -> PlanError {
    PlanError::ParsePredicate {
        predicate: predicate.to_owned(),
        reason: reason.to_owned(),
    }
}

impl Predicate {
    pub fn parse(text: &str) -> Result<Predicate, PlanError> {
        if text.contains('(') || text.contains(')') {
            return Err(parse_error(text, "parentheses are not supported"));
        }
        let mut conjuncts = Vec::new();
        for part in text.split(" and ") {
            conjuncts.push(Self::parse_comparison(part, text)?);
        }
        Ok(Predicate { conjuncts })
    }

    fn parse_comparison(part: &str, predicate: &str) -> Result<Comparison, PlanError> {
        for (token, op) in CmpOp::TOKENS {
            if let Some(pos) = part.find(token) {
                let lhs = Term::parse(&part[..pos], predicate)?;
                let rhs = Term::parse(&part[pos + token.len()..], predicate)?;
                return Ok(Comparison { lhs, op, rhs });
            }
        }
        Err(parse_error(predicate, "no comparison operator"))
    }

    pub fn conjuncts(&self) -> &[Comparison] {
        &self.conjuncts
    }

    /// Evaluates the predicate with names resolved through `lookup`.
    pub fn eval(&self, lookup: &impl Fn(&str) -> Option<Value>) -> Result<bool, PlanError> {
        for cmp in &self.conjuncts {
            let lhs = cmp.lhs.resolve(lookup)?;
            let rhs = cmp.rhs.resolve(lookup)?;
            let holds = cmp.op.eval(&lhs, &rhs).ok_or(PlanError::Incomparable {
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            })?;
            if !holds {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// For a single-comparison predicate between an attribute of `schema`
    /// and a literal, returns `(attribute, op, key)` normalized so the
    /// attribute sits on the left. This is the shape index lookups need.
    pub fn as_index_probe(&self, schema: &Schema) -> Option<(String, CmpOp, Value)> {
        match self.conjuncts.as_slice() {
            [Comparison { lhs: Term::Name(attr), op, rhs: Term::Literal(key) }]
                if schema.has_attribute(attr) =>
            {
                Some((attr.clone(), *op, key.clone()))
            }
            [Comparison { lhs: Term::Literal(key), op, rhs: Term::Name(attr) }]
                if schema.has_attribute(attr) =>
            {
                Some((attr.clone(), op.flip(), key.clone()))
            }
            _ => None,
        }
    }
}

/// Detects the `p1 and p2 and ... and pn` shape the break-up rule splits:
/// no parentheses, at least two conjuncts, and every occurring comparison
/// operator splits its conjunct into exactly two operands.
pub fn is_compound(text: &str) -> bool {
    if text.contains('(') || text.contains(')') {
        return false;
    }
    let parts: Vec<&str> = text.split(" and ").collect();
    if parts.len() < 2 {
        return false;
    }
    for part in parts {
        for (token, _) in CmpOp::TOKENS {
            if part.contains(token) && part.split(token).count() != 2 {
                return false;
            }
        }
    }
    true
}

/// Extracts the attribute names a predicate references, cross-checked
/// against `schema`: split on whitespace, then split each token on each
/// comparison operator and keep the pieces that name attributes.
pub fn referenced_attributes(text: &str, schema: &Schema) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for token in text.split_whitespace() {
        for (op, _) in CmpOp::TOKENS {
            for piece in token.split(op) {
                if schema.has_attribute(piece) {
                    names.insert(piece.to_owned());
                }
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use chalkdb_rel::Domain;

    fn schema() -> Schema {
        Schema::new([("a", Domain::Int), ("b", Domain::Int), ("d", Domain::Str)]).unwrap()
    }

    fn bind<'a>(pairs: &'a [(&'a str, Value)]) -> impl Fn(&str) -> Option<Value> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.clone())
        }
    }

    #[test]
    fn conjunction_evaluates_left_to_right() {
        let p = Predicate::parse("a == 2 and b > 10").unwrap();
        assert!(p
            .eval(&bind(&[("a", Value::Int(2)), ("b", Value::Int(20))]))
            .unwrap());
        assert!(!p
            .eval(&bind(&[("a", Value::Int(2)), ("b", Value::Int(5))]))
            .unwrap());
    }

    #[test]
    fn string_literals_and_attribute_pairs() {
        let p = Predicate::parse("d == 'x'").unwrap();
        assert!(p.eval(&bind(&[("d", Value::from("x"))])).unwrap());
        let join = Predicate::parse("a == b").unwrap();
        assert!(join
            .eval(&bind(&[("a", Value::Int(1)), ("b", Value::Int(1))]))
            .unwrap());
    }

    #[test]
    fn parse_rejects_parens_and_garbage() {
        assert!(matches!(
            Predicate::parse("(a == 1)"),
            Err(PlanError::ParsePredicate { .. })
        ));
        assert!(matches!(
            Predicate::parse("a ?? 1"),
            Err(PlanError::ParsePredicate { .. })
        ));
        assert!(matches!(
            Predicate::parse("a =="),
            Err(PlanError::ParsePredicate { .. })
        ));
    }

    #[test]
    fn unbound_names_error_out() {
        let p = Predicate::parse("z == 1").unwrap();
        assert!(matches!(
            p.eval(&bind(&[])),
            Err(PlanError::UnboundName(name)) if name == "z"
        ));
    }

    #[test]
    fn compound_detection() {
        assert!(is_compound("a == 1 and b > 2"));
        assert!(!is_compound("a == 1"));
        assert!(!is_compound("(a == 1) and b > 2"));
        assert!(!is_compound("a == 1 == 2 and b > 2"));
    }

    #[test]
    fn attribute_extraction_splits_tokens() {
        let s = schema();
        let attrs = referenced_attributes("a==2 and b > 10", &s);
        assert_eq!(
            attrs.into_iter().collect::<Vec<_>>(),
            vec!["a".to_owned(), "b".to_owned()]
        );
    }

    #[test]
    fn index_probe_normalizes_operand_order() {
        let s = schema();
        let p = Predicate::parse("5 < a").unwrap();
        let (attr, op, key) = p.as_index_probe(&s).unwrap();
        assert_eq!(attr, "a");
        assert_eq!(op, CmpOp::Gt);
        assert_eq!(key, Value::Int(5));
        assert!(Predicate::parse("a == b").unwrap().as_index_probe(&s).is_none());
    }
}
