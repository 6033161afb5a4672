use crate::error::SchemaError;
use crate::relation::Relation;
use crate::value::{CmpOp, Tuple, Value};

/// A sorted secondary index over one attribute of a relation.
///
/// Entries are `(key, tuple)` pairs stable-sorted by key, with a parallel
/// key vector for binary search. Lookups cost `O(log n + k)`: a
/// `partition_point` bound plus the scan over matching entries. Ties come
/// back in an unspecified order; the `<`/`<=` forms scan backwards and so
/// yield descending keys.
#[derive(Debug, Clone)]
pub struct Index {
    attribute: String,
    entries: Vec<(Value, Tuple)>,
    keys: Vec<Value>,
}

impl Index {
    /// Collects `(tuple[attribute], tuple)` for every tuple of `relation`
    /// and sorts by key. The index is a snapshot; it does not observe later
    /// insertions into the relation.
    pub fn build(relation: &Relation, attribute: &str) -> Result<Self, SchemaError> {
        let pos = relation
            .attribute_index(attribute)
            .ok_or_else(|| SchemaError::UnknownAttribute(attribute.to_owned()))?;
        let mut entries: Vec<(Value, Tuple)> = relation
            .iter()
            .map(|tuple| (tuple[pos].clone(), tuple.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let keys = entries.iter().map(|(k, _)| k.clone()).collect();
        Ok(Index {
            attribute: attribute.to_owned(),
            entries,
            keys,
        })
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First position whose key is not less than `key`.
    fn lower_bound(&self, key: &Value) -> usize {
        self.keys.partition_point(|k| k < key)
    }

    /// First position whose key is greater than `key`.
    fn upper_bound(&self, key: &Value) -> usize {
        self.keys.partition_point(|k| k <= key)
    }

    /// All tuples whose indexed attribute satisfies `attr op key`.
    pub fn lookup(&self, op: CmpOp, key: &Value) -> Vec<&Tuple> {
        let lower = self.lower_bound(key);
        let upper = self.upper_bound(key);
        let range: Box<dyn Iterator<Item = &(Value, Tuple)> + '_> = match op {
            CmpOp::Eq => Box::new(self.entries[lower..upper].iter()),
            CmpOp::Gt => Box::new(self.entries[upper..].iter()),
            CmpOp::Ge => Box::new(self.entries[lower..].iter()),
            CmpOp::Lt => Box::new(self.entries[..lower].iter().rev()),
            CmpOp::Le => Box::new(self.entries[..upper].iter().rev()),
        };
        range.map(|(_, tuple)| tuple).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::schema::Schema;
    use crate::value::Domain;
    use proptest::prelude::*;

    fn indexed_relation(values: &[i64]) -> Relation {
        let schema = Schema::new([("a", Domain::Int), ("b", Domain::Int)]).unwrap();
        let mut r = Relation::new("R", schema);
        for (i, v) in values.iter().enumerate() {
            r.add_tuple(row![*v, i as i64]).unwrap();
        }
        r.build_index("a").unwrap();
        r
    }

    #[test]
    fn equality_returns_all_ties() {
        let r = indexed_relation(&[5, 3, 5, 1, 5]);
        let hits = r.index_on("a").unwrap().lookup(CmpOp::Eq, &Value::Int(5));
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|t| t[0] == Value::Int(5)));
    }

    #[test]
    fn range_lookups_are_monotone() {
        let r = indexed_relation(&[4, 1, 3, 2, 5]);
        let index = r.index_on("a").unwrap();
        let gt: Vec<i64> = index
            .lookup(CmpOp::Gt, &Value::Int(2))
            .iter()
            .map(|t| t[0].as_int().unwrap())
            .collect();
        assert_eq!(gt, vec![3, 4, 5]);
        let le: Vec<i64> = index
            .lookup(CmpOp::Le, &Value::Int(3))
            .iter()
            .map(|t| t[0].as_int().unwrap())
            .collect();
        assert_eq!(le, vec![3, 2, 1]);
    }

    #[test]
    fn absent_key_behaves_at_the_boundaries() {
        let r = indexed_relation(&[1, 3, 5]);
        let index = r.index_on("a").unwrap();
        assert!(index.lookup(CmpOp::Eq, &Value::Int(2)).is_empty());
        assert_eq!(index.lookup(CmpOp::Gt, &Value::Int(5)).len(), 0);
        assert_eq!(index.lookup(CmpOp::Ge, &Value::Int(0)).len(), 3);
        assert_eq!(index.lookup(CmpOp::Lt, &Value::Int(1)).len(), 0);
    }

    proptest! {
        /// Index lookups agree with a full scan for every operator.
        #[test]
        fn lookup_matches_scan_oracle(
            values in proptest::collection::vec(-20i64..20, 0..40),
            key in -25i64..25,
        ) {
            let r = indexed_relation(&values);
            let index = r.index_on("a").unwrap();
            for op in [CmpOp::Eq, CmpOp::Lt, CmpOp::Le, CmpOp::Gt, CmpOp::Ge] {
                let mut got: Vec<i64> = index
                    .lookup(op, &Value::Int(key))
                    .iter()
                    .map(|t| t[1].as_int().unwrap())
                    .collect();
                let mut want: Vec<i64> = r
                    .iter()
                    .filter(|t| op.eval(&t[0], &Value::Int(key)).unwrap())
                    .map(|t| t[1].as_int().unwrap())
                    .collect();
                got.sort_unstable();
                want.sort_unstable();
                prop_assert_eq!(got, want);
            }
        }
    }
}
