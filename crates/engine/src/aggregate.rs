//! Grouping aggregates: parsing of `fn(attr)` lists and their evaluation
//! over group buckets. The parser is deliberately strict about its input
//! (plain alphanumeric attribute, closing parenthesis immediately after),
//! matching the grammar the grouping operator has always accepted.

use crate::errors::PlanError;
use chalkdb_rel::{Domain, Tuple, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFn {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggFn {
    pub fn name(self) -> &'static str {
        match self {
            AggFn::Count => "count",
            AggFn::Sum => "sum",
            AggFn::Min => "min",
            AggFn::Max => "max",
            AggFn::Avg => "avg",
        }
    }
}

/// One aggregation column; `attribute` is `None` for `count(*)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub func: AggFn,
    pub attribute: Option<String>,
}

impl Aggregate {
    /// The output column name: `<fn>_<attr>`, or `count_star`.
    pub fn column_name(&self) -> String {
        match &self.attribute {
            Some(attr) => format!("{}_{}", self.func.name(), attr),
            None => "count_star".to_owned(),
        }
    }

    /// Aggregate outputs are declared integer, except `avg` which is
    /// always floating even over integer input.
    pub fn output_domain(&self) -> Domain {
        match self.func {
            AggFn::Avg => Domain::Float,
            _ => Domain::Int,
        }
    }

    /// Applies the aggregate to a group bucket. `index` locates the
    /// aggregated attribute within each tuple; `count(*)` ignores it.
    pub fn apply(&self, bucket: &[&Tuple], index: Option<usize>) -> Result<Value, PlanError> {
        let bad_input = |value: &Value| PlanError::BadAggregateInput {
            func: self.label(),
            value: value.clone(),
        };
        match (self.func, index) {
            (AggFn::Count, _) => Ok(Value::Int(bucket.len() as i64)),
            (AggFn::Sum, Some(i)) => {
                let mut int_sum = 0i64;
                let mut float_sum = 0f64;
                let mut saw_float = false;
                for tuple in bucket {
                    match &tuple[i] {
                        Value::Int(v) => {
                            int_sum += v;
                            float_sum += *v as f64;
                        }
                        Value::Float(v) => {
                            saw_float = true;
                            float_sum += v.get();
                        }
                        other => return Err(bad_input(other)),
                    }
                }
                Ok(if saw_float {
                    Value::from(float_sum)
                } else {
                    Value::Int(int_sum)
                })
            }
            (AggFn::Min, Some(i)) => Ok(bucket.iter().map(|t| t[i].clone()).min().expect("non-empty group")),
            (AggFn::Max, Some(i)) => Ok(bucket.iter().map(|t| t[i].clone()).max().expect("non-empty group")),
            (AggFn::Avg, Some(i)) => {
                let mut sum = 0f64;
                for tuple in bucket {
                    sum += tuple[i].numeric().ok_or_else(|| bad_input(&tuple[i]))?;
                }
                Ok(Value::from(sum / bucket.len() as f64))
            }
            (_, None) => unreachable!("only count(*) lacks an attribute"),
        }
    }

    pub fn label(&self) -> String {
        match &self.attribute {
            Some(attr) => format!("{}({})", self.func.name(), attr),
            None => "count(*)".to_owned(),
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Parses a comma-separated aggregation list, e.g. `sum(a), count(*)`.
pub fn parse_aggregations(text: &str) -> Result<Vec<Aggregate>, PlanError> {
    let mut aggs = Vec::new();
    if text.is_empty() {
        return Ok(aggs);
    }
    for raw in text.split(',') {
        let part = raw.trim();
        let (func, rest) = if part.starts_with("count") {
            if part == "count(*)" {
                aggs.push(Aggregate {
                    func: AggFn::Count,
                    attribute: None,
                });
                continue;
            }
            (AggFn::Count, part.get(6..))
        } else if part.starts_with("max") {
            (AggFn::Max, part.get(4..))
        } else if part.starts_with("min") {
            (AggFn::Min, part.get(4..))
        } else if part.starts_with("sum") {
            (AggFn::Sum, part.get(4..))
        } else if part.starts_with("avg") {
            (AggFn::Avg, part.get(4..))
        } else {
            return Err(PlanError::UnknownAggregate(part.to_owned()));
        };
        let rest = rest.ok_or_else(|| PlanError::BadAggregateAttribute(part.to_owned()))?;
        let attr = rest
            .strip_suffix(')')
            .ok_or_else(|| PlanError::BadAggregateAttribute(part.to_owned()))?;
        if attr.is_empty() || !attr.chars().all(char::is_alphanumeric) {
            return Err(PlanError::BadAggregateAttribute(part.to_owned()));
        }
        aggs.push(Aggregate {
            func,
            attribute: Some(attr.to_owned()),
        });
    }
    Ok(aggs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chalkdb_rel::row;

    #[test]
    fn parses_lists_and_count_star() {
        let aggs = parse_aggregations("sum(a), count(*), avg(b)").unwrap();
        assert_eq!(aggs.len(), 3);
        assert_eq!(aggs[0].column_name(), "sum_a");
        assert_eq!(aggs[1].column_name(), "count_star");
        assert_eq!(aggs[1].attribute, None);
        assert_eq!(aggs[2].output_domain(), Domain::Float);
    }

    #[test]
    fn parser_is_strict_about_format() {
        assert!(matches!(
            parse_aggregations("median(a)"),
            Err(PlanError::UnknownAggregate(_))
        ));
        // attribute must be alphanumeric and the parenthesis immediate
        assert!(matches!(
            parse_aggregations("sum(a )"),
            Err(PlanError::BadAggregateAttribute(_))
        ));
        assert!(matches!(
            parse_aggregations("sum(a_b)"),
            Err(PlanError::BadAggregateAttribute(_))
        ));
        assert!(matches!(
            parse_aggregations("sum()"),
            Err(PlanError::BadAggregateAttribute(_))
        ));
    }

    #[test]
    fn empty_list_is_fine() {
        assert_eq!(parse_aggregations("").unwrap(), vec![]);
    }

    #[test]
    fn avg_is_floating_even_on_ints() {
        let rows = [row![1, 2], row![1, 3]];
        let bucket: Vec<&Tuple> = rows.iter().collect();
        let avg = Aggregate {
            func: AggFn::Avg,
            attribute: Some("b".into()),
        };
        assert_eq!(avg.apply(&bucket, Some(1)).unwrap(), Value::from(2.5));
        let sum = Aggregate {
            func: AggFn::Sum,
            attribute: Some("b".into()),
        };
        assert_eq!(sum.apply(&bucket, Some(1)).unwrap(), Value::Int(5));
    }
}
