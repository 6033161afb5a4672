use chalkdb_rel::{SchemaError, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("could not parse predicate `{predicate}`: {reason}")]
    ParsePredicate { predicate: String, reason: String },
    #[error("unknown aggregate function in `{0}`")]
    UnknownAggregate(String),
    #[error("incorrect attribute format in `{0}`")]
    BadAggregateAttribute(String),
    #[error("set operands have mismatched schemas: {left} vs {right}")]
    SetSchemaMismatch { left: String, right: String },
    #[error("`{0}` names neither an attribute nor a bound variable")]
    UnboundName(String),
    #[error("cannot compare {lhs} and {rhs}")]
    Incomparable { lhs: Value, rhs: Value },
    #[error("cannot apply {func} to {value}")]
    BadAggregateInput { func: String, value: Value },
    #[error("operator {0} is logical; compile the plan first")]
    NotCompiled(&'static str),
}
