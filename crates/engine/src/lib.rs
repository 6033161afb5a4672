//! The relational algebra engine: operator trees over in-memory
//! relations, rule-based rewriting, a compile pass lowering logical
//! operators to physical ones, and a pull-model executor.
//!
//! The usual pipeline is build → rewrite → compile → evaluate:
//!
//! ```
//! use chalkdb_engine::compile::compile;
//! use chalkdb_engine::eval::evaluate;
//! use chalkdb_engine::plan::PlanBuilder;
//! use chalkdb_engine::rewrite::apply_rule;
//! use chalkdb_engine::rules::PushDownSelection;
//! use chalkdb_rel::{row, Domain, Relation, Schema};
//!
//! let mut r = Relation::new("R", Schema::new([("a", Domain::Int)]).unwrap());
//! r.add_tuple(row![1]).unwrap();
//!
//! let mut b = PlanBuilder::new();
//! let leaf = b.relation(r);
//! let sel = b.select(leaf, "a == 1");
//! let mut plan = b.finish(sel);
//!
//! apply_rule(&mut PushDownSelection::new(), &mut plan);
//! compile(&mut plan);
//! let result = evaluate(&plan).unwrap();
//! assert_eq!(result.len(), 1);
//! ```

pub mod aggregate;
pub mod compile;
pub mod dot;
pub mod errors;
pub mod eval;
pub mod plan;
pub mod predicate;
pub mod rewrite;
pub mod rules;

pub use errors::PlanError;
pub use plan::{Op, OpId, Plan, PlanBuilder, RenamePair, SetOpKind};
pub use predicate::Predicate;
pub use rewrite::{apply_rule, Rule};
