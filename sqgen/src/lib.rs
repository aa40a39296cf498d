//! Structured-query-to-SQL lowering: decodes a wire-encoded query tree
//! and emits one SQL statement, materializing shared and nested
//! sub-queries as named CTEs.

mod cte;
mod error;
mod generator;
mod lower;
mod schema;

pub use error::{SqgenError, SqgenResult};
pub use generator::Generator;
pub use schema::{
    decode, Aggregate, Filter, FilterGroup, FilterOp, FilterValue, JoinCondition, JoinType, OrderBy, Source,
    SelectColumn, SqlDependency, StructuredQuery, TimeRangeMode,
};
