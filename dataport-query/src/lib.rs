//! Dataport Query Compiler
//!
//! Turns the backend-neutral query description used by callers into
//! something a backend can execute:
//! - Filter DSL with field equality, operator conditions and AND/OR groups
//! - Operator value normalization (`in` lists, `like`/`ilike` wildcards)
//! - Multi-key ordering and 1-indexed pagination ranges
//! - Nested include trees and field projection
//! - Query-string serialization for plain REST backends

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod compiler;
pub mod filter;
pub mod params;
pub mod querystring;
pub mod select;

pub use compiler::{compile_filter, normalize_filter_value, Disjunct, FilterOp, OrderClause, QueryPlan};
pub use filter::{FieldFilter, FilterCondition, FilterGroup, QueryFilter};
pub use params::QueryParams;
pub use select::{select_clause, IncludeTree};
