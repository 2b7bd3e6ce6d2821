//! Filter, sort and pagination compiler
//!
//! Produces a backend-neutral [`QueryPlan`] made of a flat sequence of
//! [`FilterOp`]s. Each backend renders the plan in its own syntax
//! (PostgREST query parameters, in-memory predicates, ...).

use std::fmt;

use serde_json::Value as JsonValue;
use tracing::debug;

use dataport_common::error::{Error, Result};
use dataport_common::types::SortCondition;

use crate::filter::{FieldFilter, FilterGroup, QueryFilter};
use crate::params::QueryParams;
use crate::select::select_clause;

/// One compiled filter constraint. Constraints in a sequence are conjoined.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// `field = value`
    Eq { field: String, value: JsonValue },
    /// `field <operator> value`, value already normalized
    Filter {
        field: String,
        operator: String,
        value: JsonValue,
    },
    /// Any of the disjuncts holds
    Or(Vec<Disjunct>),
}

/// A single `field.operator.value` term inside an OR predicate
#[derive(Debug, Clone, PartialEq)]
pub struct Disjunct {
    pub field: String,
    pub operator: String,
    pub value: JsonValue,
}

impl fmt::Display for Disjunct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.field, self.operator, render_value(&self.value))
    }
}

/// One ordering clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderClause {
    pub field: String,
    pub ascending: bool,
}

/// Everything a backend needs to run a read query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub resource: String,
    /// Projection including nested selections, e.g. `id,author(profile(*))`
    pub select: String,
    pub filters: Vec<FilterOp>,
    pub order: Vec<OrderClause>,
    /// Zero-indexed inclusive row range
    pub range: Option<(u64, u64)>,
    pub limit: Option<u64>,
    /// Require exactly one row
    pub single: bool,
}

impl QueryPlan {
    /// Compile request parameters for `resource`
    pub fn build(resource: &str, params: &QueryParams) -> Result<Self> {
        let filters = match &params.filter {
            Some(filter) => compile_filter(filter)?,
            None => Vec::new(),
        };
        let plan = Self {
            resource: resource.to_string(),
            select: select_clause(&params.fields, &params.include),
            filters,
            order: compile_sort(&params.sort),
            range: params.pagination.map(|p| p.range()),
            limit: None,
            single: false,
        };
        debug!(resource, select = %plan.select, filters = plan.filters.len(), "compiled query plan");
        Ok(plan)
    }

    /// Plan for `resource` with no parameters
    pub fn all(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            select: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            range: None,
            limit: None,
            single: false,
        }
    }

    #[must_use]
    pub fn eq(mut self, field: &str, value: impl Into<JsonValue>) -> Self {
        self.filters.push(FilterOp::Eq {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }
}

/// Compile a filter tree into a flat, conjoined sequence of constraints.
///
/// `AND` groups are flattened recursively. `OR` groups become a single
/// disjunction; a sub-filter inside an `OR` branch may only hold field
/// conditions, nested groups there are rejected.
pub fn compile_filter(filter: &QueryFilter) -> Result<Vec<FilterOp>> {
    let mut ops = Vec::new();
    compile_into(filter, &mut ops)?;
    Ok(ops)
}

fn compile_into(filter: &QueryFilter, ops: &mut Vec<FilterOp>) -> Result<()> {
    match filter.group() {
        Some(FilterGroup::And(subs)) => {
            for sub in subs {
                compile_into(sub, ops)?;
            }
        }
        Some(FilterGroup::Or(subs)) => {
            let mut disjuncts = Vec::new();
            for sub in subs {
                if sub.group().is_some() {
                    return Err(Error::InvalidFilter(
                        "nested AND/OR groups are not supported inside an OR branch".to_string(),
                    ));
                }
                for (field, condition) in sub.fields() {
                    disjuncts.push(disjunct(field, condition));
                }
            }
            if !disjuncts.is_empty() {
                ops.push(FilterOp::Or(disjuncts));
            }
        }
        None => {}
    }

    for (field, condition) in filter.fields() {
        ops.push(match condition {
            FieldFilter::Value(value) => FilterOp::Eq {
                field: field.clone(),
                value: value.clone(),
            },
            FieldFilter::Condition(condition) => FilterOp::Filter {
                field: field.clone(),
                operator: condition.operator.clone(),
                value: normalize_filter_value(&condition.operator, &condition.value),
            },
        });
    }
    Ok(())
}

fn disjunct(field: &str, condition: &FieldFilter) -> Disjunct {
    match condition {
        FieldFilter::Value(value) => Disjunct {
            field: field.to_string(),
            operator: "eq".to_string(),
            value: value.clone(),
        },
        FieldFilter::Condition(condition) => Disjunct {
            field: field.to_string(),
            operator: condition.operator.clone(),
            value: normalize_filter_value(&condition.operator, &condition.value),
        },
    }
}

/// Normalize a condition value for its operator.
///
/// - `in`: lists become `(a,b,c)`; bare strings are parenthesized
/// - `like` / `ilike`: strings without `*` are wrapped as `*value*`
/// - anything else passes through unchanged
pub fn normalize_filter_value(operator: &str, value: &JsonValue) -> JsonValue {
    match (operator, value) {
        ("in", JsonValue::Array(items)) => {
            let joined: Vec<String> = items.iter().map(render_value).collect();
            JsonValue::String(format!("({})", joined.join(",")))
        }
        ("in", JsonValue::String(s)) if !s.starts_with('(') => JsonValue::String(format!("({s})")),
        ("like" | "ilike", JsonValue::String(s)) if !s.contains('*') => {
            JsonValue::String(format!("*{s}*"))
        }
        _ => value.clone(),
    }
}

/// Textual form of a filter value as it appears in query syntax
pub fn render_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null".to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Array(items) => items.iter().map(render_value).collect::<Vec<_>>().join(","),
        JsonValue::Object(_) => value.to_string(),
    }
}

/// Ordering clauses in precedence order
pub fn compile_sort(sort: &[SortCondition]) -> Vec<OrderClause> {
    sort.iter()
        .map(|s| OrderClause {
            field: s.field.clone(),
            ascending: s.order.is_ascending(),
        })
        .collect()
}
