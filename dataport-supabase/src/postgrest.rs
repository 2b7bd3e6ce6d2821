//! PostgREST request rendering
//!
//! Translates a [`QueryPlan`] into PostgREST query parameters:
//! `select=...`, `field=op.value`, `or=(a.eq.1,b.gt.2)`, `order=f.asc`,
//! `offset`/`limit`.

use serde_json::Value as JsonValue;

use dataport_query::compiler::render_value;
use dataport_query::{FilterOp, OrderClause, QueryPlan};

/// `Accept` value that makes PostgREST return one object or fail
pub const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

pub const PREFER_COUNT_EXACT: &str = "count=exact";
pub const PREFER_RETURN_REPRESENTATION: &str = "return=representation";
pub const PREFER_MERGE_DUPLICATES: &str = "resolution=merge-duplicates";

/// Every query parameter of a read plan
pub fn plan_pairs(plan: &QueryPlan) -> Vec<(String, String)> {
    let mut pairs = vec![("select".to_string(), plan.select.clone())];
    pairs.extend(filter_pairs(&plan.filters));
    if !plan.order.is_empty() {
        pairs.push(("order".to_string(), order_value(&plan.order)));
    }

    let limit = match plan.range {
        Some((from, to)) => {
            pairs.push(("offset".to_string(), from.to_string()));
            let size = to.saturating_sub(from).saturating_add(1);
            Some(plan.limit.map_or(size, |limit| limit.min(size)))
        }
        None => plan.limit,
    };
    if let Some(limit) = limit {
        pairs.push(("limit".to_string(), limit.to_string()));
    }
    pairs
}

/// Filter parameters only, as used by writes and counts
pub fn filter_pairs(filters: &[FilterOp]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|op| match op {
            FilterOp::Eq { field, value } => (field.clone(), condition("eq", value)),
            FilterOp::Filter {
                field,
                operator,
                value,
            } => (field.clone(), condition(operator, value)),
            FilterOp::Or(disjuncts) => {
                let terms: Vec<String> = disjuncts.iter().map(ToString::to_string).collect();
                ("or".to_string(), format!("({})", terms.join(",")))
            }
        })
        .collect()
}

fn condition(operator: &str, value: &JsonValue) -> String {
    format!("{operator}.{}", render_value(value))
}

fn order_value(order: &[OrderClause]) -> String {
    order
        .iter()
        .map(|clause| {
            format!(
                "{}.{}",
                clause.field,
                if clause.ascending { "asc" } else { "desc" }
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Join `Prefer` directives
pub fn prefer(directives: &[&str]) -> String {
    directives.join(",")
}

/// Parsed `Content-Range` header, e.g. `0-9/42`, `*/42` or `0-9/*`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// Zero-indexed inclusive row range actually returned
    pub range: Option<(u64, u64)>,
    pub total: Option<u64>,
}

impl ContentRange {
    pub fn parse(header: &str) -> Option<Self> {
        let (range, total) = header.trim().split_once('/')?;
        let total = match total.trim() {
            "*" => None,
            total => Some(total.parse().ok()?),
        };
        let range = match range.trim() {
            "*" => None,
            range => {
                let (from, to) = range.split_once('-')?;
                Some((from.trim().parse().ok()?, to.trim().parse().ok()?))
            }
        };
        Some(Self { range, total })
    }
}
