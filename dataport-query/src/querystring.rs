//! Query-string serialization for plain REST backends
//!
//! Nested parameters use bracket notation: `filter[status]=active`,
//! `sort[0][field]=name`, `include[]=author`, `pagination[perPage]=10`.

use serde_json::Value as JsonValue;

use crate::compiler::render_value;
use crate::filter::QueryFilter;
use crate::params::QueryParams;

/// Flatten read parameters into ordered query pairs
pub fn to_query_pairs(params: &QueryParams) -> Vec<(String, String)> {
    match serde_json::to_value(params) {
        Ok(value) => flatten_root(&value),
        Err(_) => Vec::new(),
    }
}

/// Query pairs for a standalone filter, under the `filter` key
pub fn filter_pairs(filter: &QueryFilter) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    flatten("filter", &filter.to_json(), &mut pairs);
    pairs
}

fn flatten_root(value: &JsonValue) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if let JsonValue::Object(map) = value {
        for (key, value) in map {
            flatten(key, value, &mut pairs);
        }
    }
    pairs
}

fn flatten(prefix: &str, value: &JsonValue, pairs: &mut Vec<(String, String)>) {
    match value {
        JsonValue::Object(map) => {
            for (key, value) in map {
                flatten(&format!("{prefix}[{key}]"), value, pairs);
            }
        }
        JsonValue::Array(items) if items.iter().any(is_compound) => {
            for (idx, item) in items.iter().enumerate() {
                flatten(&format!("{prefix}[{idx}]"), item, pairs);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                pairs.push((format!("{prefix}[]"), render_value(item)));
            }
        }
        scalar => pairs.push((prefix.to_string(), render_value(scalar))),
    }
}

fn is_compound(value: &JsonValue) -> bool {
    matches!(value, JsonValue::Object(_) | JsonValue::Array(_))
}
