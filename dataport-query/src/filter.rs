//! Filter DSL
//!
//! A filter node maps field names to either a plain value (implicit equality)
//! or an `{operator, value}` condition, and may additionally hold one `AND`
//! or `OR` group of nested filters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use dataport_common::error::{Error, Result};

/// Reserved key for conjunction groups
pub const AND_KEY: &str = "AND";
/// Reserved key for disjunction groups
pub const OR_KEY: &str = "OR";

/// Operator condition on a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub operator: String,
    pub value: JsonValue,
}

/// What a field is matched against
#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    /// Implicit equality
    Value(JsonValue),
    /// Explicit operator
    Condition(FilterCondition),
}

/// Nested filter group
#[derive(Debug, Clone, PartialEq)]
pub enum FilterGroup {
    /// Every sub-filter must hold
    And(Vec<QueryFilter>),
    /// At least one sub-filter must hold
    Or(Vec<QueryFilter>),
}

/// A filter node, built per request and never mutated afterwards
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JsonValue", into = "JsonValue")]
pub struct QueryFilter {
    fields: Vec<(String, FieldFilter)>,
    group: Option<FilterGroup>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an implicit equality on `field`
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.fields
            .push((field.into(), FieldFilter::Value(value.into())));
        self
    }

    /// Add an operator condition on `field`
    #[must_use]
    pub fn condition(
        mut self,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<JsonValue>,
    ) -> Self {
        self.fields.push((
            field.into(),
            FieldFilter::Condition(FilterCondition {
                operator: operator.into(),
                value: value.into(),
            }),
        ));
        self
    }

    /// Set the `AND` group, replacing any existing group
    #[must_use]
    pub fn and(mut self, filters: Vec<QueryFilter>) -> Self {
        self.group = Some(FilterGroup::And(filters));
        self
    }

    /// Set the `OR` group, replacing any existing group
    #[must_use]
    pub fn or(mut self, filters: Vec<QueryFilter>) -> Self {
        self.group = Some(FilterGroup::Or(filters));
        self
    }

    pub fn fields(&self) -> &[(String, FieldFilter)] {
        &self.fields
    }

    pub fn group(&self) -> Option<&FilterGroup> {
        self.group.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.group.is_none()
    }

    /// Parse a filter from its JSON form, failing fast on malformed shapes.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let JsonValue::Object(map) = value else {
            return Err(Error::InvalidFilter(format!(
                "filter node must be an object, got {}",
                json_kind(value)
            )));
        };

        if map.contains_key(AND_KEY) && map.contains_key(OR_KEY) {
            return Err(Error::InvalidFilter(
                "a filter node may hold either AND or OR, not both".to_string(),
            ));
        }

        let mut filter = QueryFilter::new();
        for (key, value) in map {
            match key.as_str() {
                AND_KEY => filter.group = Some(FilterGroup::And(parse_group(AND_KEY, value)?)),
                OR_KEY => filter.group = Some(FilterGroup::Or(parse_group(OR_KEY, value)?)),
                field => filter.fields.push((field.to_string(), parse_field(field, value)?)),
            }
        }
        Ok(filter)
    }

    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        for (field, filter) in &self.fields {
            let value = match filter {
                FieldFilter::Value(value) => value.clone(),
                FieldFilter::Condition(condition) => serde_json::json!({
                    "operator": condition.operator,
                    "value": condition.value,
                }),
            };
            map.insert(field.clone(), value);
        }
        match &self.group {
            Some(FilterGroup::And(filters)) => {
                map.insert(AND_KEY.to_string(), group_to_json(filters));
            }
            Some(FilterGroup::Or(filters)) => {
                map.insert(OR_KEY.to_string(), group_to_json(filters));
            }
            None => {}
        }
        JsonValue::Object(map)
    }
}

impl TryFrom<JsonValue> for QueryFilter {
    type Error = Error;

    fn try_from(value: JsonValue) -> Result<Self> {
        Self::from_json(&value)
    }
}

impl From<QueryFilter> for JsonValue {
    fn from(filter: QueryFilter) -> Self {
        filter.to_json()
    }
}

fn parse_group(key: &str, value: &JsonValue) -> Result<Vec<QueryFilter>> {
    let JsonValue::Array(items) = value else {
        return Err(Error::InvalidFilter(format!(
            "{key} must be a list of filters, got {}",
            json_kind(value)
        )));
    };
    if items.is_empty() {
        return Err(Error::InvalidFilter(format!("{key} must hold at least one filter")));
    }
    items.iter().map(QueryFilter::from_json).collect()
}

fn parse_field(field: &str, value: &JsonValue) -> Result<FieldFilter> {
    let JsonValue::Object(map) = value else {
        return Ok(FieldFilter::Value(value.clone()));
    };

    let Some(operator) = map.get("operator") else {
        return Err(Error::InvalidFilter(format!(
            "condition for '{field}' is missing 'operator'"
        )));
    };
    let Some(operator) = operator.as_str() else {
        return Err(Error::InvalidFilter(format!(
            "operator for '{field}' must be a string"
        )));
    };
    let Some(value) = map.get("value") else {
        return Err(Error::InvalidFilter(format!(
            "condition for '{field}' is missing 'value'"
        )));
    };

    Ok(FieldFilter::Condition(FilterCondition {
        operator: operator.to_string(),
        value: value.clone(),
    }))
}

fn group_to_json(filters: &[QueryFilter]) -> JsonValue {
    JsonValue::Array(filters.iter().map(QueryFilter::to_json).collect())
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "an object",
    }
}
