//! In-memory adapter for development and testing
//!
//! Tables are JSON rows keyed by resource name. Reads execute the compiled
//! [`QueryPlan`] and single-row reads and writes by id are as strict as
//! PostgREST's `.single()`. Upserts run under one write lock, so they are
//! atomic with respect to concurrent writers.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Map, Value as JsonValue};
use tracing::debug;

use dataport_common::error::{Error, Result};
use dataport_common::response::DataProviderResponse;
use dataport_common::types::PaginatedData;
use dataport_query::compiler::render_value;
use dataport_query::{compile_filter, FilterOp, OrderClause, QueryFilter, QueryParams, QueryPlan};

use crate::adapter::{Capabilities, DataAdapter, RecordId, RecordTarget, Target};
use crate::realtime::{ChangeCallback, ChangeEvent, LocalBroadcast, RealtimeTransport, SubscriptionRegistry};

/// PostgREST code for "not exactly one row"
pub const NOT_SINGLE_CODE: &str = "PGRST116";

const SCHEMA: &str = "public";

type Response = Result<DataProviderResponse<JsonValue>>;

/// Data adapter over process-local tables
#[derive(Default)]
pub struct InMemoryAdapter {
    tables: RwLock<HashMap<String, Vec<JsonValue>>>,
    broadcast: LocalBroadcast,
    subscriptions: SubscriptionRegistry,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `resource` with rows
    #[must_use]
    pub fn with_table(self, resource: &str, rows: Vec<JsonValue>) -> Self {
        self.tables.write().insert(resource.to_string(), rows);
        self
    }

    /// Snapshot of every row in `resource`
    pub fn rows(&self, resource: &str) -> Vec<JsonValue> {
        self.tables.read().get(resource).cloned().unwrap_or_default()
    }

    /// Run a read plan. Returns the page of rows and the number of rows
    /// matching before the range was applied.
    fn select(&self, plan: &QueryPlan) -> std::result::Result<(Vec<JsonValue>, u64), String> {
        let tables = self.tables.read();
        let rows = tables.get(&plan.resource).map_or(&[][..], Vec::as_slice);

        let mut matched = Vec::new();
        for row in rows {
            if row_matches(row, &plan.filters)? {
                matched.push(row.clone());
            }
        }
        drop(tables);

        sort_rows(&mut matched, &plan.order);
        let total = matched.len() as u64;

        let (skip, mut take) = match plan.range {
            Some((from, to)) => (to_usize(from), to_usize(to.saturating_sub(from).saturating_add(1))),
            None => (0, usize::MAX),
        };
        if let Some(limit) = plan.limit {
            take = take.min(to_usize(limit));
        }

        let page = matched
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|row| project(&row, &plan.select))
            .collect();
        Ok((page, total))
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        for event in &events {
            self.broadcast.publish(event);
        }
    }
}

impl std::fmt::Debug for InMemoryAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables: Vec<String> = self.tables.read().keys().cloned().collect();
        f.debug_struct("InMemoryAdapter")
            .field("tables", &tables)
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DataAdapter for InMemoryAdapter {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            upload: false,
            count: true,
            realtime: true,
            auth: false,
        }
    }

    async fn fetch(&self, resource: &str, params: &QueryParams) -> Response {
        let plan = QueryPlan::build(resource, params)?;
        Ok(match self.select(&plan) {
            Ok((rows, _)) => success(JsonValue::Array(rows), 200),
            Err(message) => query_error(&message),
        })
    }

    async fn fetch_one(&self, resource: &str, params: &QueryParams) -> Response {
        let plan = QueryPlan::build(resource, params)?.limit(1).single();
        Ok(match self.select(&plan) {
            Ok((rows, _)) => single_row(rows, 200),
            Err(message) => query_error(&message),
        })
    }

    async fn fetch_by_id(&self, resource: &str, id: &RecordId, params: &QueryParams) -> Response {
        let projection = QueryParams {
            fields: params.fields.clone(),
            include: params.include.clone(),
            ..QueryParams::default()
        };
        let plan = QueryPlan::build(resource, &projection)?
            .eq("id", JsonValue::from(id))
            .single();
        Ok(match self.select(&plan) {
            Ok((rows, _)) => single_row(rows, 200),
            Err(message) => query_error(&message),
        })
    }

    async fn fetch_many(&self, resource: &str, params: &QueryParams) -> Response {
        let plan = QueryPlan::build(resource, params)?;
        let (rows, total) = match self.select(&plan) {
            Ok(result) => result,
            Err(message) => return Ok(query_error(&message)),
        };
        let (offset, per_page) = match params.pagination {
            Some(pagination) => (pagination.range().0, pagination.per_page),
            None => (0, total),
        };
        let page = PaginatedData::new(rows, offset, per_page, total);
        Ok(success(serde_json::to_value(page)?, 200))
    }

    async fn insert(&self, resource: &str, data: JsonValue) -> Response {
        let (rows, single) = into_rows("insert", data)?;

        let mut inserted = Vec::with_capacity(rows.len());
        {
            let mut tables = self.tables.write();
            let table = tables.entry(resource.to_string()).or_default();
            for mut row in rows {
                ensure_id(&mut row);
                table.push(row.clone());
                inserted.push(row);
            }
        }
        debug!(resource, rows = inserted.len(), "inserted rows");

        self.publish(
            inserted
                .iter()
                .map(|row| change(resource, "INSERT", row.clone(), None))
                .collect(),
        );
        Ok(rows_response(inserted, single, 201))
    }

    async fn modify(&self, resource: &str, target: &RecordTarget, data: JsonValue) -> Response {
        let target = target.resolve("modify")?;
        let JsonValue::Object(changes) = data else {
            return Err(Error::ValidationError(
                "modify data must be an object".to_string(),
            ));
        };
        let (filters, by_id) = target_filters(&target)?;

        let mut events = Vec::new();
        let mut updated = Vec::new();
        {
            let mut tables = self.tables.write();
            let table = tables.entry(resource.to_string()).or_default();
            let hits = match matching_rows(table, &filters) {
                Ok(hits) => hits,
                Err(message) => return Ok(query_error(&message)),
            };
            for (row, _) in table.iter_mut().zip(hits).filter(|(_, hit)| *hit) {
                let old = row.clone();
                merge_into(row, &changes);
                events.push(change(resource, "UPDATE", row.clone(), Some(old)));
                updated.push(row.clone());
            }
        }
        debug!(resource, rows = updated.len(), "modified rows");

        self.publish(events);
        Ok(if by_id {
            single_row(updated, 200)
        } else {
            success(JsonValue::Array(updated), 200)
        })
    }

    async fn upsert(&self, resource: &str, data: JsonValue, unique_fields: &[String]) -> Response {
        let (rows, single) = into_rows("upsert", data)?;
        let keys: Vec<String> = if unique_fields.is_empty() {
            vec!["id".to_string()]
        } else {
            unique_fields.to_vec()
        };

        let mut events = Vec::new();
        let mut written = Vec::with_capacity(rows.len());
        {
            let mut tables = self.tables.write();
            let table = tables.entry(resource.to_string()).or_default();
            for row in rows {
                let existing = conflict_key(&row, &keys)
                    .and_then(|key| table.iter().position(|r| same_key(r, &keys, &key)));
                match (existing, row) {
                    (Some(idx), JsonValue::Object(changes)) => {
                        let old = table[idx].clone();
                        merge_into(&mut table[idx], &changes);
                        events.push(change(resource, "UPDATE", table[idx].clone(), Some(old)));
                        written.push(table[idx].clone());
                    }
                    (_, mut fresh) => {
                        ensure_id(&mut fresh);
                        table.push(fresh.clone());
                        events.push(change(resource, "INSERT", fresh.clone(), None));
                        written.push(fresh);
                    }
                }
            }
        }
        debug!(resource, rows = written.len(), conflict = ?keys, "upserted rows");

        self.publish(events);
        Ok(rows_response(written, single, 201))
    }

    async fn remove(&self, resource: &str, target: &RecordTarget) -> Response {
        let target = target.resolve("remove")?;
        let (filters, by_id) = target_filters(&target)?;

        let mut removed = Vec::new();
        {
            let mut tables = self.tables.write();
            let table = tables.entry(resource.to_string()).or_default();
            let hits = match matching_rows(table, &filters) {
                Ok(hits) => hits,
                Err(message) => return Ok(query_error(&message)),
            };
            let mut hits = hits.into_iter();
            table.retain(|row| {
                let hit = hits.next().unwrap_or(false);
                if hit {
                    removed.push(row.clone());
                }
                !hit
            });
        }
        debug!(resource, rows = removed.len(), "removed rows");

        self.publish(
            removed
                .iter()
                .map(|row| change(resource, "DELETE", JsonValue::Null, Some(row.clone())))
                .collect(),
        );
        Ok(if by_id {
            single_row(removed, 200)
        } else {
            success(JsonValue::Array(removed), 200)
        })
    }

    async fn count(&self, resource: &str, filter: Option<&QueryFilter>) -> Response {
        let filters = match filter {
            Some(filter) => compile_filter(filter)?,
            None => Vec::new(),
        };
        let mut plan = QueryPlan::all(resource);
        plan.filters = filters;
        Ok(match self.select(&plan) {
            Ok((_, total)) => success(json!(total), 200),
            Err(message) => query_error(&message),
        })
    }

    fn subscribe(&self, resource: &str, callback: ChangeCallback) -> Result<()> {
        let handle = self.broadcast.open(resource, resource, callback)?;
        self.subscriptions.insert(resource, handle);
        Ok(())
    }

    fn unsubscribe(&self, resource: &str) -> Result<()> {
        self.subscriptions.remove(resource);
        Ok(())
    }
}

// ============================================================================
// Envelopes
// ============================================================================

fn success(data: JsonValue, status: u16) -> DataProviderResponse<JsonValue> {
    DataProviderResponse::from_result(Some(data), None, Some(status), None)
}

fn query_error(message: &str) -> DataProviderResponse<JsonValue> {
    DataProviderResponse::from_result(None, Some(json!({ "message": message })), Some(400), None)
}

/// Exactly one row, otherwise the PostgREST cardinality error
fn single_row(mut rows: Vec<JsonValue>, status: u16) -> DataProviderResponse<JsonValue> {
    if rows.len() == 1 {
        return success(rows.remove(0), status);
    }
    DataProviderResponse::from_result(
        None,
        Some(json!({
            "code": NOT_SINGLE_CODE,
            "message": "JSON object requested, multiple (or no) rows returned",
            "details": format!("The result contains {} rows", rows.len()),
        })),
        Some(406),
        None,
    )
}

fn rows_response(rows: Vec<JsonValue>, single: bool, status: u16) -> DataProviderResponse<JsonValue> {
    if single {
        single_row(rows, status)
    } else {
        success(JsonValue::Array(rows), status)
    }
}

fn change(resource: &str, event_type: &str, record: JsonValue, old_record: Option<JsonValue>) -> ChangeEvent {
    ChangeEvent {
        event_type: event_type.to_string(),
        schema: SCHEMA.to_string(),
        table: resource.to_string(),
        record,
        old_record,
    }
}

// ============================================================================
// Writes
// ============================================================================

/// Rows to write and whether the caller passed a single object
fn into_rows(operation: &str, data: JsonValue) -> Result<(Vec<JsonValue>, bool)> {
    let (rows, single) = match data {
        JsonValue::Array(rows) => (rows, false),
        row => (vec![row], true),
    };
    if rows.iter().any(|row| !row.is_object()) {
        return Err(Error::ValidationError(format!(
            "{operation} data must be an object or a list of objects"
        )));
    }
    Ok((rows, single))
}

fn ensure_id(row: &mut JsonValue) {
    if let JsonValue::Object(map) = row {
        if map.get("id").map_or(true, JsonValue::is_null) {
            map.insert(
                "id".to_string(),
                JsonValue::String(uuid::Uuid::new_v4().to_string()),
            );
        }
    }
}

fn merge_into(row: &mut JsonValue, changes: &Map<String, JsonValue>) {
    if let JsonValue::Object(map) = row {
        for (key, value) in changes {
            map.insert(key.clone(), value.clone());
        }
    }
}

fn target_filters(target: &Target<'_>) -> Result<(Vec<FilterOp>, bool)> {
    Ok(match target {
        Target::Id(id) => (
            vec![FilterOp::Eq {
                field: "id".to_string(),
                value: JsonValue::from(*id),
            }],
            true,
        ),
        Target::Filter(filter) => (compile_filter(filter)?, false),
    })
}

/// Values of the conflict columns, or `None` when the row lacks one of them
fn conflict_key(row: &JsonValue, keys: &[String]) -> Option<Vec<JsonValue>> {
    keys.iter()
        .map(|key| row.get(key).filter(|v| !v.is_null()).cloned())
        .collect()
}

fn same_key(row: &JsonValue, keys: &[String], values: &[JsonValue]) -> bool {
    keys.iter()
        .zip(values)
        .all(|(key, value)| row.get(key).is_some_and(|v| loose_eq(v, value)))
}

// ============================================================================
// Predicates
// ============================================================================

/// Match flag per row, evaluated before anything is written
fn matching_rows(rows: &[JsonValue], filters: &[FilterOp]) -> std::result::Result<Vec<bool>, String> {
    rows.iter().map(|row| row_matches(row, filters)).collect()
}

fn row_matches(row: &JsonValue, filters: &[FilterOp]) -> std::result::Result<bool, String> {
    for op in filters {
        let hit = match op {
            FilterOp::Eq { field, value } => matches_condition(row, field, "eq", value)?,
            FilterOp::Filter {
                field,
                operator,
                value,
            } => matches_condition(row, field, operator, value)?,
            FilterOp::Or(disjuncts) => {
                let mut any = false;
                for d in disjuncts {
                    if matches_condition(row, &d.field, &d.operator, &d.value)? {
                        any = true;
                        break;
                    }
                }
                any
            }
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_condition(
    row: &JsonValue,
    field: &str,
    operator: &str,
    expected: &JsonValue,
) -> std::result::Result<bool, String> {
    let actual = row.get(field).unwrap_or(&JsonValue::Null);
    let ordering = compare(actual, expected);
    Ok(match operator {
        "eq" => loose_eq(actual, expected),
        "neq" => !actual.is_null() && !loose_eq(actual, expected),
        "gt" => ordering == Some(Ordering::Greater),
        "gte" => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        "lt" => ordering == Some(Ordering::Less),
        "lte" => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        "in" => {
            !actual.is_null() && {
                let rendered = render_value(actual);
                parse_list(expected).iter().any(|item| *item == rendered)
            }
        }
        "like" | "ilike" => match actual {
            JsonValue::Null => false,
            _ => wildcard_match(
                &render_value(expected),
                &render_value(actual),
                operator == "ilike",
            ),
        },
        "is" => match render_value(expected).to_ascii_lowercase().as_str() {
            "null" => actual.is_null(),
            "true" => actual == &JsonValue::Bool(true),
            "false" => actual == &JsonValue::Bool(false),
            other => return Err(format!("invalid value '{other}' for operator 'is'")),
        },
        other => {
            return Err(format!(
                "operator '{other}' is not supported by the in-memory adapter"
            ))
        }
    })
}

fn loose_eq(a: &JsonValue, b: &JsonValue) -> bool {
    a == b || compare(a, b) == Some(Ordering::Equal)
}

/// Ordering between a stored value and a filter value; numeric strings
/// compare as numbers. `None` when either side is null.
fn compare(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Null, _) | (_, JsonValue::Null) => None,
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (JsonValue::Number(x), JsonValue::String(s)) => {
            x.as_f64()?.partial_cmp(&s.trim().parse::<f64>().ok()?)
        }
        (JsonValue::String(s), JsonValue::Number(y)) => {
            s.trim().parse::<f64>().ok()?.partial_cmp(&y.as_f64()?)
        }
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        _ => Some(render_value(a).cmp(&render_value(b))),
    }
}

/// Items of an `in` list, `(a,b,"c d")` or a JSON array
fn parse_list(value: &JsonValue) -> Vec<String> {
    match value {
        JsonValue::Array(items) => items.iter().map(render_value).collect(),
        other => {
            let text = render_value(other);
            let inner = text.trim().trim_start_matches('(').trim_end_matches(')');
            inner
                .split(',')
                .map(|item| item.trim().trim_matches('"').to_string())
                .filter(|item| !item.is_empty())
                .collect()
        }
    }
}

/// `*` and `%` match any run of characters
fn wildcard_match(pattern: &str, text: &str, case_insensitive: bool) -> bool {
    let (pattern, text) = if case_insensitive {
        (pattern.to_lowercase(), text.to_lowercase())
    } else {
        (pattern.to_string(), text.to_string())
    };
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '*' || p[pi] == '%') {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*' || *c == '%')
}

/// Stable multi-key sort; nulls sort last ascending and first descending
fn sort_rows(rows: &mut [JsonValue], order: &[OrderClause]) {
    if order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for clause in order {
            let x = a.get(&clause.field).unwrap_or(&JsonValue::Null);
            let y = b.get(&clause.field).unwrap_or(&JsonValue::Null);
            let ordering = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => compare(x, y).unwrap_or(Ordering::Equal),
            };
            let ordering = if clause.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

// ============================================================================
// Projection
// ============================================================================

/// Apply a select expression. `*` keeps the whole row; embedded relations
/// such as `author(*)` are kept when the row already carries them.
fn project(row: &JsonValue, select: &str) -> JsonValue {
    let parts = split_top_level(select);
    if parts.iter().any(|p| p == "*") {
        return row.clone();
    }
    let JsonValue::Object(source) = row else {
        return row.clone();
    };
    let mut projected = Map::new();
    for part in parts {
        let name = part.split('(').next().unwrap_or_default().trim();
        if let Some(value) = source.get(name) {
            projected.insert(name.to_string(), value.clone());
        }
    }
    JsonValue::Object(projected)
}

/// Split on commas outside parentheses
fn split_top_level(select: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in select.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}
