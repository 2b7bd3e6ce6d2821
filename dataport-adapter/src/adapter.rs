//! The backend-agnostic data access contract
//!
//! Every operation resolves to a [`DataProviderResponse`]. Backend failures
//! become failed envelopes; `Err` is reserved for calls that violate the
//! contract (missing id/filter, malformed filter, rejected file type,
//! unsupported operation).

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use dataport_common::error::{Error, Result};
use dataport_common::response::DataProviderResponse;
use dataport_query::{compile_filter, QueryFilter, QueryParams};

use crate::realtime::ChangeCallback;
use crate::upload::UploadParams;

/// Primary key of a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Str(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::Str(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self::Str(id)
    }
}

impl From<&RecordId> for JsonValue {
    fn from(id: &RecordId) -> Self {
        match id {
            RecordId::Int(id) => JsonValue::from(*id),
            RecordId::Str(id) => JsonValue::String(id.clone()),
        }
    }
}

/// Which rows a `modify` or `remove` applies to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordTarget {
    pub id: Option<RecordId>,
    pub filter: Option<QueryFilter>,
}

/// A resolved [`RecordTarget`]
#[derive(Debug, Clone, PartialEq)]
pub enum Target<'a> {
    Id(&'a RecordId),
    Filter(&'a QueryFilter),
}

impl RecordTarget {
    pub fn id(id: impl Into<RecordId>) -> Self {
        Self {
            id: Some(id.into()),
            filter: None,
        }
    }

    pub fn filter(filter: QueryFilter) -> Self {
        Self {
            id: None,
            filter: Some(filter),
        }
    }

    /// The id when present, else a filter that compiles to at least one constraint.
    ///
    /// Anything else would touch every row, so it is refused. A filter that
    /// fails to compile surfaces as [`Error::InvalidFilter`].
    pub fn resolve(&self, operation: &'static str) -> Result<Target<'_>> {
        if let Some(id) = &self.id {
            return Ok(Target::Id(id));
        }
        match &self.filter {
            Some(filter) if !compile_filter(filter)?.is_empty() => Ok(Target::Filter(filter)),
            _ => Err(Error::MissingTarget(operation)),
        }
    }
}

/// Optional features an adapter supports, fixed when it is built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub upload: bool,
    pub count: bool,
    pub realtime: bool,
    pub auth: bool,
}

type Response = Result<DataProviderResponse<JsonValue>>;

/// Data access contract shared by every backend
#[async_trait]
pub trait DataAdapter: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Rows matching `params`
    async fn fetch(&self, resource: &str, params: &QueryParams) -> Response;

    /// One row matching `params`. Cardinality enforcement is backend specific.
    async fn fetch_one(&self, resource: &str, params: &QueryParams) -> Response;

    /// Row with primary key `id`; only `fields` and `include` of `params` apply
    async fn fetch_by_id(&self, resource: &str, id: &RecordId, params: &QueryParams) -> Response;

    /// A page of rows plus pagination metadata
    async fn fetch_many(&self, resource: &str, params: &QueryParams) -> Response;

    /// Insert one object or an array of objects
    async fn insert(&self, resource: &str, data: JsonValue) -> Response;

    /// Partial update of the targeted rows
    async fn modify(&self, resource: &str, target: &RecordTarget, data: JsonValue) -> Response;

    /// Insert, or update on conflict over `unique_fields` (primary key when empty)
    async fn upsert(&self, resource: &str, data: JsonValue, unique_fields: &[String]) -> Response;

    async fn remove(&self, resource: &str, target: &RecordTarget) -> Response;

    async fn upload(&self, _resource: &str, _params: UploadParams) -> Response {
        Err(Error::Unsupported("upload"))
    }

    async fn count(&self, _resource: &str, _filter: Option<&QueryFilter>) -> Response {
        Err(Error::Unsupported("count"))
    }

    /// Deliver row changes on `resource` to `callback`, replacing any
    /// earlier subscription on the same resource.
    fn subscribe(&self, _resource: &str, _callback: ChangeCallback) -> Result<()> {
        Err(Error::Unsupported("subscribe"))
    }

    /// Stop a subscription; unknown resources are a no-op
    fn unsubscribe(&self, _resource: &str) -> Result<()> {
        Err(Error::Unsupported("unsubscribe"))
    }

    async fn sign_in(&self, _credentials: JsonValue) -> Response {
        Err(Error::Unsupported("sign_in"))
    }

    /// Start a third-party sign-in; the payload carries the provider URL
    async fn sign_in_with_oauth(&self, _credentials: JsonValue) -> Response {
        Err(Error::Unsupported("sign_in_with_oauth"))
    }

    async fn sign_up(&self, _credentials: JsonValue) -> Response {
        Err(Error::Unsupported("sign_up"))
    }

    /// Revoke the session remotely; the local session is reset regardless
    async fn sign_out(&self) -> Response {
        Err(Error::Unsupported("sign_out"))
    }

    async fn get_current_auth_user(&self) -> Response {
        Err(Error::Unsupported("get_current_auth_user"))
    }

    async fn set_current_auth_user(&self, _data: JsonValue) -> Response {
        Err(Error::Unsupported("set_current_auth_user"))
    }
}
