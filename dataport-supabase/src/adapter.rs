//! `DataAdapter` implementation for Supabase projects
//!
//! Talks to the project's HTTP APIs directly:
//! - `/rest/v1` (PostgREST) for tables
//! - `/auth/v1` (GoTrue) for sessions
//! - `/storage/v1` for uploads

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, error};

use dataport_adapter::realtime::{ChangeCallback, RealtimeTransport, SubscriptionRegistry};
use dataport_adapter::session::{reset_on_auth_error, AuthErrorSignal, SessionStore};
use dataport_adapter::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use dataport_adapter::upload::UploadParams;
use dataport_adapter::{Capabilities, DataAdapter, RecordId, RecordTarget, Target};
use dataport_common::config::{DataportConfig, StorageConfig, SupabaseConfig};
use dataport_common::error::{Error, Result, TransportError};
use dataport_common::response::{error_message, DataProviderResponse};
use dataport_common::types::PaginatedData;
use dataport_query::{compile_filter, FilterOp, QueryFilter, QueryParams, QueryPlan};

use crate::postgrest::{
    filter_pairs, plan_pairs, prefer, ContentRange, PREFER_COUNT_EXACT, PREFER_MERGE_DUPLICATES,
    PREFER_RETURN_REPRESENTATION, SINGLE_OBJECT,
};

pub(crate) type Response = Result<DataProviderResponse<JsonValue>>;

/// Adapter for a Supabase project
pub struct SupabaseAdapter {
    pub(crate) project_url: String,
    pub(crate) anon_key: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) settings: SupabaseConfig,
    pub(crate) storage: StorageConfig,
    pub(crate) transport: Arc<dyn HttpTransport>,
    pub(crate) session: Arc<dyn SessionStore>,
    realtime: Option<Arc<dyn RealtimeTransport>>,
    subscriptions: SubscriptionRegistry,
}

impl SupabaseAdapter {
    /// Build an adapter with a reqwest transport honoring `timeout_secs`
    pub fn new(config: &DataportConfig, session: Arc<dyn SessionStore>) -> Result<Self> {
        let transport = ReqwestTransport::new(Duration::from_secs(config.timeout_secs))?;
        Self::with_transport(config, Arc::new(transport), session)
    }

    /// Requires the project URL in `base_url` and the anon key in `token`
    pub fn with_transport(
        config: &DataportConfig,
        transport: Arc<dyn HttpTransport>,
        session: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(Error::ConfigError(
                "Supabase base_url (project URL) is required".to_string(),
            ));
        }
        url::Url::parse(&config.base_url).map_err(|e| {
            Error::ConfigError(format!("invalid Supabase project URL '{}': {e}", config.base_url))
        })?;
        let anon_key = match config.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => {
                return Err(Error::ConfigError(
                    "Supabase token (anon key) is required".to_string(),
                ))
            }
        };

        let mut headers: Vec<(String, String)> = config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.sort();

        Ok(Self {
            project_url: config.base_url.trim_end_matches('/').to_string(),
            anon_key,
            headers,
            settings: config.supabase.clone(),
            storage: config.storage.clone(),
            transport,
            session,
            realtime: None,
            subscriptions: SubscriptionRegistry::new(),
        })
    }

    /// Enable `subscribe` through the given change-feed client
    #[must_use]
    pub fn with_realtime(mut self, realtime: Arc<dyn RealtimeTransport>) -> Self {
        self.realtime = Some(realtime);
        self
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.project_url, path.trim_start_matches('/'))
    }

    /// Bearer token: the signed-in user's, else the anon key
    pub(crate) fn bearer(&self) -> String {
        match self.session.current_user() {
            Some(user) => {
                if user.is_expired() {
                    debug!(user_id = ?user.id, "sending expired access token");
                }
                user.access_token.unwrap_or_else(|| self.anon_key.clone())
            }
            None => self.anon_key.clone(),
        }
    }

    /// Request carrying `apikey` and `Authorization` headers
    pub(crate) fn request_with_token(&self, method: HttpMethod, path: &str, token: &str) -> HttpRequest {
        let mut request = HttpRequest::new(method, self.endpoint(path))
            .header("apikey", self.anon_key.clone())
            .header("Authorization", format!("Bearer {token}"));
        for (name, value) in &self.headers {
            request = request.header(name.clone(), value.clone());
        }
        request
    }

    pub(crate) fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        self.request_with_token(method, path, &self.bearer())
    }

    /// PostgREST request on `table`, with the schema profile header
    pub(crate) fn table_request(&self, method: HttpMethod, table: &str, token: &str) -> HttpRequest {
        let profile_header = match method {
            HttpMethod::Get | HttpMethod::Head => "Accept-Profile",
            _ => "Content-Profile",
        };
        self.request_with_token(method, &format!("rest/v1/{table}"), token)
            .header(profile_header, self.settings.schema.clone())
    }

    pub(crate) async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        debug!(method = request.method.as_str(), url = %request.url, "supabase request");
        self.transport.send(request).await
    }

    /// Successful response or the normalized failure, with session handling
    pub(crate) async fn execute(&self, request: HttpRequest, message: Option<&str>) -> DataProviderResponse<JsonValue> {
        match self.send(request).await {
            Ok(response) => {
                DataProviderResponse::from_result(Some(response.body), None, Some(response.status), message)
            }
            Err(err) => self.failure(&err),
        }
    }

    /// Failed envelope for a transport error; resets the session on auth errors
    pub(crate) fn failure(&self, err: &TransportError) -> DataProviderResponse<JsonValue> {
        match err {
            TransportError::Status { status, body } => {
                let error = error_object(body, *status);
                error!(status, error = %error, "supabase returned an error");
                let mut signal = AuthErrorSignal::from_json(&error);
                signal.status = Some(*status);
                reset_on_auth_error(self.session.as_ref(), &signal);
                DataProviderResponse::from_result(None, Some(error), Some(*status), None)
            }
            other => {
                error!(kind = other.kind(), error = %other, "supabase request failed");
                reset_on_auth_error(self.session.as_ref(), &AuthErrorSignal::from_transport(other));
                DataProviderResponse::from_transport_error(other)
            }
        }
    }

    fn read_request(&self, plan: &QueryPlan) -> HttpRequest {
        let mut request = self
            .table_request(HttpMethod::Get, &plan.resource, &self.bearer())
            .query_pairs(plan_pairs(plan));
        if plan.single {
            request = request.header("Accept", SINGLE_OBJECT);
        }
        request
    }

    /// Insert or upsert; a single object asks for a single row back
    async fn write_rows(&self, resource: &str, data: JsonValue, on_conflict: Option<&[String]>) -> Response {
        let (rows, single) = match data {
            JsonValue::Array(rows) => (rows, false),
            row @ JsonValue::Object(_) => (vec![row], true),
            _ => {
                return Err(Error::ValidationError(
                    "data must be an object or a list of objects".to_string(),
                ))
            }
        };

        let mut directives = vec![PREFER_RETURN_REPRESENTATION];
        if on_conflict.is_some() {
            directives.push(PREFER_MERGE_DUPLICATES);
        }
        let mut request = self
            .table_request(HttpMethod::Post, resource, &self.bearer())
            .query("select", "*")
            .header("Prefer", prefer(&directives))
            .json(JsonValue::Array(rows));
        if let Some(fields) = on_conflict.filter(|f| !f.is_empty()) {
            request = request.query("on_conflict", fields.join(","));
        }
        if single {
            request = request.header("Accept", SINGLE_OBJECT);
        }
        Ok(self.execute(request, None).await)
    }

    /// Filters for a write target and whether one row is expected
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

    fn write_request(&self, method: HttpMethod, resource: &str, target: &Target<'_>) -> Result<HttpRequest> {
        let (filters, single) = Self::target_filters(target)?;
        let mut request = self
            .table_request(method, resource, &self.bearer())
            .query("select", "*")
            .query_pairs(filter_pairs(&filters))
            .header("Prefer", PREFER_RETURN_REPRESENTATION);
        if single {
            request = request.header("Accept", SINGLE_OBJECT);
        }
        Ok(request)
    }
}

impl std::fmt::Debug for SupabaseAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseAdapter")
            .field("project_url", &self.project_url)
            .field("settings", &self.settings)
            .field("storage", &self.storage)
            .field("realtime", &self.realtime.is_some())
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

/// Error object with at least a `message`, from a PostgREST or GoTrue body
pub(crate) fn error_object(body: &JsonValue, status: u16) -> JsonValue {
    let fallback = || format!("Request failed with status {status}");
    match body {
        JsonValue::Object(map) => {
            let mut error = map.clone();
            if !error.contains_key("message") {
                let message = error_message(body).unwrap_or_else(fallback);
                error.insert("message".to_string(), JsonValue::String(message));
            }
            if !error.contains_key("code") {
                if let Some(code) = map.get("error_code").or_else(|| map.get("error")) {
                    error.insert("code".to_string(), code.clone());
                }
            }
            JsonValue::Object(error)
        }
        JsonValue::String(message) if !message.is_empty() => json!({ "message": message }),
        _ => {
            let mut error = Map::new();
            error.insert("message".to_string(), JsonValue::String(fallback()));
            JsonValue::Object(error)
        }
    }
}

#[async_trait]
impl DataAdapter for SupabaseAdapter {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            upload: true,
            count: true,
            realtime: self.realtime.is_some(),
            auth: true,
        }
    }

    async fn fetch(&self, resource: &str, params: &QueryParams) -> Response {
        let plan = QueryPlan::build(resource, params)?;
        Ok(self.execute(self.read_request(&plan), None).await)
    }

    /// Fails unless exactly one row matches
    async fn fetch_one(&self, resource: &str, params: &QueryParams) -> Response {
        let plan = QueryPlan::build(resource, params)?.limit(1).single();
        Ok(self.execute(self.read_request(&plan), None).await)
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
        Ok(self.execute(self.read_request(&plan), None).await)
    }

    async fn fetch_many(&self, resource: &str, params: &QueryParams) -> Response {
        let plan = QueryPlan::build(resource, params)?;
        let request = self
            .read_request(&plan)
            .header("Prefer", PREFER_COUNT_EXACT);
        let response = match self.send(request).await {
            Ok(response) => response,
            Err(err) => return Ok(self.failure(&err)),
        };

        let content_range = response.header("Content-Range").and_then(ContentRange::parse);
        let rows = match response.body {
            JsonValue::Array(rows) => rows,
            JsonValue::Null => Vec::new(),
            other => vec![other],
        };
        let requested_offset = plan.range.map_or(0, |(from, _)| from);
        let offset = content_range
            .and_then(|cr| cr.range)
            .map_or(requested_offset, |(from, _)| from);
        let total = content_range
            .and_then(|cr| cr.total)
            .unwrap_or(offset + rows.len() as u64);
        let per_page = params
            .pagination
            .map_or(total, |pagination| pagination.per_page);

        let page = PaginatedData::new(rows, offset, per_page, total);
        Ok(DataProviderResponse::from_result(
            Some(serde_json::to_value(page)?),
            None,
            Some(response.status),
            None,
        ))
    }

    async fn insert(&self, resource: &str, data: JsonValue) -> Response {
        self.write_rows(resource, data, None).await
    }

    /// By id the updated row must be unique; by filter every updated row is returned
    async fn modify(&self, resource: &str, target: &RecordTarget, data: JsonValue) -> Response {
        let target = target.resolve("modify")?;
        let request = self
            .write_request(HttpMethod::Patch, resource, &target)?
            .json(data);
        Ok(self.execute(request, None).await)
    }

    async fn upsert(&self, resource: &str, data: JsonValue, unique_fields: &[String]) -> Response {
        self.write_rows(resource, data, Some(unique_fields)).await
    }

    async fn remove(&self, resource: &str, target: &RecordTarget) -> Response {
        let target = target.resolve("remove")?;
        let request = self.write_request(HttpMethod::Delete, resource, &target)?;
        Ok(self.execute(request, None).await)
    }

    async fn upload(&self, resource: &str, params: UploadParams) -> Response {
        self.upload_files(resource, params).await
    }

    async fn count(&self, resource: &str, filter: Option<&QueryFilter>) -> Response {
        let filters = match filter {
            Some(filter) => compile_filter(filter)?,
            None => Vec::new(),
        };
        let request = self
            .table_request(HttpMethod::Head, resource, &self.bearer())
            .query("select", "*")
            .query_pairs(filter_pairs(&filters))
            .header("Prefer", PREFER_COUNT_EXACT);
        let response = match self.send(request).await {
            Ok(response) => response,
            Err(err) => return Ok(self.failure(&err)),
        };
        let total = response
            .header("Content-Range")
            .and_then(ContentRange::parse)
            .and_then(|cr| cr.total);
        Ok(match total {
            Some(total) => DataProviderResponse::from_result(Some(json!(total)), None, Some(200), None),
            None => DataProviderResponse::from_result(
                None,
                Some(json!({ "message": "Count not reported by server" })),
                Some(500),
                None,
            ),
        })
    }

    fn subscribe(&self, resource: &str, callback: ChangeCallback) -> Result<()> {
        let Some(realtime) = &self.realtime else {
            return Err(Error::Unsupported("subscribe"));
        };
        let handle = realtime.open(resource, resource, callback)?;
        self.subscriptions.insert(resource, handle);
        Ok(())
    }

    fn unsubscribe(&self, resource: &str) -> Result<()> {
        self.subscriptions.remove(resource);
        Ok(())
    }

    async fn sign_in(&self, credentials: JsonValue) -> Response {
        Ok(self.password_sign_in(credentials).await)
    }

    async fn sign_in_with_oauth(&self, credentials: JsonValue) -> Response {
        self.oauth_url(&credentials)
    }

    async fn sign_up(&self, credentials: JsonValue) -> Response {
        Ok(self.password_sign_up(credentials).await)
    }

    async fn sign_out(&self) -> Response {
        Ok(self.revoke_session().await)
    }

    async fn get_current_auth_user(&self) -> Response {
        Ok(self.remote_user().await)
    }

    async fn set_current_auth_user(&self, data: JsonValue) -> Response {
        Ok(self.update_remote_user(data).await)
    }
}
