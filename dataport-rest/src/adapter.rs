//! `DataAdapter` implementation for plain REST backends

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, error};

use dataport_adapter::session::{reset_on_auth_error, AuthErrorSignal, SessionStore};
use dataport_adapter::transport::{FormPart, HttpMethod, HttpRequest, HttpTransport, ReqwestTransport};
use dataport_adapter::upload::{validate_files, FileInput, UploadParams};
use dataport_adapter::{Capabilities, DataAdapter, RecordId, RecordTarget, Target};
use dataport_common::config::{DataportConfig, RestConfig, StorageConfig};
use dataport_common::error::{Error, Result, TransportError};
use dataport_common::response::{process_api_response, DataProviderResponse, GENERIC_SUCCESS_MESSAGE};
use dataport_common::types::{AuthUser, Pagination};
use dataport_query::querystring::{filter_pairs, to_query_pairs};
use dataport_query::{compile_filter, QueryFilter, QueryParams};

const ACCEPT: &str = "application/json, text/plain, application/pdf, */*";

/// Body key carrying the conflict columns of an upsert
const UNIQUE_FIELDS_KEY: &str = "_uniqueFields";

type Response = Result<DataProviderResponse<JsonValue>>;

/// Adapter for `/{resource}` style JSON APIs
pub struct RestAdapter {
    base_url: String,
    api_token: Option<String>,
    headers: Vec<(String, String)>,
    paths: RestConfig,
    storage: StorageConfig,
    transport: Arc<dyn HttpTransport>,
    session: Arc<dyn SessionStore>,
}

impl RestAdapter {
    /// Build an adapter with a reqwest transport honoring `timeout_secs`
    pub fn new(config: &DataportConfig, session: Arc<dyn SessionStore>) -> Result<Self> {
        let transport = ReqwestTransport::new(Duration::from_secs(config.timeout_secs))?;
        Self::with_transport(config, Arc::new(transport), session)
    }

    pub fn with_transport(
        config: &DataportConfig,
        transport: Arc<dyn HttpTransport>,
        session: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        url::Url::parse(&config.base_url)
            .map_err(|e| Error::ConfigError(format!("invalid base_url '{}': {e}", config.base_url)))?;

        let mut headers: Vec<(String, String)> = config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.sort();

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.token.clone(),
            headers,
            paths: config.rest.clone(),
            storage: config.storage.clone(),
            transport,
            session,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Request with the default headers and the session's credentials
    fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        let mut request = HttpRequest::new(method, self.url(path))
            .header("Accept", ACCEPT)
            .header("X-Requested-With", "XMLHttpRequest");
        for (name, value) in &self.headers {
            request = request.header(name.clone(), value.clone());
        }
        if let Some(token) = &self.api_token {
            request = request.header("X-API-TOKEN", token.clone());
        }
        if let Some(authorization) = self.session.current_user().and_then(|u| u.authorization()) {
            request = request.header("Authorization", authorization);
        }
        request
    }

    async fn execute(&self, request: HttpRequest) -> DataProviderResponse<JsonValue> {
        debug!(method = request.method.as_str(), url = %request.url, "rest request");
        match self.transport.send(request).await {
            Ok(response) => into_envelope(response.body, response.status),
            Err(err) => self.failure(&err),
        }
    }

    fn failure(&self, err: &TransportError) -> DataProviderResponse<JsonValue> {
        if let TransportError::Status { status, body } = err {
            error!(status, body = %body, "server returned an error response");
        } else {
            error!(kind = err.kind(), error = %err, "request failed");
        }
        reset_on_auth_error(self.session.as_ref(), &AuthErrorSignal::from_transport(err));
        DataProviderResponse::from_transport_error(err)
    }

    /// Store the signed-in user carried by a successful auth response
    fn remember_user(&self, response: &DataProviderResponse<JsonValue>) {
        if !response.success {
            return;
        }
        let user = response
            .data
            .as_ref()
            .and_then(|data| serde_json::from_value::<AuthUser>(data.clone()).ok());
        if let Some(user) = user {
            self.session.set_user(user);
        }
    }

    fn target_request(&self, method: HttpMethod, resource: &str, target: &Target<'_>) -> HttpRequest {
        match target {
            Target::Id(id) => self.request(method, &format!("{resource}/{id}")),
            Target::Filter(filter) => self.request(method, resource).query_pairs(filter_pairs(filter)),
        }
    }
}

impl std::fmt::Debug for RestAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestAdapter")
            .field("base_url", &self.base_url)
            .field("paths", &self.paths)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

/// 2xx body to envelope; bodies that are not envelopes become the payload
fn into_envelope(body: JsonValue, status: u16) -> DataProviderResponse<JsonValue> {
    if body.get("success").is_some() {
        process_api_response(body)
    } else {
        DataProviderResponse::ok(body, GENERIC_SUCCESS_MESSAGE, status.to_string())
    }
}

/// The query string carries the raw tree, so shapes the DSL cannot express fail here
fn check_filter(filter: Option<&QueryFilter>) -> Result<()> {
    if let Some(filter) = filter {
        compile_filter(filter)?;
    }
    Ok(())
}

fn upsert_payload(data: JsonValue, unique_fields: &[String]) -> Result<JsonValue> {
    let fields = (!unique_fields.is_empty()).then(|| json!(unique_fields));
    match data {
        JsonValue::Object(mut map) => {
            if let Some(fields) = fields {
                map.insert(UNIQUE_FIELDS_KEY.to_string(), fields);
            }
            Ok(JsonValue::Object(map))
        }
        JsonValue::Array(rows) => {
            let mut payload = json!({ "data": rows });
            if let Some(fields) = fields {
                payload[UNIQUE_FIELDS_KEY] = fields;
            }
            Ok(payload)
        }
        _ => Err(Error::ValidationError(
            "upsert data must be an object or a list of objects".to_string(),
        )),
    }
}

#[async_trait]
impl DataAdapter for RestAdapter {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            upload: true,
            count: true,
            realtime: false,
            auth: true,
        }
    }

    async fn fetch(&self, resource: &str, params: &QueryParams) -> Response {
        check_filter(params.filter.as_ref())?;
        let request = self
            .request(HttpMethod::Get, resource)
            .query_pairs(to_query_pairs(params));
        Ok(self.execute(request).await)
    }

    /// First row of a one-row page; cardinality is not enforced
    async fn fetch_one(&self, resource: &str, params: &QueryParams) -> Response {
        check_filter(params.filter.as_ref())?;
        let params = params.clone().paginate(Pagination::new(1, 1));
        let request = self
            .request(HttpMethod::Get, resource)
            .query_pairs(to_query_pairs(&params));
        Ok(self.execute(request).await)
    }

    async fn fetch_by_id(&self, resource: &str, id: &RecordId, params: &QueryParams) -> Response {
        let projection = QueryParams {
            fields: params.fields.clone(),
            include: params.include.clone(),
            ..QueryParams::default()
        };
        let request = self
            .request(HttpMethod::Get, &format!("{resource}/{id}"))
            .query_pairs(to_query_pairs(&projection));
        Ok(self.execute(request).await)
    }

    async fn fetch_many(&self, resource: &str, params: &QueryParams) -> Response {
        self.fetch(resource, params).await
    }

    async fn insert(&self, resource: &str, data: JsonValue) -> Response {
        let request = self.request(HttpMethod::Post, resource).json(data);
        Ok(self.execute(request).await)
    }

    async fn modify(&self, resource: &str, target: &RecordTarget, data: JsonValue) -> Response {
        let target = target.resolve("modify")?;
        let request = self
            .target_request(HttpMethod::Patch, resource, &target)
            .json(data);
        Ok(self.execute(request).await)
    }

    async fn upsert(&self, resource: &str, data: JsonValue, unique_fields: &[String]) -> Response {
        let payload = upsert_payload(data, unique_fields)?;
        let request = self.request(HttpMethod::Post, resource).json(payload);
        Ok(self.execute(request).await)
    }

    async fn remove(&self, resource: &str, target: &RecordTarget) -> Response {
        let target = target.resolve("remove")?;
        let request = self.target_request(HttpMethod::Delete, resource, &target);
        Ok(self.execute(request).await)
    }

    async fn upload(&self, resource: &str, params: UploadParams) -> Response {
        let storage = params.effective_storage(&self.storage);
        validate_files(params.file.files(), &storage)?;

        let mut parts: Vec<FormPart> = match &params.file {
            FileInput::One(file) => vec![FormPart::File {
                name: "file".to_string(),
                file_name: file.name.clone(),
                content_type: file.content_type.clone(),
                data: file.data.clone(),
            }],
            FileInput::Many(files) => files
                .iter()
                .enumerate()
                .map(|(idx, file)| FormPart::File {
                    name: format!("files[{idx}]"),
                    file_name: file.name.clone(),
                    content_type: file.content_type.clone(),
                    data: file.data.clone(),
                })
                .collect(),
        };
        if let Some(metadata) = &params.metadata {
            parts.push(FormPart::Text {
                name: "metadata".to_string(),
                value: metadata.to_string(),
            });
        }

        let path = format!("{resource}/{}", self.paths.upload_suffix);
        let request = self.request(HttpMethod::Post, &path).multipart(parts);
        Ok(self.execute(request).await)
    }

    async fn count(&self, resource: &str, filter: Option<&QueryFilter>) -> Response {
        check_filter(filter)?;
        let path = format!("{resource}/{}", self.paths.count_suffix);
        let mut request = self.request(HttpMethod::Get, &path);
        if let Some(filter) = filter {
            request = request.query_pairs(filter_pairs(filter));
        }
        Ok(self.execute(request).await)
    }

    async fn sign_in(&self, credentials: JsonValue) -> Response {
        let request = self
            .request(HttpMethod::Post, &self.paths.sign_in_path)
            .json(credentials);
        let response = self.execute(request).await;
        self.remember_user(&response);
        Ok(response)
    }

    async fn sign_up(&self, credentials: JsonValue) -> Response {
        let request = self
            .request(HttpMethod::Post, &self.paths.sign_up_path)
            .json(credentials);
        let response = self.execute(request).await;
        self.remember_user(&response);
        Ok(response)
    }

    async fn sign_out(&self) -> Response {
        let request = self.request(HttpMethod::Post, &self.paths.sign_out_path);
        let response = self.execute(request).await;
        self.session.reset();
        Ok(response)
    }

    async fn get_current_auth_user(&self) -> Response {
        Ok(match self.session.current_user() {
            Some(user) => DataProviderResponse::ok(serde_json::to_value(user)?, "Authenticated user", "200"),
            None => DataProviderResponse::failure(
                "No authenticated user",
                Some(json!([{ "message": "No authenticated user" }])),
                "401",
                None,
            ),
        })
    }

    async fn set_current_auth_user(&self, data: JsonValue) -> Response {
        let user: AuthUser = serde_json::from_value(data)?;
        self.session.set_user(user.clone());
        Ok(DataProviderResponse::ok(
            serde_json::to_value(user)?,
            "User updated successfully",
            "200",
        ))
    }
}
