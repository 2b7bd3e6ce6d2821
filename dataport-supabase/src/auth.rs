//! GoTrue authentication and profile resolution
//!
//! A successful sign-in is turned into an [`AuthUser`] whose roles already
//! carry their permissions: the auth user is linked to a profile, the
//! profile to roles, and each role to permissions through `role_permissions`.

use serde_json::{json, Value as JsonValue};
use tracing::{debug, error, warn};

use dataport_adapter::transport::HttpMethod;
use dataport_common::error::{Error, TransportError};
use dataport_common::response::{error_message, DataProviderResponse, GENERIC_ERROR_MESSAGE};
use dataport_common::types::{AuthUser, Permission, Role};
use dataport_query::compiler::render_value;

use crate::adapter::{error_object, Response, SupabaseAdapter};
use crate::postgrest::SINGLE_OBJECT;

const SIGNED_IN: &str = "Signed in successfully";
const SIGNED_UP: &str = "Signed up successfully";

impl SupabaseAdapter {
    pub(crate) async fn password_sign_in(&self, credentials: JsonValue) -> DataProviderResponse<JsonValue> {
        let request = self
            .request_with_token(HttpMethod::Post, "auth/v1/token", &self.anon_key)
            .query("grant_type", "password")
            .json(credentials);
        match self.send(request).await {
            Ok(response) => self.complete_sign_in(&response.body, SIGNED_IN, "200").await,
            Err(err) => auth_failure(&err, "401", "Failed to sign in"),
        }
    }

    pub(crate) async fn password_sign_up(&self, credentials: JsonValue) -> DataProviderResponse<JsonValue> {
        let request = self
            .request_with_token(HttpMethod::Post, "auth/v1/signup", &self.anon_key)
            .json(credentials);
        let body = match self.send(request).await {
            Ok(response) => response.body,
            Err(err) => return auth_failure(&err, "400", "Failed to sign up"),
        };
        if user_of(&body).and_then(|u| u.get("id")).is_none() {
            return DataProviderResponse::from_result(
                None,
                Some(json!({ "message": "No user ID returned from sign up" })),
                Some(500),
                None,
            );
        }
        self.complete_sign_in(&body, SIGNED_UP, "201").await
    }

    /// Provider authorize URL; the caller sends the user there
    pub(crate) fn oauth_url(&self, credentials: &JsonValue) -> Response {
        let provider = credentials
            .get("provider")
            .and_then(JsonValue::as_str)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::ValidationError("OAuth sign-in requires a 'provider'".to_string()))?;

        let mut params = vec![("provider", provider.to_string())];
        let options = credentials.get("options");
        if let Some(redirect) = options.and_then(|o| o.get("redirectTo")).and_then(JsonValue::as_str) {
            params.push(("redirect_to", redirect.to_string()));
        }
        if let Some(scopes) = options.and_then(|o| o.get("scopes")).and_then(JsonValue::as_str) {
            params.push(("scopes", scopes.to_string()));
        }
        let url = url::Url::parse_with_params(&self.endpoint("auth/v1/authorize"), &params)
            .map_err(|e| Error::ConfigError(format!("invalid authorize URL: {e}")))?;

        Ok(DataProviderResponse::ok(
            json!({ "provider": provider, "url": url.as_str() }),
            "Redirect to provider to continue sign in",
            "200",
        ))
    }

    /// Revoke remotely, then always forget the local session
    pub(crate) async fn revoke_session(&self) -> DataProviderResponse<JsonValue> {
        let token = self.session.current_user().and_then(|u| u.access_token);
        let outcome = match token {
            Some(token) => {
                let request = self.request_with_token(HttpMethod::Post, "auth/v1/logout", &token);
                self.send(request).await.map(|_| ())
            }
            None => Ok(()),
        };
        self.session.reset();

        match outcome {
            Ok(()) => DataProviderResponse::ok(JsonValue::Null, "Signed out successfully", "200"),
            Err(err) => {
                warn!(error = %err, "remote sign out failed, local session cleared");
                let error = match err.body() {
                    Some(body) => error_object(body, err.status().unwrap_or(500)),
                    None => json!({ "message": err.to_string() }),
                };
                DataProviderResponse::from_result(None, Some(error), Some(500), Some("Failed to sign out"))
            }
        }
    }

    pub(crate) async fn remote_user(&self) -> DataProviderResponse<JsonValue> {
        let request = self.request(HttpMethod::Get, "auth/v1/user");
        match self.send(request).await {
            Ok(response) => DataProviderResponse::ok(
                response.body,
                "Current auth user retrieved successfully",
                "200",
            ),
            Err(err) => with_default_message(self.failure(&err), "Failed to get current auth user"),
        }
    }

    pub(crate) async fn update_remote_user(&self, attributes: JsonValue) -> DataProviderResponse<JsonValue> {
        let request = self.request(HttpMethod::Put, "auth/v1/user").json(attributes);
        match self.send(request).await {
            Ok(response) => DataProviderResponse::ok(response.body, "User updated successfully", "200"),
            Err(err) => with_default_message(self.failure(&err), "Failed to update user"),
        }
    }

    /// Build and store the [`AuthUser`] for a GoTrue session body
    async fn complete_sign_in(&self, body: &JsonValue, message: &str, status: &str) -> DataProviderResponse<JsonValue> {
        let Some(user) = user_of(body) else {
            return DataProviderResponse::ok(json!({}), message, status);
        };
        let user_id = user.get("id").map(render_value).unwrap_or_default();
        let name = user
            .pointer("/user_metadata/fullName")
            .and_then(JsonValue::as_str)
            .or_else(|| user.get("email").and_then(JsonValue::as_str))
            .map(str::to_string);
        let email = user.get("email").and_then(JsonValue::as_str).map(str::to_string);

        let Some(access_token) = body.get("access_token").and_then(JsonValue::as_str) else {
            // No session yet, e.g. sign-up pending email confirmation
            debug!(user_id = %user_id, "auth response carries no session");
            let pending = AuthUser {
                id: Some(user_id),
                name,
                email,
                ..AuthUser::default()
            };
            return match serde_json::to_value(pending) {
                Ok(data) => DataProviderResponse::ok(data, message, status),
                Err(err) => DataProviderResponse::from_error(&err),
            };
        };

        let Some(profile_id) = self.fetch_profile_id(&user_id, access_token).await else {
            return DataProviderResponse::failure(
                "Profile not found for user",
                Some(json!([{ "message": "Profile not found" }])),
                "404",
                None,
            );
        };
        let roles = self.fetch_roles(&profile_id, access_token).await;

        let auth_user = AuthUser {
            id: Some(user_id),
            name,
            email,
            profile_id: Some(profile_id),
            roles,
            permissions: Vec::new(),
            refresh_token: body.get("refresh_token").and_then(JsonValue::as_str).map(str::to_string),
            access_token: Some(access_token.to_string()),
            token_type: body.get("token_type").and_then(JsonValue::as_str).map(str::to_string),
            expires_at: body.get("expires_at").filter(|v| !v.is_null()).map(render_value),
        };
        let data = match serde_json::to_value(&auth_user) {
            Ok(data) => data,
            Err(err) => return DataProviderResponse::from_error(&err),
        };
        self.session.set_user(auth_user);
        DataProviderResponse::ok(data, message, status)
    }

    async fn fetch_profile_id(&self, user_id: &str, token: &str) -> Option<String> {
        let request = self
            .table_request(HttpMethod::Get, &self.settings.profile_link_table, token)
            .query("select", "profile_id")
            .query("user_id", format!("eq.{user_id}"))
            .header("Accept", SINGLE_OBJECT);
        match self.send(request).await {
            Ok(response) => response
                .body
                .get("profile_id")
                .filter(|v| !v.is_null())
                .map(render_value),
            Err(err) => {
                error!(user_id, error = %err, "failed to fetch profile id");
                None
            }
        }
    }

    /// Roles of a profile with their permissions; lookup failures yield no roles
    async fn fetch_roles(&self, profile_id: &str, token: &str) -> Vec<Role> {
        let request = self
            .table_request(HttpMethod::Get, &self.settings.user_roles_table, token)
            .query("select", "role_id")
            .query("profile_id", format!("eq.{profile_id}"));
        let role_ids: Vec<String> = match self.send(request).await {
            Ok(response) => response
                .body
                .as_array()
                .map(|rows| {
                    rows.iter()
                        .filter_map(|row| row.get("role_id").filter(|v| !v.is_null()))
                        .map(render_value)
                        .collect()
                })
                .unwrap_or_default(),
            Err(err) => {
                error!(profile_id, error = %err, "failed to fetch user roles");
                return Vec::new();
            }
        };
        if role_ids.is_empty() {
            return Vec::new();
        }

        let request = self
            .table_request(HttpMethod::Get, &self.settings.roles_table, token)
            .query("select", "*,role_permissions(permissions(*))")
            .query("id", format!("in.({})", role_ids.join(",")));
        match self.send(request).await {
            Ok(response) => response
                .body
                .as_array()
                .map(|rows| rows.iter().map(flatten_role).collect())
                .unwrap_or_default(),
            Err(err) => {
                error!(profile_id, error = %err, "failed to fetch roles");
                Vec::new()
            }
        }
    }
}

/// The user object of a GoTrue response: nested under `user`, or the body itself
fn user_of(body: &JsonValue) -> Option<&JsonValue> {
    match body.get("user") {
        Some(user) if user.is_object() => Some(user),
        _ if body.get("id").is_some() => Some(body),
        _ => None,
    }
}

/// Role row with `role_permissions[].permissions` flattened into `permissions`
fn flatten_role(row: &JsonValue) -> Role {
    let mut permissions = Vec::new();
    for link in row
        .get("role_permissions")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
    {
        match link.get("permissions") {
            Some(JsonValue::Array(items)) => permissions.extend(items.iter().filter_map(permission)),
            Some(item) => permissions.extend(permission(item)),
            None => {}
        }
    }
    Role {
        id: row.get("id").cloned().unwrap_or_default(),
        name: string_field(row, "name"),
        guard_name: string_field(row, "guard_name"),
        permissions,
    }
}

fn permission(value: &JsonValue) -> Option<Permission> {
    if !value.is_object() {
        return None;
    }
    Some(Permission {
        id: value.get("id").cloned().unwrap_or_default(),
        name: string_field(value, "name"),
        guard_name: string_field(value, "guard_name"),
    })
}

fn string_field(value: &JsonValue, key: &str) -> String {
    value
        .get(key)
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Failed sign-in or sign-up with a fixed status
fn auth_failure(
    err: &TransportError,
    status: &str,
    fallback: &str,
) -> DataProviderResponse<JsonValue> {
    error!(error = %err, "authentication request failed");
    let error = match err.body() {
        Some(body) => error_object(body, err.status().unwrap_or(500)),
        None => json!({ "message": err.to_string() }),
    };
    let message = error_message(&error).unwrap_or_else(|| fallback.to_string());
    DataProviderResponse::failure(message, Some(json!([error.clone()])), status, Some(error))
}

fn with_default_message(
    mut response: DataProviderResponse<JsonValue>,
    fallback: &str,
) -> DataProviderResponse<JsonValue> {
    if response.message.is_empty() || response.message == GENERIC_ERROR_MESSAGE {
        response.message = fallback.to_string();
    }
    response
}
