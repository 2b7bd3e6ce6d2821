//! SupabaseAdapter against a scripted transport

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;

use dataport_adapter::realtime::LocalBroadcast;
use dataport_adapter::transport::{HttpMethod, RequestBody};
use dataport_adapter::{
    ChangeCallback, ChangeEvent, DataAdapter, FileUpload, HttpResponse, InMemorySessionStore, QueryFilter,
    QueryParams, RecordId, RecordTarget, ScriptedTransport, SessionStore, UploadParams,
};
use dataport_common::config::{BackendKind, DataportConfig, StorageConfig};
use dataport_common::error::{Error, TransportError};
use dataport_common::types::{AuthUser, Pagination};
use dataport_supabase::postgrest::SINGLE_OBJECT;
use dataport_supabase::SupabaseAdapter;

const PROJECT: &str = "https://proj.supabase.co";

struct Fixture {
    adapter: SupabaseAdapter,
    transport: Arc<ScriptedTransport>,
    session: Arc<InMemorySessionStore>,
}

fn config() -> DataportConfig {
    DataportConfig {
        backend: BackendKind::Supabase,
        base_url: format!("{PROJECT}/"),
        token: Some("anon-key".to_string()),
        ..DataportConfig::default()
    }
}

fn fixture_with(config: &DataportConfig) -> Fixture {
    let transport = Arc::new(ScriptedTransport::new());
    let session = Arc::new(InMemorySessionStore::new());
    let adapter = SupabaseAdapter::with_transport(config, transport.clone(), session.clone()).unwrap();
    Fixture {
        adapter,
        transport,
        session,
    }
}

fn fixture() -> Fixture {
    fixture_with(&config())
}

fn signed_in(session: &InMemorySessionStore) {
    session.set_user(AuthUser {
        id: Some("u1".to_string()),
        access_token: Some("user-jwt".to_string()),
        ..AuthUser::default()
    });
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_requires_project_url_and_anon_key() {
    let missing_url = DataportConfig {
        base_url: String::new(),
        ..config()
    };
    let err = SupabaseAdapter::with_transport(
        &missing_url,
        Arc::new(ScriptedTransport::new()),
        Arc::new(InMemorySessionStore::new()),
    )
    .unwrap_err();
    assert!(matches!(err, Error::ConfigError(_)));

    let missing_key = DataportConfig {
        token: None,
        ..config()
    };
    let err = SupabaseAdapter::with_transport(
        &missing_key,
        Arc::new(ScriptedTransport::new()),
        Arc::new(InMemorySessionStore::new()),
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Configuration error: Supabase token (anon key) is required"
    );
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_fetch_sends_anon_key_and_compiled_query() {
    let f = fixture();
    f.transport.push_json(200, json!([{"id": 1}]));

    let params = QueryParams::new()
        .filter(QueryFilter::new().eq("status", "active"))
        .paginate(Pagination::new(2, 5));
    let response = f.adapter.fetch("posts", &params).await.unwrap();
    assert!(response.success);
    assert_eq!(response.status, "200");
    assert_eq!(response.data, Some(json!([{"id": 1}])));

    let request = f.transport.last_request().unwrap();
    assert_eq!(request.method, HttpMethod::Get);
    assert_eq!(request.url, format!("{PROJECT}/rest/v1/posts"));
    assert_eq!(request.header_value("apikey"), Some("anon-key"));
    assert_eq!(request.header_value("authorization"), Some("Bearer anon-key"));
    assert_eq!(request.header_value("accept-profile"), Some("public"));
    assert_eq!(request.query_value("status"), Some("eq.active"));
    assert_eq!(request.query_value("offset"), Some("5"));
    assert_eq!(request.query_value("limit"), Some("5"));
}

#[tokio::test]
async fn test_fetch_one_is_strict() {
    let f = fixture();
    f.transport.push_json(
        406,
        json!({
            "code": "PGRST116",
            "details": "The result contains 2 rows",
            "hint": null,
            "message": "JSON object requested, multiple (or no) rows returned"
        }),
    );

    let response = f.adapter.fetch_one("posts", &QueryParams::new()).await.unwrap();
    assert!(!response.success);
    assert!(response.data.is_none());
    assert_eq!(response.status, "406");
    assert_eq!(response.original_error.unwrap()["code"], "PGRST116");

    let request = f.transport.last_request().unwrap();
    assert_eq!(request.header_value("accept"), Some(SINGLE_OBJECT));
    assert_eq!(request.query_value("limit"), Some("1"));
}

#[tokio::test]
async fn test_fetch_by_id_uses_bearer_of_signed_in_user() {
    let f = fixture();
    signed_in(&f.session);
    f.transport.push_json(200, json!({"id": 9, "title": "Hello"}));

    let params = QueryParams::new().field("id").field("title");
    let response = f
        .adapter
        .fetch_by_id("posts", &RecordId::Int(9), &params)
        .await
        .unwrap();
    assert_eq!(response.data, Some(json!({"id": 9, "title": "Hello"})));

    let request = f.transport.last_request().unwrap();
    assert_eq!(request.header_value("authorization"), Some("Bearer user-jwt"));
    assert_eq!(request.query_value("id"), Some("eq.9"));
    assert_eq!(request.query_value("select"), Some("id,title"));
}

#[tokio::test]
async fn test_fetch_many_reads_total_from_content_range() {
    let f = fixture();
    f.transport.push_response(
        HttpResponse::new(200, json!([{"id": 11}, {"id": 12}]))
            .with_header("Content-Range", "10-11/23"),
    );

    let params = QueryParams::new().paginate(Pagination::new(2, 10));
    let response = f.adapter.fetch_many("posts", &params).await.unwrap();
    let page = response.data.unwrap();
    assert_eq!(page["total"], 23);
    assert_eq!(page["current_page"], 2);
    assert_eq!(page["last_page"], 3);
    assert_eq!(page["per_page"], 10);
    assert_eq!(page["data"].as_array().unwrap().len(), 2);

    let request = f.transport.last_request().unwrap();
    assert_eq!(request.header_value("prefer"), Some("count=exact"));
}

#[tokio::test]
async fn test_count_uses_head_and_content_range() {
    let f = fixture();
    f.transport
        .push_response(HttpResponse::new(200, json!(null)).with_header("Content-Range", "*/42"));

    let filter = QueryFilter::new().condition("views", "gte", 100);
    let response = f.adapter.count("posts", Some(&filter)).await.unwrap();
    assert_eq!(response.data, Some(json!(42)));

    let request = f.transport.last_request().unwrap();
    assert_eq!(request.method, HttpMethod::Head);
    assert_eq!(request.query_value("views"), Some("gte.100"));
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn test_upsert_sets_on_conflict_and_merge_duplicates() {
    let f = fixture();
    f.transport
        .push_json(201, json!({"id": 1, "email": "a@x.com", "name": "A2"}));

    let response = f
        .adapter
        .upsert("users", json!({"email": "a@x.com", "name": "A2"}), &["email".to_string()])
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.status, "201");

    let request = f.transport.last_request().unwrap();
    assert_eq!(request.method, HttpMethod::Post);
    assert_eq!(request.query_value("on_conflict"), Some("email"));
    assert_eq!(
        request.header_value("prefer"),
        Some("return=representation,resolution=merge-duplicates")
    );
    assert_eq!(request.header_value("content-profile"), Some("public"));
    assert_eq!(request.header_value("accept"), Some(SINGLE_OBJECT));
    assert_eq!(
        request.body,
        RequestBody::Json(json!([{"email": "a@x.com", "name": "A2"}]))
    );
}

#[tokio::test]
async fn test_modify_by_filter_compiles_or_groups() {
    let f = fixture();
    f.transport.push_json(200, json!([{"id": 1}, {"id": 2}]));

    let filter = QueryFilter::new().or(vec![
        QueryFilter::new().eq("status", "draft"),
        QueryFilter::new().condition("views", "lt", 10),
    ]);
    f.adapter
        .modify("posts", &RecordTarget::filter(filter), json!({"archived": true}))
        .await
        .unwrap();

    let request = f.transport.last_request().unwrap();
    assert_eq!(request.method, HttpMethod::Patch);
    assert_eq!(request.query_value("or"), Some("(status.eq.draft,views.lt.10)"));
    assert_eq!(request.header_value("accept"), None);
}

#[tokio::test]
async fn test_remove_by_id_expects_single_row() {
    let f = fixture();
    f.transport.push_json(200, json!({"id": 5}));

    let response = f.adapter.remove("posts", &RecordTarget::id(5)).await.unwrap();
    assert_eq!(response.data, Some(json!({"id": 5})));

    let request = f.transport.last_request().unwrap();
    assert_eq!(request.method, HttpMethod::Delete);
    assert_eq!(request.query_value("id"), Some("eq.5"));
    assert_eq!(request.header_value("accept"), Some(SINGLE_OBJECT));
}

#[tokio::test]
async fn test_remove_without_target_never_reaches_transport() {
    let f = fixture();
    let err = f
        .adapter
        .remove("posts", &RecordTarget::filter(QueryFilter::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingTarget("remove")));
    assert_eq!(f.transport.request_count(), 0);
}

#[tokio::test]
async fn test_filter_without_constraints_never_reaches_transport() {
    let f = fixture();
    let err = f
        .adapter
        .remove("posts", &RecordTarget::filter(QueryFilter::new().or(vec![])))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingTarget("remove")));

    let err = f
        .adapter
        .modify(
            "posts",
            &RecordTarget::filter(QueryFilter::new().and(vec![QueryFilter::new()])),
            json!({"title": "x"}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingTarget("modify")));
    assert_eq!(f.transport.request_count(), 0);
}

// ============================================================================
// Session expiry
// ============================================================================

#[tokio::test]
async fn test_jwt_errors_reset_session() {
    let f = fixture();

    signed_in(&f.session);
    f.transport.push_json(
        401,
        json!({"code": "PGRST301", "message": "JWT expired", "details": null, "hint": null}),
    );
    let response = f.adapter.fetch("posts", &QueryParams::new()).await.unwrap();
    assert!(!response.success);
    assert_eq!(response.message, "JWT expired");
    assert_eq!(response.status, "401");
    assert!(f.session.current_user().is_none());

    signed_in(&f.session);
    f.transport
        .push_json(400, json!({"message": "invalid JWT: JWT expired at 12:00"}));
    f.adapter.fetch("posts", &QueryParams::new()).await.unwrap();
    assert!(f.session.current_user().is_none());
}

#[tokio::test]
async fn test_permission_denied_keeps_session() {
    let f = fixture();
    signed_in(&f.session);
    f.transport.push_json(
        403,
        json!({"code": "42501", "message": "permission denied for table posts"}),
    );

    let response = f.adapter.fetch("posts", &QueryParams::new()).await.unwrap();
    assert!(!response.success);
    assert_eq!(response.status, "403");
    assert!(f.session.current_user().is_some());
}

#[tokio::test]
async fn test_network_failure_maps_to_no_response() {
    let f = fixture();
    f.transport
        .push_error(TransportError::NoResponse("connection reset".to_string()));
    let response = f.adapter.fetch("posts", &QueryParams::new()).await.unwrap();
    assert_eq!(response.message, "No response received from server");
    assert_eq!(response.status, "error");
}

// ============================================================================
// Auth
// ============================================================================

#[tokio::test]
async fn test_sign_in_resolves_profile_roles_and_permissions() {
    let f = fixture();
    f.transport.push_json(
        200,
        json!({
            "access_token": "at",
            "refresh_token": "rt",
            "token_type": "bearer",
            "expires_at": 1_700_000_000,
            "user": {"id": "u1", "email": "ada@x.com", "user_metadata": {"fullName": "Ada"}}
        }),
    );
    f.transport.push_json(200, json!({"profile_id": 42}));
    f.transport
        .push_json(200, json!([{"role_id": 1}, {"role_id": 2}]));
    f.transport.push_json(
        200,
        json!([
            {"id": 1, "name": "editor", "guard_name": "web",
             "role_permissions": [{"permissions": {"id": 10, "name": "posts.edit", "guard_name": "web"}}]},
            {"id": 2, "name": "viewer", "guard_name": "web",
             "role_permissions": [{"permissions": [{"id": 11, "name": "posts.read", "guard_name": "web"}]}]}
        ]),
    );

    let response = f
        .adapter
        .sign_in(json!({"email": "ada@x.com", "password": "secret"}))
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.message, "Signed in successfully");

    let user = f.session.current_user().unwrap();
    assert_eq!(user.name.as_deref(), Some("Ada"));
    assert_eq!(user.profile_id.as_deref(), Some("42"));
    assert_eq!(user.expires_at.as_deref(), Some("1700000000"));
    assert!(user.has_role("viewer"));
    assert!(user.has_permission("posts.edit"));
    assert!(user.has_permission("posts.read"));

    let requests = f.transport.requests();
    assert_eq!(requests[0].url, format!("{PROJECT}/auth/v1/token"));
    assert_eq!(requests[0].query_value("grant_type"), Some("password"));
    assert_eq!(requests[1].url, format!("{PROJECT}/rest/v1/user_profile_links"));
    assert_eq!(requests[1].query_value("user_id"), Some("eq.u1"));
    assert_eq!(requests[1].header_value("authorization"), Some("Bearer at"));
    assert_eq!(requests[2].query_value("profile_id"), Some("eq.42"));
    assert_eq!(requests[3].query_value("id"), Some("in.(1,2)"));
    assert_eq!(
        requests[3].query_value("select"),
        Some("*,role_permissions(permissions(*))")
    );
}

#[tokio::test]
async fn test_sign_in_without_profile_fails_with_404() {
    let f = fixture();
    f.transport.push_json(
        200,
        json!({"access_token": "at", "user": {"id": "u1", "email": "ada@x.com"}}),
    );
    f.transport.push_json(
        406,
        json!({"code": "PGRST116", "message": "JSON object requested, multiple (or no) rows returned"}),
    );

    let response = f
        .adapter
        .sign_in(json!({"email": "ada@x.com", "password": "secret"}))
        .await
        .unwrap();
    assert!(!response.success);
    assert_eq!(response.status, "404");
    assert_eq!(response.message, "Profile not found for user");
    assert!(f.session.current_user().is_none());
}

#[tokio::test]
async fn test_sign_in_rejected_credentials() {
    let f = fixture();
    f.transport.push_json(
        400,
        json!({"code": 400, "error_code": "invalid_credentials", "msg": "Invalid login credentials"}),
    );

    let response = f
        .adapter
        .sign_in(json!({"email": "ada@x.com", "password": "wrong"}))
        .await
        .unwrap();
    assert!(!response.success);
    assert_eq!(response.status, "401");
    assert_eq!(response.message, "Invalid login credentials");
}

#[tokio::test]
async fn test_sign_up_pending_confirmation_returns_basic_user() {
    let f = fixture();
    f.transport.push_json(
        200,
        json!({"id": "u2", "email": "new@x.com", "user_metadata": {}}),
    );

    let response = f
        .adapter
        .sign_up(json!({"email": "new@x.com", "password": "secret"}))
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.status, "201");
    assert_eq!(response.data.unwrap()["id"], "u2");
    assert_eq!(f.transport.request_count(), 1);
    assert!(f.session.current_user().is_none());
}

#[tokio::test]
async fn test_oauth_builds_authorize_url() {
    let f = fixture();
    let response = f
        .adapter
        .sign_in_with_oauth(json!({
            "provider": "github",
            "options": {"redirectTo": "https://app.example.com/callback", "scopes": "repo"}
        }))
        .await
        .unwrap();
    let url = response.data.unwrap()["url"].as_str().unwrap().to_string();
    assert!(url.starts_with(&format!("{PROJECT}/auth/v1/authorize?provider=github")));
    assert!(url.contains("redirect_to=https%3A%2F%2Fapp.example.com%2Fcallback"));
    assert!(url.contains("scopes=repo"));
    assert_eq!(f.transport.request_count(), 0);

    let err = f.adapter.sign_in_with_oauth(json!({})).await.unwrap_err();
    assert!(matches!(err, Error::ValidationError(_)));
}

#[tokio::test]
async fn test_sign_out_resets_even_when_logout_fails() {
    let f = fixture();
    signed_in(&f.session);
    f.transport
        .push_error(TransportError::NoResponse("offline".to_string()));

    let response = f.adapter.sign_out().await.unwrap();
    assert!(!response.success);
    assert_eq!(response.message, "Failed to sign out");
    assert!(f.session.current_user().is_none());

    let request = f.transport.last_request().unwrap();
    assert_eq!(request.url, format!("{PROJECT}/auth/v1/logout"));
    assert_eq!(request.header_value("authorization"), Some("Bearer user-jwt"));
}

#[tokio::test]
async fn test_current_auth_user_from_gotrue() {
    let f = fixture();
    signed_in(&f.session);
    f.transport.push_json(200, json!({"id": "u1", "email": "ada@x.com"}));

    let response = f.adapter.get_current_auth_user().await.unwrap();
    assert_eq!(response.message, "Current auth user retrieved successfully");
    assert_eq!(
        f.transport.last_request().unwrap().url,
        format!("{PROJECT}/auth/v1/user")
    );
}

// ============================================================================
// Storage
// ============================================================================

#[tokio::test]
async fn test_upload_stores_objects_in_bucket() {
    let f = fixture_with(&DataportConfig {
        storage: StorageConfig {
            disk: Some("media".to_string()),
            directory: Some("/2024/".to_string()),
            ..StorageConfig::default()
        },
        ..config()
    });
    f.transport.push_json(200, json!({"Key": "media/x"}));

    let params = UploadParams::single(FileUpload::new("me.png", "image/png", Bytes::from_static(b"png")))
        .metadata(json!({"owner": "u1"}));
    let response = f.adapter.upload("avatars", params).await.unwrap();
    assert!(response.success);

    let files = response.data.unwrap();
    let file = &files[0];
    let path = file["path"].as_str().unwrap();
    assert!(path.starts_with("avatars/2024/"));
    assert!(path.ends_with(".png"));
    assert_eq!(
        file["url"],
        format!("{PROJECT}/storage/v1/object/public/media/{path}")
    );
    assert_eq!(file["metadata"], json!({"owner": "u1"}));

    let request = f.transport.last_request().unwrap();
    assert_eq!(request.url, format!("{PROJECT}/storage/v1/object/media/{path}"));
    assert_eq!(request.header_value("x-upsert"), Some("true"));
    assert!(matches!(request.body, RequestBody::Bytes { .. }));
}

#[tokio::test]
async fn test_upload_validates_before_sending() {
    let f = fixture_with(&DataportConfig {
        storage: StorageConfig {
            allowed_types: Some(vec!["image/png".to_string()]),
            ..StorageConfig::default()
        },
        ..config()
    });

    let err = f
        .adapter
        .upload("docs", UploadParams::single(FileUpload::new("a.pdf", "application/pdf", Bytes::new())))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidFileType { .. }));

    let err = f
        .adapter
        .upload("docs", UploadParams::many(Vec::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoFiles));
    assert_eq!(f.transport.request_count(), 0);
}

#[tokio::test]
async fn test_upload_with_expired_jwt_resets_session() {
    let f = fixture();
    signed_in(&f.session);
    f.transport.push_json(401, json!({"message": "JWT expired"}));

    let file = FileUpload::new("me.png", "image/png", Bytes::from_static(b"png"));
    let response = f.adapter.upload("avatars", UploadParams::single(file)).await.unwrap();
    assert!(!response.success);
    assert_eq!(response.status, "500");
    assert_eq!(response.message, "JWT expired");
    assert!(f.session.current_user().is_none());
}

#[tokio::test]
async fn test_upload_denied_keeps_session() {
    let f = fixture();
    signed_in(&f.session);
    f.transport.push_json(
        403,
        json!({
            "statusCode": "403",
            "error": "Unauthorized",
            "message": "new row violates row-level security policy"
        }),
    );

    let file = FileUpload::new("me.png", "image/png", Bytes::from_static(b"png"));
    let response = f.adapter.upload("avatars", UploadParams::single(file)).await.unwrap();
    assert!(!response.success);
    assert!(f.session.current_user().is_some());
}

// ============================================================================
// Realtime
// ============================================================================

#[tokio::test]
async fn test_subscribe_requires_realtime_transport() {
    let f = fixture();
    assert!(!f.adapter.capabilities().realtime);
    let callback: ChangeCallback = Arc::new(|_: ChangeEvent| {});
    assert!(matches!(
        f.adapter.subscribe("posts", callback),
        Err(Error::Unsupported("subscribe"))
    ));
    assert!(f.adapter.unsubscribe("posts").is_ok());
}

#[tokio::test]
async fn test_resubscribe_replaces_listener() {
    let broadcast = Arc::new(LocalBroadcast::new());
    let f = fixture();
    let adapter = f.adapter.with_realtime(broadcast.clone());
    assert!(adapter.capabilities().realtime);

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let counter = first.clone();
    adapter
        .subscribe("posts", Arc::new(move |_: ChangeEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    let counter = second.clone();
    adapter
        .subscribe("posts", Arc::new(move |_: ChangeEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    assert_eq!(broadcast.listener_count(), 1);

    broadcast.publish(&ChangeEvent {
        event_type: "INSERT".to_string(),
        schema: "public".to_string(),
        table: "posts".to_string(),
        record: json!({"id": 1}),
        old_record: None,
    });
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);

    adapter.unsubscribe("posts").unwrap();
    adapter.unsubscribe("posts").unwrap();
    assert_eq!(broadcast.listener_count(), 0);
}
