//! The same calls against every backend behind `Arc<dyn DataAdapter>`

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use dataport::adapter::ScriptedTransport;
use dataport::common::types::{PaginatedData, Pagination, SortCondition};
use dataport::{
    DataAdapter, DataportConfig, Error, InMemoryAdapter, InMemorySessionStore, QueryFilter, QueryParams,
    RecordTarget, RestAdapter, SupabaseAdapter,
};

#[derive(Debug, Deserialize, PartialEq)]
struct Post {
    id: i64,
    title: String,
}

fn memory() -> Arc<dyn DataAdapter> {
    Arc::new(InMemoryAdapter::new().with_table(
        "posts",
        vec![
            json!({"id": 1, "title": "First", "status": "active"}),
            json!({"id": 2, "title": "Second", "status": "draft"}),
            json!({"id": 3, "title": "Third", "status": "active"}),
        ],
    ))
}

#[tokio::test]
async fn test_typed_page_from_memory_backend() {
    let adapter = memory();
    let params = QueryParams::new()
        .filter(QueryFilter::new().eq("status", "active"))
        .sort(SortCondition::desc("id"))
        .field("id")
        .field("title")
        .paginate(Pagination::new(1, 1));

    let page = adapter
        .fetch_many("posts", &params)
        .await
        .unwrap()
        .decode::<PaginatedData<Post>>();
    assert!(page.success);
    let page = page.data.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.last_page, 2);
    assert_eq!(
        page.data,
        vec![Post {
            id: 3,
            title: "Third".to_string()
        }]
    );
}

#[tokio::test]
async fn test_missing_target_is_rejected_by_every_backend() {
    let session = Arc::new(InMemorySessionStore::new());
    let rest: Arc<dyn DataAdapter> = Arc::new(
        RestAdapter::with_transport(
            &DataportConfig::default(),
            Arc::new(ScriptedTransport::new()),
            session.clone(),
        )
        .unwrap(),
    );
    let supabase: Arc<dyn DataAdapter> = Arc::new(
        SupabaseAdapter::with_transport(
            &DataportConfig {
                base_url: "https://proj.supabase.co".to_string(),
                token: Some("anon".to_string()),
                ..DataportConfig::default()
            },
            Arc::new(ScriptedTransport::new()),
            session,
        )
        .unwrap(),
    );

    for adapter in [memory(), rest, supabase] {
        let err = adapter
            .modify("posts", &RecordTarget::default(), json!({"title": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingTarget("modify")));
        assert_eq!(
            err.to_string(),
            "Either 'id' or 'filter' must be provided for modify operation."
        );
    }
}

#[tokio::test]
async fn test_failed_envelope_never_carries_data() {
    let adapter = memory();
    let response = adapter
        .fetch_one("posts", &QueryParams::new().filter(QueryFilter::new().eq("status", "active")))
        .await
        .unwrap();
    assert!(!response.success);
    assert!(response.data.is_none());
    assert!(response.errors.is_some());
}
