//! End-to-end tests driving the router with an in-memory store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, EncodingKey, Header};
use libra_works::access::TrustedNetworks;
use libra_works::api::{router, AppState};
use libra_works::audit::{AuditEvent, AuditPublisher, Auditor};
use libra_works::config::Namespaces;
use libra_works::error::AppError;
use libra_works::events::{EventBus, LogTransport};
use libra_works::identity::{Claims, IdentityVerifier, Role};
use libra_works::metrics::Metrics;
use libra_works::store::{MemoryStore, WorkStore};
use mockall::mock;
use serde_json::{json, Value};
use tokio_test::assert_ok;
use tower::ServiceExt;

const SECRET: &str = "integration-secret";

#[derive(Clone, Default)]
struct RecordingPublisher {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl RecordingPublisher {
    fn take(&self) -> Vec<AuditEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

#[async_trait]
impl AuditPublisher for RecordingPublisher {
    async fn publish(&self, event: &AuditEvent) -> Result<(), AppError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

mock! {
    Publisher {}

    #[async_trait]
    impl AuditPublisher for Publisher {
        async fn publish(&self, event: &AuditEvent) -> Result<(), AppError>;
    }
}

struct TestApp {
    app: Router,
    metrics: Metrics,
}

fn test_app(publisher: Arc<dyn AuditPublisher>) -> TestApp {
    let metrics = Metrics::new().unwrap();
    let state = AppState {
        store: WorkStore::new(MemoryStore::new()),
        bus: EventBus::new(LogTransport, "librabus:test", "libra-works-test"),
        auditor: Auditor::new(publisher),
        identity: IdentityVerifier::new(Some(SECRET.to_string())),
        trusted: TrustedNetworks::parse("128.143.0.0/16").unwrap(),
        metrics: metrics.clone(),
        namespaces: Namespaces::default(),
    };
    TestApp {
        app: router(state),
        metrics,
    }
}

fn token(sub: &str, role: Role) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        iat: 0,
        role,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    call_from(app, method, uri, auth, body, None).await
}

async fn call_from(
    app: &Router,
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
    forwarded_for: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = auth {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    if let Some(addr) = forwarded_for {
        builder = builder.header("x-forwarded-for", addr);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create_etd(app: &Router, depositor: &str, files: &[&str]) -> (String, u64) {
    let body = json!({
        "work": {
            "title": "Graph Colorings",
            "author": {"computeID": depositor, "firstName": "Ada", "lastName": "Lovelace"},
            "keywords": []
        },
        "visibility": "open",
        "files": files,
    });
    let (status, created) = call(app, "POST", "/api/etd", Some(&token(depositor, Role::User)), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    (
        created["id"].as_str().unwrap().to_string(),
        created["version"].as_u64().unwrap(),
    )
}

#[tokio::test]
async fn drafts_are_private_until_published() {
    let publisher = RecordingPublisher::default();
    let t = test_app(Arc::new(publisher.clone()));
    let (id, _) = create_etd(&t.app, "dep1a", &["thesis.pdf"]).await;
    let uri = format!("/api/etd/{id}");

    let (status, body) = call(&t.app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], format!("access to {id} is not authorized"));

    let (status, body) = call(&t.app, "GET", &uri, Some(&token("dep1a", Role::User)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isDraft"], true);
    assert_eq!(body["files"][0]["name"], "thesis.pdf");

    let (status, _) = call(&t.app, "POST", &format!("{uri}/publish"), Some(&token("zzz9z", Role::User)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&t.app, "POST", &format!("{uri}/publish"), Some(&token("dep1a", Role::User)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isDraft"], false);
    assert!(body["datePublished"].is_string());

    let (status, body) = call(&t.app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["files"].as_array().unwrap().len(), 1);

    let events = publisher.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].field_name, "draft");
    assert_eq!((events[0].before.as_str(), events[0].after.as_str()), ("true", "false"));
    assert_eq!(t.metrics.metadata_denials.get(), 1);
}

#[tokio::test]
async fn update_audits_title_and_first_keyword() {
    let publisher = RecordingPublisher::default();
    let t = test_app(Arc::new(publisher.clone()));
    let (id, version) = create_etd(&t.app, "dep1a", &[]).await;

    let update = json!({
        "work": {
            "title": "Graph Colourings",
            "author": {"computeID": "dep1a", "firstName": "Ada", "lastName": "Lovelace"},
            "keywords": ["graphs"]
        },
        "visibility": "open",
        "version": version,
    });
    let (status, body) = call(&t.app, "PUT", &format!("/api/etd/{id}"), Some(&token("dep1a", Role::User)), Some(update)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], version + 1);

    let events = publisher.take();
    let summary: Vec<_> = events
        .iter()
        .map(|e| (e.field_name.as_str(), e.before.as_str(), e.after.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("title", "Graph Colorings", "Graph Colourings"),
            ("keywords", "", "graphs"),
        ]
    );
    assert!(events.iter().all(|e| e.actor == "dep1a" && e.namespace == "libraetd" && e.work_id == id));
    assert_eq!(t.metrics.works_updated.with_label_values(&["etd"]).get(), 1);
}

#[tokio::test]
async fn file_replacement_is_a_single_event() {
    let publisher = RecordingPublisher::default();
    let t = test_app(Arc::new(publisher.clone()));
    let (id, _) = create_etd(&t.app, "dep1a", &["thesis.pdf", "appendix.pdf"]).await;

    let update = json!({
        "work": {
            "title": "Graph Colorings",
            "author": {"computeID": "dep1a", "firstName": "Ada", "lastName": "Lovelace"}
        },
        "visibility": "open",
        "addFiles": ["thesis_v2.pdf"],
        "delFiles": ["thesis.pdf"],
    });
    let (status, body) = call(&t.app, "PUT", &format!("/api/etd/{id}"), Some(&token("dep1a", Role::User)), Some(update)).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = body["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["appendix.pdf", "thesis_v2.pdf"]);

    let events = publisher.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].field_name, "files");
    assert_eq!(events[0].before, "thesis.pdf,appendix.pdf");
    assert_eq!(events[0].after, "appendix.pdf,thesis_v2.pdf");
}

#[tokio::test]
async fn stale_update_is_rejected_without_audit() {
    let publisher = RecordingPublisher::default();
    let t = test_app(Arc::new(publisher.clone()));
    let (id, version) = create_etd(&t.app, "dep1a", &[]).await;
    let uri = format!("/api/etd/{id}");
    let auth = token("dep1a", Role::User);

    let edit = |title: &str| {
        json!({
            "work": {"title": title, "author": {"computeID": "dep1a"}},
            "visibility": "open",
            "version": version,
        })
    };

    let (first, _) = call(&t.app, "PUT", &uri, Some(&auth), Some(edit("First"))).await;
    assert_eq!(first, StatusCode::OK);
    publisher.take();

    let (second, body) = call(&t.app, "PUT", &uri, Some(&auth), Some(edit("Second"))).await;
    assert_eq!(second, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("modified by another request"));
    assert!(publisher.take().is_empty());
    assert_eq!(t.metrics.version_conflicts.get(), 1);
}

#[tokio::test]
async fn embargo_hides_files_until_release() {
    let t = test_app(Arc::new(RecordingPublisher::default()));
    let auth = token("dep2b", Role::User);

    let mut ids = Vec::new();
    for release in ["2000-01-01", "2999-01-01"] {
        let body = json!({
            "work": {"title": "Open Data", "authors": [{"computeID": "dep2b"}]},
            "visibility": "embargo",
            "embargoReleaseDate": release,
            "embargoReleaseVisibility": "open",
            "files": ["data.csv"],
        });
        let (status, created) = call(&t.app, "POST", "/api/oa", Some(&auth), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["embargo"]["releaseDate"], release);
        let id = created["id"].as_str().unwrap().to_string();
        let (status, _) = call(&t.app, "POST", &format!("/api/oa/{id}/publish"), Some(&auth), None).await;
        assert_eq!(status, StatusCode::OK);
        ids.push(id);
    }

    let (status, released) = call(&t.app, "GET", &format!("/api/oa/{}", ids[0]), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(released["visibility"], "open");
    assert_eq!(released["embargo"]["releaseDate"], "2000-01-01");
    assert_eq!(released["files"].as_array().unwrap().len(), 1);
    let (status, _) = call(&t.app, "GET", &format!("/api/oa/{}/files/data.csv", ids[0]), None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, embargoed) = call(&t.app, "GET", &format!("/api/oa/{}", ids[1]), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(embargoed["work"]["title"], "Open Data");
    assert_eq!(embargoed["visibility"], "embargo");
    assert!(embargoed["files"].as_array().unwrap().is_empty());
    let (status, _) = call(&t.app, "GET", &format!("/api/oa/{}/files/data.csv", ids[1]), None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, owner_view) = call(&t.app, "GET", &format!("/api/oa/{}", ids[1]), Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(owner_view["files"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn uva_files_follow_forwarded_origin() {
    let t = test_app(Arc::new(RecordingPublisher::default()));
    let auth = token("dep3c", Role::User);
    let body = json!({
        "work": {"title": "Campus Only", "author": {"computeID": "dep3c"}},
        "visibility": "uva",
        "files": ["thesis.pdf"],
    });
    let (_, created) = call(&t.app, "POST", "/api/etd", Some(&auth), Some(body)).await;
    let id = created["id"].as_str().unwrap().to_string();
    call(&t.app, "POST", &format!("/api/etd/{id}/publish"), Some(&auth), None).await;
    let uri = format!("/api/etd/{id}");

    let (_, outside) = call_from(&t.app, "GET", &uri, None, None, Some("8.8.8.8")).await;
    assert!(outside["files"].as_array().unwrap().is_empty());

    let (_, inside) = call_from(&t.app, "GET", &uri, None, None, Some("128.143.22.1, 10.0.0.1")).await;
    assert_eq!(inside["files"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn admin_unpublish_and_publish_date() {
    let publisher = RecordingPublisher::default();
    let t = test_app(Arc::new(publisher.clone()));
    let (id, _) = create_etd(&t.app, "dep1a", &[]).await;
    let admin = token("adm9z", Role::Admin);
    let unpublish = format!("/api/admin/etd/{id}/unpublish");

    let (status, _) = call(&t.app, "POST", &unpublish, Some(&admin), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    call(&t.app, "POST", &format!("/api/etd/{id}/publish"), Some(&token("dep1a", Role::User)), None).await;
    publisher.take();

    let new_date = json!({"newDate": "2021-05-01T00:00:00Z"});
    let published = format!("/api/admin/etd/{id}/published");
    let (status, _) = call(&t.app, "PUT", &published, Some(&token("dep1a", Role::User)), Some(new_date.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = call(&t.app, "PUT", &published, Some(&admin), Some(new_date)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["datePublished"], "2021-05-01T00:00:00Z");

    let (status, _) = call(&t.app, "PUT", &published, Some(&admin), Some(json!({"newDate": "May 1st"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&t.app, "POST", &unpublish, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isDraft"], true);
    assert!(body.get("datePublished").is_none());

    let events = publisher.take();
    let fields: Vec<_> = events.iter().map(|e| e.field_name.as_str()).collect();
    assert_eq!(fields, vec!["publish-date", "draft"]);
    assert_eq!(events[0].after, "2021-05-01T00:00:00+00:00");
    assert!(events.iter().all(|e| e.actor == "adm9z"));
}

#[tokio::test]
async fn depositors_delete_only_drafts() {
    let t = test_app(Arc::new(RecordingPublisher::default()));
    let depositor = token("dep1a", Role::User);
    let (draft, _) = create_etd(&t.app, "dep1a", &[]).await;
    let (published, _) = create_etd(&t.app, "dep1a", &[]).await;
    call(&t.app, "POST", &format!("/api/etd/{published}/publish"), Some(&depositor), None).await;

    let (status, _) = call(&t.app, "DELETE", &format!("/api/etd/{draft}"), None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = call(&t.app, "DELETE", &format!("/api/etd/{draft}"), Some(&depositor), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&t.app, "GET", &format!("/api/etd/{draft}"), Some(&depositor), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&t.app, "DELETE", &format!("/api/etd/{published}"), Some(&depositor), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&t.app, "DELETE", &format!("/api/etd/{published}"), Some(&token("adm9z", Role::Admin)), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn failing_publisher_never_fails_the_update() {
    let mut mock = MockPublisher::new();
    mock.expect_publish()
        .withf(|event| event.field_name == "title")
        .times(1)
        .returning(|_| Err(AppError::Internal(anyhow::anyhow!("bus unavailable"))));
    let t = test_app(Arc::new(mock));
    let (id, _) = create_etd(&t.app, "dep1a", &[]).await;

    let update = json!({
        "work": {
            "title": "Renamed",
            "author": {"computeID": "dep1a", "firstName": "Ada", "lastName": "Lovelace"}
        },
        "visibility": "open",
    });
    let (status, body) = call(&t.app, "PUT", &format!("/api/etd/{id}"), Some(&token("dep1a", Role::User)), Some(update)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["work"]["title"], "Renamed");
    assert_eq!(t.metrics.audit_failures.get(), 1);
    assert_eq!(t.metrics.audit_published.get(), 0);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let t = test_app(Arc::new(RecordingPublisher::default()));
    let auth = token("dep1a", Role::User);

    let (status, _) = call(&t.app, "POST", "/api/etd", None, Some(json!({"work": {}, "visibility": "open"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&t.app, "POST", "/api/etd", Some("not-a-token"), Some(json!({"work": {}, "visibility": "open"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let bad_date = json!({"work": {}, "visibility": "embargo", "embargoReleaseDate": "someday"});
    let (status, _) = call(&t.app, "POST", "/api/oa", Some(&auth), Some(bad_date)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&t.app, "POST", "/api/etd", Some(&auth), Some(json!({"work": {}, "visibility": "secret"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&t.app, "GET", "/api/etd/oid:missing", Some(&auth), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_metrics_are_served() {
    let t = test_app(Arc::new(RecordingPublisher::default()));
    let (status, body) = call(&t.app, "GET", "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = assert_ok!(t.app.clone().oneshot(request).await);
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("libra_version_conflicts_total"));
}
