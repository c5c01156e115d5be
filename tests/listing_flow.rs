// HTTP境界を通したリスティング構成フローの結合テスト。
// プロバイダーはwiremockで立て、ルーターはoneshotで直接叩く。
use once_cell::sync::Lazy;
use serde_json::Value;
use std::sync::Mutex;
use tower::ServiceExt;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use listing_gateway::app::{build_router, ComponentRegistry};
use listing_gateway::config::Config;

// Config::from_env はプロセス環境を読むため、構築区間だけ直列化する
static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn catalog(count: usize, prefix: &str) -> Value {
    let items: Vec<Value> = (0..count)
        .map(|i| {
            serde_json::json!({
                "title": format!("{prefix} Video {i}"),
                "duration": 90 + i * 45,
                "views": 10_000 - i * 7,
            })
        })
        .collect();
    Value::Array(items)
}

async fn provider_returning(payload: Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payload))
        .mount(&server)
        .await;
    server
}

async fn provider_failing(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

fn router_for(endpoints: &[&MockServer]) -> Router {
    let config = {
        let _lock = ENV_LOCK.lock().expect("env lock");
        let joined = endpoints
            .iter()
            .map(|server| format!("{}/api", server.uri()))
            .collect::<Vec<_>>()
            .join(",");
        std::env::set_var("PROVIDER_ENDPOINTS", joined);
        Config::from_env().expect("config loads")
    };
    let registry = ComponentRegistry::build_without_tracing(config).expect("registry builds");
    build_router(registry)
}

async fn get_listing(router: &Router, path: &str, session: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("GET")
        .uri(path)
        .header("x-geo-country", "us")
        .header("sec-ch-ua-mobile", "?1");
    if let Some(session) = session {
        builder = builder.header("x-session-id", session);
    }
    let response = router
        .clone()
        .oneshot(builder.body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn listing_survives_a_failing_provider() {
    let healthy = provider_returning(catalog(10, "Healthy")).await;
    let broken = provider_failing(500).await;
    let router = router_for(&[&healthy, &broken]);

    let (status, body) = get_listing(&router, "/v1/listings/category/drama", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(!body["meta"]["degraded"].as_bool().expect("degraded flag"));
    assert_eq!(body["meta"]["item_count"].as_u64(), Some(10));
    let first_title = body["entries"][0]["title"].as_str().expect("first title");
    assert!(first_title.starts_with("Healthy"));
}

#[tokio::test]
async fn second_request_is_served_from_cache_without_refetch() {
    let server = MockServer::start().await;
    // 2回目のGETでプロバイダーが呼ばれたらサーバー側の検証で落ちる
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(catalog(8, "Cached")))
        .expect(1)
        .mount(&server)
        .await;
    let router = router_for(&[&server]);

    let (first_status, first_body) =
        get_listing(&router, "/v1/listings/tag/comedy", None).await;
    let (second_status, second_body) =
        get_listing(&router, "/v1/listings/tag/comedy", None).await;

    assert_eq!(first_status, StatusCode::OK);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(first_body, second_body);
}

#[tokio::test]
async fn all_sources_failed_degrades_to_archived_content() {
    let broken_a = provider_failing(503).await;
    let broken_b = provider_failing(500).await;
    let router = router_for(&[&broken_a, &broken_b]);

    let (status, body) = get_listing(&router, "/v1/listings/category/drama", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["meta"]["degraded"].as_bool().expect("degraded flag"));
    assert!(body["meta"]["item_count"].as_u64().expect("item count") > 0);
}

#[tokio::test]
async fn impression_is_accepted_once_per_slot() {
    let provider = provider_returning(catalog(40, "Busy")).await;
    let router = router_for(&[&provider]);
    let session = uuid::Uuid::new_v4().to_string();

    let (status, body) =
        get_listing(&router, "/v1/listings/category/drama", Some(&session)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["meta"]["slot_count"].as_u64().expect("slot count") > 0);

    let slot_id = body["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .find(|entry| entry["kind"] == "ad")
        .and_then(|entry| entry["id"].as_str())
        .expect("an ad entry")
        .to_string();

    let post = |slot: String, session: String| {
        let router = router.clone();
        async move {
            let request = Request::builder()
                .method("POST")
                .uri("/v1/events/impression")
                .header("content-type", "application/json")
                .header("x-session-id", session)
                .header("x-geo-country", "us")
                .body(Body::from(
                    serde_json::json!({ "slot_id": slot }).to_string(),
                ))
                .expect("request");
            let response = router.oneshot(request).await.expect("response");
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
            let body: Value = serde_json::from_slice(&bytes).expect("json");
            (status, body)
        }
    };

    let (first_status, first_body) = post(slot_id.clone(), session.clone()).await;
    let (second_status, second_body) = post(slot_id, session).await;

    assert_eq!(first_status, StatusCode::ACCEPTED);
    assert_eq!(first_body["accepted"], Value::Bool(true));
    assert_eq!(second_status, StatusCode::ACCEPTED);
    assert_eq!(second_body["accepted"], Value::Bool(false));
}

#[tokio::test]
async fn scroll_event_requires_a_known_session() {
    let provider = provider_returning(catalog(5, "Quiet")).await;
    let router = router_for(&[&provider]);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/events/scroll")
        .header("content-type", "application/json")
        .header("x-session-id", uuid::Uuid::new_v4().to_string())
        .body(Body::from(serde_json::json!({ "depth": 0.5 }).to_string()))
        .expect("request");
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let missing_header = Request::builder()
        .method("POST")
        .uri("/v1/events/scroll")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({ "depth": 0.5 }).to_string()))
        .expect("request");
    let response = router.clone().oneshot(missing_header).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn liveness_and_metrics_endpoints_answer() {
    let provider = provider_returning(catalog(1, "Up")).await;
    let router = router_for(&[&provider]);

    let live = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health/live")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(live.status(), StatusCode::OK);

    let metrics = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/metrics")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(metrics.status(), StatusCode::OK);
    let bytes = to_bytes(metrics.into_body(), usize::MAX).await.expect("body");
    let text = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert!(text.contains("listing_requests_total"));
}
