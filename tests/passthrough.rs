//! `/v2/*` and `/v3/*` passthrough mirrors whatever CAPI returns, byte for
//! byte, without touching the filter engine or storage.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn decisions_lookup_is_mirrored_verbatim() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/decisions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1, "value": "1.2.3.4"}])))
        .mount(&mock_server)
        .await;

    let harness = support::build(&mock_server.uri(), true).await;

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v2/decisions")
                .header("authorization", "Bearer test-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed[0]["value"], "1.2.3.4");
}

#[tokio::test]
async fn upstream_error_status_is_mirrored() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/watchers"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "forbidden"})))
        .mount(&mock_server)
        .await;

    let harness = support::build(&mock_server.uri(), true).await;

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v2/watchers")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn oversized_passthrough_body_is_rejected() {
    let mock_server = MockServer::start().await;
    let harness = support::build(&mock_server.uri(), true).await;

    let big_body = vec![b'a'; 2 * 1024 * 1024];
    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/watchers")
                .body(Body::from(big_body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
