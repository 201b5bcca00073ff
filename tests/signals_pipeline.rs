//! End-to-end: POST a signals batch through validate → filter → persist →
//! forward, with CAPI mocked via `wiremock`.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use crowdsieve::storage::Store;
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn filtered_alert_is_stored_but_not_forwarded() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/signals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "OK"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let harness = support::build(&mock_server.uri(), true).await;

    let batch = json!([
        {"scenario": "ssh-bf", "source": {"scope": "ip", "value": "10.0.0.1", "ip": "10.0.0.1"}, "simulated": true},
        {"scenario": "ssh-bf", "source": {"scope": "ip", "value": "10.0.0.2", "ip": "10.0.0.2"}, "simulated": false},
    ]);

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/signals")
                .header("content-type", "application/json")
                .body(Body::from(batch.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let alerts = harness
        .store
        .list_alerts(&crowdsieve::storage::models::AlertQuery {
            limit: 100,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(alerts.len(), 2);
    let filtered: Vec<_> = alerts.iter().filter(|a| a.filtered).collect();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].source_ip.as_deref(), Some("10.0.0.1"));

    // wiremock's `.expect(1)` on the mount above is verified on drop.
}

#[tokio::test]
async fn empty_batch_short_circuits_without_calling_capi() {
    let mock_server = MockServer::start().await;
    // No mock registered — any request to CAPI would fail to match and 404.
    let harness = support::build(&mock_server.uri(), true).await;

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/signals")
                .header("content-type", "application/json")
                .body(Body::from("[]"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn oversized_batch_is_rejected() {
    let mock_server = MockServer::start().await;
    let harness = support::build(&mock_server.uri(), true).await;

    let batch: Vec<_> = (0..1001)
        .map(|i| {
            let ip = format!("10.0.0.{}", i % 255);
            json!({"scenario": "ssh-bf", "source": {"scope": "ip", "value": ip}})
        })
        .collect();

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/signals")
                .header("content-type", "application/json")
                .body(Body::from(json!(batch).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
