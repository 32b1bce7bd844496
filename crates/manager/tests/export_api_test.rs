#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Export API request validation.
//!
//! Every case here must be rejected before any query runs.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};

use errata_manager::Config;
use errata_manager::sync::InventoryAid;
use uuid::Uuid;

use common::{TestApp, body_string, export_request};

const RESOURCES: [&str; 3] = ["advisories", "packages", "systems"];

#[tokio::test]
async fn unsupported_content_type_is_415() {
    let app = TestApp::offline();

    for resource in RESOURCES {
        let uri = format!("/api/patch/v3/export/{resource}");
        let response = app
            .request(export_request(&uri, Some("test-format")))
            .await;

        assert_eq!(
            response.status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "{resource}"
        );
        assert_eq!(
            body_string(response).await,
            r#"{"error":"Invalid content type 'test-format', use 'application/json' or 'text/csv'"}"#
        );
    }
}

#[tokio::test]
async fn wildcard_accept_is_rejected() {
    let app = TestApp::offline();
    let response = app
        .request(export_request("/api/patch/v3/export/advisories", Some("*/*")))
        .await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn invalid_tag_is_400() {
    let app = TestApp::offline();

    for resource in RESOURCES {
        let uri =
            format!("/api/patch/v3/export/{resource}?tags=ns1/k3=val4&tags=invalidTag");
        let response = app
            .request(export_request(&uri, Some("application/json")))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{resource}");
        assert_eq!(
            body_string(response).await,
            r#"{"error":"Invalid tag 'invalidTag', use 'namespace/key=value'"}"#
        );
    }
}

#[tokio::test]
async fn unknown_filter_field_is_400() {
    let app = TestApp::offline();

    for resource in RESOURCES {
        let uri = format!("/api/patch/v3/export/{resource}?filter%5Bfilteriamnotexitst%5D=abcd");
        let response = app.request(export_request(&uri, Some("text/csv"))).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{resource}");
        assert_eq!(
            body_string(response).await,
            r#"{"error":"Invalid filter field: filteriamnotexitst"}"#
        );
    }
}

#[tokio::test]
async fn content_type_is_checked_before_filters() {
    let app = TestApp::offline();
    let response = app
        .request(export_request(
            "/api/patch/v3/export/packages?filter%5Bfilteriamnotexitst%5D=abcd",
            Some("application/xml"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn unknown_sort_field_is_400() {
    let app = TestApp::offline();
    let response = app
        .request(export_request(
            "/api/patch/v3/export/advisories?sort=-nonexistent",
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_account_is_401() {
    let app = TestApp::offline();
    let request = Request::builder()
        .uri("/api/patch/v3/export/advisories")
        .header(header::ACCEPT, "application/json")
        .body(Body::empty())
        .unwrap();

    let response = app.request(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_string(response).await,
        r#"{"error":"missing account identity"}"#
    );
}

#[tokio::test]
async fn unknown_version_is_404() {
    let app = TestApp::offline();
    let response = app
        .request(export_request("/api/patch/v9/export/systems", None))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_resource_is_404() {
    let app = TestApp::offline();
    let response = app
        .request(export_request("/api/patch/v3/export/errata", None))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_string(response).await,
        r#"{"error":"unknown export resource 'errata'"}"#
    );
}

fn reevaluate_request(key: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/reevaluate/{key}"))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn reevaluation_trigger_without_key_is_404() {
    let app = TestApp::offline();
    let response = app.request(reevaluate_request("anything")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reevaluation_trigger_rejects_wrong_key() {
    let app = TestApp::offline_with(Config {
        reeval_key: Some("secret".to_string()),
        ..Config::default()
    });
    let response = app.request(reevaluate_request("guess")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(app.sink.batches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn reevaluation_trigger_respects_disabled_sending() {
    let app = TestApp::offline_with(Config {
        reeval_key: Some("secret".to_string()),
        enable_recalc_messages_send: false,
        ..Config::default()
    });
    let response = app.request(reevaluate_request("secret")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_string(response).await,
        r#"{"status":"completed","sent":0}"#
    );
    assert_eq!(app.sink.sent(), 0);
}

#[tokio::test]
async fn reevaluation_counters_are_served() {
    let app = TestApp::offline();
    let systems: Vec<_> = (1..=2)
        .map(|account| InventoryAid {
            inventory_id: Uuid::new_v4(),
            rh_account_id: account,
        })
        .collect();

    let sent = app.state.reevaluation().publish(&systems).await.unwrap();
    assert_eq!(sent, 2);
    assert_eq!(app.sink.sent(), 2);

    let metrics = app.metrics().await;
    assert!(metrics.contains("reeval_messages_sent_total 2"));
    assert!(metrics.contains("reeval_send_duration_seconds_count 1"));
}

#[tokio::test]
async fn metrics_endpoint_is_text() {
    let app = TestApp::offline();
    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();

    let response = app.request(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("reeval_messages_sent_total"));
}
