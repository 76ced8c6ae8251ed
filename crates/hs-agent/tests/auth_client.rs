//! Token lifecycle tests against a mock coordinator

use std::sync::Arc;

use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hs_agent::auth::{AccessCredential, ApiRequest, AuthClient, ClientError, REFRESH_PATH};
use hs_core::config::AuthConfig;
use hs_core::{AgentEvent, AuthEvent, EventBus};

fn client(server: &MockServer, credential: AccessCredential, events: EventBus) -> AuthClient {
    AuthClient::new(&server.uri(), credential, &AuthConfig::default(), events).unwrap()
}

fn expiring_in(minutes: i64) -> AccessCredential {
    AccessCredential::new("current", "refresh-1", Utc::now() + Duration::minutes(minutes))
}

fn refresh_ok(access_token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": access_token,
        "expires_at": (Utc::now() + Duration::hours(1)).to_rfc3339(),
    }))
}

#[tokio::test]
async fn test_expiring_token_refreshed_once_before_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({ "refresh_token": "refresh-1" })))
        .respond_with(refresh_ok("fresh"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/hosts/me"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, expiring_in(2), EventBus::new());
    let resp = client
        .execute(ApiRequest::get("/api/v1/hosts/me").protected())
        .await
        .unwrap();
    assert!(resp.is_success());
    assert_eq!(client.credential().await.access_token, "fresh");
}

#[tokio::test]
async fn test_fresh_token_not_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(refresh_ok("unused"))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/hosts/me"))
        .and(header("authorization", "Bearer current"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, expiring_in(30), EventBus::new());
    client
        .execute_ok(ApiRequest::get("/api/v1/hosts/me").protected())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unauthorized_refreshes_and_retries_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(refresh_ok("fresh"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/programs"))
        .and(header("authorization", "Bearer current"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/programs"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["a", "b"])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, expiring_in(60), EventBus::new());
    let programs: Vec<String> = client
        .execute_json(ApiRequest::get("/api/v1/programs").protected())
        .await
        .unwrap();
    assert_eq!(programs, vec!["a", "b"]);
}

#[tokio::test]
async fn test_second_unauthorized_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(refresh_ok("fresh"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/programs"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server, expiring_in(60), EventBus::new());
    let resp = client
        .execute(ApiRequest::get("/api/v1/programs").protected())
        .await
        .unwrap();
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(client.credential().await.access_token, "fresh");
}

#[tokio::test]
async fn test_refresh_failure_is_distinct() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let events = EventBus::new();
    let mut rx = events.subscribe();
    let client = client(&server, AccessCredential::from_refresh_token("refresh-1"), events);

    let err = client
        .execute(ApiRequest::get("/api/v1/programs").protected())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RefreshFailed(_)));
    assert!(matches!(
        rx.recv().await.unwrap(),
        AgentEvent::Auth(AuthEvent::RefreshFailed { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(refresh_ok("fresh").set_delay(std::time::Duration::from_millis(50)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/hosts/me"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(8)
        .mount(&server)
        .await;

    let client = Arc::new(client(&server, expiring_in(1), EventBus::new()));
    let calls = (0..8).map(|_| {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .execute_ok(ApiRequest::get("/api/v1/hosts/me").protected())
                .await
        })
    });
    for result in futures::future::join_all(calls).await {
        result.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_rotated_refresh_token_is_kept_and_announced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "refresh_token": "refresh-2",
            "expires_at": (Utc::now() + Duration::hours(1)).to_rfc3339(),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let events = EventBus::new();
    let mut rx = events.subscribe();
    let client = client(&server, expiring_in(1), events);

    assert!(client.refresh_if_needed().await.unwrap());
    assert!(!client.refresh_if_needed().await.unwrap());

    let credential = client.credential().await;
    assert_eq!(credential.refresh_token, "refresh-2");
    match rx.recv().await.unwrap() {
        AgentEvent::Auth(AuthEvent::Refreshed {
            access_token,
            refresh_token,
            ..
        }) => {
            assert_eq!(access_token, "fresh");
            assert_eq!(refresh_token, "refresh-2");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_unprotected_request_skips_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(refresh_ok("unused"))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, AccessCredential::from_refresh_token("r"), EventBus::new());
    client.execute_ok(ApiRequest::get("/health")).await.unwrap();
}
