// Request execution: URL resolution, retry classification, caller budget

use super::test_utils::{client_for, client_with, refused_address, settings};
use analysis_bridge::models::{CallContext, Request};
use analysis_bridge::resilience::{ClientError, TransportError};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_relative_path_joined_onto_base() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string("joined"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with("llm", settings(&format!("{}/api/", server.uri()), 0));
    let response = client
        .execute_request(&CallContext::new(), Request::get("/v1/chat").build().unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().unwrap(), "joined");
    assert_eq!(response.attempts(), 1);
}

#[tokio::test]
async fn test_absolute_url_bypasses_base() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/direct"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with("search", settings(&refused_address(), 0));
    let url = format!("{}/direct", server.uri());
    let response = client
        .execute_request(&CallContext::new(), Request::get(url).build().unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), 204);
    assert!(response.body().is_empty());
}

#[tokio::test]
async fn test_json_body_and_default_auth_header_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("content-type", "application/json"))
        .and(body_json(serde_json::json!({"model": "gpt-4o", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "1"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut client_settings = settings(&server.uri(), 0);
    client_settings
        .default_headers
        .insert("Authorization".to_string(), "Bearer sk-test".to_string());
    let client = client_with("llm", client_settings);

    let response = client
        .execute_request(
            &CallContext::new(),
            Request::post("v1/chat/completions")
                .json(&serde_json::json!({"model": "gpt-4o", "stream": false}))
                .build()
                .unwrap(),
        )
        .await
        .unwrap();

    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["id"], "1");
}

#[tokio::test]
async fn test_error_status_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 3);
    let err = client
        .execute_request(&CallContext::new(), Request::get("/v1/models").build().unwrap())
        .await
        .unwrap_err();

    match err {
        ClientError::Transport {
            attempts,
            source: TransportError::Status { status, body },
            ..
        } => {
            assert_eq!(attempts, 1);
            assert_eq!(status, 503);
            assert_eq!(body, "overloaded");
        }
        other => panic!("expected permanent status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_responses_exhaust_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .expect(3)
        .mount(&server)
        .await;

    let mut client_settings = settings(&server.uri(), 2);
    client_settings.timeout = Duration::from_millis(100);
    let client = client_with("ocr", client_settings);

    let err = client
        .execute_request(&CallContext::new(), Request::get("/slow").build().unwrap())
        .await
        .unwrap_err();

    match err {
        ClientError::RetriesExhausted {
            attempts, source, ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(source, TransportError::AttemptTimeout(Duration::from_millis(100)));
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }

    let stats = client.metrics().get_stats().await;
    assert_eq!(stats.total_calls, 1);
    assert_eq!(stats.failed_calls, 1);
    assert_eq!(stats.total_attempts, 3);
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .expect(1)
        .mount(&server)
        .await;

    let mut client_settings = settings(&server.uri(), 3);
    client_settings.timeout = Duration::from_millis(100);
    let client = client_with("llm", client_settings);

    let response = client
        .execute_request(&CallContext::new(), Request::get("/flaky").build().unwrap())
        .await
        .unwrap();

    assert_eq!(response.text().unwrap(), "recovered");
    assert_eq!(response.attempts(), 2);

    let counts = client.breaker().counts();
    assert_eq!(counts.total_successes, 1);
    assert_eq!(counts.total_failures, 0);
}

#[tokio::test]
async fn test_connection_refused_is_not_retried() {
    let client = client_with("search", settings(&refused_address(), 3));

    let err = client
        .execute_request(&CallContext::new(), Request::get("/q").build().unwrap())
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            ClientError::Transport {
                attempts: 1,
                source: TransportError::Network(_),
                ..
            }
        ),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_deadline_abandons_in_flight_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client = client_for(&server, 3);
    let started = std::time::Instant::now();
    let err = client
        .execute_request(
            &CallContext::with_timeout(Duration::from_millis(200)),
            Request::get("/slow").build().unwrap(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::DeadlineExceeded { attempts: 1, .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_cancel_abandons_in_flight_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client = client_for(&server, 3);
    let ctx = CallContext::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let err = client
        .execute_request(&ctx, Request::get("/slow").build().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Cancelled { attempts: 1, .. }), "{err:?}");
    assert_eq!(client.breaker().counts().total_failures, 0);
}

#[tokio::test]
async fn test_invalid_request_never_reaches_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, 3);
    let err = Request::builder("NOT A METHOD", "/x").build().unwrap_err();
    assert!(matches!(err, ClientError::InvalidRequest(_)));

    let err = client
        .execute_request(
            &CallContext::new(),
            Request::get("http://[::1/unterminated").build().unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidRequest(_)), "{err:?}");
    assert_eq!(client.breaker().counts().requests, 0);
}
