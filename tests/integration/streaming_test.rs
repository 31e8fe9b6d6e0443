// Streaming responses: accumulation of data-framed increments

use super::test_utils::{client_for, sse_body};
use analysis_bridge::models::{CallContext, Request};
use analysis_bridge::resilience::{ClientError, TransportError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn streaming_request() -> Request {
    Request::post("/v1/chat/completions")
        .json(&serde_json::json!({"model": "gpt-4o", "stream": true}))
        .streaming(true)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_stream_fragments_are_concatenated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body(&["A", "B"]), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 0);
    let response = client
        .execute_request(&CallContext::new(), streaming_request())
        .await
        .unwrap();

    assert_eq!(response.text().unwrap(), "AB");
}

#[tokio::test]
async fn test_content_after_terminator_is_ignored() {
    let mut body = sse_body(&["Clause 4.2 ", "limits liability."]);
    body.push_str("data: {\"choices\":[{\"delta\":{\"content\":\" trailing\"}}]}\n\n");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = client_for(&server, 0);
    let response = client
        .execute_request(&CallContext::new(), streaming_request())
        .await
        .unwrap();

    assert_eq!(response.text().unwrap(), "Clause 4.2 limits liability.");
}

#[tokio::test]
async fn test_crlf_framing_and_noise_lines() {
    let body = concat!(
        ": keep-alive\r\n",
        "event: completion\r\n",
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\r\n\r\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\r\n\r\n",
        "data: not-json\r\n\r\n",
        "data: [DONE]\r\n\r\n"
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let client = client_for(&server, 0);
    let response = client
        .execute_request(&CallContext::new(), streaming_request())
        .await
        .unwrap();

    assert_eq!(response.text().unwrap(), "ok");
}

#[tokio::test]
async fn test_error_status_on_streaming_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 3);
    let err = client
        .execute_request(&CallContext::new(), streaming_request())
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            ClientError::Transport {
                attempts: 1,
                source: TransportError::Status { status: 429, .. },
                ..
            }
        ),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_empty_stream_yields_empty_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("", "text/event-stream"))
        .mount(&server)
        .await;

    let client = client_for(&server, 0);
    let response = client
        .execute_request(&CallContext::new(), streaming_request())
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.body().is_empty());
}
