// Shared helpers for the integration and performance suites
#![allow(dead_code)]

use analysis_bridge::resilience::{BreakerSettings, RetryPolicy};
use analysis_bridge::services::{ClientSettings, ResilientClient};
use std::collections::HashMap;
use std::time::Duration;
use wiremock::MockServer;

/// Retry intervals short enough for real-time tests. The elapsed budget is
/// generous so only the retry count governs.
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(50), max_retries)
        .with_max_elapsed(Duration::from_secs(10))
}

pub fn settings(base_url: &str, max_retries: u32) -> ClientSettings {
    ClientSettings {
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
        retry: fast_retry(max_retries),
        breaker: BreakerSettings {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            ..BreakerSettings::default()
        },
        default_headers: HashMap::new(),
    }
}

pub fn breaker(failure_threshold: u32, cool_down: Duration) -> BreakerSettings {
    BreakerSettings {
        failure_threshold,
        timeout: cool_down,
        ..BreakerSettings::default()
    }
}

pub fn client_with(target: &str, settings: ClientSettings) -> ResilientClient {
    ResilientClient::new(target, settings).expect("client should build")
}

pub fn client_for(server: &MockServer, max_retries: u32) -> ResilientClient {
    client_with("llm", settings(&server.uri(), max_retries))
}

/// `data: `-framed increments followed by the `[DONE]` terminator.
pub fn sse_body(fragments: &[&str]) -> String {
    let mut body = String::new();
    for fragment in fragments {
        let chunk = serde_json::json!({"choices": [{"delta": {"content": fragment}}]});
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// An address nothing listens on.
pub fn refused_address() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}
