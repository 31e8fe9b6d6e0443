use anyhow::Result;
use futures::StreamExt;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{CallContext, Interrupt, Request, Response};
use crate::resilience::backoff::{Backoff, RetryPolicy};
use crate::resilience::circuit_breaker::{BreakerSettings, CircuitBreaker};
use crate::resilience::classifier;
use crate::resilience::errors::{ClientError, StreamError, TransportError};
use crate::resilience::metrics::ClientMetrics;
use crate::services::transport::{HttpTransport, PreparedRequest, Transport, TransportResponse};
use crate::streaming::{accumulate, LineSource};

const MAX_ERROR_BODY_CHARS: usize = 512;
// UTF-8 needs at most four bytes per char.
const MAX_ERROR_BODY_BYTES: usize = MAX_ERROR_BODY_CHARS * 4;
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    /// Bound on a single attempt, including reading the body.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub breaker: BreakerSettings,
    /// Applied beneath request headers; request headers win.
    pub default_headers: HashMap<String, String>,
}

impl ClientSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            breaker: BreakerSettings::default(),
            default_headers: HashMap::new(),
        }
    }
}

/// Where the retry loop stands for one logical call.
#[derive(Debug)]
enum RetryState {
    Attempting { attempt: u32 },
    Success(Response),
    PermanentFailure(ClientError),
    BudgetExhausted(ClientError),
    Interrupted(ClientError),
}

enum AttemptError {
    Transport(TransportError),
    Stream(StreamError),
}

impl From<TransportError> for AttemptError {
    fn from(err: TransportError) -> Self {
        AttemptError::Transport(err)
    }
}

/// Executes requests against one logical target with retries and a circuit breaker.
pub struct ResilientClient {
    target: String,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    default_headers: HashMap<String, String>,
    transport: Arc<dyn Transport>,
    breaker: CircuitBreaker,
    metrics: ClientMetrics,
}

impl ResilientClient {
    pub fn new(target: impl Into<String>, settings: ClientSettings) -> Result<Self> {
        let transport = HttpTransport::new(settings.timeout.min(MAX_CONNECT_TIMEOUT))?;
        Ok(Self::with_transport(target, settings, Arc::new(transport)))
    }

    pub fn with_transport(
        target: impl Into<String>,
        settings: ClientSettings,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let target = target.into();
        let default_headers = settings
            .default_headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();

        Self {
            breaker: CircuitBreaker::new(target.clone(), settings.breaker),
            target,
            base_url: settings.base_url,
            timeout: settings.timeout,
            retry: settings.retry.covering_attempts(settings.timeout),
            default_headers,
            transport,
            metrics: ClientMetrics::new(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Runs one logical request: breaker gate, retry loop, optional stream accumulation.
    ///
    /// The breaker sees one outcome per call, however many attempts it took.
    pub async fn execute_request(
        &self,
        ctx: &CallContext,
        request: Request,
    ) -> Result<Response, ClientError> {
        let request_id = Uuid::new_v4();
        let prepared = self.prepare(&request)?;
        let streaming = request.is_streaming();

        if let Some(interrupt) = ctx.check() {
            return Err(self.interrupt_error(interrupt, 0));
        }

        debug!(
            "{} [{}]: {} {} (streaming: {})",
            self.target, request_id, prepared.method, prepared.url, streaming
        );

        let started = Instant::now();
        let result = self
            .breaker
            .call_with(
                self.run_attempts(ctx, &prepared, streaming, request_id),
                ClientError::counts_against_circuit,
            )
            .await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &result {
            Ok(response) => {
                info!(
                    "{} [{}]: {} {} -> {} after {} attempt(s) in {}ms",
                    self.target,
                    request_id,
                    prepared.method,
                    prepared.url,
                    response.status(),
                    response.attempts(),
                    elapsed_ms
                );
                self.metrics
                    .record_call(true, response.attempts(), elapsed_ms)
                    .await;
            }
            Err(ClientError::CircuitOpen { .. }) => {
                warn!(
                    "{} [{}]: rejected, circuit open",
                    self.target, request_id
                );
                self.metrics.record_rejection().await;
            }
            Err(e) => {
                error!("{} [{}]: {}", self.target, request_id, e);
                self.metrics.record_call(false, e.attempts(), elapsed_ms).await;
            }
        }

        result
    }

    fn prepare(&self, request: &Request) -> Result<PreparedRequest, ClientError> {
        let url = resolve_url(&self.base_url, request.url())?;

        let mut headers = self.default_headers.clone();
        headers.extend(
            request
                .headers()
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );

        Ok(PreparedRequest {
            method: request.method().clone(),
            url,
            headers,
            body: request.body().map(<[u8]>::to_vec),
        })
    }

    async fn run_attempts(
        &self,
        ctx: &CallContext,
        prepared: &PreparedRequest,
        streaming: bool,
        request_id: Uuid,
    ) -> Result<Response, ClientError> {
        let mut backoff = Backoff::new(self.retry.clone());
        let mut state = RetryState::Attempting { attempt: 1 };

        loop {
            state = match state {
                RetryState::Attempting { attempt } => {
                    self.step(ctx, prepared, streaming, &mut backoff, attempt, request_id)
                        .await
                }
                RetryState::Success(response) => return Ok(response),
                RetryState::PermanentFailure(err)
                | RetryState::BudgetExhausted(err)
                | RetryState::Interrupted(err) => return Err(err),
            };
        }
    }

    async fn step(
        &self,
        ctx: &CallContext,
        prepared: &PreparedRequest,
        streaming: bool,
        backoff: &mut Backoff,
        attempt: u32,
        request_id: Uuid,
    ) -> RetryState {
        let outcome = tokio::select! {
            biased;
            interrupt = ctx.interrupted() => {
                return RetryState::Interrupted(self.interrupt_error(interrupt, attempt));
            }
            outcome = self.attempt(prepared, streaming) => outcome,
        };

        let error = match outcome {
            Ok((status, body)) => {
                return RetryState::Success(Response::new(status, body, attempt));
            }
            Err(AttemptError::Stream(source)) => {
                return RetryState::PermanentFailure(ClientError::Stream {
                    target: self.target.clone(),
                    attempts: attempt,
                    source,
                });
            }
            Err(AttemptError::Transport(error)) => error,
        };

        if !classifier::is_transient(&error) {
            return RetryState::PermanentFailure(ClientError::Transport {
                target: self.target.clone(),
                attempts: attempt,
                source: error,
            });
        }

        let Some(delay) = backoff.next_delay() else {
            return RetryState::BudgetExhausted(ClientError::RetriesExhausted {
                target: self.target.clone(),
                attempts: attempt,
                source: error,
            });
        };

        warn!(
            "{} [{}]: attempt {} failed ({}), retrying in {:?}",
            self.target, request_id, attempt, error, delay
        );

        tokio::select! {
            biased;
            interrupt = ctx.interrupted() => {
                RetryState::Interrupted(self.interrupt_error(interrupt, attempt))
            }
            () = tokio::time::sleep(delay) => RetryState::Attempting { attempt: attempt + 1 },
        }
    }

    /// One round trip. Every await runs under the same per-attempt deadline, so a
    /// stall after increments surfaces as an interrupted stream, not a timeout.
    async fn attempt(
        &self,
        prepared: &PreparedRequest,
        streaming: bool,
    ) -> Result<(u16, Vec<u8>), AttemptError> {
        let deadline = Instant::now() + self.timeout;
        let response = tokio::time::timeout_at(deadline, self.transport.send(prepared))
            .await
            .map_err(|_| self.attempt_timeout())??;
        let status = response.status;

        if !response.is_success() {
            return Err(status_error(response, deadline).await.into());
        }

        if streaming {
            let mut lines = LineSource::new(response.body).with_deadline(deadline, self.timeout);
            let text = accumulate(&mut lines).await.map_err(|e| match e {
                StreamError::Read(source) => AttemptError::Transport(source),
                interrupted => AttemptError::Stream(interrupted),
            })?;
            Ok((status, text.into_bytes()))
        } else {
            let body = tokio::time::timeout_at(deadline, response.read_all())
                .await
                .map_err(|_| self.attempt_timeout())??;
            Ok((status, body))
        }
    }

    fn attempt_timeout(&self) -> TransportError {
        TransportError::AttemptTimeout(self.timeout)
    }

    fn interrupt_error(&self, interrupt: Interrupt, attempts: u32) -> ClientError {
        let target = self.target.clone();
        match interrupt {
            Interrupt::Cancelled => ClientError::Cancelled { target, attempts },
            Interrupt::DeadlineExceeded => ClientError::DeadlineExceeded { target, attempts },
        }
    }
}

/// Reads at most enough of an error body for the excerpt. A body that cannot be
/// read in full still yields whatever arrived before the failure.
async fn status_error(mut response: TransportResponse, deadline: Instant) -> TransportError {
    let status = response.status;
    let mut body = Vec::new();

    while body.len() < MAX_ERROR_BODY_BYTES {
        match tokio::time::timeout_at(deadline, response.body.next()).await {
            Ok(Some(Ok(chunk))) => body.extend_from_slice(&chunk),
            Ok(Some(Err(e))) => {
                debug!("Error body for status {} cut short: {}", status, e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                debug!("Error body for status {} not complete by deadline", status);
                break;
            }
        }
    }

    let excerpt: String = String::from_utf8_lossy(&body)
        .chars()
        .take(MAX_ERROR_BODY_CHARS)
        .collect();
    TransportError::Status {
        status,
        body: excerpt,
    }
}

fn is_absolute(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Absolute URLs pass through verbatim; relative ones are joined to `base`
/// with exactly one separating slash.
pub fn resolve_url(base: &str, url: &str) -> Result<String, ClientError> {
    if is_absolute(url) {
        Url::parse(url)
            .map_err(|e| ClientError::InvalidRequest(format!("Invalid URL {url}: {e}")))?;
        return Ok(url.to_string());
    }

    let base = base.trim();
    if base.is_empty() {
        return Err(ClientError::InvalidRequest(format!(
            "Relative URL {url} requires a configured base URL"
        )));
    }

    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        url.trim_start_matches('/')
    );
    Url::parse(&joined)
        .map_err(|e| ClientError::InvalidRequest(format!("Invalid URL {joined}: {e}")))?;
    Ok(joined)
}
