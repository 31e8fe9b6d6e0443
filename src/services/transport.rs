use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::time::Duration;

use crate::resilience::classifier;
use crate::resilience::errors::TransportError;
use crate::streaming::ByteStream;

const USER_AGENT: &str = concat!("analysis-bridge/", env!("CARGO_PKG_VERSION"));

/// A request after URL resolution and header merging, ready for the wire.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

pub struct TransportResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl TransportResponse {
    pub fn new(status: u16, body: ByteStream) -> Self {
        Self { status, body }
    }

    /// A response whose body is already fully in memory.
    pub fn from_bytes(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let chunk: Result<Vec<u8>, TransportError> = Ok(body.into());
        Self::new(status, Box::pin(stream::iter(vec![chunk])))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub async fn read_all(mut self) -> Result<Vec<u8>, TransportError> {
        let mut body = Vec::new();
        while let Some(chunk) = self.body.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(body)
    }
}

/// One HTTP(S) round trip. Implementations must not retry on their own.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &PreparedRequest) -> Result<TransportResponse, TransportError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Per-attempt timeouts are enforced by the caller; only connecting is bounded here.
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &PreparedRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classifier::from_reqwest(&e))?;

        let status = response.status().as_u16();
        let body = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| classifier::from_reqwest(&e))
        });

        Ok(TransportResponse::new(status, Box::pin(body)))
    }
}
