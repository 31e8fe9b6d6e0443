use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

use crate::resilience::errors::ClientError;

/// One logical call to an external provider. Immutable once built.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: String,
    headers: HashMap<String, String>,
    body: Option<Vec<u8>>,
    streaming: bool,
}

impl Request {
    pub fn builder(method: &str, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            method: method.to_string(),
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            streaming: false,
            error: None,
        }
    }

    pub fn get(url: impl Into<String>) -> RequestBuilder {
        Self::builder("GET", url)
    }

    pub fn post(url: impl Into<String>) -> RequestBuilder {
        Self::builder("POST", url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Absolute URL, or a path relative to the client's base URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Header names are stored lowercased.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }
}

#[derive(Debug)]
pub struct RequestBuilder {
    method: String,
    url: String,
    headers: HashMap<String, String>,
    body: Option<Vec<u8>>,
    streaming: bool,
    error: Option<String>,
}

impl RequestBuilder {
    #[must_use]
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn bearer_auth(self, token: &str) -> Self {
        self.header("authorization", format!("Bearer {token}"))
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.body = Some(bytes);
                self.header("content-type", "application/json")
            }
            Err(e) => {
                self.error = Some(format!("Failed to serialize JSON body: {e}"));
                self
            }
        }
    }

    /// Treat the response as a `data:`-framed event stream.
    #[must_use]
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn build(self) -> Result<Request, ClientError> {
        if let Some(error) = self.error {
            return Err(ClientError::InvalidRequest(error));
        }

        let method = Method::from_bytes(self.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|e| ClientError::InvalidRequest(format!("Invalid method {:?}: {e}", self.method)))?;

        let url = self.url.trim().to_string();
        if url.is_empty() || url.chars().any(char::is_whitespace) {
            return Err(ClientError::InvalidRequest(format!(
                "Invalid URL {:?}",
                self.url
            )));
        }

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ClientError::InvalidRequest(format!("Invalid header name {name:?}: {e}"))
            })?;
            HeaderValue::from_str(value).map_err(|e| {
                ClientError::InvalidRequest(format!("Invalid value for header {name}: {e}"))
            })?;
        }

        Ok(Request {
            method,
            url,
            headers: self.headers,
            body: self.body,
            streaming: self.streaming,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    body: Vec<u8>,
    attempts: u32,
}

impl Response {
    pub fn new(status: u16, body: Vec<u8>, attempts: u32) -> Self {
        Self {
            status,
            body,
            attempts,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// For streaming requests, the accumulated text.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}
