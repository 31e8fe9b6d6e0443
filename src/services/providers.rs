use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::services::client::ResilientClient;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Llm,
    Ocr,
    Search,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Llm, Provider::Ocr, Provider::Search];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Llm => "llm",
            Provider::Ocr => "ocr",
            Provider::Search => "search",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown provider '{0}' (expected one of: llm, ocr, search)")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "llm" => Ok(Provider::Llm),
            "ocr" => Ok(Provider::Ocr),
            "search" => Ok(Provider::Search),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

/// One resilient client per logical target, so each has its own breaker.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<Provider, Arc<ResilientClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut registry = Self::new();

        for provider in Provider::ALL {
            let provider_config = config.provider(provider);
            let client = ResilientClient::new(provider.as_str(), provider_config.client_settings())
                .with_context(|| format!("Failed to build client for provider {}", provider))?;
            info!(
                "Registered provider {} -> {} (timeout {}s, {} retries)",
                provider,
                provider_config.base_url,
                provider_config.timeout_secs,
                provider_config.retry.max_retries
            );
            registry.register(provider, client);
        }

        Ok(registry)
    }

    pub fn register(&mut self, provider: Provider, client: ResilientClient) {
        self.providers.insert(provider, Arc::new(client));
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<ResilientClient>> {
        self.providers.get(&provider).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<ResilientClient>> {
        name.parse().ok().and_then(|provider| self.get(provider))
    }

    /// Registered providers in declaration order.
    pub fn list_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.providers.contains_key(p))
            .collect()
    }
}
