use crate::config::AppConfig;
use crate::services::providers::ProviderRegistry;
use anyhow::Result;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ProviderRegistry>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let registry = ProviderRegistry::from_config(&config)?;
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
        })
    }
}
