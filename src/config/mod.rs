use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use validator::Validate;

use crate::resilience::backoff::RetryPolicy;
use crate::resilience::circuit_breaker::BreakerSettings;
use crate::services::client::ClientSettings;
use crate::services::providers::Provider;

const DEFAULT_INITIAL_INTERVAL_MS: u64 = 500;
const DEFAULT_MAX_INTERVAL_MS: u64 = 10_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_BREAKER_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct LogConfig {
    #[validate(length(min = 1))]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct RetryConfig {
    #[validate(range(min = 1))]
    pub initial_interval_ms: u64,
    #[validate(range(min = 1))]
    pub max_interval_ms: u64,
    pub max_retries: u32,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Overrides the derived `max_retries * max_interval` budget.
    #[serde(default)]
    pub max_elapsed_ms: Option<u64>,
}

fn default_multiplier() -> f64 {
    DEFAULT_MULTIPLIER
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: DEFAULT_INITIAL_INTERVAL_MS,
            max_interval_ms: DEFAULT_MAX_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            multiplier: DEFAULT_MULTIPLIER,
            max_elapsed_ms: None,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let policy = RetryPolicy::new(
            Duration::from_millis(config.initial_interval_ms),
            Duration::from_millis(config.max_interval_ms),
            config.max_retries,
        )
        .with_multiplier(config.multiplier);

        match config.max_elapsed_ms {
            Some(ms) => policy.with_max_elapsed(Duration::from_millis(ms)),
            None => policy,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct CircuitBreakerConfig {
    #[validate(range(min = 1))]
    pub failure_threshold: u32,
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
    #[validate(range(min = 1))]
    pub success_threshold: u32,
    #[validate(range(min = 1))]
    pub half_open_max_probes: u32,
    /// Closed-state counting interval; 0 keeps counts until the next transition.
    #[serde(default)]
    pub interval_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            timeout_secs: DEFAULT_BREAKER_TIMEOUT_SECS,
            success_threshold: 1,
            half_open_max_probes: 1,
            interval_secs: 0,
        }
    }
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            timeout: Duration::from_secs(config.timeout_secs),
            success_threshold: config.success_threshold,
            half_open_max_probes: config.half_open_max_probes,
            interval: (config.interval_secs > 0).then(|| Duration::from_secs(config.interval_secs)),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct ProviderConfig {
    #[validate(length(min = 1))]
    pub base_url: String,
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
    #[serde(default)]
    pub api_key: Option<String>,
    #[validate(nested)]
    #[serde(default)]
    pub retry: RetryConfig,
    #[validate(nested)]
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs,
            api_key: None,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    /// An API key, when present, becomes a default bearer `Authorization` header.
    pub fn client_settings(&self) -> ClientSettings {
        let mut default_headers = HashMap::new();
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            default_headers.insert("authorization".to_string(), format!("Bearer {}", key));
        }

        ClientSettings {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            retry: RetryPolicy::from(&self.retry),
            breaker: BreakerSettings::from(&self.circuit_breaker),
            default_headers,
        }
    }

    fn check(&self, section: &str) -> Result<(), ConfigError> {
        if self.retry.initial_interval_ms > self.retry.max_interval_ms {
            return Err(ConfigError::Message(format!(
                "{}.retry.initial_interval_ms ({}) must not exceed {}.retry.max_interval_ms ({})",
                section, self.retry.initial_interval_ms, section, self.retry.max_interval_ms
            )));
        }

        RetryPolicy::from(&self.retry)
            .validate()
            .map_err(|e| ConfigError::Message(format!("{}.retry: {}", section, e)))
    }
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub log: LogConfig,
    #[validate(nested)]
    pub llm: ProviderConfig,
    #[validate(nested)]
    pub ocr: ProviderConfig,
    #[validate(nested)]
    pub search: ProviderConfig,
}

fn parse_integer(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.trim().parse::<i64>().map_err(|e| {
        ConfigError::Message(format!(
            "Invalid value '{}' for {}: {}. Expected an integer.",
            value, key, e
        ))
    })
}

fn provider_defaults(
    builder: ConfigBuilder<DefaultState>,
    section: &str,
    base_url: &str,
    timeout_secs: u64,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let retry = RetryConfig::default();
    let breaker = CircuitBreakerConfig::default();

    builder
        .set_default(format!("{section}.base_url"), base_url)?
        .set_default(format!("{section}.timeout_secs"), timeout_secs)?
        .set_default(
            format!("{section}.retry.initial_interval_ms"),
            retry.initial_interval_ms,
        )?
        .set_default(
            format!("{section}.retry.max_interval_ms"),
            retry.max_interval_ms,
        )?
        .set_default(
            format!("{section}.retry.max_retries"),
            i64::from(retry.max_retries),
        )?
        .set_default(format!("{section}.retry.multiplier"), retry.multiplier)?
        .set_default(
            format!("{section}.circuit_breaker.failure_threshold"),
            i64::from(breaker.failure_threshold),
        )?
        .set_default(
            format!("{section}.circuit_breaker.timeout_secs"),
            breaker.timeout_secs,
        )?
        .set_default(
            format!("{section}.circuit_breaker.success_threshold"),
            i64::from(breaker.success_threshold),
        )?
        .set_default(
            format!("{section}.circuit_breaker.half_open_max_probes"),
            i64::from(breaker.half_open_max_probes),
        )?
        .set_default(
            format!("{section}.circuit_breaker.interval_secs"),
            breaker.interval_secs,
        )
}

fn provider_overrides(
    builder: ConfigBuilder<DefaultState>,
    section: &str,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let prefix = format!("APP_{}__", section.to_uppercase());
    let var = |name: &str| env::var(format!("{prefix}{name}")).ok();

    builder
        .set_override_option(format!("{section}.base_url"), var("BASE_URL"))?
        .set_override_option(
            format!("{section}.timeout_secs"),
            var("TIMEOUT_SECS")
                .map(|v| parse_integer(&format!("{section}.timeout_secs"), &v))
                .transpose()?,
        )?
        .set_override_option(
            format!("{section}.api_key"),
            env::var(format!("{}_API_KEY", section.to_uppercase())).ok(),
        )
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder()
            .set_default("log.level", "info")?
            .set_default("log.format", "pretty")?;
        builder = provider_defaults(builder, "llm", "https://api.openai.com/v1", 120)?;
        builder = provider_defaults(builder, "ocr", "https://api.mistral.ai/v1", 60)?;
        builder = provider_defaults(builder, "search", "https://api.tavily.com", 30)?;

        builder = builder.add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder = builder
            .set_override_option("log.level", env::var("APP_LOG__LEVEL").ok())?
            .set_override_option("log.format", env::var("APP_LOG__FORMAT").ok())?;
        for provider in Provider::ALL {
            builder = provider_overrides(builder, provider.as_str())?;
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.check()?;
        Ok(config)
    }

    /// Field validation plus the cross-field rules `validator` cannot express.
    pub fn check(&self) -> Result<(), ConfigError> {
        if let Err(e) = self.validate() {
            return Err(ConfigError::Message(format!("Validation error: {}", e)));
        }

        if !matches!(self.log.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Message(format!(
                "log.format must be 'pretty' or 'json', got '{}'",
                self.log.format
            )));
        }

        for provider in Provider::ALL {
            self.provider(provider).check(provider.as_str())?;
        }

        Ok(())
    }

    pub fn provider(&self, provider: Provider) -> &ProviderConfig {
        match provider {
            Provider::Llm => &self.llm,
            Provider::Ocr => &self.ocr,
            Provider::Search => &self.search,
        }
    }
}
