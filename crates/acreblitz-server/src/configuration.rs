use crate::error::{to_env_var, ConfigError};
use acreblitz::cache::DEFAULT_CACHE_TTL;
use acreblitz::compact::{HistoryCompactor, DEFAULT_LARGE_PAYLOAD_FIELDS};
use acreblitz::providers::configs::{ProviderConfig, OPENAI_DEFAULT_HOST, OPENAI_DEFAULT_MODEL};
use acreblitz::retry::{
    RetryConfig, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_JITTER, DEFAULT_MAX_RETRIES,
};
use acreblitz::token_counter::{TokenAccountant, TokenCounter, DEFAULT_TOKEN_WARNING_THRESHOLD};
use acreblitz::weather::WeatherConfig;
use config::{Config, Environment};
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

// Environment key read as a comma separated list
const LARGE_PAYLOAD_FIELDS_KEY: &str = "pipeline.large_payload_fields";

// Required fields whose serde error names only the leaf
const REQUIRED_FIELDS: &[(&str, &str)] = &[("api_key", "provider.api_key")];

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Tuning for the chat pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub cache_ttl_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_jitter_ms: u64,
    pub token_warning_threshold: usize,
    /// Field names stripped from historical tool results; comma separated in the environment
    pub large_payload_fields: Vec<String>,
    pub tokenizer_path: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
            max_delay_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
            max_jitter_ms: DEFAULT_MAX_JITTER.as_millis() as u64,
            token_warning_threshold: DEFAULT_TOKEN_WARNING_THRESHOLD,
            large_payload_fields: DEFAULT_LARGE_PAYLOAD_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect(),
            tokenizer_path: None,
        }
    }
}

impl PipelineSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::default()
            .with_max_retries(self.max_retries)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_jitter(Duration::from_millis(self.max_jitter_ms))
    }

    pub fn compactor(&self) -> HistoryCompactor {
        HistoryCompactor::new(
            self.large_payload_fields
                .iter()
                .map(|field| field.trim())
                .filter(|field| !field.is_empty()),
        )
    }

    /// Token accountant using the configured tokenizer, falling back to cl100k
    pub fn accountant(&self) -> TokenAccountant {
        let counter = match &self.tokenizer_path {
            Some(path) => TokenCounter::from_file(path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to the built-in cl100k tokenizer");
                TokenCounter::new()
            }),
            None => TokenCounter::new(),
        };
        TokenAccountant::new(counter).with_warn_threshold(self.token_warning_threshold)
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub weather: WeatherConfig,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        // Start with default configuration
        let config = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Provider defaults
            .set_default("provider.type", "openai")?
            .set_default("provider.host", OPENAI_DEFAULT_HOST)?
            .set_default("provider.model", OPENAI_DEFAULT_MODEL)?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("ACREBLITZ")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key(LARGE_PAYLOAD_FIELDS_KEY),
            )
            .build()?;

        // Try to deserialize the configuration
        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        // Handle missing field errors specially
        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                if let Some(field) = missing_field_path(&err.to_string()) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

/// Dotted path of the field named by a "missing field `x`" error
fn missing_field_path(message: &str) -> Option<String> {
    let rest = message.strip_prefix("missing field `")?;
    let (field, rest) = rest.split_once('`')?;

    let parent = rest
        .split_once("for key `")
        .and_then(|(_, key)| key.split_once('`'))
        .map(|(key, _)| key)
        .filter(|key| !key.is_empty());

    Some(match parent {
        Some(parent) => format!("{}.{}", parent, field),
        None => REQUIRED_FIELDS
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, path)| path.to_string())
            .unwrap_or_else(|| field.to_string()),
    })
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("ACREBLITZ_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();
        env::set_var("ACREBLITZ_PROVIDER__API_KEY", "test-key");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 3000);

        let ProviderConfig::OpenAi(provider) = settings.provider;
        assert_eq!(provider.host, "https://api.openai.com");
        assert_eq!(provider.api_key, "test-key");
        assert_eq!(provider.model, "gpt-4o");
        assert_eq!(provider.temperature, None);
        assert_eq!(provider.max_tokens, None);

        assert_eq!(settings.pipeline.cache_ttl(), Duration::from_secs(300));
        assert_eq!(settings.pipeline.retry_config(), RetryConfig::default());
        assert_eq!(settings.pipeline.compactor().fields(), ["uiData".to_string()]);
        assert_eq!(settings.weather, WeatherConfig::default());

        clean_env();
    }

    #[test]
    #[serial]
    fn test_missing_api_key() {
        clean_env();

        match Settings::new() {
            Err(ConfigError::MissingEnvVar { env_var }) => {
                assert_eq!(env_var, "ACREBLITZ_PROVIDER__API_KEY");
            }
            other => panic!("Expected MissingEnvVar, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("ACREBLITZ_SERVER__PORT", "8080");
        env::set_var("ACREBLITZ_PROVIDER__API_KEY", "test-key");
        env::set_var("ACREBLITZ_PROVIDER__HOST", "https://llm.internal.example");
        env::set_var("ACREBLITZ_PROVIDER__MODEL", "gpt-4o-mini");
        env::set_var("ACREBLITZ_PROVIDER__TEMPERATURE", "0.8");
        env::set_var("ACREBLITZ_PIPELINE__CACHE_TTL_SECS", "60");
        env::set_var("ACREBLITZ_PIPELINE__MAX_RETRIES", "5");
        env::set_var("ACREBLITZ_PIPELINE__LARGE_PAYLOAD_FIELDS", "uiData, mapLayers");
        env::set_var("ACREBLITZ_WEATHER__USER_AGENT", "AcreBlitz Test");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.port, 8080);

        let ProviderConfig::OpenAi(provider) = settings.provider;
        assert_eq!(provider.host, "https://llm.internal.example");
        assert_eq!(provider.model, "gpt-4o-mini");
        assert_eq!(provider.temperature, Some(0.8));

        assert_eq!(settings.pipeline.cache_ttl(), Duration::from_secs(60));
        assert_eq!(settings.pipeline.retry_config().max_retries, 5);
        assert_eq!(
            settings.pipeline.compactor().fields(),
            ["uiData".to_string(), "mapLayers".to_string()]
        );
        assert_eq!(settings.weather.user_agent, "AcreBlitz Test");
        assert_eq!(settings.weather.host, "https://api.weather.gov");

        clean_env();
    }

    #[test]
    #[serial]
    fn test_single_large_payload_field() {
        clean_env();
        env::set_var("ACREBLITZ_PROVIDER__API_KEY", "test-key");
        env::set_var("ACREBLITZ_PIPELINE__LARGE_PAYLOAD_FIELDS", "mapLayers");
        env::set_var("ACREBLITZ_PIPELINE__MAX_RETRIES", "2");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.pipeline.large_payload_fields, vec!["mapLayers".to_string()]);
        assert_eq!(settings.pipeline.compactor().fields(), ["mapLayers".to_string()]);
        assert_eq!(settings.pipeline.max_retries, 2);

        clean_env();
    }

    #[test]
    fn test_missing_field_path() {
        assert_eq!(
            missing_field_path("missing field `api_key`"),
            Some("provider.api_key".to_string())
        );
        assert_eq!(
            missing_field_path("missing field `model` for key `provider`"),
            Some("provider.model".to_string())
        );
        assert_eq!(missing_field_path("invalid type: string"), None);
    }

    #[test]
    fn test_socket_addr_conversion() {
        let server_settings = ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 3000,
        };
        let addr = server_settings.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn test_missing_tokenizer_falls_back() {
        let settings = PipelineSettings {
            tokenizer_path: Some("/nonexistent/tokenizer.json".to_string()),
            ..PipelineSettings::default()
        };
        let accountant = settings.accountant();
        assert!(accountant.counter().has_tokenizer());
        assert_eq!(accountant.counter().count_tokens("hello world"), 2);
    }
}
