use serde::Deserialize;

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    OpenAi(OpenAiProviderConfig),
}

pub const OPENAI_DEFAULT_HOST: &str = "https://api.openai.com";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiProviderConfig {
    #[serde(default = "default_openai_host")]
    pub host: String,
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
}

fn default_openai_host() -> String {
    OPENAI_DEFAULT_HOST.to_string()
}

fn default_openai_model() -> String {
    OPENAI_DEFAULT_MODEL.to_string()
}
