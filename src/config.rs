//! Environment-backed client configuration.
//!
//! Only the OpenRouter client needs any of this; the missing-key check is
//! deferred to client construction so offline runs need no environment.

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Runtime settings for the network client
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// OpenRouter API key, if present in the environment
    pub api_key: Option<String>,
    /// Chat completions endpoint
    pub base_url: String,
    /// Model used when the run does not name one
    pub default_model: String,
    /// Optional OpenRouter ranking header (`HTTP-Referer`)
    pub site_url: Option<String>,
    /// Optional OpenRouter ranking header (`X-Title`)
    pub site_title: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            site_url: None,
            site_title: None,
        }
    }
}

impl ClientSettings {
    /// Read settings from the environment, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("OPENROUTER_API_KEY").ok(),
            base_url: std::env::var("OPENROUTER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            default_model: std::env::var("MODEL_NAME")
                .unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            site_url: std::env::var("OPENROUTER_HTTP_REFERER").ok(),
            site_title: std::env::var("OPENROUTER_X_TITLE").ok(),
        }
    }
}
