//! Provider selection for the chat model

use super::{GeminiService, LlmError, LlmService, LoggingService, OpenAIService};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Supported model providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    #[default]
    Gemini,
    OpenAI,
}

impl Provider {
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Gemini => "Gemini",
            Provider::OpenAI => "OpenAI",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-2.0-flash",
            Provider::OpenAI => "gpt-4o-mini",
        }
    }

    /// Environment variables consulted for the API key, in priority order
    pub fn api_key_env_vars(self) -> &'static [&'static str] {
        match self {
            Provider::Gemini => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
            Provider::OpenAI => &["OPENAI_API_KEY"],
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::OpenAI),
            other => Err(format!("unknown provider '{other}' (expected gemini or openai)")),
        }
    }
}

/// Configuration for the model client
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: Option<String>,
    /// Override for the provider's API base URL
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: Provider::default().default_model().to_string(),
            api_key: None,
            base_url: None,
            timeout: Duration::from_secs(120),
        }
    }
}

impl LlmConfig {
    /// Build from an arbitrary variable source (the process environment in production)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let provider = match lookup("THREADCHAT_PROVIDER") {
            Some(value) => value.parse()?,
            None => Provider::default(),
        };

        let model = lookup("THREADCHAT_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| provider.default_model().to_string());

        let api_key = provider
            .api_key_env_vars()
            .iter()
            .find_map(|var| lookup(var).filter(|key| !key.is_empty()));

        let timeout = match lookup("THREADCHAT_REQUEST_TIMEOUT_SECS") {
            Some(value) => Duration::from_secs(
                value
                    .parse()
                    .map_err(|_| format!("invalid THREADCHAT_REQUEST_TIMEOUT_SECS: {value}"))?,
            ),
            None => LlmConfig::default().timeout,
        };

        Ok(Self {
            provider,
            model,
            api_key,
            base_url: lookup("LLM_BASE_URL").filter(|u| !u.is_empty()),
            timeout,
        })
    }
}

/// Create the configured model client, wrapped with request logging.
///
/// A missing API key still yields a client; every call then fails with an
/// auth error that the UI can show.
pub fn create_service(config: &LlmConfig) -> Result<Arc<dyn LlmService>, LlmError> {
    let api_key = config.api_key.clone().unwrap_or_default();
    let base_url = config.base_url.as_deref();

    let service: Arc<dyn LlmService> = match config.provider {
        Provider::Gemini => Arc::new(GeminiService::new(
            api_key,
            config.model.clone(),
            base_url,
            config.timeout,
        )?),
        Provider::OpenAI => Arc::new(OpenAIService::new(
            api_key,
            config.model.clone(),
            base_url,
            config.timeout,
        )?),
    };

    Ok(Arc::new(LoggingService::new(service)))
}
