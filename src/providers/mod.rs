//! Research providers: one capability trait, a closed set of real clients, and a
//! scripted mock for tests.

pub mod claude;
pub mod mock;
pub mod openai;
pub mod prompt;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ProviderConfig;
use crate::error::ProviderError;

pub use claude::ClaudeProvider;
pub use mock::{MockOutcome, MockProvider};
pub use openai::OpenAiProvider;

#[async_trait]
pub trait ResearchProvider: Send + Sync + 'static {
    /// Unique name; keys the fan-out result map and the breaker registry.
    fn name(&self) -> &str;
    async fn call(&self, prompt: &str, category: &str) -> Result<String, ProviderError>;
}

pub type DynProvider = Arc<dyn ResearchProvider>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(alias = "open_ai", alias = "OpenAI")]
    OpenAi,
    #[serde(alias = "anthropic")]
    Claude,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Claude => "claude",
        }
    }

    pub fn key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Claude => "ANTHROPIC_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Claude => "claude-3-5-sonnet-latest",
        }
    }
}

/// Build clients for every provider whose API key resolves. Providers without
/// a key are skipped with a warning; an empty result is the caller's call.
pub fn build_providers(configs: &[ProviderConfig]) -> Vec<DynProvider> {
    let mut out: Vec<DynProvider> = Vec::new();
    for cfg in configs {
        let name = cfg.display_name();
        let Some(key) = cfg.resolve_api_key() else {
            warn!(provider = %name, env = cfg.kind.key_env(), "no API key; provider disabled");
            continue;
        };
        let model = cfg.model_or_default();
        let built: Result<DynProvider, ProviderError> = match cfg.kind {
            ProviderKind::OpenAi => {
                OpenAiProvider::new(&name, key, model, cfg.max_tokens).map(|p| Arc::new(p) as DynProvider)
            }
            ProviderKind::Claude => {
                ClaudeProvider::new(&name, key, model, cfg.max_tokens).map(|p| Arc::new(p) as DynProvider)
            }
        };
        match built {
            Ok(p) => {
                info!(provider = %name, kind = cfg.kind.as_str(), "provider enabled");
                out.push(p);
            }
            Err(e) => warn!(provider = %name, error = %e, "provider client build failed"),
        }
    }
    out
}

/// Map an HTTP status (non-success) to a provider error class.
pub fn classify_status(status: reqwest::StatusCode, detail: &str) -> ProviderError {
    let msg = format!("http {}: {}", status.as_u16(), truncate(detail, 200));
    match status.as_u16() {
        401 | 403 => ProviderError::Auth(msg),
        429 => ProviderError::RateLimit(msg),
        s if s >= 500 => ProviderError::Connection(msg),
        _ => ProviderError::Other(msg),
    }
}

/// Map a transport-level reqwest error.
pub fn classify_transport(e: &reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else if e.is_connect() || e.is_request() {
        ProviderError::Connection(e.to_string())
    } else if let Some(status) = e.status() {
        classify_status(status, &e.to_string())
    } else if e.is_decode() {
        ProviderError::Other(format!("bad response body: {e}"))
    } else {
        ProviderError::Connection(e.to_string())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max).collect();
        t.push('…');
        t
    }
}
