// src/config/providers.rs
use serde::{Deserialize, Serialize};

use crate::providers::ProviderKind;

fn default_api_key() -> String {
    "ENV".to_string()
}

fn default_max_tokens() -> u32 {
    1500
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Defaults to the kind ("openai" / "claude"); must be unique.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// "ENV" means: read OPENAI_API_KEY / ANTHROPIC_API_KEY (by kind).
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            name: None,
            model: None,
            api_key: default_api_key(),
            max_tokens: default_max_tokens(),
        }
    }

    pub fn display_name(&self) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(self.kind.as_str())
            .to_string()
    }

    pub fn model_or_default(&self) -> String {
        self.model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.kind.default_model().to_string())
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(|k| std::env::var(k).ok())
    }

    /// Resolve with a custom env lookup; `None` if the key is empty or missing.
    pub fn resolve_api_key_with<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = self.api_key.trim();
        let key = if raw.eq_ignore_ascii_case("env") {
            lookup(self.kind.key_env())?
        } else {
            raw.to_string()
        };
        let key = key.trim().to_string();
        (!key.is_empty()).then_some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_key_resolution_by_kind() {
        let cfg = ProviderConfig::new(ProviderKind::Claude);
        let key = cfg.resolve_api_key_with(|k| (k == "ANTHROPIC_API_KEY").then(|| "sk-ant".to_string()));
        assert_eq!(key.as_deref(), Some("sk-ant"));

        let openai = ProviderConfig::new(ProviderKind::OpenAi);
        assert_eq!(openai.resolve_api_key_with(|_| None), None);
        assert_eq!(openai.resolve_api_key_with(|_| Some("  ".into())), None);
    }

    #[test]
    fn literal_key_and_names() {
        let mut cfg = ProviderConfig::new(ProviderKind::OpenAi);
        cfg.api_key = "sk-literal".into();
        assert_eq!(cfg.resolve_api_key_with(|_| None).as_deref(), Some("sk-literal"));
        assert_eq!(cfg.display_name(), "openai");
        cfg.name = Some("openai-mini".into());
        assert_eq!(cfg.display_name(), "openai-mini");
        assert_eq!(cfg.model_or_default(), "gpt-4o-mini");
    }
}
