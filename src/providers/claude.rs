//! Anthropic messages API client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{classify_status, classify_transport, prompt, ResearchProvider};
use crate::error::ProviderError;

const ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct ClaudeProvider {
    name: String,
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeProvider {
    pub fn new(
        name: &str,
        api_key: String,
        model: String,
        max_tokens: u32,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("notes-research-bot/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Other(format!("http client: {e}")))?;
        Ok(Self {
            name: name.to_string(),
            http,
            api_key,
            model,
            max_tokens,
        })
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Msg<'a>>,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    content: Vec<Block>,
}

#[derive(Deserialize)]
struct Block {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl ResearchProvider for ClaudeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, prompt_text: &str, category: &str) -> Result<String, ProviderError> {
        let system = prompt::system_prompt(category);
        let req = Req {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: &system,
            messages: vec![Msg {
                role: "user",
                content: prompt_text,
            }],
        };

        let resp = self
            .http
            .post(ENDPOINT)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&req)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: Resp = resp.json().await.map_err(|e| classify_transport(&e))?;
        let content = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        if content.is_empty() {
            return Err(ProviderError::Other("empty message content".into()));
        }
        debug!(provider = %self.name, chars = content.len(), "claude message received");
        Ok(content)
    }
}
