//! OpenAI chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{classify_status, classify_transport, prompt, ResearchProvider};
use crate::error::ProviderError;

const ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiProvider {
    name: String,
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(
        name: &str,
        api_key: String,
        model: String,
        max_tokens: u32,
    ) -> Result<Self, ProviderError> {
        // No client-level total timeout: the fan-out bounds each attempt.
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
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ResearchProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, prompt_text: &str, category: &str) -> Result<String, ProviderError> {
        let system = prompt::system_prompt(category);
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &system,
                },
                Msg {
                    role: "user",
                    content: prompt_text,
                },
            ],
            temperature: 0.3,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .http
            .post(ENDPOINT)
            .bearer_auth(&self.api_key)
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
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(ProviderError::Other("empty completion".into()));
        }
        debug!(provider = %self.name, chars = content.len(), "openai completion received");
        Ok(content)
    }
}
