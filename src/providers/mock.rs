//! Deterministic provider for tests: scripted outcomes, optional latency, call counting.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::ResearchProvider;
use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub enum MockOutcome {
    Ok(String),
    Err(ProviderError),
    /// Never resolves; exercises timeouts and cancellation.
    Hang,
}

pub struct MockProvider {
    name: String,
    script: Mutex<VecDeque<MockOutcome>>,
    fallback: MockOutcome,
    latency: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    /// Always succeeds with `"<name> findings"`.
    pub fn new(name: &str) -> Self {
        Self::always(name, MockOutcome::Ok(format!("{name} findings")))
    }

    pub fn always(name: &str, outcome: MockOutcome) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: outcome,
            latency: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Play `script` in order, then repeat `fallback`.
    pub fn with_script(mut self, script: impl IntoIterator<Item = MockOutcome>) -> Self {
        self.script = Mutex::new(script.into_iter().collect());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .last()
            .cloned()
    }
}

#[async_trait]
impl ResearchProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, prompt: &str, _category: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(prompt.to_string());

        let outcome = self
            .script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }

        match outcome {
            MockOutcome::Ok(s) => Ok(s),
            MockOutcome::Err(e) => Err(e),
            MockOutcome::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_then_fallback() {
        let p = MockProvider::new("m").with_script([MockOutcome::Err(ProviderError::Timeout)]);
        assert_eq!(p.call("q", "c").await, Err(ProviderError::Timeout));
        assert_eq!(p.call("q2", "c").await, Ok("m findings".to_string()));
        assert_eq!(p.calls(), 2);
        assert_eq!(p.last_prompt().as_deref(), Some("q2"));
    }
}
