//! Provider-backed analyzer with heuristic fallback.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{normalize_text, Analysis, AnalysisSource, ContentAnalyzer, HeuristicAnalyzer};
use crate::error::{AnalysisError, ProviderError};
use crate::providers::{prompt, DynProvider};

#[derive(Debug, Deserialize)]
struct Verdict {
    should_research: bool,
    confidence: f64,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

pub struct AiAnalyzer {
    provider: DynProvider,
    fallback: HeuristicAnalyzer,
    timeout: Duration,
}

impl AiAnalyzer {
    pub fn new(provider: DynProvider, timeout: Duration) -> Self {
        Self {
            provider,
            fallback: HeuristicAnalyzer::new(),
            timeout,
        }
    }

    async fn ask(&self, text: &str) -> Result<Analysis, AnalysisError> {
        let prompt = prompt::analysis_prompt(text);
        let raw = tokio::time::timeout(self.timeout, self.provider.call(&prompt, "analysis"))
            .await
            .map_err(|_| ProviderError::Timeout)??;
        parse_verdict(&raw)
    }
}

/// Pull the JSON object out of a reply that may wrap it in a code fence or prose.
fn extract_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim());
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

pub(crate) fn parse_verdict(raw: &str) -> Result<Analysis, AnalysisError> {
    let json = extract_json(raw)
        .ok_or_else(|| AnalysisError::Malformed("no JSON object in reply".into()))?;
    let v: Verdict =
        serde_json::from_str(json).map_err(|e| AnalysisError::Malformed(e.to_string()))?;
    if !v.confidence.is_finite() || !(0.0..=1.0).contains(&v.confidence) {
        return Err(AnalysisError::Malformed(format!(
            "confidence out of range: {}",
            v.confidence
        )));
    }

    // The gate wants research-worthiness, not certainty of the verdict.
    let score = if v.should_research {
        v.confidence
    } else {
        1.0 - v.confidence
    };

    Ok(Analysis {
        confidence: score,
        category: v
            .category
            .filter(|c| !c.trim().is_empty())
            .map(|c| c.trim().to_lowercase())
            .unwrap_or_else(|| "general".to_string()),
        rationale: v.reasoning.unwrap_or_else(|| "ai verdict".to_string()),
        source: AnalysisSource::Ai,
    })
}

#[async_trait]
impl ContentAnalyzer for AiAnalyzer {
    async fn analyze(&self, body: &str) -> Analysis {
        let text = normalize_text(body);
        // Too-short notes never reach the provider.
        let quick = self.fallback.score(&text);
        if quick.category == "none" {
            return quick;
        }

        match self.ask(&text).await {
            Ok(a) => {
                debug!(provider = self.provider.name(), confidence = a.confidence, category = %a.category, "ai analysis");
                a
            }
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "ai analysis failed; using heuristic");
                quick
            }
        }
    }

    fn name(&self) -> &'static str {
        "ai"
    }
}
