//! Content analysis: turns a note body into a research-worthiness score.
//!
//! Two analyzers ship in-crate: [`HeuristicAnalyzer`] (keyword scoring, no I/O)
//! and [`AiAnalyzer`] (asks a provider, falls back to the heuristic on any error).

pub mod ai;
pub mod heuristic;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub use ai::AiAnalyzer;
pub use heuristic::HeuristicAnalyzer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    Ai,
    Heuristic,
}

/// Analyzer verdict consumed by the admission gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    /// Research-worthiness in 0.0..=1.0.
    pub confidence: f64,
    pub category: String,
    pub rationale: String,
    pub source: AnalysisSource,
}

#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    /// Infallible: implementations handle their own failures.
    async fn analyze(&self, body: &str) -> Analysis;
    fn name(&self) -> &'static str;
}

/// Analyzer returning a fixed verdict. Handy for wiring tests.
#[derive(Debug, Clone)]
pub struct FixedAnalyzer {
    pub analysis: Analysis,
}

impl FixedAnalyzer {
    pub fn new(confidence: f64, category: &str) -> Self {
        Self {
            analysis: Analysis {
                confidence,
                category: category.to_string(),
                rationale: "fixed verdict".to_string(),
                source: AnalysisSource::Heuristic,
            },
        }
    }
}

#[async_trait]
impl ContentAnalyzer for FixedAnalyzer {
    async fn analyze(&self, _body: &str) -> Analysis {
        self.analysis.clone()
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

const MAX_NORMALIZED_CHARS: usize = 8000;

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Plain text view of a note body (bodies may be HTML).
///
/// Entities decoded, tags replaced by spaces, typographic quotes folded to ASCII,
/// whitespace collapsed. Question marks are kept since they carry signal.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s).to_string();
    let untagged = RE_TAGS.replace_all(&decoded, " ");
    let quoted = untagged
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    let collapsed = RE_WS.replace_all(&quoted, " ");
    let out = collapsed.trim();

    if out.chars().count() > MAX_NORMALIZED_CHARS {
        out.chars().take(MAX_NORMALIZED_CHARS).collect()
    } else {
        out.to_string()
    }
}
