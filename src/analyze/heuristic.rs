//! Keyword heuristic used when no AI analyzer is available (or it fails).

use async_trait::async_trait;

use super::{normalize_text, Analysis, AnalysisSource, ContentAnalyzer};

const MIN_BODY_CHARS: usize = 10;

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "software",
        &[
            "python", "javascript", "rust", "api", "apis", "framework", "code", "programming",
            "database", "backend", "frontend", "deploy", "github", "repository",
        ],
    ),
    (
        "ai",
        &[
            "ai", "ml", "machine learning", "llm", "neural", "gpt", "claude", "deep learning",
            "nlp", "computer vision",
        ],
    ),
    (
        "building",
        &[
            "build", "construction", "materials", "diy", "deck", "renovation", "repair", "tools",
            "blueprint",
        ],
    ),
    (
        "lifestyle",
        &[
            "date", "restaurant", "activity", "weekend", "event", "entertainment", "travel",
            "food", "hobby",
        ],
    ),
    (
        "productivity",
        &[
            "productivity", "workflow", "efficiency", "todo", "task", "organize", "schedule",
            "time management", "focus",
        ],
    ),
    (
        "security",
        &[
            "security", "compliance", "risk", "audit", "governance", "privacy", "cybersecurity",
            "threat", "vulnerability", "encryption",
        ],
    ),
    (
        "business",
        &[
            "10k", "10-k", "financial", "revenue", "earnings", "ceo letter", "investor", "market",
            "strategy", "enterprise",
        ],
    ),
    (
        "technical",
        &[
            "infrastructure", "platform", "architecture", "devops", "cloud", "integration",
            "microservices", "dashboards", "parsers", "alerts",
        ],
    ),
    (
        "partnership",
        &[
            "partnership", "collaboration", "alliance", "customer", "client", "vendor",
            "supplier", "relationship", "sales",
        ],
    ),
];

const QUESTION_INDICATORS: &[&str] = &["?", "how to", "how do", "what is", "best", "should i", "need to"];
const RESEARCH_INDICATORS: &[&str] = &["research", "find out", "look up", "ideas for", "options for"];
const PERSONAL_INDICATORS: &[&str] = &[
    "reminder:",
    "todo:",
    "note to self:",
    "remember to",
    "call with",
    "talked to",
    "met with",
];

const BASE_SCORE: f64 = 0.2;
const QUESTION_BOOST: f64 = 0.5;
const RESEARCH_BOOST: f64 = 0.3;
const CATEGORY_HIT: f64 = 0.05;
const CATEGORY_CAP: f64 = 0.15;
const PERSONAL_PENALTY: f64 = 0.4;

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous scoring; the async trait impl just wraps this.
    pub fn score(&self, body: &str) -> Analysis {
        let text = normalize_text(body);
        if text.chars().count() < MIN_BODY_CHARS {
            return Analysis {
                confidence: 0.0,
                category: "none".to_string(),
                rationale: "note too short for meaningful research".to_string(),
                source: AnalysisSource::Heuristic,
            };
        }

        let lower = text.to_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !(c.is_alphanumeric() || c == '-'))
            .filter(|t| !t.is_empty())
            .collect();

        let (category, hits) = detect_category(&lower, &tokens);
        let question = QUESTION_INDICATORS.iter().any(|i| lower.contains(i));
        let research = RESEARCH_INDICATORS.iter().any(|i| lower.contains(i));
        let personal = PERSONAL_INDICATORS.iter().any(|i| lower.contains(i));

        let mut score = BASE_SCORE;
        let mut reasons = Vec::new();
        if question {
            score += QUESTION_BOOST;
            reasons.push("question");
        }
        if research {
            score += RESEARCH_BOOST;
            reasons.push("research request");
        }
        if hits > 0 {
            score += (hits as f64 * CATEGORY_HIT).min(CATEGORY_CAP);
            reasons.push("topic keywords");
        }
        if personal {
            score -= PERSONAL_PENALTY;
            reasons.push("personal note");
        }

        let rationale = if reasons.is_empty() {
            "heuristic: no research signal".to_string()
        } else {
            format!("heuristic: {}", reasons.join(", "))
        };

        Analysis {
            confidence: score.clamp(0.0, 1.0),
            category,
            rationale,
            source: AnalysisSource::Heuristic,
        }
    }
}

fn keyword_hit(keyword: &str, lower: &str, tokens: &[&str]) -> bool {
    if keyword.contains(' ') {
        lower.contains(keyword)
    } else {
        tokens.iter().any(|t| *t == keyword)
    }
}

/// Category with the most keyword hits; ties go to the earlier table entry.
fn detect_category(lower: &str, tokens: &[&str]) -> (String, usize) {
    let mut best: Option<(&str, usize)> = None;
    for (name, keywords) in CATEGORY_KEYWORDS {
        let hits = keywords
            .iter()
            .filter(|k| keyword_hit(k, lower, tokens))
            .count();
        if hits > 0 && best.map_or(true, |(_, b)| hits > b) {
            best = Some((*name, hits));
        }
    }
    match best {
        Some((name, hits)) => (name.to_string(), hits),
        None => ("general".to_string(), 0),
    }
}

#[async_trait]
impl ContentAnalyzer for HeuristicAnalyzer {
    async fn analyze(&self, body: &str) -> Analysis {
        self.score(body)
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}
