//! Merges fan-out results into one research text.

use crate::fanout::FanoutResults;

pub const NO_RESEARCH_PLACEHOLDER: &str =
    "[no research available] All research providers failed for this note; it will be retried on a later change.";

pub fn is_placeholder(text: &str) -> bool {
    text.starts_with("[no research available]")
}

/// Only successful results are used. None succeeded: the placeholder. One: its
/// content attributed. Several: concatenated under per-provider headers, in
/// provider-name order so output is stable.
pub fn synthesize(results: &FanoutResults) -> String {
    let mut ok: Vec<_> = results
        .values()
        .filter(|r| r.success && !r.content.trim().is_empty())
        .collect();
    ok.sort_by(|a, b| a.provider.cmp(&b.provider));

    match ok.as_slice() {
        [] => NO_RESEARCH_PLACEHOLDER.to_string(),
        [only] => format!("Research from {}:\n\n{}", only.provider, only.content.trim()),
        many => many
            .iter()
            .map(|r| format!("### {}\n\n{}", r.provider, r.content.trim()))
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::fanout::ProviderResult;

    fn res(provider: &str, content: Option<&str>) -> (String, ProviderResult) {
        (
            provider.to_string(),
            ProviderResult {
                provider: provider.to_string(),
                success: content.is_some(),
                content: content.unwrap_or_default().to_string(),
                error: content.is_none().then(|| "timed out".to_string()),
                error_class: content.is_none().then_some(ErrorClass::Timeout),
                attempts_used: 1,
                elapsed_ms: 10,
            },
        )
    }

    #[test]
    fn all_failed_yields_placeholder() {
        let r: FanoutResults = [res("a", None), res("b", None)].into_iter().collect();
        let out = synthesize(&r);
        assert!(is_placeholder(&out));
    }

    #[test]
    fn single_success_is_attributed() {
        let r: FanoutResults = [res("openai", Some("use tokio::test")), res("claude", None)]
            .into_iter()
            .collect();
        let out = synthesize(&r);
        assert_eq!(out, "Research from openai:\n\nuse tokio::test");
        assert!(!out.contains("claude"));
    }

    #[test]
    fn several_successes_get_headers_in_name_order() {
        let r: FanoutResults = [res("openai", Some("B")), res("claude", Some("A"))]
            .into_iter()
            .collect();
        assert_eq!(synthesize(&r), "### claude\n\nA\n\n### openai\n\nB");
    }
}
