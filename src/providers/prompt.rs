//! Prompt text. Kept deliberately short; wording is not load-bearing.

pub fn system_prompt(category: &str) -> String {
    format!(
        "You are a careful research assistant. The note is about {category}. \
         Answer with concise, factual findings, concrete options and sources where known. \
         Use short markdown sections. No preamble."
    )
}

pub fn research_prompt(content: &str, category: &str) -> String {
    format!(
        "Research the following {category} note and give practical, well-sourced findings.\n\n\
         NOTE:\n{content}"
    )
}

/// Prompt asking a provider for a JSON admission verdict.
pub fn analysis_prompt(content: &str) -> String {
    format!(
        "Decide whether this personal note would benefit from web research.\n\
         Reply with ONLY a JSON object:\n\
         {{\"should_research\": bool, \"confidence\": number 0..1, \
         \"category\": string, \"reasoning\": string}}\n\
         Categories: software, ai, building, lifestyle, productivity, security, \
         business, technical, partnership, general.\n\
         Reminders, to-dos and meeting logs do not need research.\n\n\
         NOTE:\n{content}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_embed_content_and_category() {
        let p = research_prompt("How do I test async APIs?", "software");
        assert!(p.contains("How do I test async APIs?"));
        assert!(p.contains("software"));
        assert!(analysis_prompt("x").contains("should_research"));
    }
}
