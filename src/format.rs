//! Final note text: original body untouched, research appended below a marker.

use chrono::{DateTime, Utc};

use crate::gate::AdmissionDecision;
use crate::source::Item;

/// Stable line separating the user's note from appended research.
pub const RESEARCH_MARKER: &str = "<!-- research-bot:research -->";

pub fn has_research(body: &str) -> bool {
    body.contains(RESEARCH_MARKER)
}

/// The user's part of a note: everything before a previously appended research section.
pub fn user_text(body: &str) -> &str {
    match body.find(RESEARCH_MARKER) {
        Some(i) => body[..i].trim_end(),
        None => body,
    }
}

pub fn format_researched_note(
    item: &Item,
    decision: &AdmissionDecision,
    synthesized: &str,
    at: DateTime<Utc>,
) -> String {
    // An older research section is replaced, not stacked.
    let body = user_text(&item.body);
    let mut out = String::with_capacity(body.len() + synthesized.len() + 256);
    out.push_str(body);
    if !body.ends_with('\n') {
        out.push('\n');
    }
    out.push('\n');
    out.push_str(RESEARCH_MARKER);
    out.push_str("\n## Research\n\n");
    out.push_str(&format!(
        "_Category: {} | confidence {:.2} | {}_\n\n",
        decision.category,
        decision.confidence,
        at.format("%Y-%m-%d %H:%M UTC")
    ));
    out.push_str(synthesized.trim_end());
    out.push('\n');
    out
}
