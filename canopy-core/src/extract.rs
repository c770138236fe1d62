//! Relation extraction pipeline — document text in, canonical edges out
//!
//! Wires the completion backend to the repair engine and the normalizer.
//! A transport failure has already been retried inside the backend; a format
//! failure is terminal here — asking the parser again about the same text
//! would fail identically, so re-invoking the model is left to the caller.

use crate::error::CanopyError;
use crate::llm::CompletionBackend;
use crate::relation::{self, RelationEdge};
use crate::repair;

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are a knowledge-graph construction expert. \
Analyze the text, identify the main knowledge points and their hierarchical relations \
(parent concept to child concept), and output a JSON array where each element has the form \
[parent, relation, child]. Relations should express hierarchy, such as \"contains\", \
\"belongs to\" or \"is a kind of\". Return only the JSON array, nothing else.";

/// Strip control characters that tend to leak out of document parsers and
/// confuse the model into echoing them back inside the JSON payload.
pub fn sanitize_text(text: &str) -> String {
    text.chars().filter(|c| !c.is_control()).collect()
}

/// Assemble the user prompt, with a node-budget clause when one is set.
pub fn build_extraction_prompt(text: &str, max_nodes: usize) -> String {
    let budget_clause = if max_nodes > 0 {
        format!(" Keep the total number of distinct knowledge points at or below {}.", max_nodes)
    } else {
        String::new()
    };
    format!(
        "Extract the knowledge points and their hierarchical relations from the text below \
         as a JSON array of [parent, relation, child] elements.{}\n{}",
        budget_clause, text
    )
}

/// Run one extraction round: completion, repair, normalize.
pub async fn extract_relations(
    backend: &dyn CompletionBackend,
    text: &str,
    max_nodes: usize,
) -> Result<Vec<RelationEdge>, CanopyError> {
    let sanitized = sanitize_text(text);
    let user = build_extraction_prompt(&sanitized, max_nodes);

    let raw = backend.complete(EXTRACTION_SYSTEM_PROMPT, &user).await?;
    tracing::info!(backend = backend.name(), chars = raw.len(), "Model returned relation payload");

    let parsed = repair::repair(&raw)?;
    let edges = relation::normalize(&parsed)?;
    tracing::info!(count = edges.len(), "Extracted relation edges");
    Ok(edges)
}

// ============================================================================
// TESTS
// ============================================================================
