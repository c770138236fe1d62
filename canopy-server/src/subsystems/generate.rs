//! Generation subsystem — one background unit of work per document
//!
//! The pipeline is logically sequential: length check, relation extraction
//! (completion + repair + normalize), graph build with prior mastery from
//! the store, transactional persist. Progress lands in the `BuildTracker`
//! for pollers. Writes only happen after a successful build, so a failed
//! regeneration leaves the previous graph untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use canopy_core::config::CanopyConfig;
use canopy_core::graph::KnowledgeGraph;
use canopy_core::llm::CompletionBackend;
use canopy_core::mastery::MasteryState;
use canopy_core::{build_graph, extract, store, CanopyError};
use sqlx::PgPool;
use uuid::Uuid;

use crate::subsystems::progress::{BuildSummary, BuildTracker};

/// Everything a build needs, cheap to clone into a spawned task.
#[derive(Clone)]
pub struct GenerationContext {
    pub pool: PgPool,
    pub backend: Arc<dyn CompletionBackend>,
    pub config: CanopyConfig,
    pub tracker: BuildTracker,
}

/// Reject documents too short to extract anything useful from.
pub fn ensure_min_length(content: &str, minimum: usize) -> Result<(), CanopyError> {
    let length = content.chars().count();
    if length < minimum {
        return Err(CanopyError::EmptyDocument { length, minimum });
    }
    Ok(())
}

/// The store-free middle of the pipeline: length check, extraction, build.
pub async fn build_from_content(
    backend: &dyn CompletionBackend,
    config: &CanopyConfig,
    content: &str,
    prior: &HashMap<String, MasteryState>,
    max_nodes: i32,
) -> Result<KnowledgeGraph, CanopyError> {
    ensure_min_length(content, config.extraction.min_document_chars)?;
    let edges = extract::extract_relations(backend, content, max_nodes.max(0) as usize).await?;
    Ok(build_graph(
        &edges,
        prior,
        content,
        max_nodes.max(0) as usize,
        &config.mastery,
    ))
}

/// Run a full generation for a fresh or existing topology. The caller must
/// have claimed the id via `tracker.begin` first.
pub async fn run_generation(
    ctx: &GenerationContext,
    topology_id: Uuid,
    content: &str,
    max_nodes: i32,
    owner: &str,
) -> Result<KnowledgeGraph, CanopyError> {
    let started = Instant::now();
    tracing::info!(
        topology_id = %topology_id,
        chars = content.len(),
        max_nodes,
        "Starting knowledge graph generation"
    );

    ctx.tracker.update(topology_id, 10, "Checking document").await;
    ensure_min_length(content, ctx.config.extraction.min_document_chars)?;

    // Prior mastery keyed by label — empty on first generation, populated on
    // regeneration so progress survives the rebuild.
    let prior = store::mastery_states(&ctx.pool, topology_id).await?;

    ctx.tracker
        .update(topology_id, 30, "Extracting knowledge relations")
        .await;
    let edges =
        extract::extract_relations(ctx.backend.as_ref(), content, max_nodes.max(0) as usize).await?;

    ctx.tracker
        .update(topology_id, 70, "Building knowledge graph")
        .await;
    let graph = build_graph(
        &edges,
        &prior,
        content,
        max_nodes.max(0) as usize,
        &ctx.config.mastery,
    );

    ctx.tracker.update(topology_id, 90, "Saving graph").await;
    store::put_topology(&ctx.pool, topology_id, content, max_nodes, owner).await?;
    store::persist_graph(&ctx.pool, topology_id, &graph).await?;

    let summary = BuildSummary {
        node_count: graph.nodes.len(),
        edge_count: graph.edges.len(),
        text_length: content.chars().count(),
        max_nodes,
        processing_ms: started.elapsed().as_millis() as u64,
    };
    tracing::info!(
        topology_id = %topology_id,
        nodes = summary.node_count,
        edges = summary.edge_count,
        elapsed_ms = summary.processing_ms,
        "Knowledge graph generation complete"
    );
    ctx.tracker.complete(topology_id, summary).await;

    Ok(graph)
}

/// Rebuild an existing topology from its stored content, preserving mastery.
pub async fn run_regeneration(
    ctx: &GenerationContext,
    topology_id: Uuid,
    max_nodes: Option<i32>,
) -> Result<KnowledgeGraph, CanopyError> {
    let record = store::get_topology(&ctx.pool, topology_id)
        .await?
        .ok_or(CanopyError::TopologyNotFound(topology_id))?;

    let max_nodes = max_nodes.unwrap_or(record.max_nodes);
    run_generation(ctx, topology_id, &record.content, max_nodes, &record.owner).await
}

/// Fire a generation in the background; errors mark the build failed.
pub fn spawn_generation(
    ctx: GenerationContext,
    topology_id: Uuid,
    content: String,
    max_nodes: i32,
    owner: String,
) {
    tokio::spawn(async move {
        if let Err(e) = run_generation(&ctx, topology_id, &content, max_nodes, &owner).await {
            ctx.tracker.fail(topology_id, e.to_string()).await;
        }
    });
}

// ============================================================================
// TESTS
// ============================================================================
