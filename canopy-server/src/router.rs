use std::sync::Arc;

use canopy_core::ipc::{CanopyRequest, CanopyResponse};
use canopy_core::llm::CompletionBackend;
use canopy_core::{filter_ignored, repair, snippet, store, CanopyConfig};
use sqlx::PgPool;
use uuid::Uuid;

use crate::subsystems::progress::{BuildStatus, BuildTracker};
use crate::subsystems::{generate, quiz};

/// Shared state for the IPC and HTTP surfaces.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: CanopyConfig,
    pub tracker: BuildTracker,
    pub backend: Arc<dyn CompletionBackend>,
}

impl AppState {
    fn generation_context(&self) -> generate::GenerationContext {
        generate::GenerationContext {
            pool: self.pool.clone(),
            backend: self.backend.clone(),
            config: self.config.clone(),
            tracker: self.tracker.clone(),
        }
    }
}

pub async fn handle_request(request: CanopyRequest, state: &AppState) -> CanopyResponse {
    match request {
        CanopyRequest::Ping => CanopyResponse::pong(),
        CanopyRequest::Health => match canopy_core::db::health_check(&state.pool).await {
            Ok(version) => CanopyResponse::ok(serde_json::json!({
                "postgresql": version,
                "status": "healthy",
            })),
            Err(e) => CanopyResponse::err(format!("DB health check failed: {}", e)),
        },
        CanopyRequest::Generate {
            content,
            max_nodes,
            owner,
        } => {
            let topology_id = Uuid::new_v4();
            let max_nodes = max_nodes.unwrap_or(state.config.extraction.default_max_nodes);
            if let Err(e) = state.tracker.begin(topology_id).await {
                return CanopyResponse::err(e.to_string());
            }
            generate::spawn_generation(
                state.generation_context(),
                topology_id,
                content,
                max_nodes,
                owner.unwrap_or_else(|| "anonymous".to_string()),
            );
            CanopyResponse::ok(serde_json::json!({
                "topology_id": topology_id,
                "status": "processing",
                "max_nodes": max_nodes,
            }))
        }
        CanopyRequest::Regenerate {
            topology_id,
            max_nodes,
        } => {
            if let Err(e) = state.tracker.begin(topology_id).await {
                return CanopyResponse::err(e.to_string());
            }
            match generate::run_regeneration(&state.generation_context(), topology_id, max_nodes)
                .await
            {
                Ok(graph) => CanopyResponse::ok(serde_json::json!({
                    "topology_id": topology_id,
                    "node_count": graph.nodes.len(),
                    "edge_count": graph.edges.len(),
                    "data": graph,
                })),
                Err(e) => {
                    state.tracker.fail(topology_id, e.to_string()).await;
                    CanopyResponse::err(e.to_string())
                }
            }
        }
        CanopyRequest::Status { topology_id } => {
            match state.tracker.status(topology_id).await {
                Some(status) => CanopyResponse::ok(
                    serde_json::to_value(&status).unwrap_or(serde_json::json!({})),
                ),
                // Not in memory: a topology persisted by an earlier run counts
                // as completed.
                None => match store::get_topology(&state.pool, topology_id).await {
                    Ok(Some(_)) => CanopyResponse::ok(serde_json::json!({"status": "completed"})),
                    Ok(None) => CanopyResponse::err("topology not found"),
                    Err(e) => CanopyResponse::err(e.to_string()),
                },
            }
        }
        CanopyRequest::GetGraph { topology_id } => {
            if let Some(status @ BuildStatus::Processing { .. }) =
                state.tracker.status(topology_id).await
            {
                return CanopyResponse::ok(
                    serde_json::to_value(&status).unwrap_or(serde_json::json!({})),
                );
            }
            match load_graph_payload(&state.pool, topology_id).await {
                Ok(Some(payload)) => CanopyResponse::ok(payload),
                Ok(None) => CanopyResponse::err("topology not found"),
                Err(e) => CanopyResponse::err(e.to_string()),
            }
        }
        CanopyRequest::Repair { raw } => match repair(&raw) {
            Ok(value) => CanopyResponse::ok(value),
            Err(e) => CanopyResponse::err(e.to_string()),
        },
        CanopyRequest::Snippet { content, topic } => CanopyResponse::ok(serde_json::json!({
            "snippet": snippet::extract_snippet(&content, &topic),
        })),
        CanopyRequest::SetMaxNodes {
            topology_id,
            max_nodes,
        } => match store::set_max_nodes(&state.pool, topology_id, max_nodes).await {
            Ok(()) => CanopyResponse::ok(serde_json::json!({
                "topology_id": topology_id,
                "max_nodes": max_nodes,
            })),
            Err(e) => CanopyResponse::err(e.to_string()),
        },
        CanopyRequest::IgnoreNodes {
            topology_id,
            labels,
        } => match store::load_graph(&state.pool, topology_id).await {
            Ok(Some(graph)) => {
                let filtered = filter_ignored(&graph, &labels);
                CanopyResponse::ok(
                    serde_json::to_value(&filtered).unwrap_or(serde_json::json!({})),
                )
            }
            Ok(None) => CanopyResponse::err("topology not found"),
            Err(e) => CanopyResponse::err(e.to_string()),
        },
        CanopyRequest::ResetMastery { topology_id } => {
            match store::reset_mastery(&state.pool, topology_id).await {
                Ok(count) => CanopyResponse::ok(serde_json::json!({
                    "reset": true,
                    "nodes": count,
                })),
                Err(e) => CanopyResponse::err(e.to_string()),
            }
        }
        CanopyRequest::Question {
            topology_id,
            label,
            session_id,
        } => {
            match quiz::ask(&state.pool, state.backend.as_ref(), topology_id, &label, session_id)
                .await
            {
                Ok(data) => CanopyResponse::ok(data),
                Err(e) => CanopyResponse::err(e.to_string()),
            }
        }
        CanopyRequest::Answer {
            topology_id,
            question_id,
            session_id,
            label,
            answer,
        } => {
            match quiz::submit_answer(
                &state.pool,
                state.backend.as_ref(),
                &state.config.mastery,
                topology_id,
                question_id,
                session_id,
                &label,
                &answer,
            )
            .await
            {
                Ok(data) => CanopyResponse::ok(data),
                Err(e) => CanopyResponse::err(e.to_string()),
            }
        }
    }
}

/// Stored graph plus topology metadata, shaped the way pollers expect.
async fn load_graph_payload(
    pool: &PgPool,
    topology_id: Uuid,
) -> Result<Option<serde_json::Value>, sqlx::Error> {
    let topology = match store::get_topology(pool, topology_id).await? {
        Some(t) => t,
        None => return Ok(None),
    };
    let graph = store::load_graph(pool, topology_id)
        .await?
        .unwrap_or_else(canopy_core::KnowledgeGraph::empty);
    let (node_count, edge_count) = (graph.nodes.len(), graph.edges.len());

    Ok(Some(serde_json::json!({
        "status": "completed",
        "data": graph,
        "created_at": topology.created_at,
        "node_count": node_count,
        "edge_count": edge_count,
        "text_length": topology.content.chars().count(),
        "max_nodes": topology.max_nodes,
    })))
}
