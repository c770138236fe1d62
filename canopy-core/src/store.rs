//! Persistence layer — topologies, nodes, edges, quiz state
//!
//! All reads and writes are partitioned by topology id; one background build
//! owns one topology and never touches another's rows. Graph persistence is
//! a transactional full replacement: either the new graph lands completely
//! or the prior graph stays untouched.

use std::collections::HashMap;

use sqlx::PgPool;
use uuid::Uuid;

use crate::graph::{GraphEdge, KnowledgeGraph, Node};
use crate::mastery::MasteryState;
use crate::models::{EdgeRecord, NodeRecord, QuizQuestion, QuizSession, TopologyRecord};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS topologies (
        id UUID PRIMARY KEY,
        content TEXT NOT NULL,
        max_nodes INT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        owner TEXT NOT NULL DEFAULT 'anonymous'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        topology_id UUID NOT NULL REFERENCES topologies(id) ON DELETE CASCADE,
        label TEXT NOT NULL,
        level INT NOT NULL DEFAULT 0,
        value INT NOT NULL DEFAULT 1,
        mastered BOOLEAN NOT NULL DEFAULT FALSE,
        mastery_score DOUBLE PRECISION NOT NULL DEFAULT 0,
        consecutive_correct INT NOT NULL DEFAULT 0,
        content_snippet TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (topology_id, label)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS edges (
        topology_id UUID NOT NULL REFERENCES topologies(id) ON DELETE CASCADE,
        from_label TEXT NOT NULL,
        to_label TEXT NOT NULL,
        label TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (topology_id, from_label, to_label)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS quiz_sessions (
        id UUID PRIMARY KEY,
        topology_id UUID NOT NULL,
        node_label TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        consecutive_correct INT NOT NULL DEFAULT 0,
        mastered BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS quiz_questions (
        id UUID PRIMARY KEY,
        topology_id UUID NOT NULL,
        node_label TEXT NOT NULL,
        session_id UUID NOT NULL,
        question TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        answered_at TIMESTAMPTZ,
        answer TEXT,
        feedback TEXT,
        correct BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
];

/// Create the tables on first start. Idempotent.
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("Database schema ready");
    Ok(())
}

// ============================================================================
// Topologies
// ============================================================================

pub async fn put_topology(
    pool: &PgPool,
    id: Uuid,
    content: &str,
    max_nodes: i32,
    owner: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO topologies (id, content, max_nodes, owner)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE
        SET content = EXCLUDED.content, max_nodes = EXCLUDED.max_nodes
        "#,
    )
    .bind(id)
    .bind(content)
    .bind(max_nodes)
    .bind(owner)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_topology(pool: &PgPool, id: Uuid) -> Result<Option<TopologyRecord>, sqlx::Error> {
    sqlx::query_as::<_, TopologyRecord>(
        "SELECT id, content, max_nodes, created_at, owner FROM topologies WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn set_max_nodes(pool: &PgPool, id: Uuid, max_nodes: i32) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE topologies SET max_nodes = $1 WHERE id = $2")
        .bind(max_nodes)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ============================================================================
// Graph persistence
// ============================================================================

/// Replace a topology's graph in one transaction.
pub async fn persist_graph(
    pool: &PgPool,
    topology_id: Uuid,
    graph: &KnowledgeGraph,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM edges WHERE topology_id = $1")
        .bind(topology_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM nodes WHERE topology_id = $1")
        .bind(topology_id)
        .execute(&mut *tx)
        .await?;

    for node in &graph.nodes {
        sqlx::query(
            r#"
            INSERT INTO nodes
                (topology_id, label, level, value, mastered, mastery_score,
                 consecutive_correct, content_snippet)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(topology_id)
        .bind(&node.label)
        .bind(node.level)
        .bind(node.value)
        .bind(node.mastered)
        .bind(node.mastery_score)
        .bind(node.consecutive_correct)
        .bind(&node.content_snippet)
        .execute(&mut *tx)
        .await?;
    }

    for edge in &graph.edges {
        // Duplicate (from, to) pairs collapse here; the last relation label wins.
        sqlx::query(
            r#"
            INSERT INTO edges (topology_id, from_label, to_label, label)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (topology_id, from_label, to_label) DO UPDATE
            SET label = EXCLUDED.label
            "#,
        )
        .bind(topology_id)
        .bind(&edge.from)
        .bind(&edge.to)
        .bind(&edge.label)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    tracing::info!(
        topology_id = %topology_id,
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "Persisted knowledge graph"
    );
    Ok(())
}

/// Load a topology's graph from the store. `None` when the topology has no
/// nodes. The root falls back to the first level-0 node, matching the build.
pub async fn load_graph(pool: &PgPool, topology_id: Uuid) -> Result<Option<KnowledgeGraph>, sqlx::Error> {
    let node_records: Vec<NodeRecord> = sqlx::query_as(
        r#"
        SELECT topology_id, label, level, value, mastered, mastery_score,
               consecutive_correct, content_snippet
        FROM nodes WHERE topology_id = $1 ORDER BY label
        "#,
    )
    .bind(topology_id)
    .fetch_all(pool)
    .await?;

    if node_records.is_empty() {
        return Ok(None);
    }

    let edge_records: Vec<EdgeRecord> = sqlx::query_as(
        r#"
        SELECT topology_id, from_label, to_label, label
        FROM edges WHERE topology_id = $1 ORDER BY from_label, to_label
        "#,
    )
    .bind(topology_id)
    .fetch_all(pool)
    .await?;

    let nodes: Vec<Node> = node_records.into_iter().map(NodeRecord::into_node).collect();
    let edges: Vec<GraphEdge> = edge_records.into_iter().map(EdgeRecord::into_edge).collect();
    let root = nodes
        .iter()
        .find(|n| n.level == 0)
        .or_else(|| nodes.first())
        .map(|n| n.label.clone());

    Ok(Some(KnowledgeGraph { nodes, edges, root }))
}

// ============================================================================
// Mastery state
// ============================================================================

/// Snapshot of a topology's mastery state, keyed by node label.
pub async fn mastery_states(
    pool: &PgPool,
    topology_id: Uuid,
) -> Result<HashMap<String, MasteryState>, sqlx::Error> {
    let rows: Vec<(String, bool, f64, i32)> = sqlx::query_as(
        r#"
        SELECT label, mastered, mastery_score, consecutive_correct
        FROM nodes WHERE topology_id = $1
        "#,
    )
    .bind(topology_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(label, mastered, mastery_score, consecutive_correct)| {
            (
                label,
                MasteryState {
                    mastered,
                    mastery_score,
                    consecutive_correct,
                },
            )
        })
        .collect())
}

pub async fn get_node(
    pool: &PgPool,
    topology_id: Uuid,
    label: &str,
) -> Result<Option<NodeRecord>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT topology_id, label, level, value, mastered, mastery_score,
               consecutive_correct, content_snippet
        FROM nodes WHERE topology_id = $1 AND label = $2
        "#,
    )
    .bind(topology_id)
    .bind(label)
    .fetch_optional(pool)
    .await
}

pub async fn update_node_mastery(
    pool: &PgPool,
    topology_id: Uuid,
    label: &str,
    state: &MasteryState,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE nodes
        SET mastered = $1, mastery_score = $2, consecutive_correct = $3
        WHERE topology_id = $4 AND label = $5
        "#,
    )
    .bind(state.mastered)
    .bind(state.mastery_score)
    .bind(state.consecutive_correct)
    .bind(topology_id)
    .bind(label)
    .execute(pool)
    .await?;
    Ok(())
}

/// Explicit reset: clear every node's mastery state for a topology.
pub async fn reset_mastery(pool: &PgPool, topology_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE nodes
        SET mastered = FALSE, mastery_score = 0, consecutive_correct = 0
        WHERE topology_id = $1
        "#,
    )
    .bind(topology_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// ============================================================================
// Quiz sessions & questions
// ============================================================================

pub async fn create_quiz_session(
    pool: &PgPool,
    topology_id: Uuid,
    node_label: &str,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO quiz_sessions (id, topology_id, node_label) VALUES ($1, $2, $3)",
    )
    .bind(id)
    .bind(topology_id)
    .bind(node_label)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn get_quiz_session(pool: &PgPool, id: Uuid) -> Result<Option<QuizSession>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, topology_id, node_label, created_at, consecutive_correct, mastered
        FROM quiz_sessions WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn update_quiz_session(
    pool: &PgPool,
    id: Uuid,
    consecutive_correct: i32,
    mastered: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE quiz_sessions SET consecutive_correct = $1, mastered = $2 WHERE id = $3",
    )
    .bind(consecutive_correct)
    .bind(mastered)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_question(
    pool: &PgPool,
    topology_id: Uuid,
    node_label: &str,
    session_id: Uuid,
    question: &str,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO quiz_questions (id, topology_id, node_label, session_id, question)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(topology_id)
    .bind(node_label)
    .bind(session_id)
    .bind(question)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn get_question(
    pool: &PgPool,
    topology_id: Uuid,
    id: Uuid,
) -> Result<Option<QuizQuestion>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, topology_id, node_label, session_id, question, created_at,
               answered_at, answer, feedback, correct
        FROM quiz_questions WHERE id = $1 AND topology_id = $2
        "#,
    )
    .bind(id)
    .bind(topology_id)
    .fetch_optional(pool)
    .await
}

pub async fn mark_question_answered(
    pool: &PgPool,
    id: Uuid,
    answer: &str,
    feedback: &str,
    correct: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE quiz_questions
        SET answered_at = NOW(), answer = $1, feedback = $2, correct = $3
        WHERE id = $4
        "#,
    )
    .bind(answer)
    .bind(feedback)
    .bind(correct)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}
