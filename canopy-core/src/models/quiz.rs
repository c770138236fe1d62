use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One quiz run against a single node.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QuizSession {
    pub id: Uuid,
    pub topology_id: Uuid,
    pub node_label: String,
    pub created_at: DateTime<Utc>,
    pub consecutive_correct: i32,
    pub mastered: bool,
}

/// A generated question, with the answer and verdict filled in once the
/// user responds.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QuizQuestion {
    pub id: Uuid,
    pub topology_id: Uuid,
    pub node_label: String,
    pub session_id: Uuid,
    pub question: String,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub answer: Option<String>,
    pub feedback: Option<String>,
    pub correct: bool,
}
