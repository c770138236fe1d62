use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TopologyRecord {
    pub id: Uuid,
    pub content: String,
    pub max_nodes: i32,
    pub created_at: DateTime<Utc>,
    pub owner: String,
}
