use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::GraphEdge;

/// A graph edge as stored. Composite key `(topology_id, from_label,
/// to_label)`; re-insertion replaces, so the last relation label for a given
/// pair wins.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EdgeRecord {
    pub topology_id: Uuid,
    pub from_label: String,
    pub to_label: String,
    pub label: String,
}

impl EdgeRecord {
    pub fn into_edge(self) -> GraphEdge {
        GraphEdge {
            from: self.from_label,
            to: self.to_label,
            label: self.label,
        }
    }
}
