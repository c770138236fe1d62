use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::Node;
use crate::mastery::MasteryState;

/// A graph node as stored, keyed by `(topology_id, label)`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NodeRecord {
    pub topology_id: Uuid,
    pub label: String,
    pub level: i32,
    pub value: i32,
    pub mastered: bool,
    pub mastery_score: f64,
    pub consecutive_correct: i32,
    pub content_snippet: String,
}

impl NodeRecord {
    pub fn mastery(&self) -> MasteryState {
        MasteryState {
            mastered: self.mastered,
            mastery_score: self.mastery_score,
            consecutive_correct: self.consecutive_correct,
        }
    }

    pub fn into_node(self) -> Node {
        Node {
            id: self.label.clone(),
            label: self.label,
            level: self.level,
            value: self.value,
            mastered: self.mastered,
            mastery_score: self.mastery_score,
            consecutive_correct: self.consecutive_correct,
            content_snippet: self.content_snippet,
        }
    }
}
