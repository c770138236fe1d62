use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CanopyRequest {
    Ping,
    Health,
    Generate {
        content: String,
        max_nodes: Option<i32>,
        owner: Option<String>,
    },
    Regenerate {
        topology_id: Uuid,
        max_nodes: Option<i32>,
    },
    Status {
        topology_id: Uuid,
    },
    GetGraph {
        topology_id: Uuid,
    },
    Repair {
        raw: String,
    },
    Snippet {
        content: String,
        topic: String,
    },
    SetMaxNodes {
        topology_id: Uuid,
        max_nodes: i32,
    },
    IgnoreNodes {
        topology_id: Uuid,
        labels: Vec<String>,
    },
    ResetMastery {
        topology_id: Uuid,
    },
    Question {
        topology_id: Uuid,
        label: String,
        session_id: Option<Uuid>,
    },
    Answer {
        topology_id: Uuid,
        question_id: Uuid,
        session_id: Uuid,
        label: String,
        answer: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CanopyResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub version: String,
}

impl CanopyResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }
}
