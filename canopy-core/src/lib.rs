pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod graph;
pub mod ipc;
pub mod llm;
pub mod mastery;
pub mod models;
pub mod relation;
pub mod repair;
pub mod snippet;
pub mod store;

pub use config::CanopyConfig;
pub use error::CanopyError;
pub use graph::{build_graph, filter_ignored, GraphEdge, KnowledgeGraph, Node};
pub use llm::{ChatCompletionClient, CompletionBackend, LlmConfig, LlmError};
pub use mastery::MasteryState;
pub use relation::RelationEdge;
pub use repair::repair;
pub use snippet::extract_snippet;
