//! Build progress tracker
//!
//! Shared status map keyed by topology id: the owning background build is
//! the only writer for its key, pollers only read. `begin` doubles as a
//! single-flight guard — a second submission for a topology whose build is
//! still in flight is rejected instead of racing the first.

use std::collections::HashMap;
use std::sync::Arc;

use canopy_core::CanopyError;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildStatus {
    Processing { progress: u8, message: String },
    Completed { summary: BuildSummary },
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub node_count: usize,
    pub edge_count: usize,
    pub text_length: usize,
    pub max_nodes: i32,
    pub processing_ms: u64,
}

#[derive(Clone, Default)]
pub struct BuildTracker {
    inner: Arc<RwLock<HashMap<Uuid, BuildStatus>>>,
}

impl BuildTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a topology id for a new build. Fails while a prior build for
    /// the same id is still processing.
    pub async fn begin(&self, id: Uuid) -> Result<(), CanopyError> {
        let mut map = self.inner.write().await;
        if matches!(map.get(&id), Some(BuildStatus::Processing { .. })) {
            return Err(CanopyError::BuildInFlight(id));
        }
        map.insert(
            id,
            BuildStatus::Processing {
                progress: 0,
                message: "Queued".to_string(),
            },
        );
        Ok(())
    }

    pub async fn update(&self, id: Uuid, progress: u8, message: &str) {
        let mut map = self.inner.write().await;
        map.insert(
            id,
            BuildStatus::Processing {
                progress,
                message: message.to_string(),
            },
        );
        tracing::info!(topology_id = %id, progress, message, "Build progress");
    }

    pub async fn complete(&self, id: Uuid, summary: BuildSummary) {
        let mut map = self.inner.write().await;
        map.insert(id, BuildStatus::Completed { summary });
    }

    pub async fn fail(&self, id: Uuid, message: String) {
        tracing::error!(topology_id = %id, message = %message, "Build failed");
        let mut map = self.inner.write().await;
        map.insert(id, BuildStatus::Failed { message });
    }

    pub async fn status(&self, id: Uuid) -> Option<BuildStatus> {
        self.inner.read().await.get(&id).cloned()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> BuildSummary {
        BuildSummary {
            node_count: 3,
            edge_count: 2,
            text_length: 500,
            max_nodes: 0,
            processing_ms: 42,
        }
    }

    #[tokio::test]
    async fn test_begin_claims_and_reports_processing() {
        let tracker = BuildTracker::new();
        let id = Uuid::new_v4();
        tracker.begin(id).await.expect("first begin succeeds");
        assert!(matches!(
            tracker.status(id).await,
            Some(BuildStatus::Processing { .. })
        ));
    }

    #[tokio::test]
    async fn test_double_submission_is_rejected() {
        let tracker = BuildTracker::new();
        let id = Uuid::new_v4();
        tracker.begin(id).await.expect("first begin succeeds");
        let err = tracker.begin(id).await.expect_err("second begin must fail");
        assert!(matches!(err, CanopyError::BuildInFlight(got) if got == id));
    }

    #[tokio::test]
    async fn test_begin_allowed_again_after_completion() {
        let tracker = BuildTracker::new();
        let id = Uuid::new_v4();
        tracker.begin(id).await.expect("first begin");
        tracker.complete(id, summary()).await;
        tracker.begin(id).await.expect("rebuild after completion");
    }

    #[tokio::test]
    async fn test_begin_allowed_again_after_failure() {
        let tracker = BuildTracker::new();
        let id = Uuid::new_v4();
        tracker.begin(id).await.expect("first begin");
        tracker.fail(id, "boom".to_string()).await;
        tracker.begin(id).await.expect("retry after failure");
    }

    #[tokio::test]
    async fn test_updates_are_visible_to_pollers() {
        let tracker = BuildTracker::new();
        let id = Uuid::new_v4();
        tracker.begin(id).await.expect("begin");
        tracker.update(id, 60, "Calling model").await;
        match tracker.status(id).await {
            Some(BuildStatus::Processing { progress, message }) => {
                assert_eq!(progress, 60);
                assert_eq!(message, "Calling model");
            }
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_id_has_no_status() {
        let tracker = BuildTracker::new();
        assert!(tracker.status(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_topologies_are_isolated() {
        let tracker = BuildTracker::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        tracker.begin(a).await.expect("begin a");
        tracker.begin(b).await.expect("begin b — different id is not blocked");
        tracker.fail(a, "a failed".to_string()).await;
        assert!(matches!(
            tracker.status(b).await,
            Some(BuildStatus::Processing { .. })
        ));
    }
}
