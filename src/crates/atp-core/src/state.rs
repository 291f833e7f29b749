//! In-process execution index
//!
//! Tracks every execution the server knows about: status, limits, the
//! pending continuation for paused executions, accumulated progress,
//! and the cooperative cancel flag. State transitions for one id are
//! serialized by the map's per-entry locking. A paused execution that
//! outlives its TTL is swept to `failed/expired`.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::limits::ExecutionLimits;
use crate::pause::ContinuationRequest;
use crate::sequence::ProgressEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified failure attached to a failed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Json>,
}

/// One tracked execution.
#[derive(Clone)]
pub struct ExecutionEntry {
    pub id: String,
    pub code: String,
    pub code_hash: String,
    pub limits: ExecutionLimits,
    pub status: ExecutionStatus,
    pub result: Option<Json>,
    pub error: Option<ErrorInfo>,
    pub continuation: Option<ContinuationRequest>,
    pub progress: Vec<ProgressEvent>,
    pub last_activity: DateTime<Utc>,
    pub paused_until: Option<DateTime<Utc>>,
    pub cancelled: Arc<AtomicBool>,
}

/// Counts surfaced on the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub running: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct ExecutionStateManager {
    entries: DashMap<String, ExecutionEntry>,
}

impl ExecutionStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new execution in the running state. Returns `false`
    /// if the id is already tracked.
    pub fn create(
        &self,
        id: &str,
        code: &str,
        code_hash: &str,
        limits: ExecutionLimits,
    ) -> bool {
        if self.entries.contains_key(id) {
            return false;
        }
        self.entries.insert(
            id.to_string(),
            ExecutionEntry {
                id: id.to_string(),
                code: code.to_string(),
                code_hash: code_hash.to_string(),
                limits,
                status: ExecutionStatus::Running,
                result: None,
                error: None,
                continuation: None,
                progress: Vec::new(),
                last_activity: Utc::now(),
                paused_until: None,
                cancelled: Arc::new(AtomicBool::new(false)),
            },
        );
        true
    }

    pub fn get(&self, id: &str) -> Option<ExecutionEntry> {
        self.entries.get(id).map(|e| e.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn cancel_flag(&self, id: &str) -> Option<Arc<AtomicBool>> {
        self.entries.get(id).map(|e| e.cancelled.clone())
    }

    pub fn mark_running(&self, id: &str) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.status = ExecutionStatus::Running;
            entry.continuation = None;
            entry.paused_until = None;
            entry.last_activity = Utc::now();
        }
    }

    pub fn mark_paused(&self, id: &str, continuation: ContinuationRequest) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            let ttl = Duration::seconds(entry.limits.paused_ttl_seconds as i64);
            entry.status = ExecutionStatus::Paused;
            entry.continuation = Some(continuation);
            entry.last_activity = Utc::now();
            entry.paused_until = Some(Utc::now() + ttl);
            info!(execution_id = %id, "execution paused");
        }
    }

    pub fn mark_completed(&self, id: &str, result: Json) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.status = ExecutionStatus::Completed;
            entry.result = Some(result);
            entry.continuation = None;
            entry.paused_until = None;
            entry.last_activity = Utc::now();
            info!(execution_id = %id, "execution completed");
        }
    }

    pub fn mark_failed(&self, id: &str, kind: &str, message: &str) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.status = ExecutionStatus::Failed;
            entry.error = Some(ErrorInfo {
                kind: kind.to_string(),
                message: message.to_string(),
                details: None,
            });
            entry.continuation = None;
            entry.paused_until = None;
            entry.last_activity = Utc::now();
            info!(execution_id = %id, kind, "execution failed");
        }
    }

    /// Cooperative cancel. Returns `false` for unknown or already
    /// terminal executions.
    pub fn cancel(&self, id: &str) -> bool {
        match self.entries.get_mut(id) {
            Some(mut entry) if !entry.status.is_terminal() => {
                entry.cancelled.store(true, Ordering::Relaxed);
                entry.status = ExecutionStatus::Failed;
                entry.error = Some(ErrorInfo {
                    kind: "cancelled".to_string(),
                    message: "execution cancelled by client".to_string(),
                    details: None,
                });
                entry.continuation = None;
                entry.paused_until = None;
                entry.last_activity = Utc::now();
                info!(execution_id = %id, "execution cancelled");
                true
            }
            _ => false,
        }
    }

    pub fn append_progress(&self, id: &str, events: Vec<ProgressEvent>) {
        if events.is_empty() {
            return;
        }
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.progress.extend(events);
        }
    }

    /// Rehydrate an entry loaded from the durable store.
    pub fn adopt(&self, entry: ExecutionEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    /// Sweep paused executions whose TTL elapsed without a resume.
    /// Returns the ids that were expired.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| {
                e.status == ExecutionStatus::Paused
                    && matches!(e.paused_until, Some(until) if until <= now)
            })
            .map(|e| e.id.clone())
            .collect();
        for id in &expired {
            if let Some(mut entry) = self.entries.get_mut(id) {
                entry.status = ExecutionStatus::Failed;
                entry.error = Some(ErrorInfo {
                    kind: "expired".to_string(),
                    message: "paused execution expired before resume".to_string(),
                    details: None,
                });
                entry.continuation = None;
                entry.paused_until = None;
                warn!(execution_id = %id, "paused execution expired");
            }
        }
        expired
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.entries.iter() {
            match entry.status {
                ExecutionStatus::Running => counts.running += 1,
                ExecutionStatus::Paused => counts.paused += 1,
                ExecutionStatus::Completed => counts.completed += 1,
                ExecutionStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pause::{PauseKind, PauseSignal};
    use serde_json::json;

    fn continuation(id: &str) -> ContinuationRequest {
        let signal = PauseSignal::new(PauseKind::Llm, "complete", json!({}), 1);
        ContinuationRequest::from_signal(id, &signal, "/resume")
    }

    fn manager_with(id: &str) -> ExecutionStateManager {
        let manager = ExecutionStateManager::new();
        assert!(manager.create(id, "return 1;", "hash", ExecutionLimits::default()));
        manager
    }

    #[test]
    fn lifecycle_transitions() {
        let manager = manager_with("e1");
        assert_eq!(manager.get("e1").unwrap().status, ExecutionStatus::Running);

        manager.mark_paused("e1", continuation("e1"));
        let entry = manager.get("e1").unwrap();
        assert_eq!(entry.status, ExecutionStatus::Paused);
        assert!(entry.continuation.is_some());
        assert!(entry.paused_until.is_some());

        manager.mark_completed("e1", json!(42));
        let entry = manager.get("e1").unwrap();
        assert_eq!(entry.status, ExecutionStatus::Completed);
        assert_eq!(entry.result, Some(json!(42)));
        assert!(entry.continuation.is_none());
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let manager = manager_with("e1");
        assert!(!manager.create("e1", "return 2;", "other", ExecutionLimits::default()));
    }

    #[test]
    fn cancel_sets_flag_and_fails_entry() {
        let manager = manager_with("e1");
        let flag = manager.cancel_flag("e1").unwrap();
        assert!(manager.cancel("e1"));
        assert!(flag.load(Ordering::Relaxed));

        let entry = manager.get("e1").unwrap();
        assert_eq!(entry.status, ExecutionStatus::Failed);
        assert_eq!(entry.error.as_ref().unwrap().kind, "cancelled");
        // terminal executions cannot be cancelled again
        assert!(!manager.cancel("e1"));
    }

    #[test]
    fn sweep_expires_overdue_paused_executions() {
        let manager = manager_with("e1");
        manager.mark_paused("e1", continuation("e1"));

        // not yet expired
        assert!(manager.sweep_expired(Utc::now()).is_empty());

        let later = Utc::now() + Duration::seconds(3600 * 24);
        let expired = manager.sweep_expired(later);
        assert_eq!(expired, vec!["e1".to_string()]);
        let entry = manager.get("e1").unwrap();
        assert_eq!(entry.status, ExecutionStatus::Failed);
        assert_eq!(entry.error.as_ref().unwrap().kind, "expired");
    }

    #[test]
    fn counts_by_status() {
        let manager = ExecutionStateManager::new();
        manager.create("a", "", "h", ExecutionLimits::default());
        manager.create("b", "", "h", ExecutionLimits::default());
        manager.mark_completed("b", json!(null));

        let counts = manager.counts();
        assert_eq!(counts.running, 1);
        assert_eq!(counts.completed, 1);
    }
}
