//! Sandbox executor
//!
//! Drives the whole lifecycle of an execution: resolve limits, look the
//! transform up in the process-wide cache (keyed by content hash),
//! initialize the checkpoint manager and execution context from the
//! durable store, run the program on a blocking task, and classify the
//! outcome. On resume the client's callback results are written through
//! the checkpoint manager *before* the rerun starts, so the replay
//! fast-forwards through all completed work and stops at the next
//! unsatisfied callback - or finishes.
//!
//! State machine per execution: `running -> {completed, failed,
//! paused}`; a resume takes `paused` back to `running`; terminal states
//! are `completed` and `failed`. A paused execution that outlives its
//! TTL is swept to `failed/expired` and refuses resumes.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use atp_checkpoint::{
    manager::{transform_key, user_data_key},
    CacheProvider, CallbackKind, CheckpointError, CheckpointManager,
};
use atp_script::{code_hash, transform_source, TransformMetadata, TransformOutput};

use crate::error::{EngineError, EngineResult};
use crate::interp::{HostOp, HostRequest, Interpreter, RunResult, SandboxOutcome};
use crate::limits::{ExecutionHints, ExecutionLimits, LimitOverrides};
use crate::pause::ContinuationRequest;
use crate::sequence::{ExecutionContext, ProgressEvent};
use crate::state::{ErrorInfo, ExecutionEntry, ExecutionStateManager, ExecutionStatus};

/// Serializable view of what the transformer did to a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformInfo {
    pub patterns: Vec<String>,
    pub loops_transformed: usize,
    pub array_methods_transformed: usize,
    pub parallel_transformed: usize,
    pub batch_emitted: bool,
}

impl From<&TransformMetadata> for TransformInfo {
    fn from(meta: &TransformMetadata) -> Self {
        Self {
            patterns: meta.patterns.clone(),
            loops_transformed: meta.loops_transformed,
            array_methods_transformed: meta.array_methods_transformed,
            parallel_transformed: meta.parallel_transformed,
            batch_emitted: meta.batch_emitted,
        }
    }
}

/// A submit request: program text plus optional id, limits, and hints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub code: String,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub limits: Option<LimitOverrides>,
    #[serde(default)]
    pub hints: Option<ExecutionHints>,
}

impl SubmitRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            execution_id: None,
            limits: None,
            hints: None,
        }
    }
}

/// How a submit or resume ended (failures travel as [`EngineError`]).
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Completed {
        execution_id: String,
        result: Json,
    },
    Paused {
        continuation: ContinuationRequest,
    },
}

/// Current state of an execution, served to status queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub execution_id: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation: Option<ContinuationRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub progress: Vec<ProgressEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformInfo>,
}

/// Durable execution record, persisted under
/// `<prefix>:<execution_id>:execution` so paused executions survive a
/// process restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DurableExecution {
    code: String,
    code_hash: String,
    limits: ExecutionLimits,
    status: String,
    #[serde(default)]
    result: Option<Json>,
    #[serde(default)]
    error: Option<ErrorInfo>,
    created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Cache key prefix for all persisted state.
    pub key_prefix: String,
    /// Path prefix used to build resume URLs.
    pub resume_path: String,
    /// TTL applied to persisted callback records.
    pub record_ttl: Option<Duration>,
    pub default_limits: ExecutionLimits,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            key_prefix: "atp".to_string(),
            resume_path: "/executions".to_string(),
            record_ttl: None,
            default_limits: ExecutionLimits::default(),
        }
    }
}

pub struct SandboxExecutor {
    provider: Arc<dyn CacheProvider>,
    state: Arc<ExecutionStateManager>,
    transforms: DashMap<String, Arc<TransformOutput>>,
    transforms_computed: AtomicU64,
    transform_hits: AtomicU64,
    config: ExecutorConfig,
}

impl SandboxExecutor {
    pub fn new(provider: Arc<dyn CacheProvider>, config: ExecutorConfig) -> Self {
        Self {
            provider,
            state: Arc::new(ExecutionStateManager::new()),
            transforms: DashMap::new(),
            transforms_computed: AtomicU64::new(0),
            transform_hits: AtomicU64::new(0),
            config,
        }
    }

    pub fn state(&self) -> &Arc<ExecutionStateManager> {
        &self.state
    }

    /// How many distinct programs have actually been transformed (cache
    /// hits do not count).
    pub fn transforms_computed(&self) -> u64 {
        self.transforms_computed.load(Ordering::Relaxed)
    }

    pub fn transform_hits(&self) -> u64 {
        self.transform_hits.load(Ordering::Relaxed)
    }

    fn manager_for(&self, execution_id: &str) -> CheckpointManager {
        CheckpointManager::new(self.provider.clone(), execution_id)
            .with_prefix(&self.config.key_prefix)
            .with_record_ttl(self.config.record_ttl)
    }

    // ----- external interface -----------------------------------------

    pub async fn submit(&self, request: SubmitRequest) -> EngineResult<ExecutionOutcome> {
        let id = request
            .execution_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let hash = code_hash(&request.code);

        if !self.state.contains(&id) {
            self.rehydrate(&id).await?;
        }
        if let Some(entry) = self.state.get(&id) {
            // invariant: one execution id, one program text
            if entry.code_hash != hash {
                return Err(EngineError::CodeMismatch(id));
            }
            match entry.status {
                ExecutionStatus::Completed => {
                    return Ok(ExecutionOutcome::Completed {
                        execution_id: id,
                        result: entry.result.unwrap_or(Json::Null),
                    })
                }
                ExecutionStatus::Failed => {
                    return Err(EngineError::InvalidState {
                        id,
                        status: "failed".to_string(),
                    })
                }
                _ => {}
            }
        } else {
            let limits = self
                .config
                .default_limits
                .resolve(request.limits.as_ref(), request.hints.as_ref());
            self.state.create(&id, &request.code, &hash, limits);
            info!(execution_id = %id, code_hash = %hash, "execution created");
            self.save_durable(&id).await?;
        }

        self.run_attempt(&id).await
    }

    pub async fn resume(
        &self,
        execution_id: &str,
        results: HashMap<u64, Json>,
    ) -> EngineResult<ExecutionOutcome> {
        if !self.state.contains(execution_id) {
            self.rehydrate(execution_id).await?;
        }
        let entry = self
            .state
            .get(execution_id)
            .ok_or_else(|| EngineError::UnknownExecution(execution_id.to_string()))?;

        if entry.status != ExecutionStatus::Paused {
            return Err(EngineError::InvalidState {
                id: execution_id.to_string(),
                status: entry.status.as_str().to_string(),
            });
        }
        if matches!(entry.paused_until, Some(until) if until <= Utc::now()) {
            self.state.sweep_expired(Utc::now());
            return Err(EngineError::InvalidState {
                id: execution_id.to_string(),
                status: "expired".to_string(),
            });
        }
        // resume must target the exact program text that paused
        if code_hash(&entry.code) != entry.code_hash {
            return Err(EngineError::CodeMismatch(execution_id.to_string()));
        }

        let manager = self.manager_for(execution_id);
        let continuation = entry.continuation.clone();
        for (seq, value) in results {
            let at_continuation = continuation
                .as_ref()
                .filter(|c| c.sequence_number == seq);
            match at_continuation {
                Some(c) if c.batch_len() > 0 => {
                    // a batch answer lands in the whole reserved block
                    let items = value.as_array().ok_or_else(|| {
                        EngineError::CheckpointIo(CheckpointError::Invalid(
                            "batch result must be an array".to_string(),
                        ))
                    })?;
                    if items.len() != c.batch_len() {
                        return Err(EngineError::CheckpointIo(CheckpointError::Invalid(
                            format!(
                                "batch result has {} entries, expected {}",
                                items.len(),
                                c.batch_len()
                            ),
                        )));
                    }
                    for (i, item) in items.iter().enumerate() {
                        manager
                            .save_result(seq + 1 + i as u64, CallbackKind::BatchItem, item.clone())
                            .await?;
                    }
                    manager.save_result(seq, CallbackKind::Batch, value).await?;
                }
                Some(c) => {
                    manager
                        .save_result(seq, c.kind.record_kind(), value)
                        .await?;
                }
                None => {
                    manager.save_result(seq, CallbackKind::Tool, value).await?;
                }
            }
        }

        self.state.mark_running(execution_id);
        self.run_attempt(execution_id).await
    }

    pub async fn status(&self, execution_id: &str) -> EngineResult<StatusReport> {
        if !self.state.contains(execution_id) {
            self.rehydrate(execution_id).await?;
        }
        let entry = self
            .state
            .get(execution_id)
            .ok_or_else(|| EngineError::UnknownExecution(execution_id.to_string()))?;
        let transform = self
            .transforms
            .get(&entry.code_hash)
            .map(|t| TransformInfo::from(&t.metadata));
        Ok(StatusReport {
            execution_id: entry.id,
            status: entry.status,
            continuation: entry.continuation,
            result: entry.result,
            error: entry.error,
            progress: entry.progress,
            transform,
        })
    }

    pub async fn cancel(&self, execution_id: &str) -> EngineResult<()> {
        if !self.state.contains(execution_id) {
            self.rehydrate(execution_id).await?;
        }
        let entry = self
            .state
            .get(execution_id)
            .ok_or_else(|| EngineError::UnknownExecution(execution_id.to_string()))?;
        if !self.state.cancel(execution_id) {
            return Err(EngineError::InvalidState {
                id: execution_id.to_string(),
                status: entry.status.as_str().to_string(),
            });
        }
        self.save_durable(execution_id).await?;
        Ok(())
    }

    /// Expire overdue paused executions; returns the expired ids.
    pub fn sweep_expired(&self) -> Vec<String> {
        self.state.sweep_expired(Utc::now())
    }

    // ----- internals ---------------------------------------------------

    fn transform(&self, code: &str) -> EngineResult<(String, Arc<TransformOutput>)> {
        let hash = code_hash(code);
        if let Some(cached) = self.transforms.get(&hash) {
            self.transform_hits.fetch_add(1, Ordering::Relaxed);
            return Ok((hash, cached.clone()));
        }
        let output = Arc::new(transform_source(code)?);
        debug!(
            code_hash = %hash,
            loops = output.metadata.loops_transformed,
            array_methods = output.metadata.array_methods_transformed,
            parallel = output.metadata.parallel_transformed,
            batch = output.metadata.batch_emitted,
            "transformed program"
        );
        self.transforms.insert(hash.clone(), output.clone());
        self.transforms_computed.fetch_add(1, Ordering::Relaxed);
        Ok((hash, output))
    }

    async fn run_attempt(&self, execution_id: &str) -> EngineResult<ExecutionOutcome> {
        let entry = self
            .state
            .get(execution_id)
            .ok_or_else(|| EngineError::UnknownExecution(execution_id.to_string()))?;

        let (hash, transform) = match self.transform(&entry.code) {
            Ok(transformed) => transformed,
            Err(error) => {
                self.state
                    .mark_failed(execution_id, error.kind(), &error.to_string());
                let _ = self.save_durable(execution_id).await;
                return Err(error);
            }
        };
        // best-effort durable copy of the transformed source
        let key = transform_key(&self.config.key_prefix, &hash);
        if let Err(error) = self
            .provider
            .set(&key, Json::String(transform.source.clone()), None)
            .await
        {
            warn!(%key, %error, "could not persist transformed source");
        }

        let manager = self.manager_for(execution_id);
        let mut snapshot = manager.load_all().await?;
        let cancel = self
            .state
            .cancel_flag(execution_id)
            .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
        let limits = entry.limits.clone();

        // bounded so a misbehaving host-request cycle cannot spin
        let max_reruns = limits.max_callbacks as u64 + 16;
        for _ in 0..max_reruns {
            let ctx = ExecutionContext::new(execution_id, snapshot.clone());
            let interp = Interpreter::new(ctx, limits.clone(), cancel.clone());
            let program = transform.clone();
            let RunResult { outcome, ctx } =
                tokio::task::spawn_blocking(move || interp.run(&program.program))
                    .await
                    .map_err(|e| EngineError::User {
                        message: format!("sandbox task failed: {}", e),
                        stack: None,
                    })?;

            // persist completed slots before anything returns to the client
            for (ordinal, index, record) in ctx.pending_slots {
                snapshot.slots.insert((ordinal, index), record.clone());
                manager.save_slot(ordinal, index, record).await?;
            }
            self.state.append_progress(execution_id, ctx.progress);

            match outcome {
                SandboxOutcome::Completed(result) => {
                    self.state.mark_completed(execution_id, result.clone());
                    manager.clear_continuation().await?;
                    self.save_durable(execution_id).await?;
                    return Ok(ExecutionOutcome::Completed {
                        execution_id: execution_id.to_string(),
                        result,
                    });
                }
                SandboxOutcome::Paused(signal) => {
                    let resume_url = format!(
                        "{}/{}/resume",
                        self.config.resume_path.trim_end_matches('/'),
                        execution_id
                    );
                    let continuation =
                        ContinuationRequest::from_signal(execution_id, &signal, resume_url);
                    manager
                        .save_continuation(serde_json::to_value(&continuation).map_err(
                            |e| EngineError::CheckpointIo(CheckpointError::Serialization(e)),
                        )?)
                        .await?;
                    self.state.mark_paused(execution_id, continuation.clone());
                    self.save_durable(execution_id).await?;
                    debug!(
                        execution_id,
                        seq = continuation.sequence_number,
                        kind = ?continuation.kind,
                        "execution paused"
                    );
                    return Ok(ExecutionOutcome::Paused { continuation });
                }
                SandboxOutcome::Host(request) => {
                    let value = self.handle_host(&request).await?;
                    manager
                        .save_result(request.sequence_number, CallbackKind::Cache, value.clone())
                        .await?;
                    snapshot.results.insert(request.sequence_number, value);
                }
                SandboxOutcome::Failed(error) => {
                    self.state
                        .mark_failed(execution_id, error.kind(), &error.to_string());
                    let _ = self.save_durable(execution_id).await;
                    return Err(error);
                }
            }
        }
        let error = EngineError::limit("host request budget");
        self.state
            .mark_failed(execution_id, error.kind(), &error.to_string());
        Err(error)
    }

    async fn handle_host(&self, request: &HostRequest) -> EngineResult<Json> {
        match &request.op {
            HostOp::CacheGet { key } => {
                let key = user_data_key(&self.config.key_prefix, key);
                Ok(self.provider.get(&key).await?.unwrap_or(Json::Null))
            }
            HostOp::CacheSet {
                key,
                value,
                ttl_seconds,
            } => {
                let key = user_data_key(&self.config.key_prefix, key);
                let ttl = ttl_seconds.map(Duration::from_secs);
                self.provider.set(&key, value.clone(), ttl).await?;
                Ok(value.clone())
            }
        }
    }

    async fn save_durable(&self, execution_id: &str) -> EngineResult<()> {
        let Some(entry) = self.state.get(execution_id) else {
            return Ok(());
        };
        let record = DurableExecution {
            code: entry.code,
            code_hash: entry.code_hash,
            limits: entry.limits,
            status: entry.status.as_str().to_string(),
            result: entry.result,
            error: entry.error,
            created_at: entry.last_activity,
        };
        let manager = self.manager_for(execution_id);
        manager
            .save_execution(
                serde_json::to_value(&record)
                    .map_err(|e| EngineError::CheckpointIo(CheckpointError::Serialization(e)))?,
            )
            .await?;
        Ok(())
    }

    /// Load a durable execution record into the in-process index, for
    /// resumes and status queries after a restart.
    async fn rehydrate(&self, execution_id: &str) -> EngineResult<()> {
        let manager = self.manager_for(execution_id);
        let Some(raw) = manager.load_execution().await? else {
            return Ok(());
        };
        let durable: DurableExecution = serde_json::from_value(raw).map_err(|e| {
            EngineError::CheckpointIo(CheckpointError::Invalid(format!(
                "execution record: {}",
                e
            )))
        })?;
        let status = match durable.status.as_str() {
            "paused" => ExecutionStatus::Paused,
            "completed" => ExecutionStatus::Completed,
            "failed" => ExecutionStatus::Failed,
            _ => ExecutionStatus::Running,
        };
        let continuation = if status == ExecutionStatus::Paused {
            match manager.load_continuation().await? {
                Some(raw) => serde_json::from_value(raw).ok(),
                None => None,
            }
        } else {
            None
        };
        let paused_until = (status == ExecutionStatus::Paused).then(|| {
            Utc::now() + chrono::Duration::seconds(durable.limits.paused_ttl_seconds as i64)
        });
        info!(execution_id, status = %status, "rehydrated execution from durable store");
        self.state.adopt(ExecutionEntry {
            id: execution_id.to_string(),
            code: durable.code,
            code_hash: durable.code_hash,
            limits: durable.limits,
            status,
            result: durable.result,
            error: durable.error,
            continuation,
            progress: Vec::new(),
            last_activity: Utc::now(),
            paused_until,
            cancelled: Arc::new(AtomicBool::new(false)),
        });
        Ok(())
    }
}
