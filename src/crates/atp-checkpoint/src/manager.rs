//! Per-execution checkpoint manager
//!
//! A [`CheckpointManager`] binds one execution id to a [`CacheProvider`]
//! and a key prefix. At execution start it eagerly loads every known
//! callback record for the execution into a [`ReplaySnapshot`]; during
//! and after a run it writes new results to the cache before control
//! returns to the runtime, keeping the manifest current as it goes.
//!
//! Provider failures surface as [`CheckpointError::Io`] carrying the
//! operation tag (`save`/`load`/`clear`) and the key involved.

use crate::error::{CheckpointError, CheckpointOp, Result};
use crate::provider::CacheProvider;
use crate::record::{CallbackKind, CallbackRecord, Manifest, SlotRecord};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default key prefix when none is configured.
pub const DEFAULT_PREFIX: &str = "atp";

/// Key for a cached transformed source, `<prefix>:transform:<code_hash>`.
pub fn transform_key(prefix: &str, code_hash: &str) -> String {
    format!("{}:transform:{}", prefix, code_hash)
}

/// Key in the sandbox cache API namespace, `<prefix>:userdata:<key>`.
pub fn user_data_key(prefix: &str, key: &str) -> String {
    format!("{}:userdata:{}", prefix, key)
}

/// Everything previously recorded for one execution, loaded eagerly at
/// execution start and frozen for the lifetime of one attempt.
#[derive(Debug, Clone, Default)]
pub struct ReplaySnapshot {
    /// Callback results keyed by sequence number.
    pub results: HashMap<u64, Value>,
    /// Primitive slot records keyed by `(instance_ordinal, index)`.
    pub slots: HashMap<(u64, usize), SlotRecord>,
}

/// Persists and loads per-execution callback results.
#[derive(Clone)]
pub struct CheckpointManager {
    provider: Arc<dyn CacheProvider>,
    prefix: String,
    execution_id: String,
    record_ttl: Option<Duration>,
}

impl CheckpointManager {
    pub fn new(provider: Arc<dyn CacheProvider>, execution_id: impl Into<String>) -> Self {
        Self {
            provider,
            prefix: DEFAULT_PREFIX.to_string(),
            execution_id: execution_id.into(),
            record_ttl: None,
        }
    }

    /// Override the key prefix (defaults to [`DEFAULT_PREFIX`]).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// TTL applied to every record written by this manager.
    pub fn with_record_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.record_ttl = ttl;
        self
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn record_key(&self, seq: u64) -> String {
        format!("{}:{}:{}", self.prefix, self.execution_id, seq)
    }

    fn slot_key(&self, ordinal: u64, index: usize) -> String {
        format!("{}:{}:slot:{}:{}", self.prefix, self.execution_id, ordinal, index)
    }

    fn manifest_key(&self) -> String {
        format!("{}:{}:manifest", self.prefix, self.execution_id)
    }

    fn execution_key(&self) -> String {
        format!("{}:{}:execution", self.prefix, self.execution_id)
    }

    fn continuation_key(&self) -> String {
        format!("{}:{}:continuation", self.prefix, self.execution_id)
    }

    async fn read(&self, key: &str) -> Result<Option<Value>> {
        self.provider
            .get(key)
            .await
            .map_err(|e| CheckpointError::io(CheckpointOp::Load, key, e))
    }

    async fn write(&self, key: &str, value: Value) -> Result<()> {
        self.provider
            .set(key, value, self.record_ttl)
            .await
            .map_err(|e| CheckpointError::io(CheckpointOp::Save, key, e))
    }

    async fn load_manifest(&self) -> Result<Manifest> {
        match self.read(&self.manifest_key()).await? {
            Some(value) => Ok(serde_json::from_value(value)
                .map_err(|e| CheckpointError::Invalid(format!("manifest: {}", e)))?),
            None => Ok(Manifest::default()),
        }
    }

    async fn store_manifest(&self, manifest: &Manifest) -> Result<()> {
        self.write(&self.manifest_key(), serde_json::to_value(manifest)?)
            .await
    }

    /// Load every recorded callback result and slot record for this
    /// execution into a replay snapshot.
    pub async fn load_all(&self) -> Result<ReplaySnapshot> {
        let manifest = self.load_manifest().await?;
        let mut snapshot = ReplaySnapshot::default();

        for seq in &manifest.sequences {
            let key = self.record_key(*seq);
            if let Some(value) = self.read(&key).await? {
                let record: CallbackRecord = serde_json::from_value(value)
                    .map_err(|e| CheckpointError::Invalid(format!("record {}: {}", key, e)))?;
                snapshot.results.insert(*seq, record.value);
            }
        }
        for (ordinal, index) in &manifest.slots {
            let key = self.slot_key(*ordinal, *index);
            if let Some(value) = self.read(&key).await? {
                let record: SlotRecord = serde_json::from_value(value)
                    .map_err(|e| CheckpointError::Invalid(format!("slot {}: {}", key, e)))?;
                snapshot.slots.insert((*ordinal, *index), record);
            }
        }

        debug!(
            execution_id = %self.execution_id,
            results = snapshot.results.len(),
            slots = snapshot.slots.len(),
            "loaded replay snapshot"
        );
        Ok(snapshot)
    }

    /// Persist one callback result. Records are write-once per sequence
    /// number within an execution; a duplicate save keeps the original.
    pub async fn save_result(&self, seq: u64, kind: CallbackKind, value: Value) -> Result<()> {
        let key = self.record_key(seq);
        let exists = self
            .provider
            .has(&key)
            .await
            .map_err(|e| CheckpointError::io(CheckpointOp::Save, &key, e))?;
        if exists {
            debug!(execution_id = %self.execution_id, seq, "callback record already present, keeping original");
            return Ok(());
        }

        let record = CallbackRecord::new(seq, kind, value);
        self.write(&key, serde_json::to_value(&record)?).await?;

        let mut manifest = self.load_manifest().await?;
        if !manifest.sequences.contains(&seq) {
            manifest.sequences.push(seq);
            manifest.sequences.sort_unstable();
            self.store_manifest(&manifest).await?;
        }
        Ok(())
    }

    /// Persist a primitive slot record (write-once, like callback records).
    pub async fn save_slot(&self, ordinal: u64, index: usize, record: SlotRecord) -> Result<()> {
        let key = self.slot_key(ordinal, index);
        let exists = self
            .provider
            .has(&key)
            .await
            .map_err(|e| CheckpointError::io(CheckpointOp::Save, &key, e))?;
        if exists {
            return Ok(());
        }

        self.write(&key, serde_json::to_value(&record)?).await?;

        let mut manifest = self.load_manifest().await?;
        if !manifest.slots.contains(&(ordinal, index)) {
            manifest.slots.push((ordinal, index));
            manifest.slots.sort_unstable();
            self.store_manifest(&manifest).await?;
        }
        Ok(())
    }

    /// Persist the execution record (code, hash, limits, status).
    pub async fn save_execution(&self, value: Value) -> Result<()> {
        self.write(&self.execution_key(), value).await
    }

    pub async fn load_execution(&self) -> Result<Option<Value>> {
        self.read(&self.execution_key()).await
    }

    /// Persist the pending continuation request for a paused execution.
    pub async fn save_continuation(&self, value: Value) -> Result<()> {
        self.write(&self.continuation_key(), value).await
    }

    pub async fn load_continuation(&self) -> Result<Option<Value>> {
        self.read(&self.continuation_key()).await
    }

    pub async fn clear_continuation(&self) -> Result<()> {
        let key = self.continuation_key();
        self.provider
            .delete(&key)
            .await
            .map_err(|e| CheckpointError::io(CheckpointOp::Clear, &key, e))
    }

    /// Remove everything stored for this execution.
    pub async fn clear(&self) -> Result<()> {
        let manifest = self.load_manifest().await?;
        for seq in &manifest.sequences {
            let key = self.record_key(*seq);
            self.provider
                .delete(&key)
                .await
                .map_err(|e| CheckpointError::io(CheckpointOp::Clear, &key, e))?;
        }
        for (ordinal, index) in &manifest.slots {
            let key = self.slot_key(*ordinal, *index);
            self.provider
                .delete(&key)
                .await
                .map_err(|e| CheckpointError::io(CheckpointOp::Clear, &key, e))?;
        }
        for key in [
            self.manifest_key(),
            self.execution_key(),
            self.continuation_key(),
        ] {
            self.provider
                .delete(&key)
                .await
                .map_err(|e| CheckpointError::io(CheckpointOp::Clear, &key, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::InMemoryCacheProvider;
    use serde_json::json;

    fn manager(provider: &Arc<InMemoryCacheProvider>) -> CheckpointManager {
        CheckpointManager::new(provider.clone(), "exec-1")
    }

    #[tokio::test]
    async fn save_then_load_roundtrip() {
        let provider = Arc::new(InMemoryCacheProvider::new());
        let mgr = manager(&provider);

        mgr.save_result(1, CallbackKind::Llm, json!("hello"))
            .await
            .unwrap();
        mgr.save_result(2, CallbackKind::Tool, json!({"out": 7}))
            .await
            .unwrap();
        mgr.save_slot(
            1,
            0,
            SlotRecord {
                value: json!("a"),
                seq_span: 1,
                instance_span: 0,
            },
        )
        .await
        .unwrap();

        let snapshot = mgr.load_all().await.unwrap();
        assert_eq!(snapshot.results.get(&1), Some(&json!("hello")));
        assert_eq!(snapshot.results.get(&2), Some(&json!({"out": 7})));
        assert_eq!(snapshot.slots.get(&(1, 0)).unwrap().value, json!("a"));
    }

    #[tokio::test]
    async fn records_are_write_once() {
        let provider = Arc::new(InMemoryCacheProvider::new());
        let mgr = manager(&provider);

        mgr.save_result(1, CallbackKind::Llm, json!("first"))
            .await
            .unwrap();
        mgr.save_result(1, CallbackKind::Llm, json!("second"))
            .await
            .unwrap();

        let snapshot = mgr.load_all().await.unwrap();
        assert_eq!(snapshot.results.get(&1), Some(&json!("first")));
    }

    #[tokio::test]
    async fn executions_are_isolated_by_id() {
        let provider = Arc::new(InMemoryCacheProvider::new());
        let a = CheckpointManager::new(provider.clone(), "exec-a");
        let b = CheckpointManager::new(provider.clone(), "exec-b");

        a.save_result(1, CallbackKind::Llm, json!("for-a"))
            .await
            .unwrap();

        let snapshot = b.load_all().await.unwrap();
        assert!(snapshot.results.is_empty());
    }

    #[tokio::test]
    async fn clear_removes_all_keys() {
        let provider = Arc::new(InMemoryCacheProvider::new());
        let mgr = manager(&provider);

        mgr.save_result(1, CallbackKind::Llm, json!("x"))
            .await
            .unwrap();
        mgr.save_execution(json!({"status": "paused"})).await.unwrap();
        mgr.save_continuation(json!({"kind": "LLM"})).await.unwrap();
        mgr.clear().await.unwrap();

        assert!(provider.is_empty().await);
        assert!(mgr.load_all().await.unwrap().results.is_empty());
    }

    #[tokio::test]
    async fn continuation_roundtrip() {
        let provider = Arc::new(InMemoryCacheProvider::new());
        let mgr = manager(&provider);

        mgr.save_continuation(json!({"sequenceNumber": 1}))
            .await
            .unwrap();
        assert_eq!(
            mgr.load_continuation().await.unwrap(),
            Some(json!({"sequenceNumber": 1}))
        );
        mgr.clear_continuation().await.unwrap();
        assert_eq!(mgr.load_continuation().await.unwrap(), None);
    }

    #[test]
    fn auxiliary_keys() {
        assert_eq!(transform_key("atp", "abc"), "atp:transform:abc");
        assert_eq!(user_data_key("atp", "session"), "atp:userdata:session");
    }
}
