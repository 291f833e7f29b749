//! Persisted record shapes: callback records, slot records, the manifest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of callback produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallbackKind {
    #[serde(rename = "LLM")]
    Llm,
    Approval,
    Embedding,
    Tool,
    Cache,
    Batch,
    BatchItem,
    Iteration,
}

/// One persisted callback result, keyed by sequence number within an
/// execution. Once written, a record is never rewritten for the same
/// execution id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackRecord {
    pub sequence_number: u64,
    pub kind: CallbackKind,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

impl CallbackRecord {
    pub fn new(sequence_number: u64, kind: CallbackKind, value: Value) -> Self {
        Self {
            sequence_number,
            kind,
            value,
            timestamp: Utc::now(),
            ttl_seconds: None,
        }
    }
}

/// Per-slot record written by value-producing resumable primitives
/// (array methods, `Promise.all`, batch). Stores the slot's result plus
/// the sequence-number and primitive-instance spans the slot consumed, so
/// a replay that skips the slot advances both counters identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotRecord {
    pub value: Value,
    pub seq_span: u64,
    pub instance_span: u64,
}

/// Index of everything persisted for one execution, stored under the
/// manifest key and maintained on every write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Completed callback sequence numbers.
    pub sequences: Vec<u64>,
    /// Completed primitive slots as `(instance_ordinal, index)` pairs.
    pub slots: Vec<(u64, usize)>,
}

impl Manifest {
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty() && self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn callback_kind_wire_names() {
        assert_eq!(serde_json::to_string(&CallbackKind::Llm).unwrap(), "\"LLM\"");
        assert_eq!(
            serde_json::to_string(&CallbackKind::BatchItem).unwrap(),
            "\"batch-item\""
        );
        assert_eq!(
            serde_json::to_string(&CallbackKind::Iteration).unwrap(),
            "\"iteration\""
        );
    }

    #[test]
    fn record_roundtrip() {
        let record = CallbackRecord::new(3, CallbackKind::Tool, json!({"out": 1}));
        let encoded = serde_json::to_string(&record).unwrap();
        let decoded: CallbackRecord = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.sequence_number, 3);
        assert_eq!(decoded.kind, CallbackKind::Tool);
        assert_eq!(decoded.value, json!({"out": 1}));
    }

    proptest::proptest! {
        #[test]
        fn manifest_roundtrips_for_any_contents(
            sequences in proptest::collection::vec(1u64..10_000, 0..32),
            slots in proptest::collection::vec((1u64..100, 0usize..100), 0..32),
        ) {
            let manifest = Manifest { sequences, slots };
            let encoded = serde_json::to_string(&manifest).unwrap();
            let decoded: Manifest = serde_json::from_str(&encoded).unwrap();
            proptest::prop_assert_eq!(decoded.sequences, manifest.sequences);
            proptest::prop_assert_eq!(decoded.slots, manifest.slots);
        }
    }
}
