//! The pause protocol
//!
//! A pause is the uniform "suspend with payload" signal used by every
//! callback kind: the sandbox runtime raises a [`PauseSignal`] on the
//! interpreter's control-flow channel, the executor catches it at the
//! top of the run and turns it into a [`ContinuationRequest`] for the
//! client. No other path in the engine produces this signal, and user
//! `try/catch` never observes it - the executor is its only consumer.

use atp_checkpoint::CallbackKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire kind of a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseKind {
    #[serde(rename = "LLM")]
    Llm,
    #[serde(rename = "approval")]
    Approval,
    #[serde(rename = "embedding")]
    Embedding,
    #[serde(rename = "tool")]
    Tool,
    #[serde(rename = "batch")]
    Batch,
}

impl PauseKind {
    /// The checkpoint record kind a callback of this pause kind produces.
    pub fn record_kind(&self) -> CallbackKind {
        match self {
            PauseKind::Llm => CallbackKind::Llm,
            PauseKind::Approval => CallbackKind::Approval,
            PauseKind::Embedding => CallbackKind::Embedding,
            PauseKind::Tool => CallbackKind::Tool,
            PauseKind::Batch => CallbackKind::Batch,
        }
    }
}

/// Suspension signal raised inside the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseSignal {
    pub kind: PauseKind,
    /// Kind-specific sub-operation, e.g. `complete` or `parallel`.
    pub operation: String,
    pub payload: Value,
    pub sequence_number: u64,
    /// Index of the resumable-primitive iteration the pause was raised
    /// from, when it was raised inside one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<usize>,
}

impl PauseSignal {
    pub fn new(kind: PauseKind, operation: impl Into<String>, payload: Value, seq: u64) -> Self {
        Self {
            kind,
            operation: operation.into(),
            payload,
            sequence_number: seq,
            iteration: None,
        }
    }
}

/// One entry of a batch pause; sequence numbers of a batch's calls form
/// a consecutive block immediately after the batch's own number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCall {
    pub kind: PauseKind,
    pub payload: Value,
    pub sequence_number: u64,
}

/// What the server hands the client when an execution pauses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationRequest {
    pub execution_id: String,
    pub kind: PauseKind,
    pub operation: String,
    pub payload: Value,
    pub sequence_number: u64,
    pub resume_url: String,
}

impl ContinuationRequest {
    pub fn from_signal(execution_id: impl Into<String>, signal: &PauseSignal, resume_url: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            kind: signal.kind,
            operation: signal.operation.clone(),
            payload: signal.payload.clone(),
            sequence_number: signal.sequence_number,
            resume_url: resume_url.into(),
        }
    }

    /// Number of calls carried by a batch continuation (0 otherwise).
    pub fn batch_len(&self) -> usize {
        if self.kind != PauseKind::Batch {
            return 0;
        }
        self.payload
            .get("calls")
            .and_then(|calls| calls.as_array())
            .map(|calls| calls.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pause_kind_wire_names() {
        assert_eq!(serde_json::to_string(&PauseKind::Llm).unwrap(), "\"LLM\"");
        assert_eq!(serde_json::to_string(&PauseKind::Batch).unwrap(), "\"batch\"");
    }

    #[test]
    fn continuation_carries_signal_fields() {
        let signal = PauseSignal::new(PauseKind::Llm, "complete", json!({"prompt": "hi"}), 1);
        let continuation =
            ContinuationRequest::from_signal("exec-1", &signal, "/executions/exec-1/resume");

        assert_eq!(continuation.sequence_number, 1);
        assert_eq!(continuation.payload, json!({"prompt": "hi"}));
        assert_eq!(continuation.resume_url, "/executions/exec-1/resume");
    }

    #[test]
    fn batch_len_counts_calls() {
        let signal = PauseSignal::new(
            PauseKind::Batch,
            "parallel",
            json!({"parallelId": "p1", "calls": [{}, {}, {}]}),
            4,
        );
        let continuation = ContinuationRequest::from_signal("e", &signal, "/r");
        assert_eq!(continuation.batch_len(), 3);

        let llm = PauseSignal::new(PauseKind::Llm, "complete", json!({}), 1);
        assert_eq!(ContinuationRequest::from_signal("e", &llm, "/r").batch_len(), 0);
    }
}
