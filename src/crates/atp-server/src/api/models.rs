//! Wire models for the execution API

use atp_core::{ContinuationRequest, EngineError, ExecutionOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// `POST /api/v1/executions/:id/resume` body: callback results keyed by
/// sequence number (JSON object keys arrive as strings).
#[derive(Debug, Clone, Deserialize)]
pub struct ResumeBody {
    pub results: HashMap<String, Value>,
}

impl ResumeBody {
    /// Parse the string-keyed result map into sequence numbers.
    pub fn parsed(self) -> Result<HashMap<u64, Value>, String> {
        let mut out = HashMap::with_capacity(self.results.len());
        for (key, value) in self.results {
            let seq: u64 = key
                .parse()
                .map_err(|_| format!("'{}' is not a sequence number", key))?;
            out.insert(seq, value);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// Uniform submit/resume response shape.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionResponse {
    Completed {
        #[serde(rename = "executionId")]
        execution_id: String,
        result: Value,
    },
    Paused {
        #[serde(rename = "executionId")]
        execution_id: String,
        pause: ContinuationRequest,
    },
    Failed {
        #[serde(rename = "executionId", skip_serializing_if = "Option::is_none")]
        execution_id: Option<String>,
        error: ErrorBody,
    },
}

impl ExecutionResponse {
    pub fn from_outcome(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Completed {
                execution_id,
                result,
            } => ExecutionResponse::Completed {
                execution_id,
                result,
            },
            ExecutionOutcome::Paused { continuation } => ExecutionResponse::Paused {
                execution_id: continuation.execution_id.clone(),
                pause: continuation,
            },
        }
    }

    pub fn failed(execution_id: Option<String>, error: &EngineError) -> Self {
        ExecutionResponse::Failed {
            execution_id,
            error: ErrorBody {
                kind: error.kind().to_string(),
                message: error.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resume_body_parses_sequence_keys() {
        let body = ResumeBody {
            results: [("1".to_string(), json!("a")), ("12".to_string(), json!(2))]
                .into_iter()
                .collect(),
        };
        let parsed = body.parsed().unwrap();
        assert_eq!(parsed.get(&1), Some(&json!("a")));
        assert_eq!(parsed.get(&12), Some(&json!(2)));
    }

    #[test]
    fn resume_body_rejects_bad_keys() {
        let body = ResumeBody {
            results: [("one".to_string(), json!("a"))].into_iter().collect(),
        };
        assert!(body.parsed().is_err());
    }

    #[test]
    fn failed_response_shape() {
        let error = EngineError::User {
            message: "boom".into(),
            stack: None,
        };
        let response = ExecutionResponse::failed(Some("e1".into()), &error);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], json!("failed"));
        assert_eq!(json["error"]["kind"], json!("user-error"));
        assert_eq!(json["error"]["message"], json!("boom"));
    }

    #[test]
    fn completed_response_shape() {
        let response = ExecutionResponse::Completed {
            execution_id: "e1".into(),
            result: json!(3),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], json!("completed"));
        assert_eq!(json["result"], json!(3));
    }
}
