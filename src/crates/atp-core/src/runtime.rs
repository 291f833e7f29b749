//! Sandbox-visible runtime APIs
//!
//! Every API follows the same contract: advance the sequence counter,
//! return the replay-table entry if one exists for that number, and
//! otherwise suspend. LLM, approval, embedding, and tool calls suspend
//! toward the client as pauses; the cache API suspends toward the
//! executor (the server can satisfy it from the shared cache provider),
//! and its answer is recorded so replay sees the original value even if
//! the underlying key has changed since. `progress.report` is the one
//! fire-and-forget API: no sequence number, buffered per execution.

use serde_json::{json, Value as Json};

use crate::error::EngineError;
use crate::interp::value::{value_from_json, value_to_json, Value};
use crate::interp::{Flow, HostOp, HostRequest, Interpreter};
use crate::pause::{PauseKind, PauseSignal};

impl Interpreter {
    /// Common callback path: sequence number, replay lookup, pause.
    fn mediated(
        &mut self,
        kind: PauseKind,
        operation: &str,
        payload: Json,
    ) -> Result<Value, Flow> {
        self.count_callback(1)?;
        let seq = self.ctx.next_sequence_number();
        if let Some(cached) = self.ctx.cached_result(seq) {
            tracing::debug!(seq, ?kind, "callback satisfied from replay table");
            return Ok(value_from_json(cached));
        }
        tracing::debug!(seq, ?kind, operation, "callback unsatisfied, pausing");
        Err(Flow::Pause(Box::new(PauseSignal::new(
            kind, operation, payload, seq,
        ))))
    }

    pub(crate) fn count_callback(&mut self, n: u32) -> Result<(), Flow> {
        self.ctx.callbacks_seen += n;
        if self.ctx.callbacks_seen > self.limits.max_callbacks {
            return Err(Flow::Fatal(EngineError::limit("callback count")));
        }
        Ok(())
    }

    pub(crate) fn count_llm_calls(&mut self, n: u32) -> Result<(), Flow> {
        self.ctx.llm_calls += n;
        if self.ctx.llm_calls > self.limits.max_llm_calls {
            return Err(Flow::Fatal(EngineError::limit("LLM call count")));
        }
        Ok(())
    }

    fn payload_json(&mut self, value: &Value) -> Result<Json, Flow> {
        value_to_json(value)
            .map_err(|_| self.throw_error("TypeError", "payload is not serializable"))
    }

    pub(crate) fn native_llm_complete(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        self.count_llm_calls(1)?;
        let options = args.first().cloned().unwrap_or(Value::Undefined);
        let payload = match options {
            Value::Undefined => json!({}),
            other => self.payload_json(&other)?,
        };
        self.mediated(PauseKind::Llm, "complete", payload)
    }

    pub(crate) fn native_approval_request(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let message = args.first().map(|v| v.js_string()).unwrap_or_default();
        let context = args
            .get(1)
            .map(|v| self.payload_json(v))
            .transpose()?
            .unwrap_or(Json::Null);
        let schema = args
            .get(2)
            .map(|v| self.payload_json(v))
            .transpose()?
            .unwrap_or(Json::Null);
        let payload = json!({
            "message": message,
            "context": context,
            "schema": schema,
        });
        self.mediated(PauseKind::Approval, "request", payload)
    }

    pub(crate) fn native_embedding_embed(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let input = args.first().cloned().unwrap_or(Value::Undefined);
        let options = args
            .get(1)
            .map(|v| self.payload_json(v))
            .transpose()?
            .unwrap_or(Json::Null);
        let payload = match &input {
            Value::Array(_) => {
                let texts = self.payload_json(&input)?;
                json!({ "texts": texts, "options": options })
            }
            other => json!({ "text": other.js_string(), "options": options }),
        };
        self.mediated(PauseKind::Embedding, "embed", payload)
    }

    pub(crate) fn native_tools_invoke(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let tool_name = args.first().map(|v| v.js_string()).unwrap_or_default();
        if tool_name.is_empty() {
            return Err(self.throw_error("TypeError", "tool name is required"));
        }
        let input = args
            .get(1)
            .map(|v| self.payload_json(v))
            .transpose()?
            .unwrap_or(Json::Null);
        let payload = json!({ "toolName": tool_name, "input": input });
        self.mediated(PauseKind::Tool, "invoke", payload)
    }

    pub(crate) fn native_cache_get(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let key = args.first().map(|v| v.js_string()).unwrap_or_default();
        if key.is_empty() {
            return Err(self.throw_error("TypeError", "cache key is required"));
        }
        self.count_callback(1)?;
        let seq = self.ctx.next_sequence_number();
        if let Some(cached) = self.ctx.cached_result(seq) {
            return Ok(value_from_json(cached));
        }
        Err(Flow::Host(Box::new(HostRequest {
            sequence_number: seq,
            op: HostOp::CacheGet { key },
        })))
    }

    pub(crate) fn native_cache_set(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let key = args.first().map(|v| v.js_string()).unwrap_or_default();
        if key.is_empty() {
            return Err(self.throw_error("TypeError", "cache key is required"));
        }
        let value = args.get(1).cloned().unwrap_or(Value::Null);
        let value = self.payload_json(&value)?;
        let ttl_seconds = args.get(2).map(|v| v.to_number()).and_then(|n| {
            if n.is_finite() && n >= 0.0 {
                Some(n as u64)
            } else {
                None
            }
        });
        self.count_callback(1)?;
        let seq = self.ctx.next_sequence_number();
        if let Some(cached) = self.ctx.cached_result(seq) {
            return Ok(value_from_json(cached));
        }
        Err(Flow::Host(Box::new(HostRequest {
            sequence_number: seq,
            op: HostOp::CacheSet {
                key,
                value,
                ttl_seconds,
            },
        })))
    }

    /// Fire-and-forget: no sequence number, never pauses.
    pub(crate) fn native_progress_report(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let message = args.first().map(|v| v.js_string()).unwrap_or_default();
        let percent = args
            .get(1)
            .map(|v| v.to_number())
            .filter(|n| n.is_finite());
        tracing::debug!(target: "atp_core::sandbox", progress = %message, "progress report");
        self.ctx.report_progress(message, percent);
        Ok(Value::Undefined)
    }
}
