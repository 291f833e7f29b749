//! Batch parallel primitive
//!
//! When a `map`/`filter`/`forEach` body is one independent LLM or tool
//! call per element, the transformer routes the site here. At or above
//! the batch threshold the per-element pauses fuse into a **single**
//! batch pause carrying every call descriptor; the client fans the
//! batch out, and the aligned result array lands back in one resume.
//! Below the threshold the site degrades to the exact sequential
//! primitive, so batching never changes observable results beyond
//! side-effect interleaving.
//!
//! Sequence numbering reserves a consecutive block: the batch itself
//! occupies `B`, its `n` calls occupy `B+1..=B+n`. On replay the cached
//! array at `B` is folded into the output and the counter skips the
//! whole block.

use serde_json::json;

use atp_checkpoint::CheckpointError;

use crate::error::EngineError;
use crate::interp::value::{value_from_json, value_to_json, Value};
use crate::interp::{Flow, Interpreter};
use crate::pause::{BatchCall, PauseKind, PauseSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Map,
    Filter,
    ForEach,
}

impl Interpreter {
    /// `batchMap(array, callback, descriptor, kind, parallelId)` and
    /// its filter/forEach variants.
    pub(crate) fn prim_batch(&mut self, mode: BatchMode, args: Vec<Value>) -> Result<Value, Flow> {
        let array = args
            .first()
            .cloned()
            .ok_or_else(|| self.throw_error("TypeError", "array is required"))?;
        let callback = args
            .get(1)
            .cloned()
            .ok_or_else(|| self.throw_error("TypeError", "callback is required"))?;
        let descriptor = args
            .get(2)
            .cloned()
            .ok_or_else(|| self.throw_error("TypeError", "descriptor is required"))?;
        let kind = match args.get(3).map(|v| v.js_string()).as_deref() {
            Some("tool") => PauseKind::Tool,
            _ => PauseKind::Llm,
        };
        let parallel_id = args
            .get(4)
            .map(|v| v.js_string())
            .unwrap_or_else(|| "p0".to_string());

        let items = self.as_array_items(&array)?;
        let n = items.len();

        // the batchability half of the decision is static; the length
        // half is dynamic
        if n == 0 || n < self.limits.batch_threshold {
            tracing::debug!(
                parallel_id = %parallel_id,
                len = n,
                threshold = self.limits.batch_threshold,
                "below batch threshold, running sequentially"
            );
            let sequential = vec![array, callback];
            return match mode {
                BatchMode::Map => self.prim_map(sequential),
                BatchMode::Filter => self.prim_filter(sequential),
                BatchMode::ForEach => self.prim_for_each(sequential),
            };
        }

        self.count_callback(n as u32 + 1)?;
        if kind == PauseKind::Llm {
            self.count_llm_calls(n as u32)?;
        }

        let batch_seq = self.ctx.next_sequence_number();
        if let Some(cached) = self.ctx.cached_result(batch_seq).cloned() {
            let results = cached.as_array().cloned().ok_or_else(|| {
                Flow::Fatal(EngineError::CheckpointIo(CheckpointError::Invalid(format!(
                    "batch result at sequence {} is not an array",
                    batch_seq
                ))))
            })?;
            if results.len() != n {
                return Err(Flow::Fatal(EngineError::CheckpointIo(
                    CheckpointError::Invalid(format!(
                        "batch result at sequence {} has {} entries, expected {}",
                        batch_seq,
                        results.len(),
                        n
                    )),
                )));
            }
            // reserve the sub-call block the original run assigned
            self.ctx.advance_sequences(n as u64);
            return Ok(match mode {
                BatchMode::Map => {
                    Value::array(results.iter().map(value_from_json).collect())
                }
                BatchMode::Filter => Value::array(
                    items
                        .iter()
                        .zip(results.iter())
                        .filter(|(_, keep)| value_from_json(keep).truthy())
                        .map(|(item, _)| item.clone())
                        .collect(),
                ),
                BatchMode::ForEach => Value::Undefined,
            });
        }

        // unsatisfied: assemble the fused pause
        let mut calls = Vec::with_capacity(n);
        for (index, item) in items.iter().enumerate() {
            let payload = self.call_value(
                &descriptor,
                vec![item.clone(), Value::Number(index as f64)],
            )?;
            let payload = value_to_json(&payload)
                .map_err(|_| self.throw_error("TypeError", "batch payload is not serializable"))?;
            let sequence_number = self.ctx.next_sequence_number();
            calls.push(BatchCall {
                kind,
                payload,
                sequence_number,
            });
        }

        tracing::debug!(
            parallel_id = %parallel_id,
            batch_seq,
            calls = calls.len(),
            "raising batch pause"
        );
        let payload = json!({ "parallelId": parallel_id, "calls": calls });
        Err(Flow::Pause(Box::new(PauseSignal::new(
            PauseKind::Batch,
            "parallel",
            payload,
            batch_seq,
        ))))
    }
}
