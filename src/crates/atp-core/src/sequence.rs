//! Sequence counter, replay table, and the per-execution context
//!
//! Every mediated callback in a program is assigned a monotonically
//! increasing sequence number in program order. The replay table maps
//! numbers to previously recorded results; a call whose number has an
//! entry returns it instantly, one without pauses. Because the
//! transformed program is deterministic, a replayed run asks for the
//! same numbers in the same order the original run assigned them.
//!
//! The context lives on the sandbox task that owns the execution
//! attempt - nothing else reads or writes it, which is what makes the
//! counter safe without further synchronization.

use atp_checkpoint::{ReplaySnapshot, SlotRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fire-and-forget progress report emitted by the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Per-execution-attempt state: the sequence counter, the frozen replay
/// table, primitive slot records, and everything the attempt accumulates
/// for the executor to persist afterwards.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    pub execution_id: String,
    counter: u64,
    instance_counter: u64,
    replay: std::collections::HashMap<u64, Value>,
    slots: std::collections::HashMap<(u64, usize), SlotRecord>,
    /// Slot records produced by this attempt, flushed by the executor.
    pub pending_slots: Vec<(u64, usize, SlotRecord)>,
    /// Progress reports emitted by this attempt.
    pub progress: Vec<ProgressEvent>,
    /// Mediated callbacks traversed this attempt (cached or paused).
    pub callbacks_seen: u32,
    /// LLM completions traversed this attempt.
    pub llm_calls: u32,
}

impl ExecutionContext {
    pub fn new(execution_id: impl Into<String>, snapshot: ReplaySnapshot) -> Self {
        Self {
            execution_id: execution_id.into(),
            replay: snapshot.results,
            slots: snapshot.slots,
            ..Default::default()
        }
    }

    /// Assign and return the next sequence number.
    pub fn next_sequence_number(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Peek the most recently assigned sequence number.
    pub fn call_sequence_number(&self) -> u64 {
        self.counter
    }

    /// Replay-table entry for a sequence number, if any.
    pub fn cached_result(&self, seq: u64) -> Option<&Value> {
        self.replay.get(&seq)
    }

    /// Whether the next callback would have to pause for the client
    /// (i.e. replay is exhausted at the upcoming sequence number).
    pub fn should_pause_for_client(&self) -> bool {
        !self.replay.contains_key(&(self.counter + 1))
    }

    /// Advance the counter over a reserved block (skipped slots, batch
    /// call blocks).
    pub fn advance_sequences(&mut self, span: u64) {
        self.counter += span;
    }

    /// Assign the next value-producing-primitive instance ordinal.
    pub fn next_instance(&mut self) -> u64 {
        self.instance_counter += 1;
        self.instance_counter
    }

    pub fn instance_counter(&self) -> u64 {
        self.instance_counter
    }

    pub fn advance_instances(&mut self, span: u64) {
        self.instance_counter += span;
    }

    /// Recorded slot for `(instance ordinal, index)`, if any.
    pub fn slot(&self, ordinal: u64, index: usize) -> Option<&SlotRecord> {
        self.slots.get(&(ordinal, index))
    }

    /// Queue a freshly completed slot for persistence.
    pub fn record_slot(&mut self, ordinal: u64, index: usize, record: SlotRecord) {
        self.pending_slots.push((ordinal, index, record));
    }

    pub fn report_progress(&mut self, message: String, percent: Option<f64>) {
        self.progress.push(ProgressEvent {
            message,
            percent,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sequence_numbers_start_at_one_and_have_no_gaps() {
        let mut ctx = ExecutionContext::new("e", ReplaySnapshot::default());
        let seen: Vec<u64> = (0..100).map(|_| ctx.next_sequence_number()).collect();
        let expected: Vec<u64> = (1..=100).collect();
        assert_eq!(seen, expected);
        assert_eq!(ctx.call_sequence_number(), 100);
    }

    #[test]
    fn replay_hits_and_pause_predicate() {
        let mut snapshot = ReplaySnapshot::default();
        snapshot.results.insert(1, json!("a"));
        let mut ctx = ExecutionContext::new("e", snapshot);

        assert!(!ctx.should_pause_for_client());
        let seq = ctx.next_sequence_number();
        assert_eq!(ctx.cached_result(seq), Some(&json!("a")));
        assert!(ctx.should_pause_for_client());
        assert_eq!(ctx.cached_result(2), None);
    }

    #[test]
    fn block_reservation_advances_counter() {
        let mut ctx = ExecutionContext::new("e", ReplaySnapshot::default());
        let batch = ctx.next_sequence_number();
        ctx.advance_sequences(3);
        assert_eq!(batch, 1);
        assert_eq!(ctx.next_sequence_number(), 5);
    }

    proptest::proptest! {
        #[test]
        fn counter_is_strictly_increasing(steps in 1usize..200) {
            let mut ctx = ExecutionContext::new("e", ReplaySnapshot::default());
            let mut last = 0;
            for _ in 0..steps {
                let next = ctx.next_sequence_number();
                proptest::prop_assert!(next == last + 1);
                last = next;
            }
        }
    }
}
