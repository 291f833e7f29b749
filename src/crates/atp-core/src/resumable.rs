//! Resumable primitives
//!
//! Host functions the transformer rewrites loops and array methods
//! into. Two replay strategies coexist here:
//!
//! - **Statement loops** (`for-of`, `while`, `for`) re-execute their
//!   bodies on every attempt; the replay table makes completed mediated
//!   callbacks inside them instant, and outer-scope mutations are
//!   re-applied exactly as the original run applied them. A pause
//!   raised from a body is stamped with its iteration index.
//!
//! - **Value-producing primitives** (array methods, `Promise.all`)
//!   checkpoint one slot per index. On replay a completed slot is
//!   skipped without executing the callback: its stored value is folded
//!   into the output and the sequence/instance counters advance by the
//!   spans the slot consumed, so everything after it lines up with the
//!   original run. Slots whose value has no JSON form (functions) are
//!   simply re-executed - the replay table underneath makes that cheap
//!   and deterministic.
//!
//! `while`/`for` are guarded by the iteration cap; a loop that exceeds
//! it fails the execution with `infinite-loop`.

use atp_checkpoint::SlotRecord;

use crate::error::EngineError;
use crate::interp::value::{value_from_json, value_to_json, Value};
use crate::interp::{BodyFlow, Flow, Interpreter};

impl Interpreter {
    fn arg(&self, args: &[Value], index: usize, what: &str) -> Result<Value, Flow> {
        args.get(index)
            .cloned()
            .ok_or_else(|| self.throw_error("TypeError", format!("{} is required", what)))
    }

    // ----- statement loops --------------------------------------------

    pub(crate) fn prim_for_of(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let iterable = self.arg(&args, 0, "iterable")?;
        let body = self.arg(&args, 1, "loop body")?;
        let items = self.as_array_items(&iterable)?;
        for (index, item) in items.into_iter().enumerate() {
            match self.call_body(&body, vec![item], index)? {
                BodyFlow::Break => break,
                BodyFlow::Continue | BodyFlow::Completed(_) => {}
            }
        }
        Ok(Value::Undefined)
    }

    pub(crate) fn prim_while(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let cond = self.arg(&args, 0, "loop condition")?;
        let body = self.arg(&args, 1, "loop body")?;
        let mut iterations = 0u64;
        loop {
            iterations += 1;
            if iterations > self.limits.max_loop_iterations {
                return Err(Flow::Fatal(EngineError::InfiniteLoop {
                    cap: self.limits.max_loop_iterations,
                }));
            }
            if !self.call_value(&cond, Vec::new())?.truthy() {
                break;
            }
            match self.call_body(&body, Vec::new(), (iterations - 1) as usize)? {
                BodyFlow::Break => break,
                BodyFlow::Continue | BodyFlow::Completed(_) => {}
            }
        }
        Ok(Value::Undefined)
    }

    pub(crate) fn prim_for_loop(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let cond = self.arg(&args, 0, "loop condition")?;
        let step = self.arg(&args, 1, "loop step")?;
        let body = self.arg(&args, 2, "loop body")?;
        let mut iterations = 0u64;
        loop {
            iterations += 1;
            if iterations > self.limits.max_loop_iterations {
                return Err(Flow::Fatal(EngineError::InfiniteLoop {
                    cap: self.limits.max_loop_iterations,
                }));
            }
            if !self.call_value(&cond, Vec::new())?.truthy() {
                break;
            }
            match self.call_body(&body, Vec::new(), (iterations - 1) as usize)? {
                BodyFlow::Break => break,
                // continue still runs the step, as in the source construct
                BodyFlow::Continue | BodyFlow::Completed(_) => {
                    self.call_value(&step, Vec::new())?;
                }
            }
        }
        Ok(Value::Undefined)
    }

    // ----- slot bookkeeping -------------------------------------------

    /// Run one slot's callback unless a record lets us skip it; the
    /// record's spans restore the counters a skipped body would have
    /// consumed.
    fn run_slot(
        &mut self,
        ordinal: u64,
        index: usize,
        run: impl FnOnce(&mut Self) -> Result<Value, Flow>,
    ) -> Result<Value, Flow> {
        if let Some(slot) = self.ctx.slot(ordinal, index).cloned() {
            self.ctx.advance_sequences(slot.seq_span);
            self.ctx.advance_instances(slot.instance_span);
            return Ok(value_from_json(&slot.value));
        }
        let seq_before = self.ctx.call_sequence_number();
        let instances_before = self.ctx.instance_counter();
        let value = run(self)?;
        let seq_span = self.ctx.call_sequence_number() - seq_before;
        let instance_span = self.ctx.instance_counter() - instances_before;
        if let Ok(json) = value_to_json(&value) {
            self.ctx.record_slot(
                ordinal,
                index,
                SlotRecord {
                    value: json,
                    seq_span,
                    instance_span,
                },
            );
        }
        Ok(value)
    }

    // ----- array methods ----------------------------------------------

    pub(crate) fn prim_map(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let items = self.as_array_items(&self.arg(&args, 0, "array")?)?;
        let callback = self.arg(&args, 1, "callback")?;
        let ordinal = self.ctx.next_instance();
        let mut out = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let value = self.run_slot(ordinal, index, |interp| {
                interp.call_callback(
                    &callback,
                    vec![item.clone(), Value::Number(index as f64)],
                    index,
                )
            })?;
            out.push(value);
        }
        Ok(Value::array(out))
    }

    pub(crate) fn prim_for_each(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let items = self.as_array_items(&self.arg(&args, 0, "array")?)?;
        let callback = self.arg(&args, 1, "callback")?;
        let ordinal = self.ctx.next_instance();
        for (index, item) in items.iter().enumerate() {
            self.run_slot(ordinal, index, |interp| {
                interp
                    .call_callback(
                        &callback,
                        vec![item.clone(), Value::Number(index as f64)],
                        index,
                    )
                    // only completion is recorded for forEach
                    .map(|_| Value::Null)
            })?;
        }
        Ok(Value::Undefined)
    }

    pub(crate) fn prim_filter(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let items = self.as_array_items(&self.arg(&args, 0, "array")?)?;
        let callback = self.arg(&args, 1, "callback")?;
        let ordinal = self.ctx.next_instance();
        let mut out = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let keep = self.run_slot(ordinal, index, |interp| {
                interp
                    .call_callback(
                        &callback,
                        vec![item.clone(), Value::Number(index as f64)],
                        index,
                    )
                    .map(|v| Value::Bool(v.truthy()))
            })?;
            if keep.truthy() {
                out.push(item.clone());
            }
        }
        Ok(Value::array(out))
    }

    pub(crate) fn prim_reduce(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let items = self.as_array_items(&self.arg(&args, 0, "array")?)?;
        let callback = self.arg(&args, 1, "callback")?;
        let ordinal = self.ctx.next_instance();
        let (mut acc, start) = match args.get(2) {
            Some(init) => (init.clone(), 0),
            None => match items.first() {
                Some(first) => (first.clone(), 1),
                None => {
                    return Err(self.throw_error(
                        "TypeError",
                        "reduce of empty array with no initial value",
                    ))
                }
            },
        };
        for (index, item) in items.iter().enumerate().skip(start) {
            let current = acc.clone();
            acc = self.run_slot(ordinal, index, |interp| {
                interp.call_callback(
                    &callback,
                    vec![current, item.clone(), Value::Number(index as f64)],
                    index,
                )
            })?;
        }
        Ok(acc)
    }

    pub(crate) fn prim_find(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let items = self.as_array_items(&self.arg(&args, 0, "array")?)?;
        let callback = self.arg(&args, 1, "callback")?;
        let ordinal = self.ctx.next_instance();
        for (index, item) in items.iter().enumerate() {
            let matched = self.run_slot(ordinal, index, |interp| {
                interp
                    .call_callback(
                        &callback,
                        vec![item.clone(), Value::Number(index as f64)],
                        index,
                    )
                    .map(|v| Value::Bool(v.truthy()))
            })?;
            if matched.truthy() {
                return Ok(item.clone());
            }
        }
        Ok(Value::Undefined)
    }

    pub(crate) fn prim_some(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let items = self.as_array_items(&self.arg(&args, 0, "array")?)?;
        let callback = self.arg(&args, 1, "callback")?;
        let ordinal = self.ctx.next_instance();
        for (index, item) in items.iter().enumerate() {
            let matched = self.run_slot(ordinal, index, |interp| {
                interp
                    .call_callback(
                        &callback,
                        vec![item.clone(), Value::Number(index as f64)],
                        index,
                    )
                    .map(|v| Value::Bool(v.truthy()))
            })?;
            if matched.truthy() {
                return Ok(Value::Bool(true));
            }
        }
        Ok(Value::Bool(false))
    }

    pub(crate) fn prim_every(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let items = self.as_array_items(&self.arg(&args, 0, "array")?)?;
        let callback = self.arg(&args, 1, "callback")?;
        let ordinal = self.ctx.next_instance();
        for (index, item) in items.iter().enumerate() {
            let passed = self.run_slot(ordinal, index, |interp| {
                interp
                    .call_callback(
                        &callback,
                        vec![item.clone(), Value::Number(index as f64)],
                        index,
                    )
                    .map(|v| Value::Bool(v.truthy()))
            })?;
            if !passed.truthy() {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    }

    pub(crate) fn prim_flat_map(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let mapped = self.prim_map(args)?;
        let mapped = self.as_array_items(&mapped)?;
        let mut out = Vec::new();
        for value in mapped {
            match value {
                Value::Array(nested) => out.extend(nested.lock().clone()),
                other => out.push(other),
            }
        }
        Ok(Value::array(out))
    }

    // ----- concurrent primitives --------------------------------------

    pub(crate) fn prim_promise_all(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let items = self.as_array_items(&self.arg(&args, 0, "array")?)?;
        let ordinal = self.ctx.next_instance();
        let mut out = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let value = self.run_slot(ordinal, index, |interp| match item {
                thunk @ (Value::Closure(_) | Value::Native(_)) => {
                    interp.call_callback(thunk, Vec::new(), index)
                }
                settled => Ok(settled.clone()),
            })?;
            out.push(value);
        }
        Ok(Value::array(out))
    }

    pub(crate) fn prim_promise_all_settled(&mut self, args: Vec<Value>) -> Result<Value, Flow> {
        let items = self.as_array_items(&self.arg(&args, 0, "array")?)?;
        let ordinal = self.ctx.next_instance();
        let mut out = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let value = self.run_slot(ordinal, index, |interp| {
                let result = match item {
                    thunk @ (Value::Closure(_) | Value::Native(_)) => {
                        interp.call_callback(thunk, Vec::new(), index)
                    }
                    settled => Ok(settled.clone()),
                };
                match result {
                    Ok(value) => {
                        let mut map = std::collections::BTreeMap::new();
                        map.insert("status".to_string(), Value::str("fulfilled"));
                        map.insert("value".to_string(), value);
                        Ok(Value::object(map))
                    }
                    // user rejections settle; pauses and fatals do not
                    Err(Flow::Throw(reason)) => {
                        let mut map = std::collections::BTreeMap::new();
                        map.insert("status".to_string(), Value::str("rejected"));
                        map.insert("reason".to_string(), reason);
                        Ok(Value::object(map))
                    }
                    Err(other) => Err(other),
                }
            })?;
            out.push(value);
        }
        Ok(Value::array(out))
    }
}
