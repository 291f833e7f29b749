//! The sandbox interpreter
//!
//! A tree-walking evaluator for the scripting AST, cooperatively
//! single-threaded per execution: one attempt owns its
//! [`ExecutionContext`] outright and runs to the next suspension point
//! on a blocking task.
//!
//! Control flow travels on the [`Flow`] channel. `Return`, `Break`,
//! `Continue`, and `Throw` behave as in the source language; `Pause`
//! transports the pause protocol's signal across any depth of user
//! frames (user `try/catch` cannot intercept it - [`Flow::is_pause`]
//! distinguishes it from user throws); `Host` asks the executor to
//! satisfy a server-side request and re-run; `Fatal` carries an already
//! classified engine error.

pub mod env;
pub mod value;

mod builtins;
mod eval;

use atp_script::ast::Program;
use serde_json::Value as Json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::EngineError;
use crate::limits::ExecutionLimits;
use crate::pause::PauseSignal;
use crate::sequence::ExecutionContext;

use env::{define, new_env, EnvRef};
use value::{value_to_json, Closure, Value};

/// A server-side request the executor satisfies before re-running.
#[derive(Debug, Clone)]
pub struct HostRequest {
    pub sequence_number: u64,
    pub op: HostOp,
}

#[derive(Debug, Clone)]
pub enum HostOp {
    CacheGet {
        key: String,
    },
    CacheSet {
        key: String,
        value: Json,
        ttl_seconds: Option<u64>,
    },
}

/// Non-local control flow of the evaluator.
pub enum Flow {
    Return(Value),
    Break,
    Continue,
    /// User exception; caught by user `try/catch`.
    Throw(Value),
    /// Pause protocol signal; recovered only by the executor.
    Pause(Box<PauseSignal>),
    /// Server-side request; recovered only by the executor.
    Host(Box<HostRequest>),
    /// Classified engine failure; never recoverable in the sandbox.
    Fatal(EngineError),
}

impl Flow {
    /// Distinguishes the pause signal from user errors.
    pub fn is_pause(&self) -> bool {
        matches!(self, Flow::Pause(_))
    }
}

/// How one sandbox run ended.
pub enum SandboxOutcome {
    Completed(Json),
    Paused(PauseSignal),
    Host(HostRequest),
    Failed(EngineError),
}

/// Outcome plus the context the attempt accumulated (pending slot
/// records, progress events, counters).
pub struct RunResult {
    pub outcome: SandboxOutcome,
    pub ctx: ExecutionContext,
}

/// Outcome of invoking a resumable-primitive body closure.
pub(crate) enum BodyFlow {
    Completed(Value),
    Break,
    Continue,
}

const MAX_CALL_DEPTH: u32 = 256;

pub struct Interpreter {
    pub(crate) ctx: ExecutionContext,
    pub(crate) limits: ExecutionLimits,
    deadline: Option<Instant>,
    cancel: Arc<AtomicBool>,
    ops: u64,
    allocated: u64,
    call_depth: u32,
    globals: EnvRef,
}

impl Interpreter {
    pub fn new(ctx: ExecutionContext, limits: ExecutionLimits, cancel: Arc<AtomicBool>) -> Self {
        let deadline = if limits.wall_clock_ms > 0 {
            Some(Instant::now() + Duration::from_millis(limits.wall_clock_ms))
        } else {
            None
        };
        let globals = builtins::build_globals();
        Self {
            ctx,
            limits,
            deadline,
            cancel,
            ops: 0,
            allocated: 0,
            call_depth: 0,
            globals,
        }
    }

    /// Run the program body as an implicit async function.
    pub fn run(mut self, program: &Program) -> RunResult {
        let env = new_env(Some(self.globals.clone()));
        let outcome = match self.exec_stmts(&program.body, &env) {
            Ok(()) => SandboxOutcome::Completed(Json::Null),
            Err(Flow::Return(value)) => {
                SandboxOutcome::Completed(value_to_json(&value).unwrap_or(Json::Null))
            }
            Err(Flow::Throw(value)) => SandboxOutcome::Failed(self.user_error(value)),
            Err(Flow::Pause(signal)) => SandboxOutcome::Paused(*signal),
            Err(Flow::Host(request)) => SandboxOutcome::Host(*request),
            Err(Flow::Fatal(error)) => SandboxOutcome::Failed(error),
            Err(Flow::Break) | Err(Flow::Continue) => SandboxOutcome::Failed(EngineError::User {
                message: "illegal break or continue outside of a loop".to_string(),
                stack: None,
            }),
        };
        RunResult {
            outcome,
            ctx: self.ctx,
        }
    }

    /// Classify an uncaught user throw.
    fn user_error(&self, value: Value) -> EngineError {
        let (message, stack) = match &value {
            Value::Object(map) => {
                let map = map.lock();
                let message = map
                    .get("message")
                    .map(|m| m.js_string())
                    .unwrap_or_else(|| value.js_string());
                let stack = map.get("stack").map(|s| s.js_string()).filter(|s| !s.is_empty());
                (message, stack)
            }
            other => (other.js_string(), None),
        };
        EngineError::User { message, stack }
    }

    // ----- budget accounting -------------------------------------------

    /// One unit of interpreter fuel; checks cancellation and deadline
    /// periodically.
    pub(crate) fn tick(&mut self) -> Result<(), Flow> {
        self.ops += 1;
        if self.ops > self.limits.max_ops {
            return Err(Flow::Fatal(EngineError::limit("operation budget")));
        }
        if self.ops & 0x3ff == 0 {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(Flow::Fatal(EngineError::Cancelled));
            }
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    return Err(Flow::Fatal(EngineError::limit("wall-clock")));
                }
            }
        }
        Ok(())
    }

    /// Charge the sandbox allocation budget.
    pub(crate) fn charge(&mut self, bytes: usize) -> Result<(), Flow> {
        self.allocated += bytes as u64;
        if self.allocated > self.limits.max_memory_bytes {
            return Err(Flow::Fatal(EngineError::limit("memory")));
        }
        Ok(())
    }

    // ----- calls -------------------------------------------------------

    pub(crate) fn throw_error(&self, name: &str, message: impl Into<String>) -> Flow {
        Flow::Throw(builtins::error_object(name, message.into()))
    }

    pub(crate) fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, Flow> {
        match callee {
            Value::Closure(closure) => self.call_closure(closure.clone(), args),
            Value::Native(native) => self.call_native(*native, args),
            other => Err(self.throw_error(
                "TypeError",
                format!("{} is not a function", other.js_string()),
            )),
        }
    }

    pub(crate) fn call_closure(
        &mut self,
        closure: Arc<Closure>,
        args: Vec<Value>,
    ) -> Result<Value, Flow> {
        self.tick()?;
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(self.throw_error("RangeError", "maximum call depth exceeded"));
        }
        self.call_depth += 1;
        let result = self.enter_closure(&closure, args);
        self.call_depth -= 1;
        match result {
            Err(Flow::Break) | Err(Flow::Continue) => {
                Err(self.throw_error("SyntaxError", "illegal break or continue"))
            }
            other => other,
        }
    }

    fn enter_closure(&mut self, closure: &Closure, args: Vec<Value>) -> Result<Value, Flow> {
        let env = new_env(Some(closure.env.clone()));
        for (i, param) in closure.func.params.iter().enumerate() {
            define(&env, param, args.get(i).cloned().unwrap_or(Value::Undefined));
        }
        if let Some(expr) = &closure.func.concise_body {
            return self.eval(expr, &env);
        }
        match self.exec_stmts(&closure.func.body, &env) {
            Ok(()) => Ok(Value::Undefined),
            Err(Flow::Return(value)) => Ok(value),
            Err(other) => Err(other),
        }
    }

    /// Invoke a primitive's body closure. Unlike a normal call,
    /// `break`/`continue` surface as loop control, `return` propagates
    /// to the enclosing function, and a pause raised inside is stamped
    /// with the iteration index.
    pub(crate) fn call_body(
        &mut self,
        body: &Value,
        args: Vec<Value>,
        index: usize,
    ) -> Result<BodyFlow, Flow> {
        let closure = match body {
            Value::Closure(closure) => closure.clone(),
            _ => return Err(self.throw_error("TypeError", "loop body is not a function")),
        };
        self.tick()?;
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(self.throw_error("RangeError", "maximum call depth exceeded"));
        }
        self.call_depth += 1;
        let result = self.enter_closure(&closure, args);
        self.call_depth -= 1;
        match result {
            Ok(value) => Ok(BodyFlow::Completed(value)),
            Err(Flow::Break) => Ok(BodyFlow::Break),
            Err(Flow::Continue) => Ok(BodyFlow::Continue),
            Err(flow) => Err(self.stamp_iteration(flow, index)),
        }
    }

    /// Invoke an array-method/batch callback; pauses raised inside are
    /// stamped with the slot index.
    pub(crate) fn call_callback(
        &mut self,
        callback: &Value,
        args: Vec<Value>,
        index: usize,
    ) -> Result<Value, Flow> {
        match self.call_value(callback, args) {
            Err(flow) => Err(self.stamp_iteration(flow, index)),
            ok => ok,
        }
    }

    fn stamp_iteration(&self, mut flow: Flow, index: usize) -> Flow {
        if let Flow::Pause(signal) = &mut flow {
            if signal.iteration.is_none() {
                signal.iteration = Some(index);
            }
        }
        flow
    }

    /// Clone the elements out of an array value.
    pub(crate) fn as_array_items(&self, value: &Value) -> Result<Vec<Value>, Flow> {
        match value {
            Value::Array(items) => Ok(items.lock().clone()),
            other => Err(self.throw_error(
                "TypeError",
                format!("{} is not an array", other.js_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atp_checkpoint::ReplaySnapshot;
    use atp_script::parse_program;
    use serde_json::json;

    /// Run untransformed source straight through the evaluator.
    fn run(source: &str) -> SandboxOutcome {
        let program = parse_program(source).unwrap();
        let ctx = ExecutionContext::new("test", ReplaySnapshot::default());
        let interp = Interpreter::new(
            ctx,
            ExecutionLimits::default(),
            Arc::new(AtomicBool::new(false)),
        );
        interp.run(&program).outcome
    }

    fn result_of(source: &str) -> Json {
        match run(source) {
            SandboxOutcome::Completed(value) => value,
            SandboxOutcome::Failed(error) => panic!("failed: {}", error),
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn arithmetic_and_strings() {
        assert_eq!(result_of("return 2 * 3 + 1;"), json!(7));
        assert_eq!(result_of(r#"return "a" + 1 + 2;"#), json!("a12"));
        assert_eq!(result_of("return 1 + 2 + \"a\";"), json!("3a"));
        assert_eq!(result_of("return 7 % 3;"), json!(1));
    }

    #[test]
    fn closures_capture_and_mutate() {
        let source = r#"
            let count = 0;
            function bump(by) { count += by; return count; }
            bump(2);
            bump(3);
            return count;
        "#;
        assert_eq!(result_of(source), json!(5));
    }

    #[test]
    fn plain_loops_run_without_transform() {
        let source = r#"
            let total = 0;
            for (let i = 1; i <= 4; i++) {
                if (i === 3) { continue; }
                total += i;
            }
            while (total < 10) { total += 1; }
            return total;
        "#;
        assert_eq!(result_of(source), json!(10));
    }

    #[test]
    fn break_skips_the_for_step() {
        let source = r#"
            let i = 0;
            for (; i < 10; i++) {
                if (i === 2) { break; }
            }
            return i;
        "#;
        assert_eq!(result_of(source), json!(2));
    }

    #[test]
    fn try_catch_handles_user_throws() {
        let source = r#"
            try {
                throw new Error("nope");
            } catch (e) {
                return e.message;
            }
        "#;
        assert_eq!(result_of(source), json!("nope"));
    }

    #[test]
    fn sync_array_methods_work() {
        let source = r#"
            const xs = [3, 1, 2];
            const doubled = xs.map((x) => x * 2);
            return doubled.filter((x) => x > 2).join("-");
        "#;
        assert_eq!(result_of(source), json!("6-4"));
    }

    #[test]
    fn template_literals_interpolate() {
        assert_eq!(
            result_of("const n = 2; return `n=${n + 1}!`;"),
            json!("n=3!")
        );
    }

    #[test]
    fn json_builtin_round_trips() {
        let source = r#"
            const text = JSON.stringify({b: 2, a: [1, null]});
            return JSON.parse(text).a[0];
        "#;
        assert_eq!(result_of(source), json!(1));
    }

    #[test]
    fn typeof_and_equality() {
        assert_eq!(result_of("return typeof \"x\";"), json!("string"));
        assert_eq!(result_of("return 1 == \"1\";"), json!(true));
        assert_eq!(result_of("return 1 === \"1\";"), json!(false));
        assert_eq!(result_of("return null ?? \"fallback\";"), json!("fallback"));
    }

    #[test]
    fn undeclared_identifier_is_a_user_error() {
        match run("return missing + 1;") {
            SandboxOutcome::Failed(error) => {
                assert_eq!(error.kind(), "user-error");
                assert!(error.to_string().contains("missing is not defined"));
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn operation_budget_is_enforced() {
        let program = parse_program("while (true) { }").unwrap();
        let limits = ExecutionLimits {
            max_ops: 200,
            max_loop_iterations: 1_000_000,
            ..ExecutionLimits::default()
        };
        let interp = Interpreter::new(
            ExecutionContext::new("test", ReplaySnapshot::default()),
            limits,
            Arc::new(AtomicBool::new(false)),
        );
        match interp.run(&program).outcome {
            SandboxOutcome::Failed(error) => assert_eq!(error.kind(), "limit-exceeded"),
            _ => panic!("expected limit failure"),
        }
    }
}
