//! # atp-core - Resumable execution engine
//!
//! The engine lets an agent express multi-step tool use as one program:
//! the client submits source text, the engine compiles and runs it, and
//! whenever the program needs an external callback (LLM completion,
//! human approval, embedding, tool call, parallel batch) execution
//! **pauses**, a continuation request goes back to the client, and a
//! later **resume** replays the program from the top with all recorded
//! results cached - fast-forwarding to the exact point that paused.
//!
//! ## Crate map
//!
//! - [`pause`] - the pause protocol: signal, kinds, continuation shape
//! - [`sequence`] - sequence counter and replay table
//! - [`interp`] - the sandbox interpreter (values, environments,
//!   evaluation, control-flow channel)
//! - [`runtime`] / [`resumable`] / [`batch`] - the host surface the
//!   sandbox sees: `atp.*` APIs and the `__atp` primitive table
//! - [`executor`] - submit/resume/status/cancel over all of the above
//! - [`state`] - the in-process execution index
//! - [`limits`] - per-execution resource budgets
//! - [`error`] - the failure taxonomy
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use atp_checkpoint::InMemoryCacheProvider;
//! use atp_core::executor::{ExecutorConfig, SandboxExecutor, SubmitRequest, ExecutionOutcome};
//!
//! let provider = Arc::new(InMemoryCacheProvider::new());
//! let executor = SandboxExecutor::new(provider, ExecutorConfig::default());
//!
//! let outcome = executor.submit(SubmitRequest::new("return 1 + 2;")).await?;
//! assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
//! ```

pub mod batch;
pub mod error;
pub mod executor;
pub mod interp;
pub mod limits;
pub mod pause;
pub mod resumable;
pub mod runtime;
pub mod sequence;
pub mod state;

pub use error::{EngineError, EngineResult};
pub use executor::{
    ExecutionOutcome, ExecutorConfig, SandboxExecutor, StatusReport, SubmitRequest, TransformInfo,
};
pub use limits::{ExecutionHints, ExecutionLimits, LimitOverrides};
pub use pause::{BatchCall, ContinuationRequest, PauseKind, PauseSignal};
pub use sequence::{ExecutionContext, ProgressEvent};
pub use state::{ErrorInfo, ExecutionStateManager, ExecutionStatus, StatusCounts};
