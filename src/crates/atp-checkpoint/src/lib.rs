//! # atp-checkpoint - Durable callback storage for resumable executions
//!
//! This crate provides the persistence layer of the execution engine:
//!
//! - [`CacheProvider`] - the abstract durable key/value store (with TTL)
//!   that everything else is written through. Implementations range from
//!   the in-memory reference backend to distributed stores; single-key
//!   atomicity is all the engine requires.
//! - [`CallbackRecord`] - one persisted callback result, keyed by its
//!   sequence number within an execution.
//! - [`CheckpointManager`] - assembles cache keys for one execution,
//!   eagerly loads all known callback records at execution start, and
//!   writes each new result before control returns to the runtime.
//!
//! ## Key layout
//!
//! All keys for one execution share a prefix:
//!
//! ```text
//! <prefix>:<execution_id>:<seq>            callback record
//! <prefix>:<execution_id>:slot:<ord>:<idx> per-slot primitive record
//! <prefix>:<execution_id>:manifest         list of completed sequences/slots
//! <prefix>:<execution_id>:execution        execution record (code, hash, limits)
//! <prefix>:<execution_id>:continuation     pending continuation request
//! <prefix>:transform:<code_hash>           transformed source (optional)
//! <prefix>:userdata:<key>                  sandbox cache API namespace
//! ```
//!
//! The manifest is maintained on every write, so execution start is a
//! single `get` followed by point reads - no scan surface is needed on
//! the provider trait.

pub mod error;
pub mod manager;
pub mod provider;
pub mod record;

pub use error::{CheckpointError, CheckpointOp, Result};
pub use manager::{CheckpointManager, ReplaySnapshot};
pub use provider::{CacheProvider, InMemoryCacheProvider};
pub use record::{CallbackKind, CallbackRecord, Manifest, SlotRecord};
