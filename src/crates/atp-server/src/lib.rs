//! # atp-server - HTTP transport for the execution engine
//!
//! A thin axum adapter over [`atp_core::SandboxExecutor`]:
//!
//! | Route                                  | Operation |
//! |----------------------------------------|-----------|
//! | `POST /api/v1/executions`              | Submit    |
//! | `POST /api/v1/executions/:id/resume`   | Resume    |
//! | `GET /api/v1/executions/:id`           | Status    |
//! | `POST /api/v1/executions/:id/cancel`   | Cancel    |
//! | `GET /health`                          | Health    |
//!
//! Execution failures are protocol responses (`{status: "failed",
//! error: {kind, message}}`), not HTTP errors; only interface problems
//! (unknown id, wrong state, mismatched code) map to HTTP status codes.

pub mod api;
pub mod config;

pub use api::routes::{create_router, AppState};
pub use config::ServerConfig;
