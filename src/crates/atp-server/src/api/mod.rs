//! API surface: routes, handlers, models, error mapping

pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
