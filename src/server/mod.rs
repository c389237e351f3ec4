//! HTTP server for the oracle.
//!
//! Exposes readings, follow-ups, reading history and quota management over a
//! JSON API. See [`routes`] for the endpoint table.

pub mod error;
pub mod routes;

pub use routes::{app_router, AppState};
