//! HTTP shell around the update path and the query engine.

pub mod routes;

pub use routes::{create_router, AppState};
