//! HTTP surface of the catalog server.
//!
//! Only the probes are mounted:
//! - `GET /healthz`: liveness
//! - `GET /readyz`: readiness (database reachable and migrated)

use crate::{
    Catalog,
    handlers::health_handlers::{healthz, readyz},
};
use axum::{Router, routing::get};

/// Build the router; the `Catalog` state is shared by every handler.
pub fn routes() -> Router<Catalog> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
