//! Versioned object catalog: buckets of kind-typed objects with an
//! append-only revision history, per-revision metadata, user and group
//! grants, and a dependency graph derived from metadata.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

#[cfg(test)]
mod test_support;

pub use catalog::Catalog;
pub use errors::{CatalogError, CatalogResult};
