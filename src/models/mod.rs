//! Core data models of the catalog.
//!
//! Row types map to the SQLite tables via `sqlx::FromRow` and serialize as
//! JSON via `serde` for the CLI and HTTP surfaces.

pub mod access;
pub mod bucket;
pub mod grant;
pub mod identity;
pub mod metadata;
pub mod object;
