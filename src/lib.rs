//! Multi-tenant database registry.
//!
//! Resolves logical tenant accounts to live database connections,
//! deduplicates physical connections by connection target, and keeps the
//! tenant roster synchronized with an external directory table.

pub mod config;
pub mod db;
pub mod error;

pub use db::{Account, DatabaseKind, DbPool, DbrInstance, QueryParam, QueryResult, Registry};
pub use error::{DbError, DbResult};
