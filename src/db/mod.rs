//! Database layer.
//!
//! - Target descriptors and their equivalence diagnostics
//! - Physical connection pools with target-keyed deduplication
//! - The registry (bootstrap, enum cache, account reconciliation)
//! - Per-tenant accounts with lazy connection resolution
//! - Generic query execution and backend dispatch

pub mod account;
pub mod instance;
#[macro_use]
pub mod macros;
pub mod pool;
pub mod query;
pub mod registry;

pub use account::Account;
pub use instance::DbrInstance;
pub use pool::{DatabaseKind, DbPool};
pub use query::{QueryParam, QueryResult};
pub use registry::Registry;
