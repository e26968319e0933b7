//! Database dispatch macro.
//!
//! The registry wraps backend-specific sqlx pools in the [`DbPool`] enum.
//! Code that is textually identical for every backend but monomorphizes to
//! different sqlx types expands through this macro instead of hand-written
//! match statements. Expansion happens at compile time with zero runtime
//! overhead.
//!
//! [`DbPool`]: crate::db::pool::DbPool

/// Expand one body expression per `DbPool` variant.
///
/// # Example
///
/// ```ignore
/// dispatch_pool!(&pool, p => {
///     sqlx::query(sql).execute(p).await
/// });
/// ```
#[macro_export]
macro_rules! dispatch_pool {
    ($pool:expr, $p:ident => $body:expr) => {
        match $pool {
            $crate::db::pool::DbPool::MySql($p) => $body,
            $crate::db::pool::DbPool::Sqlite($p) => $body,
        }
    };
}

pub use dispatch_pool;
