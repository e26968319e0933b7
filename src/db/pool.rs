//! Physical connection handles.
//!
//! This module wraps database-specific sqlx pools (MySqlPool, SqlitePool)
//! in a single [`DbPool`] value and derives the connection-target string
//! that the registry deduplicates on. Pools are built with
//! `connect_lazy_with`: opening a handle validates the descriptor and
//! allocates the pool, and the first query performs the socket work.

use crate::db::instance::DbrInstance;
use crate::error::{DbError, DbResult};
use sqlx::{
    MySqlPool, SqlitePool, mysql::MySqlConnectOptions, mysql::MySqlPoolOptions,
    sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions,
};
use std::time::Duration;

/// Default port for networked MySQL targets whose host carries none.
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Pool sizing. One physical target is shared by every account that
/// resolves to it, so the MySQL pool keeps a small number of connections;
/// SQLite serializes writers and gets exactly one.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Driver kind of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    MySql,
    Sqlite,
}

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Sqlite(pool) => pool.close().await,
        }
    }

    /// Get the driver kind for this pool.
    pub fn kind(&self) -> DatabaseKind {
        match self {
            DbPool::MySql(_) => DatabaseKind::MySql,
            DbPool::Sqlite(_) => DatabaseKind::Sqlite,
        }
    }
}

/// Derive the deduplication key for a descriptor.
///
/// The key is deterministic in the fields that select a physical socket:
/// driver kind, connection credentials and host (or file path). Two
/// descriptors with the same key share one pool. Keys embed credentials and
/// must never be logged.
pub(crate) fn connection_target(instance: &DbrInstance) -> DbResult<String> {
    match instance.module() {
        "Mysql" => {
            let user = instance.connection_username();
            let pass = instance.connection_password();
            if instance.host().starts_with('/') {
                Ok(format!("mysql:{}:{}@unix({})", user, pass, instance.host()))
            } else {
                Ok(format!(
                    "mysql:{}:{}@tcp({})",
                    user,
                    pass,
                    host_with_port(instance.host())
                ))
            }
        }
        "Sqlite" => Ok(format!("sqlite:{}", sqlite_path(instance))),
        other => Err(DbError::unhandled_module(other)),
    }
}

/// Build a lazy pool for a descriptor.
pub(crate) fn open_lazy(instance: &DbrInstance) -> DbResult<DbPool> {
    match instance.module() {
        "Mysql" => {
            let mut options = MySqlConnectOptions::new()
                .username(instance.connection_username())
                .password(instance.connection_password())
                .charset("utf8mb4")
                .collation("utf8mb4_unicode_ci");

            if instance.host().starts_with('/') {
                options = options.socket(instance.host());
            } else if let Some((host, port)) = instance.host().split_once(':') {
                let port: u16 = port.parse().map_err(|_| {
                    DbError::connection(
                        format!("invalid port in host {}", instance.host()),
                        "Check the host value of the instance row",
                    )
                })?;
                options = options.host(host).port(port);
            } else {
                options = options.host(instance.host()).port(DEFAULT_MYSQL_PORT);
            }

            let pool = MySqlPoolOptions::new()
                .max_connections(DEFAULT_MAX_CONNECTIONS)
                .acquire_timeout(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS))
                .connect_lazy_with(options);
            Ok(DbPool::MySql(pool))
        }
        "Sqlite" => {
            let options = SqliteConnectOptions::new().filename(sqlite_path(instance));
            let pool = SqlitePoolOptions::new()
                .max_connections(DEFAULT_MAX_CONNECTIONS_SQLITE)
                .acquire_timeout(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS))
                .connect_lazy_with(options);
            Ok(DbPool::Sqlite(pool))
        }
        other => Err(DbError::unhandled_module(other)),
    }
}

fn host_with_port(host: &str) -> String {
    if host.contains(':') {
        host.to_string()
    } else {
        format!("{}:{}", host, DEFAULT_MYSQL_PORT)
    }
}

/// File-backed targets name their file in `dbfile`; the host field is the
/// historical fallback.
fn sqlite_path(instance: &DbrInstance) -> &str {
    instance.database_file().unwrap_or_else(|| instance.host())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_target_tcp_default_port() {
        let inst = DbrInstance::new("main", "Mysql", "db1", "dbr")
            .with_connection_credentials("u", "p");
        let target = connection_target(&inst).unwrap();
        assert_eq!(target, "mysql:u:p@tcp(db1:3306)");
    }

    #[test]
    fn test_connection_target_tcp_explicit_port() {
        let inst = DbrInstance::new("main", "Mysql", "db1:3307", "dbr")
            .with_connection_credentials("u", "p");
        let target = connection_target(&inst).unwrap();
        assert_eq!(target, "mysql:u:p@tcp(db1:3307)");
    }

    #[test]
    fn test_connection_target_unix_socket() {
        let inst = DbrInstance::new("main", "Mysql", "/run/mysqld/mysqld.sock", "dbr")
            .with_connection_credentials("u", "p");
        let target = connection_target(&inst).unwrap();
        assert_eq!(target, "mysql:u:p@unix(/run/mysqld/mysqld.sock)");
    }

    #[test]
    fn test_connection_target_sqlite_prefers_dbfile() {
        let inst =
            DbrInstance::new("main", "Sqlite", "ignored", "dbr").with_dbfile("/tmp/dbr.db");
        assert_eq!(connection_target(&inst).unwrap(), "sqlite:/tmp/dbr.db");
    }

    #[test]
    fn test_connection_target_sqlite_host_fallback() {
        let inst = DbrInstance::new("main", "Sqlite", "/tmp/dbr.db", "dbr");
        assert_eq!(connection_target(&inst).unwrap(), "sqlite:/tmp/dbr.db");
    }

    #[test]
    fn test_connection_target_same_for_equal_targets() {
        let a = DbrInstance::new("config", "Mysql", "db1", "t7cfg")
            .with_connection_credentials("u", "p");
        let b = DbrInstance::new("ops", "Mysql", "db1", "t7ops")
            .with_connection_credentials("u", "p");
        // Different database names, same socket: one physical connection.
        assert_eq!(
            connection_target(&a).unwrap(),
            connection_target(&b).unwrap()
        );
    }

    #[test]
    fn test_unhandled_module() {
        let inst = DbrInstance::new("main", "Oracle", "db1", "dbr");
        let err = connection_target(&inst).unwrap_err();
        assert_eq!(err.to_string(), "unhandled module Oracle");
        let err = open_lazy(&inst).unwrap_err();
        assert_eq!(err.to_string(), "unhandled module Oracle");
    }

    #[test]
    fn test_open_lazy_invalid_port() {
        let inst = DbrInstance::new("main", "Mysql", "db1:abc", "dbr");
        let err = open_lazy(&inst).unwrap_err();
        assert!(err.to_string().contains("invalid port"));
    }

    #[tokio::test]
    async fn test_open_lazy_mysql_does_not_connect() {
        // Lazy open must succeed without any server listening.
        let inst = DbrInstance::new("main", "Mysql", "127.0.0.1:1", "dbr")
            .with_connection_credentials("u", "p");
        let pool = open_lazy(&inst).unwrap();
        assert_eq!(pool.kind(), DatabaseKind::MySql);
        pool.close().await;
    }
}
