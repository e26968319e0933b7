//! Error types for the registry.
//!
//! All fallible operations return [`DbResult`]. The enum is `Clone` because
//! the per-account lazy open caches its outcome and hands the same error to
//! every later caller.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DbError {
    /// Configuration could not be read or parsed.
    #[error("{message}")]
    Config { message: String },

    /// A descriptor names a driver kind the registry does not handle.
    #[error("unhandled module {module}")]
    UnhandledModule { module: String },

    /// The registry is shutting down; no new connections may be opened.
    #[error("connection registry is closing")]
    Closing,

    #[error("connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("database error: {message}")]
    Database {
        message: String,
        /// e.g., "42S02" for an unknown table
        sql_state: Option<String>,
    },

    /// A streaming table scan failed partway through.
    #[error("{scan} scan failed: {message}")]
    Scan { scan: String, message: String },

    #[error("no instance with tag `{tag}` and handle `{handle}`")]
    InstanceNotFound { tag: String, handle: String },

    #[error("no priv named `{name}` found")]
    PrivNotFound { name: String },

    /// An account operation needs a role descriptor that was never attached.
    #[error("account {id} has no {role} instance")]
    MissingInstance { id: i64, role: &'static str },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an unhandled-module error naming the offending value.
    pub fn unhandled_module(module: impl Into<String>) -> Self {
        Self::UnhandledModule {
            module: module.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a scan error identifying the failing table scan.
    pub fn scan(scan: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::Scan {
            scan: scan.into(),
            message: source.to_string(),
        }
    }

    /// Create a privilege-lookup-miss error.
    pub fn priv_not_found(name: impl Into<String>) -> Self {
        Self::PrivNotFound { name: name.into() }
    }

    /// Create a missing-instance error for an account role.
    pub fn missing_instance(id: i64, role: &'static str) -> Self {
        Self::MissingInstance { id, role }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection target format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::database("no rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "connection pool acquire timed out",
                "Check that the database server is reachable",
            ),
            sqlx::Error::PoolClosed => DbError::Closing,
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::database(format!("column not found: {}", col), None)
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("database worker crashed"),
            _ => DbError::internal(format!("unknown database error: {}", err)),
        }
    }
}

/// Result type alias for registry operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("failed to connect", "Check credentials");
        assert!(err.to_string().contains("connection failed"));
    }

    #[test]
    fn test_unhandled_module_names_value() {
        let err = DbError::unhandled_module("Oracle");
        assert_eq!(err.to_string(), "unhandled module Oracle");
    }

    #[test]
    fn test_priv_not_found_names_priv() {
        let err = DbError::priv_not_found("admin.read");
        assert_eq!(err.to_string(), "no priv named `admin.read` found");
    }

    #[test]
    fn test_scan_error_identifies_scan() {
        let err = DbError::scan("instances", "connection reset");
        assert!(err.to_string().starts_with("instances scan failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::connection("failed", "try again");
        assert_eq!(err.suggestion(), Some("try again"));
        assert_eq!(DbError::Closing.suggestion(), None);
    }

    #[test]
    fn test_errors_clone() {
        let err = DbError::missing_instance(7, "config");
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
