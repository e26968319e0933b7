//! Generic query execution over [`DbPool`].
//!
//! Callers hand over SQL plus [`QueryParam`] values; rows come back as
//! `serde_json` cells decoded by column type category. This is the
//! delegation layer under the registry's and the accounts' `exec` /
//! `query` / `query_row` operations. No timeout handling lives here:
//! cancellation is dropping the future, honored at the driver level.

use crate::db::pool::DbPool;
use crate::error::DbResult;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlArguments, MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Decode, MySql, Row, Sqlite, Type, TypeInfo};

/// A parameter value for parameterized queries.
#[derive(Debug, Clone)]
pub enum QueryParam {
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// Result of a row-returning query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// Column names, in select order. Empty when no row came back.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Execute a statement and return the number of affected rows.
pub(crate) async fn execute(pool: &DbPool, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
    match pool {
        DbPool::MySql(p) => {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            Ok(query.execute(p).await?.rows_affected())
        }
        DbPool::Sqlite(p) => {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            Ok(query.execute(p).await?.rows_affected())
        }
    }
}

/// Run a row-returning query and decode every row.
pub(crate) async fn fetch_all(
    pool: &DbPool,
    sql: &str,
    params: &[QueryParam],
) -> DbResult<QueryResult> {
    match pool {
        DbPool::MySql(p) => {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            let rows = query.fetch_all(p).await?;
            Ok(QueryResult {
                columns: column_names(rows.first()),
                rows: rows.iter().map(mysql_row_values).collect(),
            })
        }
        DbPool::Sqlite(p) => {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            let rows = query.fetch_all(p).await?;
            Ok(QueryResult {
                columns: column_names(rows.first()),
                rows: rows.iter().map(sqlite_row_values).collect(),
            })
        }
    }
}

/// Run a single-row query; `None` when no row matched.
pub(crate) async fn fetch_row(
    pool: &DbPool,
    sql: &str,
    params: &[QueryParam],
) -> DbResult<Option<serde_json::Map<String, JsonValue>>> {
    match pool {
        DbPool::MySql(p) => {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            Ok(query.fetch_optional(p).await?.map(|row| {
                row.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| (col.name().to_string(), mysql_value(&row, idx)))
                    .collect()
            }))
        }
        DbPool::Sqlite(p) => {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            Ok(query.fetch_optional(p).await?.map(|row| {
                row.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| (col.name().to_string(), sqlite_value(&row, idx)))
                    .collect()
            }))
        }
    }
}

fn column_names<R: Row>(row: Option<&R>) -> Vec<String> {
    row.map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default()
}

// =============================================================================
// Parameter binding
// =============================================================================

fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::Text(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    }
}

fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::Text(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    }
}

// =============================================================================
// Row decoding
// =============================================================================

/// Wrapper for raw DECIMAL/NUMERIC values as strings, preserving the exact
/// database representation. MySQL only; SQLite NUMERIC is a float.
struct RawDecimal(String);

impl Type<MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn mysql_row_values(row: &MySqlRow) -> Vec<JsonValue> {
    (0..row.columns().len())
        .map(|idx| mysql_value(row, idx))
        .collect()
}

fn mysql_value(row: &MySqlRow, idx: usize) -> JsonValue {
    let type_name = row.columns()[idx].type_info().name().to_lowercase();

    if type_name.contains("decimal") || type_name.contains("numeric") {
        return match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            _ => JsonValue::Null,
        };
    }
    if type_name == "boolean" {
        return row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null);
    }
    if type_name.contains("int") {
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        return JsonValue::Null;
    }
    if type_name.contains("float") || type_name.contains("double") {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return float_value(v as f64);
        }
        return JsonValue::Null;
    }
    if type_name == "json" {
        return row
            .try_get::<Option<JsonValue>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null);
    }
    if type_name.contains("blob") || type_name.contains("binary") {
        return row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| encode_binary(&v))
            .unwrap_or(JsonValue::Null);
    }
    if type_name == "datetime" {
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        return JsonValue::Null;
    }
    if type_name == "timestamp" {
        if let Ok(Some(v)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return JsonValue::String(v.to_rfc3339());
        }
        return JsonValue::Null;
    }
    if type_name == "date" {
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        return JsonValue::Null;
    }
    if type_name == "time" {
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        return JsonValue::Null;
    }

    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::String)
        .unwrap_or(JsonValue::Null)
}

fn sqlite_row_values(row: &SqliteRow) -> Vec<JsonValue> {
    (0..row.columns().len())
        .map(|idx| sqlite_value(row, idx))
        .collect()
}

fn sqlite_value(row: &SqliteRow, idx: usize) -> JsonValue {
    let type_name = row.columns()[idx].type_info().name().to_lowercase();

    if type_name.contains("int") {
        return row
            .try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::Number(v.into()))
            .unwrap_or(JsonValue::Null);
    }
    if type_name == "boolean" || type_name == "bool" {
        return row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null);
    }
    if type_name == "real" || type_name == "numeric" {
        return row
            .try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .map(float_value)
            .unwrap_or(JsonValue::Null);
    }
    if type_name == "blob" {
        return row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| encode_binary(&v))
            .unwrap_or(JsonValue::Null);
    }

    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::String)
        .unwrap_or(JsonValue::Null)
}
