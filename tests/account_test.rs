//! Integration tests for connection deduplication, shutdown semantics and
//! account-level query delegation, over SQLite fixture databases.

use dbr_registry::{DbError, DbrInstance, QueryParam, Registry};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

async fn connect(path: &Path) -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true),
        )
        .await
        .unwrap()
}

async fn touch_db(path: &Path) {
    connect(path).await.close().await;
}

async fn seed_bootstrap(path: &Path) -> SqlitePool {
    let pool = connect(path).await;
    sqlx::query(
        "CREATE TABLE enum (enum_id INTEGER PRIMARY KEY, name TEXT NOT NULL, handle TEXT NOT NULL)",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "CREATE TABLE dbr_instances (handle TEXT, username TEXT, password TEXT, dbname TEXT, \
         dbfile TEXT, host TEXT, module TEXT, tag TEXT)",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("CREATE TABLE client (id INTEGER PRIMARY KEY, name TEXT, clientkey TEXT)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("CREATE TABLE acl_priv (id INTEGER PRIMARY KEY, name TEXT)")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

async fn add_instance(
    pool: &SqlitePool,
    handle: &str,
    dbname: &str,
    module: &str,
    host: &str,
    dbfile: Option<&str>,
    tag: &str,
) {
    sqlx::query(
        "INSERT INTO dbr_instances (handle, username, password, dbname, dbfile, host, module, tag) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(handle)
    .bind("tenant_user")
    .bind("tenant_pass")
    .bind(dbname)
    .bind(dbfile)
    .bind(host)
    .bind(module)
    .bind(tag)
    .execute(pool)
    .await
    .unwrap();
}

async fn add_client(pool: &SqlitePool, id: i64, name: &str, clientkey: &str) {
    sqlx::query("INSERT INTO client (id, name, clientkey) VALUES (?, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(clientkey)
        .execute(pool)
        .await
        .unwrap();
}

fn write_conf(dir: &TempDir, boot_path: &Path) -> std::path::PathBuf {
    let conf_path = dir.path().join("dbr.conf");
    let conf = format!(
        "dbname=dbr; handle=main\nmodule=Sqlite\nhostname={}\nusername=dbr_user\npassword=secret\n",
        boot_path.display()
    );
    std::fs::write(&conf_path, conf).unwrap();
    conf_path
}

/// Fixture with a complete `t7` tenant whose config and ops roles share one
/// tenant database file.
async fn tenant_fixture(dir: &TempDir) -> Arc<Registry> {
    let boot_path = dir.path().join("boot.db");
    let tenant_path = dir.path().join("t7.db");
    let seed = seed_bootstrap(&boot_path).await;
    touch_db(&tenant_path).await;

    let tenant = tenant_path.to_str().unwrap();
    add_instance(&seed, "config", "t7cfg", "Sqlite", "local", Some(tenant), "t7").await;
    add_instance(&seed, "ops", "t7ops", "Sqlite", "local", Some(tenant), "t7").await;
    add_client(&seed, 7, "Acme", "key123").await;
    seed.close().await;

    let conf_path = write_conf(dir, &boot_path);
    Registry::open(&conf_path, true).await.unwrap()
}

#[tokio::test]
async fn test_open_instance_deduplicates_by_target() {
    let dir = TempDir::new().unwrap();
    let boot_path = dir.path().join("boot.db");
    seed_bootstrap(&boot_path).await.close().await;
    let conf_path = write_conf(&dir, &boot_path);

    let registry = Registry::open(&conf_path, false).await.unwrap();
    assert_eq!(registry.connection_count(), 1); // bootstrap target

    let shared = dir.path().join("shared.db");
    let shared = shared.to_str().unwrap();
    let a = DbrInstance::new("config", "Sqlite", "local", "t7cfg").with_dbfile(shared);
    let b = DbrInstance::new("ops", "Sqlite", "local", "t7ops").with_dbfile(shared);

    registry.open_instance(&a).unwrap();
    registry.open_instance(&b).unwrap();
    assert_eq!(registry.connection_count(), 2);

    let other = dir.path().join("other.db");
    let c = DbrInstance::new("config", "Sqlite", "local", "t8cfg")
        .with_dbfile(other.to_str().unwrap());
    registry.open_instance(&c).unwrap();
    assert_eq!(registry.connection_count(), 3);

    registry.close().await.unwrap();
}

#[tokio::test]
async fn test_account_db_is_opened_once_across_concurrent_callers() {
    let dir = TempDir::new().unwrap();
    let registry = tenant_fixture(&dir).await;
    let account = registry.account(7).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let account = account.clone();
        handles.push(tokio::spawn(async move { account.db() }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Bootstrap plus exactly one tenant target, no matter how many callers
    // raced the open.
    assert_eq!(registry.connection_count(), 2);

    registry.close().await.unwrap();
}

#[tokio::test]
async fn test_account_open_failure_is_cached() {
    let dir = TempDir::new().unwrap();
    let boot_path = dir.path().join("boot.db");
    let seed = seed_bootstrap(&boot_path).await;
    add_instance(&seed, "config", "t5cfg", "Oracle", "db1", None, "t5").await;
    add_instance(&seed, "ops", "t5ops", "Oracle", "db1", None, "t5").await;
    add_client(&seed, 5, "Legacy", "key5").await;
    seed.close().await;
    let conf_path = write_conf(&dir, &boot_path);

    let registry = Registry::open(&conf_path, true).await.unwrap();
    let account = registry.account(5).unwrap();
    assert!(account.active());

    let first = account.db().unwrap_err();
    assert_eq!(first.to_string(), "unhandled module Oracle");
    let second = account.db().unwrap_err();
    assert_eq!(second.to_string(), first.to_string());

    // The failure also surfaces through delegation, and nothing was cached
    // beyond the bootstrap target.
    let err = account.query("SELECT 1", &[]).await.unwrap_err();
    assert_eq!(err.to_string(), "unhandled module Oracle");
    assert_eq!(registry.connection_count(), 1);

    registry.close().await.unwrap();
}

#[tokio::test]
async fn test_close_blocks_new_connections() {
    let dir = TempDir::new().unwrap();
    let registry = tenant_fixture(&dir).await;
    let account = registry.account(7).unwrap();
    let held = account.db().unwrap();

    registry.close().await.unwrap();

    let fresh = DbrInstance::new("config", "Sqlite", "local", "t8cfg")
        .with_dbfile(dir.path().join("t8.db").to_str().unwrap());
    let err = registry.open_instance(&fresh).unwrap_err();
    assert!(matches!(err, DbError::Closing));

    // Idempotent, and previously handed-out handles remain valid objects.
    registry.close().await.unwrap();
    drop(held);
}

#[tokio::test]
async fn test_account_exec_and_query_roundtrip() {
    let dir = TempDir::new().unwrap();
    let registry = tenant_fixture(&dir).await;
    let account = registry.account(7).unwrap();

    account
        .exec(
            "CREATE TABLE jobs (id INTEGER PRIMARY KEY, label TEXT)",
            &[],
        )
        .await
        .unwrap();
    let affected = account
        .exec(
            "INSERT INTO jobs (id, label) VALUES (?, ?), (?, ?)",
            &[
                QueryParam::Int(1),
                QueryParam::Text("build".into()),
                QueryParam::Int(2),
                QueryParam::Text("deploy".into()),
            ],
        )
        .await
        .unwrap();
    assert_eq!(affected, 2);

    let result = account
        .query("SELECT id, label FROM jobs ORDER BY id", &[])
        .await
        .unwrap();
    assert_eq!(result.columns, vec!["id", "label"]);
    assert_eq!(result.row_count(), 2);
    assert_eq!(result.rows[1][1], serde_json::json!("deploy"));

    let row = account
        .query_row(
            "SELECT label FROM jobs WHERE id = ?",
            &[QueryParam::Int(1)],
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row["label"], serde_json::json!("build"));

    let missing = account
        .query_row(
            "SELECT label FROM jobs WHERE id = ?",
            &[QueryParam::Int(42)],
        )
        .await
        .unwrap();
    assert!(missing.is_none());

    registry.close().await.unwrap();
}

#[tokio::test]
async fn test_accounts_snapshot_is_iterable_without_locks() {
    let dir = TempDir::new().unwrap();
    let registry = tenant_fixture(&dir).await;

    let snapshot = registry.accounts();
    assert_eq!(snapshot.len(), 1);
    for account in snapshot {
        // Mutating the roster while iterating the snapshot is fine.
        registry.read_accounts().await.unwrap();
        assert_eq!(account.id(), 7);
    }

    registry.close().await.unwrap();
}
