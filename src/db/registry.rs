//! The connection registry.
//!
//! A [`Registry`] owns the bootstrap connection, a cache of physical
//! connections keyed by connection target, the tenant-account roster and
//! the enum cache. The roster is rebuilt by [`Registry::read_accounts`],
//! which reconciles against the instances and directory tables.
//!
//! Lock domains (roster, connection cache + closing flag, enum cache) are
//! independent and never nested; none is held across an await point, so all
//! of them are std::sync primitives.

use crate::config;
use crate::db::account::Account;
use crate::db::instance::DbrInstance;
use crate::db::pool::{self, DatabaseKind, DbPool};
use crate::db::query::{self, QueryParam, QueryResult};
use crate::dispatch_pool;
use crate::error::{DbError, DbResult};
use futures_util::TryStreamExt;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

// Reference tables, in their MySQL and SQLite spellings. MySQL qualifies
// across the `dbr` and `directory` schemas; a SQLite deployment holds the
// same tables in its main schema.
const ENUM_SCAN_MYSQL: &str = "SELECT enum_id, name, handle FROM dbr.enum";
const ENUM_SCAN_SQLITE: &str = "SELECT enum_id, name, handle FROM enum";

const INSTANCE_SCAN_MYSQL: &str =
    "SELECT handle, username, password, dbname, dbfile, host, module, tag FROM dbr.dbr_instances";
const INSTANCE_SCAN_SQLITE: &str =
    "SELECT handle, username, password, dbname, dbfile, host, module, tag FROM dbr_instances";

const DIRECTORY_SCAN_MYSQL: &str = "SELECT id, name, clientkey FROM directory.client";
const DIRECTORY_SCAN_SQLITE: &str = "SELECT id, name, clientkey FROM client";

const INSTANCE_BY_TAG_MYSQL: &str = "SELECT handle, username, password, dbname, dbfile, host, module, tag FROM dbr.dbr_instances WHERE tag = ? AND handle = ? LIMIT 1";
const INSTANCE_BY_TAG_SQLITE: &str = "SELECT handle, username, password, dbname, dbfile, host, module, tag FROM dbr_instances WHERE tag = ? AND handle = ? LIMIT 1";

const PRIV_BY_NAME_MYSQL: &str = "SELECT id FROM directory.acl_priv WHERE name = ?";
const PRIV_BY_NAME_SQLITE: &str = "SELECT id FROM acl_priv WHERE name = ?";

/// Instance-table row: handle, username, password, dbname, dbfile, host,
/// module, tag.
type InstanceRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    Option<String>,
);

/// Physical-connection cache plus the closing flag it guards.
#[derive(Default)]
struct ConnCache {
    pools: HashMap<String, DbPool>,
    closing: bool,
}

impl ConnCache {
    /// Atomic lookup-or-open for a descriptor's connection target.
    fn open(&mut self, instance: &DbrInstance) -> DbResult<DbPool> {
        let target = pool::connection_target(instance)?;

        if self.closing {
            return Err(DbError::Closing);
        }

        if let Some(pool) = self.pools.get(&target) {
            return Ok(pool.clone());
        }

        debug!(
            module = instance.module(),
            handle = instance.handle(),
            "opening instance pool"
        );
        let pool = pool::open_lazy(instance)?;
        self.pools.insert(target, pool.clone());
        Ok(pool)
    }
}

#[derive(Default)]
struct EnumCache {
    id_by_handle: HashMap<String, i64>,
    name_by_id: HashMap<i64, String>,
    handle_by_id: HashMap<i64, String>,
}

/// The tenant-connection registry. One per deployment; see the module docs.
pub struct Registry {
    boot: DbPool,
    bootstrap: DbrInstance,
    accounts: RwLock<HashMap<i64, Arc<Account>>>,
    conns: Mutex<ConnCache>,
    enums: RwLock<EnumCache>,
}

impl Registry {
    /// Open a registry from a bootstrap configuration file.
    ///
    /// Reads and parses the file, opens the bootstrap connection, loads the
    /// enum cache, and — when `expand` is set — runs one full account
    /// reconciliation pass. Any failure closes whatever was opened.
    pub async fn open(conf_path: impl AsRef<Path>, expand: bool) -> DbResult<Arc<Self>> {
        let bootstrap = config::load_registry_conf(conf_path)?;
        Self::with_bootstrap(bootstrap, expand).await
    }

    /// Open a registry from an already-built bootstrap descriptor.
    pub async fn with_bootstrap(bootstrap: DbrInstance, expand: bool) -> DbResult<Arc<Self>> {
        let mut cache = ConnCache::default();
        let boot = cache.open(&bootstrap)?;

        info!(
            module = bootstrap.module(),
            handle = bootstrap.handle(),
            dbname = bootstrap.database_name(),
            "opening registry"
        );

        let registry = Arc::new(Self {
            boot,
            bootstrap,
            accounts: RwLock::new(HashMap::new()),
            conns: Mutex::new(cache),
            enums: RwLock::new(EnumCache::default()),
        });

        if let Err(e) = registry.load_enums().await {
            registry.close().await.ok();
            return Err(e);
        }

        if expand {
            if let Err(e) = registry.read_accounts().await {
                registry.close().await.ok();
                return Err(e);
            }
        }

        Ok(registry)
    }

    /// Resolve a physical connection for a descriptor.
    ///
    /// Connections are deduplicated by connection target: concurrent callers
    /// whose descriptors resolve to the same target observe one pool. After
    /// [`Registry::close`] every call fails with [`DbError::Closing`].
    pub fn open_instance(&self, instance: &DbrInstance) -> DbResult<DbPool> {
        self.conns.lock().unwrap().open(instance)
    }

    /// Number of distinct physical targets currently cached.
    pub fn connection_count(&self) -> usize {
        self.conns.lock().unwrap().pools.len()
    }

    /// The bootstrap connection.
    pub fn db(&self) -> &DbPool {
        &self.boot
    }

    /// Close the registry.
    ///
    /// Idempotent. Marks the registry closing (no new physical connections
    /// may be opened), then closes every cached pool. Handles already held
    /// by callers remain valid objects.
    pub async fn close(&self) -> DbResult<()> {
        let pools: Vec<DbPool> = {
            let mut cache = self.conns.lock().unwrap();
            cache.closing = true;
            cache.pools.drain().map(|(_, p)| p).collect()
        };

        for pool in &pools {
            pool.close().await;
        }

        if !pools.is_empty() {
            info!(connections = pools.len(), "closed connection registry");
        }
        Ok(())
    }

    // =========================================================================
    // Enum cache
    // =========================================================================

    /// Load the enum reference table. Read-only after this; a mid-stream
    /// failure aborts the load and leaves already-inserted rows in place
    /// (registry construction treats the failure as fatal).
    async fn load_enums(&self) -> DbResult<()> {
        let boot = self.boot.clone();
        let sql = match boot.kind() {
            DatabaseKind::MySql => ENUM_SCAN_MYSQL,
            DatabaseKind::Sqlite => ENUM_SCAN_SQLITE,
        };

        dispatch_pool!(&boot, p => {
            let mut rows = sqlx::query_as::<_, (i64, String, String)>(sql).fetch(p);
            while let Some((id, name, handle)) = rows
                .try_next()
                .await
                .map_err(|e| DbError::scan("enum", e))?
            {
                let mut enums = self.enums.write().unwrap();
                enums.id_by_handle.insert(handle.clone(), id);
                enums.name_by_id.insert(id, name);
                enums.handle_by_id.insert(id, handle);
            }
        });

        Ok(())
    }

    /// Look up an enum id by handle.
    pub fn enum_id(&self, handle: &str) -> Option<i64> {
        self.enums.read().unwrap().id_by_handle.get(handle).copied()
    }

    /// Look up an enum display name by id.
    pub fn enum_name(&self, id: i64) -> Option<String> {
        self.enums.read().unwrap().name_by_id.get(&id).cloned()
    }

    /// Look up an enum handle by id.
    pub fn enum_handle(&self, id: i64) -> Option<String> {
        self.enums.read().unwrap().handle_by_id.get(&id).cloned()
    }

    // =========================================================================
    // Account roster
    // =========================================================================

    /// Look up an account by tenant id.
    pub fn account(&self, id: i64) -> Option<Arc<Account>> {
        self.accounts.read().unwrap().get(&id).cloned()
    }

    /// Look up an account; on a miss, run one reconciliation pass and look
    /// up again. For callers that suspect a stale roster (e.g. a freshly
    /// provisioned tenant).
    pub async fn retry_account(self: &Arc<Self>, id: i64) -> DbResult<Option<Arc<Account>>> {
        match self.account(id) {
            Some(account) => Ok(Some(account)),
            None => {
                self.read_accounts().await?;
                Ok(self.account(id))
            }
        }
    }

    /// Point-in-time snapshot of all roster accounts.
    pub fn accounts(&self) -> Vec<Arc<Account>> {
        self.accounts.read().unwrap().values().cloned().collect()
    }

    fn account_or_create(self: &Arc<Self>, id: i64) -> Arc<Account> {
        let mut accounts = self.accounts.write().unwrap();
        accounts
            .entry(id)
            .or_insert_with(|| Arc::new(Account::new(id, Arc::downgrade(self))))
            .clone()
    }

    fn delete_account(&self, id: i64) {
        self.accounts.write().unwrap().remove(&id);
    }

    /// Rebuild the tenant roster from the instances and directory tables.
    ///
    /// Safe to call repeatedly; each pass does full work. Accounts not
    /// confirmed by this pass's directory scan are unlinked from the roster
    /// (in-flight holders keep a usable object). Callers should serialize
    /// concurrent passes; the individual map operations are atomic either
    /// way.
    pub async fn read_accounts(self: &Arc<Self>) -> DbResult<()> {
        self.scan_instances().await?;
        let confirmed = self.scan_directory().await?;

        let mut pruned = 0usize;
        for account in self.accounts() {
            if !confirmed.contains(&account.id()) {
                self.delete_account(account.id());
                pruned += 1;
            }
        }

        debug!(
            accounts = confirmed.len(),
            pruned, "account reconciliation pass finished"
        );
        Ok(())
    }

    /// Step 1: stream the instances table and attach role descriptors.
    async fn scan_instances(self: &Arc<Self>) -> DbResult<()> {
        let boot = self.boot.clone();
        let sql = match boot.kind() {
            DatabaseKind::MySql => INSTANCE_SCAN_MYSQL,
            DatabaseKind::Sqlite => INSTANCE_SCAN_SQLITE,
        };

        dispatch_pool!(&boot, p => {
            let mut rows = sqlx::query_as::<_, InstanceRow>(sql).fetch(p);
            while let Some(row) = rows
                .try_next()
                .await
                .map_err(|e| DbError::scan("instances", e))?
            {
                self.apply_instance_row(row);
            }
        });

        Ok(())
    }

    fn apply_instance_row(self: &Arc<Self>, row: InstanceRow) {
        // Untagged instances are shared, not tenant-scoped; a tag that is
        // not "t" + positive integer is skipped silently.
        let Some(tag) = &row.7 else {
            return;
        };
        let Some(id) = parse_tenant_tag(tag) else {
            return;
        };

        let account = self.account_or_create(id);
        let handle = row.0.clone();
        let instance = self.instance_from_row(row);

        match handle.as_str() {
            "config" => account.set_config(instance),
            "ops" => account.set_ops(instance),
            _ => {}
        }
    }

    /// Step 2: stream the directory table. Returns the set of tenant ids
    /// confirmed by this pass; complete accounts are activated and named.
    async fn scan_directory(&self) -> DbResult<HashSet<i64>> {
        let boot = self.boot.clone();
        let sql = match boot.kind() {
            DatabaseKind::MySql => DIRECTORY_SCAN_MYSQL,
            DatabaseKind::Sqlite => DIRECTORY_SCAN_SQLITE,
        };

        let mut confirmed = HashSet::new();
        let mut incomplete = 0usize;

        dispatch_pool!(&boot, p => {
            let mut rows = sqlx::query_as::<_, (i64, String, String)>(sql).fetch(p);
            while let Some((id, name, clientkey)) = rows
                .try_next()
                .await
                .map_err(|e| DbError::scan("directory", e))?
            {
                let Some(account) = self.account(id) else {
                    continue;
                };
                confirmed.insert(id);

                if account.has_both_instances() {
                    account.set_active(true);
                    account.set_info(&name, &clientkey);
                } else {
                    // Not yet provisioned: a directory entry whose instance
                    // rows are incomplete stays inactive.
                    incomplete += 1;
                }
            }
        });

        if incomplete > 0 {
            warn!(
                rows = incomplete,
                "directory rows without a complete instance pair"
            );
        }
        Ok(confirmed)
    }

    fn instance_from_row(&self, row: InstanceRow) -> DbrInstance {
        let (handle, username, password, dbname, dbfile, host, module, tag) = row;
        // Tenant instances are reached with the bootstrap connection
        // credentials; the row's own credentials are the tenant-database
        // pair.
        DbrInstance {
            handle,
            dbname,
            connection_username: self.bootstrap.connection_username().to_string(),
            connection_password: self.bootstrap.connection_password().to_string(),
            dbr_username: username,
            dbr_password: password,
            host,
            dbfile,
            module,
            tag,
        }
    }

    // =========================================================================
    // Directory lookups
    // =========================================================================

    /// Fetch a single instance descriptor by tag and role handle.
    pub async fn instance_by_tag(&self, tag: &str, handle: &str) -> DbResult<DbrInstance> {
        let boot = self.boot.clone();
        let sql = match boot.kind() {
            DatabaseKind::MySql => INSTANCE_BY_TAG_MYSQL,
            DatabaseKind::Sqlite => INSTANCE_BY_TAG_SQLITE,
        };

        let row: Option<InstanceRow> = dispatch_pool!(&boot, p => {
            sqlx::query_as::<_, InstanceRow>(sql)
                .bind(tag)
                .bind(handle)
                .fetch_optional(p)
                .await?
        });

        match row {
            Some(row) => Ok(self.instance_from_row(row)),
            None => Err(DbError::InstanceNotFound {
                tag: tag.to_string(),
                handle: handle.to_string(),
            }),
        }
    }

    /// Resolve a privilege name to its id.
    pub async fn priv_by_name(&self, name: &str) -> DbResult<i64> {
        let boot = self.boot.clone();
        let sql = match boot.kind() {
            DatabaseKind::MySql => PRIV_BY_NAME_MYSQL,
            DatabaseKind::Sqlite => PRIV_BY_NAME_SQLITE,
        };

        let row: Option<(i64,)> = dispatch_pool!(&boot, p => {
            sqlx::query_as::<_, (i64,)>(sql)
                .bind(name)
                .fetch_optional(p)
                .await?
        });

        match row {
            Some((id,)) => Ok(id),
            None => Err(DbError::priv_not_found(name)),
        }
    }

    // =========================================================================
    // Bootstrap-connection queries
    // =========================================================================

    /// Execute a statement on the bootstrap connection.
    pub async fn exec(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        query::execute(&self.boot, sql, params).await
    }

    /// Run a row-returning query on the bootstrap connection.
    pub async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        query::fetch_all(&self.boot, sql, params).await
    }

    /// Run a single-row query on the bootstrap connection.
    pub async fn query_row(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<serde_json::Map<String, JsonValue>>> {
        query::fetch_row(&self.boot, sql, params).await
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("module", &self.bootstrap.module())
            .field("accounts", &self.accounts.read().unwrap().len())
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

/// Parse a tenant marker of the form `t<positive integer>`.
fn parse_tenant_tag(tag: &str) -> Option<i64> {
    let id = tag.strip_prefix('t')?.parse::<i64>().ok()?;
    (id > 0).then_some(id)
}
