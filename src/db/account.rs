//! Per-tenant accounts.
//!
//! An [`Account`] bundles a tenant's identity, activation state and its two
//! role descriptors (`config` and `ops`), and lazily resolves its database
//! handle through the owning registry's deduplicating connection cache. The
//! lazy open runs exactly once for the lifetime of the account object:
//! success or failure is stored in a guarded slot and served to every
//! caller, concurrent or later, without retry.

use crate::db::instance::DbrInstance;
use crate::db::pool::DbPool;
use crate::db::query::{self, QueryParam, QueryResult};
use crate::db::registry::Registry;
use crate::error::{DbError, DbResult};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Placeholder tokens rewritten by [`Account::query_prep`].
const CONFIG_PLACEHOLDER: &str = "{config}";
const OPS_PLACEHOLDER: &str = "{ops}";

#[derive(Default)]
struct AccountState {
    active: bool,
    name: String,
    client_key: String,
    config: Option<DbrInstance>,
    ops: Option<DbrInstance>,
}

/// One tenant in the registry roster.
pub struct Account {
    registry: Weak<Registry>,

    id: i64,

    /// Mutable identity and descriptors, one reader/writer lock.
    state: RwLock<AccountState>,

    /// One-shot slot for the lazily opened database handle.
    conn: Mutex<Option<DbResult<DbPool>>>,
}

impl Account {
    pub(crate) fn new(id: i64, registry: Weak<Registry>) -> Self {
        Self {
            registry,
            id,
            state: RwLock::new(AccountState::default()),
            conn: Mutex::new(None),
        }
    }

    /// The owning registry, while it is still alive.
    pub fn registry(&self) -> Option<Arc<Registry>> {
        self.registry.upgrade()
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn active(&self) -> bool {
        self.state.read().unwrap().active
    }

    pub fn set_active(&self, active: bool) {
        self.state.write().unwrap().active = active;
    }

    pub fn name(&self) -> String {
        self.state.read().unwrap().name.clone()
    }

    pub fn client_key(&self) -> String {
        self.state.read().unwrap().client_key.clone()
    }

    pub(crate) fn set_info(&self, name: &str, client_key: &str) {
        let mut state = self.state.write().unwrap();
        state.name = name.to_string();
        state.client_key = client_key.to_string();
    }

    /// Returns a copy of the `config` role descriptor.
    pub fn config(&self) -> Option<DbrInstance> {
        self.state.read().unwrap().config.clone()
    }

    pub(crate) fn set_config(&self, instance: DbrInstance) {
        self.state.write().unwrap().config = Some(instance);
    }

    /// Returns a copy of the `ops` role descriptor.
    pub fn ops(&self) -> Option<DbrInstance> {
        self.state.read().unwrap().ops.clone()
    }

    pub(crate) fn set_ops(&self, instance: DbrInstance) {
        self.state.write().unwrap().ops = Some(instance);
    }

    /// Activation requires both role descriptors; one shared-lock check.
    pub(crate) fn has_both_instances(&self) -> bool {
        let state = self.state.read().unwrap();
        state.config.is_some() && state.ops.is_some()
    }

    pub fn name_and_id(&self) -> String {
        format!("{} ({})", self.name(), self.id)
    }

    /// The account's database handle.
    ///
    /// The first caller opens through the registry's connection cache using
    /// the `config` descriptor; everyone observes that caller's outcome.
    pub fn db(&self) -> DbResult<DbPool> {
        let mut slot = self.conn.lock().unwrap();
        match &*slot {
            Some(result) => result.clone(),
            None => {
                let result = self.open_db();
                *slot = Some(result.clone());
                result
            }
        }
    }

    fn open_db(&self) -> DbResult<DbPool> {
        let config = self
            .config()
            .ok_or_else(|| DbError::missing_instance(self.id, "config"))?;
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| DbError::internal("registry has been dropped"))?;
        registry.open_instance(&config)
    }

    /// Rewrite `{config}` and `{ops}` placeholders to the tenant's actual
    /// database names. A missing descriptor leaves its token untouched.
    pub fn query_prep(&self, query: &str) -> String {
        let state = self.state.read().unwrap();
        let mut prepared = query.to_string();
        if let Some(config) = &state.config {
            prepared = prepared.replace(CONFIG_PLACEHOLDER, config.database_name());
        }
        if let Some(ops) = &state.ops {
            prepared = prepared.replace(OPS_PLACEHOLDER, ops.database_name());
        }
        prepared
    }

    /// Execute a statement against the tenant's database.
    pub async fn exec(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let db = self.db()?;
        query::execute(&db, &self.query_prep(sql), params).await
    }

    /// Run a row-returning query against the tenant's database.
    pub async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        let db = self.db()?;
        query::fetch_all(&db, &self.query_prep(sql), params).await
    }

    /// Run a single-row query against the tenant's database.
    pub async fn query_row(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<serde_json::Map<String, JsonValue>>> {
        let db = self.db()?;
        query::fetch_row(&db, &self.query_prep(sql), params).await
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap();
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("active", &state.active)
            .field("name", &state.name)
            .field("has_config", &state.config.is_some())
            .field("has_ops", &state.ops.is_some())
            .finish_non_exhaustive()
    }
}
