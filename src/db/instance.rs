//! Database target descriptors.
//!
//! A [`DbrInstance`] fully describes one logical database target: where it
//! lives, which driver kind reaches it, and two credential pairs — the pair
//! used to open the socket and the tenant-database pair recorded alongside
//! it. Descriptors are plain values; `Clone` deep-copies the optional string
//! fields, so a copy never aliases the original.

/// One logical database target.
#[derive(Debug, Clone, Default)]
pub struct DbrInstance {
    pub(crate) handle: String,
    pub(crate) dbname: String,
    pub(crate) connection_username: String,
    pub(crate) connection_password: String,
    pub(crate) dbr_username: String,
    pub(crate) dbr_password: String,
    pub(crate) host: String,
    pub(crate) dbfile: Option<String>,
    pub(crate) module: String,
    pub(crate) tag: Option<String>,
}

impl DbrInstance {
    /// Create a descriptor with the fields every target needs.
    pub fn new(
        handle: impl Into<String>,
        module: impl Into<String>,
        host: impl Into<String>,
        dbname: impl Into<String>,
    ) -> Self {
        Self {
            handle: handle.into(),
            module: module.into(),
            host: host.into(),
            dbname: dbname.into(),
            ..Self::default()
        }
    }

    /// Set the credentials used to open the physical connection.
    pub fn with_connection_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.connection_username = username.into();
        self.connection_password = password.into();
        self
    }

    /// Set the tenant-database credentials (stored, not used to connect).
    pub fn with_dbr_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.dbr_username = username.into();
        self.dbr_password = password.into();
        self
    }

    /// Set the database-file path for file-backed targets.
    pub fn with_dbfile(mut self, dbfile: impl Into<String>) -> Self {
        self.dbfile = Some(dbfile.into());
        self
    }

    /// Set the tenant marker tag (`t<id>`).
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Loosely check whether two descriptors use the same database.
    ///
    /// When they do not, the second element names what differed.
    pub fn same_database(&self, other: &DbrInstance) -> (bool, Vec<&'static str>) {
        let mut differences = Vec::new();
        if self.database_name() != other.database_name() {
            differences.push("database name");
        }
        if self.host() != other.host() {
            differences.push("host");
        }

        (differences.is_empty(), differences)
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn database_name(&self) -> &str {
        &self.dbname
    }

    pub fn connection_username(&self) -> &str {
        &self.connection_username
    }

    pub fn connection_password(&self) -> &str {
        &self.connection_password
    }

    pub fn dbr_username(&self) -> &str {
        &self.dbr_username
    }

    pub fn dbr_password(&self) -> &str {
        &self.dbr_password
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn database_file(&self) -> Option<&str> {
        self.dbfile.as_deref()
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}
