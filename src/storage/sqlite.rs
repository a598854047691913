//! SQLite storage implementation

use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::Serialize;

use super::host::{SettingsTable, UserMetaTable};
use super::migration;
use super::schema::{self, sp_col};
use crate::config::TableNames;
use crate::model::{
    AttributeKind, AttributeMapping, AttributeMatch, DEFAULT_ENCRYPTION_ALGORITHM, KeyPair,
    NewServiceProvider, ServiceProvider, SpMatch, SpPatch,
};
use crate::version::SchemaVersion;
use crate::{Error, Result};

/// Settings key holding the schema version
pub const SCHEMA_VERSION_KEY: &str = "spstore_schema_version";

/// SQLite-backed store for SP configuration
pub struct SpStore {
    conn: Connection,
    tables: TableNames,
}

impl SpStore {
    /// Wrap an open connection. The schema is not touched; call
    /// [`SpStore::ensure_schema`] before using the store.
    pub fn new(conn: Connection, tables: TableNames) -> Self {
        Self { conn, tables }
    }

    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path, tables: TableNames) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self::new(conn, tables))
    }

    /// Open an in-memory database with default table names (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::new(conn, TableNames::default()))
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn settings(&self) -> SettingsTable<'_> {
        SettingsTable::new(&self.conn, &self.tables)
    }

    // ========== Schema Management ==========

    /// Stored schema version, if the store was ever initialized
    ///
    /// A blank or unparsable marker reads as `None`.
    pub fn schema_version(&self) -> Result<Option<SchemaVersion>> {
        let Some(raw) = self.settings().get(SCHEMA_VERSION_KEY)? else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }

        match SchemaVersion::parse(&raw) {
            Ok(version) => Ok(Some(version)),
            Err(e) => {
                tracing::warn!("Ignoring schema version marker {:?}: {}", raw, e);
                Ok(None)
            }
        }
    }

    /// Create the tables on first run, or migrate an older store.
    ///
    /// The version marker is written only after tables were created or every
    /// migration step succeeded, so a failed upgrade is retried next time.
    pub fn ensure_schema(&self) -> Result<SchemaStatus> {
        self.settings().ensure()?;
        let current = SchemaVersion::current();

        let Some(stored) = self.schema_version()? else {
            let unversioned = migration::table_exists(&self.conn, &self.tables.sp)?;
            for stmt in schema::all_schema_statements(&self.tables) {
                self.conn.execute(&stmt, [])?;
            }

            if unversioned {
                tracing::warn!(
                    "Found {} without a schema version; running every migration step",
                    self.tables.sp
                );
                let from = SchemaVersion::unversioned();
                let steps = self.migrate_from(&from)?;
                self.settings().set(SCHEMA_VERSION_KEY, current.as_str())?;
                return Ok(SchemaStatus::Migrated {
                    from,
                    to: current,
                    steps,
                });
            }

            tracing::info!("Created SP store tables at version {}", current);
            self.settings().set(SCHEMA_VERSION_KEY, current.as_str())?;
            return Ok(SchemaStatus::Created { version: current });
        };

        if stored < current {
            tracing::info!("Migrating SP store from {} to {}", stored, current);
            let steps = self.migrate_from(&stored)?;
            self.settings().set(SCHEMA_VERSION_KEY, current.as_str())?;
            return Ok(SchemaStatus::Migrated {
                from: stored,
                to: current,
                steps,
            });
        }

        if stored > current {
            tracing::warn!(
                "Stored schema version {} is newer than supported {}; leaving it untouched",
                stored,
                current
            );
            return Ok(SchemaStatus::Ahead {
                stored,
                supported: current,
            });
        }

        Ok(SchemaStatus::UpToDate { version: current })
    }

    /// Run every migration step from `old_version` to the latest.
    /// Does not touch the stored version marker.
    pub fn migrate_from(&self, old_version: &SchemaVersion) -> Result<Vec<&'static str>> {
        migration::run_from(&self.conn, &self.tables, old_version)
    }

    // ========== Service Provider Operations ==========

    fn sp_select(&self) -> String {
        format!("SELECT {} FROM {}", sp_col::ALL.join(", "), self.tables.sp)
    }

    /// All service providers, ordered by id
    pub fn list_sps(&self) -> Result<Vec<ServiceProvider>> {
        let mut stmt = self.conn.prepare(&format!("{} ORDER BY id", self.sp_select()))?;

        let sps = stmt
            .query_map([], |row| self.row_to_sp(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(sps)
    }

    /// Get a service provider by id
    pub fn get_sp(&self, id: i64) -> Result<Option<ServiceProvider>> {
        self.find_sp_by(sp_col::ID, Value::Integer(id))
    }

    /// Count all service providers
    pub fn count_sps(&self) -> Result<usize> {
        self.count(&self.tables.sp)
    }

    pub fn find_sp_by_issuer(&self, issuer: &str) -> Result<Option<ServiceProvider>> {
        self.find_sp_by(sp_col::ISSUER, Value::Text(issuer.to_string()))
    }

    pub fn find_sp_by_name(&self, name: &str) -> Result<Option<ServiceProvider>> {
        self.find_sp_by(sp_col::NAME, Value::Text(name.to_string()))
    }

    pub fn find_sp_by_acs(&self, acs_url: &str) -> Result<Option<ServiceProvider>> {
        self.find_sp_by(sp_col::ACS_URL, Value::Text(acs_url.to_string()))
    }

    /// First (lowest id) SP whose `column` equals `value`
    fn find_sp_by(&self, column: &str, value: Value) -> Result<Option<ServiceProvider>> {
        self.conn
            .query_row(
                &format!("{} WHERE {} = ?1 ORDER BY id LIMIT 1", self.sp_select(), column),
                [value],
                |row| self.row_to_sp(row),
            )
            .optional()
            .map_err(Into::into)
    }

    fn sp_exists(&self, id: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT id FROM {} WHERE id = ?1", self.tables.sp),
                [id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn first_sp_id(&self) -> Result<Option<i64>> {
        self.conn
            .query_row(
                &format!("SELECT id FROM {} ORDER BY id LIMIT 1", self.tables.sp),
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Insert a new service provider and return its id
    pub fn insert_sp(&self, sp: &NewServiceProvider) -> Result<i64> {
        self.conn.execute(
            &format!(
                r#"
                INSERT INTO {} (sp_name, issuer, acs_url, signing_cert, encryption_cert,
                    nameid_format, nameid_attr, response_signed, assertion_signed,
                    assertion_encrypted, group_mapping_enabled, default_relay_state,
                    logout_url, logout_binding_type, protocol_type)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                "#,
                self.tables.sp
            ),
            params![
                sp.name,
                sp.issuer,
                sp.acs_url,
                sp.signing_cert,
                sp.encryption_cert,
                sp.nameid_format,
                sp.nameid_attr,
                sp.response_signed as i64,
                sp.assertion_signed as i64,
                sp.assertion_encrypted as i64,
                sp.group_mapping_enabled as i64,
                sp.default_relay_state,
                sp.logout_url,
                sp.logout_binding.as_str(),
                sp.protocol.as_str(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        tracing::debug!("Inserted SP {} ({})", id, sp.issuer);
        Ok(id)
    }

    /// Apply `patch` to every SP matching `filter`. Matching nothing is fine.
    pub fn update_sp(&self, patch: &SpPatch, filter: &SpMatch) -> Result<()> {
        let assignments = patch.assignments();
        if assignments.is_empty() {
            tracing::debug!("Empty SP patch, nothing to update");
            return Ok(());
        }

        let conditions = filter.conditions();
        if conditions.is_empty() {
            return Err(Error::EmptyMatch("SP update"));
        }

        let set_clause = assignments
            .iter()
            .enumerate()
            .map(|(i, (col, _))| format!("{} = ?{}", col, i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let where_clause = where_clause(&conditions, assignments.len());

        let values = assignments
            .into_iter()
            .chain(conditions)
            .map(|(_, v)| v);

        let rows = self.conn.execute(
            &format!("UPDATE {} SET {} WHERE {}", self.tables.sp, set_clause, where_clause),
            params_from_iter(values),
        )?;
        tracing::debug!("Updated {} SP row(s)", rows);
        Ok(())
    }

    /// Delete SPs matching `sp_filter` together with their dependents.
    ///
    /// Runs as separate statements: attributes matching `attr_filter`, then
    /// the key pairs of every matched SP, then the SP rows. No transaction
    /// wraps them. Returns the number of SP rows deleted.
    pub fn delete_sp(&self, sp_filter: &SpMatch, attr_filter: &AttributeMatch) -> Result<usize> {
        let conditions = sp_filter.conditions();
        if conditions.is_empty() {
            return Err(Error::EmptyMatch("SP delete"));
        }
        let where_clause = where_clause(&conditions, 0);
        let values: Vec<Value> = conditions.into_iter().map(|(_, v)| v).collect();

        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM {} WHERE {}",
            self.tables.sp, where_clause
        ))?;
        let ids = stmt
            .query_map(params_from_iter(values.iter()), |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        self.delete_attributes(attr_filter)?;
        for id in &ids {
            self.delete_keypair(*id)?;
        }

        let rows = self.conn.execute(
            &format!("DELETE FROM {} WHERE {}", self.tables.sp, where_clause),
            params_from_iter(values),
        )?;
        tracing::debug!("Deleted {} SP row(s): {:?}", rows, ids);
        Ok(rows)
    }

    /// Delete every SP, key pair and attribute mapping and restart ids at 1.
    /// Used when the whole configuration is replaced, e.g. on metadata import.
    pub fn reset_all(&self) -> Result<()> {
        self.conn.execute(&format!("DELETE FROM {}", self.tables.sp), [])?;
        self.conn.execute(
            "DELETE FROM sqlite_sequence WHERE name IN (?1, ?2)",
            params![self.tables.sp, self.tables.attributes],
        )?;
        self.conn.execute(&format!("DELETE FROM {}", self.tables.keypairs), [])?;
        self.conn.execute(&format!("DELETE FROM {}", self.tables.attributes), [])?;
        tracing::info!("Cleared all SP configuration");
        Ok(())
    }

    /// Helper to convert a row to a ServiceProvider (columns in `sp_col::ALL` order)
    fn row_to_sp(&self, row: &rusqlite::Row) -> rusqlite::Result<ServiceProvider> {
        let flag = |i: usize| -> rusqlite::Result<bool> {
            Ok(row.get::<_, Option<i64>>(i)?.unwrap_or(0) != 0)
        };

        let binding_str: String = row.get(14)?;
        let logout_binding = binding_str.parse().map_err(|e: Error| {
            rusqlite::Error::FromSqlConversionFailure(14, rusqlite::types::Type::Text, Box::new(e))
        })?;

        let protocol_str: String = row.get(15)?;
        let protocol = protocol_str.parse().map_err(|e: Error| {
            rusqlite::Error::FromSqlConversionFailure(15, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(ServiceProvider {
            id: row.get(0)?,
            name: row.get(1)?,
            issuer: row.get(2)?,
            acs_url: row.get(3)?,
            signing_cert: row.get(4)?,
            encryption_cert: row.get(5)?,
            nameid_format: row.get(6)?,
            nameid_attr: row.get(7)?,
            response_signed: flag(8)?,
            assertion_signed: flag(9)?,
            assertion_encrypted: flag(10)?,
            group_mapping_enabled: flag(11)?,
            default_relay_state: row.get(12)?,
            logout_url: row.get(13)?,
            logout_binding,
            protocol,
        })
    }

    // ========== Attribute Mapping Operations ==========

    /// All attribute mappings of an SP, ordered by id
    pub fn get_attributes(&self, sp_id: i64) -> Result<Vec<AttributeMapping>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, sp_id, attr_name, attr_value, attr_type FROM {} WHERE sp_id = ?1 ORDER BY id",
            self.tables.attributes
        ))?;

        let attrs = stmt
            .query_map([sp_id], |row| self.row_to_attribute(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(attrs)
    }

    /// Add an attribute mapping to an existing SP
    pub fn insert_attribute(
        &self,
        sp_id: i64,
        name: &str,
        value: &str,
        kind: AttributeKind,
    ) -> Result<i64> {
        if !self.sp_exists(sp_id)? {
            return Err(Error::ServiceProviderNotFound(sp_id));
        }

        self.conn.execute(
            &format!(
                "INSERT INTO {} (sp_id, attr_name, attr_value, attr_type) VALUES (?1, ?2, ?3, ?4)",
                self.tables.attributes
            ),
            params![sp_id, name, value, kind.code()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Delete attribute mappings matching `filter`; returns the count
    pub fn delete_attributes(&self, filter: &AttributeMatch) -> Result<usize> {
        let conditions = filter.conditions();
        if conditions.is_empty() {
            return Err(Error::EmptyMatch("attribute delete"));
        }

        let rows = self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE {}",
                self.tables.attributes,
                where_clause(&conditions, 0)
            ),
            params_from_iter(conditions.into_iter().map(|(_, v)| v)),
        )?;
        tracing::debug!("Deleted {} attribute mapping(s)", rows);
        Ok(rows)
    }

    fn row_to_attribute(&self, row: &rusqlite::Row) -> rusqlite::Result<AttributeMapping> {
        let id: i64 = row.get(0)?;
        let code: i64 = row.get(4)?;
        let kind = AttributeKind::from_code(code).unwrap_or_else(|e| {
            tracing::warn!("Attribute mapping {}: {}; reading it as a normal claim", id, e);
            AttributeKind::Normal
        });

        Ok(AttributeMapping {
            id,
            sp_id: row.get(1)?,
            name: row.get(2)?,
            value: row.get(3)?,
            kind,
        })
    }

    // ========== Key Pair Operations ==========

    /// Key pair stored for an SP
    pub fn get_keypair(&self, sp_id: i64) -> Result<Option<KeyPair>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT client_id, public_key, private_key, encryption_algorithm FROM {} WHERE client_id = ?1 LIMIT 1",
                    self.tables.keypairs
                ),
                [sp_id.to_string()],
                |row| {
                    Ok(KeyPair {
                        client_id: row.get(0)?,
                        public_key: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        private_key: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        encryption_algorithm: row
                            .get::<_, Option<String>>(3)?
                            .unwrap_or_else(|| DEFAULT_ENCRYPTION_ALGORITHM.to_string()),
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Store the key pair for an SP, replacing existing keys in place.
    ///
    /// With no `sp_id` the first SP in the store is used; an empty store
    /// yields [`UpsertOutcome::Skipped`].
    pub fn upsert_keypair(
        &self,
        public_key: &str,
        private_key: &str,
        sp_id: Option<i64>,
    ) -> Result<UpsertOutcome> {
        let sp_id = match sp_id {
            Some(id) => {
                if !self.sp_exists(id)? {
                    return Err(Error::ServiceProviderNotFound(id));
                }
                id
            }
            None => match self.first_sp_id()? {
                Some(id) => id,
                None => {
                    tracing::debug!("No service provider to attach key pair to");
                    return Ok(UpsertOutcome::Skipped);
                }
            },
        };
        let client_id = sp_id.to_string();

        if self.get_keypair(sp_id)?.is_some() {
            let rows = self.conn.execute(
                &format!(
                    "UPDATE {} SET public_key = ?1, private_key = ?2 WHERE client_id = ?3",
                    self.tables.keypairs
                ),
                params![public_key, private_key, client_id],
            )?;
            Ok(UpsertOutcome::Updated { sp_id, rows })
        } else {
            self.conn.execute(
                &format!(
                    "INSERT INTO {} (client_id, public_key, private_key) VALUES (?1, ?2, ?3)",
                    self.tables.keypairs
                ),
                params![client_id, public_key, private_key],
            )?;
            Ok(UpsertOutcome::Inserted { sp_id })
        }
    }

    /// Delete the key pair of an SP; returns the count
    pub fn delete_keypair(&self, sp_id: i64) -> Result<usize> {
        let rows = self.conn.execute(
            &format!("DELETE FROM {} WHERE client_id = ?1", self.tables.keypairs),
            [sp_id.to_string()],
        )?;
        Ok(rows)
    }

    fn count_keypairs(&self) -> Result<usize> {
        self.count(&self.tables.keypairs)
    }

    // ========== Host Data ==========

    /// Distinct user attribute keys known to the host, for mapping selection
    pub fn list_distinct_user_attribute_keys(&self) -> Result<Vec<String>> {
        UserMetaTable::new(&self.conn, &self.tables).distinct_keys()
    }

    // ========== Statistics ==========

    fn count(&self, table: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Get store statistics
    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            service_providers: self.count_sps()?,
            attributes: self.count(&self.tables.attributes)?,
            keypairs: self.count_keypairs()?,
            schema_version: self.schema_version()?.map(|v| v.to_string()),
        })
    }
}

/// `col = ?n AND ...` with placeholders numbered after `offset` bound values
fn where_clause(conditions: &[(&'static str, Value)], offset: usize) -> String {
    conditions
        .iter()
        .enumerate()
        .map(|(i, (col, _))| format!("{} = ?{}", col, offset + i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Result of [`SpStore::ensure_schema`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SchemaStatus {
    Created {
        version: SchemaVersion,
    },
    Migrated {
        from: SchemaVersion,
        to: SchemaVersion,
        steps: Vec<&'static str>,
    },
    UpToDate {
        version: SchemaVersion,
    },
    /// Stored version is newer than this build understands
    Ahead {
        stored: SchemaVersion,
        supported: SchemaVersion,
    },
}

impl std::fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaStatus::Created { version } => write!(f, "created tables at version {}", version),
            SchemaStatus::Migrated { from, to, steps } => {
                write!(f, "migrated {} -> {} ({} step(s))", from, to, steps.len())
            }
            SchemaStatus::UpToDate { version } => write!(f, "up to date at version {}", version),
            SchemaStatus::Ahead { stored, supported } => write!(
                f,
                "stored version {} is newer than supported {}",
                stored, supported
            ),
        }
    }
}

/// Result of [`SpStore::upsert_keypair`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted { sp_id: i64 },
    Updated { sp_id: i64, rows: usize },
    /// No SP id given and the store has no SP
    Skipped,
}

/// Store statistics
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub service_providers: usize,
    pub attributes: usize,
    pub keypairs: usize,
    pub schema_version: Option<String>,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Store Statistics:")?;
        writeln!(f, "  Service providers: {}", self.service_providers)?;
        writeln!(f, "  Attribute mappings: {}", self.attributes)?;
        writeln!(f, "  Key pairs: {}", self.keypairs)?;
        write!(
            f,
            "  Schema version: {}",
            self.schema_version.as_deref().unwrap_or("none")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LogoutBinding, Protocol};

    fn store() -> SpStore {
        let store = SpStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        store
    }

    fn sample_sp(name: &str) -> NewServiceProvider {
        NewServiceProvider::new(
            name,
            format!("https://{}.example.com/metadata", name),
            format!("https://{}.example.com/acs", name),
        )
    }

    #[test]
    fn test_ensure_schema_creates_then_is_up_to_date() {
        let store = SpStore::open_in_memory().unwrap();
        assert!(matches!(store.ensure_schema().unwrap(), SchemaStatus::Created { .. }));
        assert_eq!(store.schema_version().unwrap(), Some(SchemaVersion::current()));
        assert!(matches!(store.ensure_schema().unwrap(), SchemaStatus::UpToDate { .. }));
    }

    #[test]
    fn test_newer_stored_version_is_left_alone() {
        let store = store();
        store.settings().set(SCHEMA_VERSION_KEY, "9.0").unwrap();
        assert!(matches!(store.ensure_schema().unwrap(), SchemaStatus::Ahead { .. }));
        assert_eq!(store.schema_version().unwrap().unwrap().as_str(), "9.0");
    }

    #[test]
    fn test_blank_version_marker_counts_as_absent() {
        for marker in ["", "   "] {
            let store = store();
            store.insert_sp(&sample_sp("kept")).unwrap();
            store.settings().set(SCHEMA_VERSION_KEY, marker).unwrap();
            assert_eq!(store.schema_version().unwrap(), None);

            match store.ensure_schema().unwrap() {
                SchemaStatus::Migrated { from, to, .. } => {
                    assert_eq!(from, SchemaVersion::unversioned());
                    assert_eq!(to, SchemaVersion::current());
                }
                other => panic!("expected migration, got {:?}", other),
            }
            assert_eq!(store.schema_version().unwrap(), Some(SchemaVersion::current()));
            assert!(store.find_sp_by_name("kept").unwrap().is_some());
        }
    }

    #[test]
    fn test_unparsable_version_marker_is_replaced() {
        let store = store();
        store.settings().set(SCHEMA_VERSION_KEY, "one.five").unwrap();
        assert_eq!(store.schema_version().unwrap(), None);

        store.ensure_schema().unwrap();
        assert_eq!(store.schema_version().unwrap(), Some(SchemaVersion::current()));
        assert!(matches!(store.ensure_schema().unwrap(), SchemaStatus::UpToDate { .. }));
    }

    #[test]
    fn test_insert_then_get_roundtrip() {
        let store = store();
        let new = sample_sp("wiki")
            .with_signing_cert("MIIC-sign")
            .with_encryption_cert("MIIC-enc")
            .with_nameid_format("urn:oasis:names:tc:SAML:2.0:nameid-format:persistent")
            .with_nameid_attr("user_login")
            .with_relay_state("https://wiki.example.com/home")
            .with_logout("https://wiki.example.com/slo", LogoutBinding::HttpPost)
            .with_protocol(Protocol::WsFed)
            .with_signing(true, false, true)
            .with_group_mapping(true);

        let id = store.insert_sp(&new).unwrap();
        let sp = store.get_sp(id).unwrap().unwrap();

        assert_eq!(sp.id, id);
        assert_eq!(sp.name, new.name);
        assert_eq!(sp.issuer, new.issuer);
        assert_eq!(sp.acs_url, new.acs_url);
        assert_eq!(sp.signing_cert, new.signing_cert);
        assert_eq!(sp.encryption_cert, new.encryption_cert);
        assert_eq!(sp.nameid_format, "urn:oasis:names:tc:SAML:2.0:nameid-format:persistent");
        assert_eq!(sp.nameid_attr, "user_login");
        assert!(sp.response_signed);
        assert!(!sp.assertion_signed);
        assert!(sp.assertion_encrypted);
        assert!(sp.group_mapping_enabled);
        assert_eq!(sp.default_relay_state, new.default_relay_state);
        assert_eq!(sp.logout_url, new.logout_url);
        assert_eq!(sp.logout_binding, LogoutBinding::HttpPost);
        assert_eq!(sp.protocol, Protocol::WsFed);
    }

    #[test]
    fn test_get_missing_sp_is_none() {
        let store = store();
        assert!(store.get_sp(42).unwrap().is_none());
        assert!(store.list_sps().unwrap().is_empty());
        assert_eq!(store.count_sps().unwrap(), 0);
    }

    #[test]
    fn test_find_by_issuer_name_acs() {
        let store = store();
        let a = store.insert_sp(&sample_sp("alpha")).unwrap();
        let b = store.insert_sp(&sample_sp("beta")).unwrap();

        assert_eq!(
            store.find_sp_by_issuer("https://alpha.example.com/metadata").unwrap().unwrap().id,
            a
        );
        assert_eq!(store.find_sp_by_name("beta").unwrap().unwrap().id, b);
        assert_eq!(
            store.find_sp_by_acs("https://beta.example.com/acs").unwrap().unwrap().id,
            b
        );

        assert!(store.find_sp_by_issuer("https://gamma.example.com/metadata").unwrap().is_none());
        assert!(store.find_sp_by_name("gamma").unwrap().is_none());
        assert!(store.find_sp_by_acs("https://alpha.example.com/other").unwrap().is_none());
    }

    #[test]
    fn test_lookup_values_are_bound_not_interpolated() {
        let store = store();
        store.insert_sp(&sample_sp("alpha")).unwrap();

        assert!(store.find_sp_by_name("' OR '1'='1").unwrap().is_none());
        assert_eq!(store.count_sps().unwrap(), 1);
    }

    #[test]
    fn test_update_sp_patch() {
        let store = store();
        let id = store
            .insert_sp(&sample_sp("alpha").with_signing_cert("old-cert"))
            .unwrap();

        let patch = SpPatch {
            name: Some("Alpha Renamed".to_string()),
            signing_cert: Some(None),
            assertion_signed: Some(true),
            protocol: Some(Protocol::WsFed),
            ..SpPatch::default()
        };
        store.update_sp(&patch, &SpMatch::by_id(id)).unwrap();

        let sp = store.get_sp(id).unwrap().unwrap();
        assert_eq!(sp.name, "Alpha Renamed");
        assert_eq!(sp.signing_cert, None);
        assert!(sp.assertion_signed);
        assert_eq!(sp.protocol, Protocol::WsFed);
        assert_eq!(sp.issuer, "https://alpha.example.com/metadata");
    }

    #[test]
    fn test_update_matching_nothing_is_ok() {
        let store = store();
        let patch = SpPatch {
            name: Some("x".to_string()),
            ..SpPatch::default()
        };
        store.update_sp(&patch, &SpMatch::by_id(99)).unwrap();
        store.update_sp(&SpPatch::new(), &SpMatch::default()).unwrap();
    }

    #[test]
    fn test_update_without_match_is_rejected() {
        let store = store();
        let patch = SpPatch {
            name: Some("x".to_string()),
            ..SpPatch::default()
        };
        assert!(matches!(
            store.update_sp(&patch, &SpMatch::default()),
            Err(Error::EmptyMatch(_))
        ));
    }

    #[test]
    fn test_attributes_require_existing_sp() {
        let store = store();
        let id = store.insert_sp(&sample_sp("alpha")).unwrap();

        store.insert_attribute(id, "email", "user_email", AttributeKind::Normal).unwrap();
        store.insert_attribute(id, "groups", "roles", AttributeKind::Group).unwrap();

        let attrs = store.get_attributes(id).unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].name, "email");
        assert_eq!(attrs[1].kind, AttributeKind::Group);

        assert!(matches!(
            store.insert_attribute(id + 1, "x", "y", AttributeKind::Normal),
            Err(Error::ServiceProviderNotFound(_))
        ));
        assert!(store.get_attributes(id + 1).unwrap().is_empty());
    }

    #[test]
    fn test_delete_attributes_by_name() {
        let store = store();
        let id = store.insert_sp(&sample_sp("alpha")).unwrap();
        store.insert_attribute(id, "email", "user_email", AttributeKind::Normal).unwrap();
        store.insert_attribute(id, "groups", "roles", AttributeKind::Group).unwrap();

        let removed = store
            .delete_attributes(&AttributeMatch::by_sp(id).with_name("email"))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_attributes(id).unwrap().len(), 1);

        assert!(matches!(
            store.delete_attributes(&AttributeMatch::default()),
            Err(Error::EmptyMatch(_))
        ));
    }

    #[test]
    fn test_delete_single_attribute_by_id() {
        let store = store();
        let id = store.insert_sp(&sample_sp("alpha")).unwrap();
        store.insert_attribute(id, "email", "user_email", AttributeKind::Normal).unwrap();
        store.insert_attribute(id, "groups", "roles", AttributeKind::Group).unwrap();

        let groups = store
            .get_attributes(id)
            .unwrap()
            .into_iter()
            .find(|a| a.kind == AttributeKind::Group)
            .unwrap();
        assert_eq!(store.delete_attributes(&AttributeMatch::by_id(groups.id)).unwrap(), 1);

        let left = store.get_attributes(id).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "email");
    }

    #[test]
    fn test_unknown_attribute_kind_reads_as_normal() {
        let store = store();
        let id = store.insert_sp(&sample_sp("alpha")).unwrap();
        store.insert_attribute(id, "email", "user_email", AttributeKind::Normal).unwrap();
        store
            .connection()
            .execute(
                "INSERT INTO wp_sp_attributes (sp_id, attr_name, attr_value, attr_type) VALUES (?1, 'odd', 'x', 7)",
                [id],
            )
            .unwrap();

        let attrs = store.get_attributes(id).unwrap();
        assert_eq!(attrs.len(), 2);
        assert!(attrs.iter().all(|a| a.kind == AttributeKind::Normal));
    }

    #[test]
    fn test_delete_sp_removes_dependents() {
        let store = store();
        let keep = store.insert_sp(&sample_sp("keep")).unwrap();
        let gone = store.insert_sp(&sample_sp("gone")).unwrap();

        for id in [keep, gone] {
            store.insert_attribute(id, "email", "user_email", AttributeKind::Normal).unwrap();
            store.upsert_keypair("pub", "priv", Some(id)).unwrap();
        }

        let deleted = store
            .delete_sp(&SpMatch::by_id(gone), &AttributeMatch::by_sp(gone))
            .unwrap();
        assert_eq!(deleted, 1);

        assert!(store.get_sp(gone).unwrap().is_none());
        assert!(store.get_attributes(gone).unwrap().is_empty());
        assert!(store.get_keypair(gone).unwrap().is_none());

        assert!(store.get_sp(keep).unwrap().is_some());
        assert_eq!(store.get_attributes(keep).unwrap().len(), 1);
        assert!(store.get_keypair(keep).unwrap().is_some());
    }

    #[test]
    fn test_delete_sp_by_issuer_removes_its_keypair() {
        let store = store();
        let id = store.insert_sp(&sample_sp("alpha")).unwrap();
        store.upsert_keypair("pub", "priv", Some(id)).unwrap();

        store
            .delete_sp(
                &SpMatch::by_issuer("https://alpha.example.com/metadata"),
                &AttributeMatch::by_sp(id),
            )
            .unwrap();
        assert!(store.get_keypair(id).unwrap().is_none());
        assert_eq!(store.count_sps().unwrap(), 0);
    }

    #[test]
    fn test_delete_sp_by_name() {
        let store = store();
        let id = store.insert_sp(&sample_sp("alpha")).unwrap();
        store.insert_sp(&sample_sp("beta")).unwrap();
        store.insert_attribute(id, "email", "user_email", AttributeKind::Normal).unwrap();

        let deleted = store
            .delete_sp(&SpMatch::by_name("alpha"), &AttributeMatch::by_sp(id))
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.find_sp_by_name("alpha").unwrap().is_none());
        assert!(store.get_attributes(id).unwrap().is_empty());
        assert!(store.find_sp_by_name("beta").unwrap().is_some());
    }

    #[test]
    fn test_upsert_keypair_twice_keeps_one_row() {
        let store = store();
        let id = store.insert_sp(&sample_sp("alpha")).unwrap();

        assert_eq!(
            store.upsert_keypair("pub-1", "priv-1", Some(id)).unwrap(),
            UpsertOutcome::Inserted { sp_id: id }
        );
        assert_eq!(
            store.upsert_keypair("pub-2", "priv-2", Some(id)).unwrap(),
            UpsertOutcome::Updated { sp_id: id, rows: 1 }
        );

        assert_eq!(store.count_keypairs().unwrap(), 1);
        let kp = store.get_keypair(id).unwrap().unwrap();
        assert_eq!(kp.public_key, "pub-2");
        assert_eq!(kp.private_key, "priv-2");
        assert_eq!(kp.encryption_algorithm, DEFAULT_ENCRYPTION_ALGORITHM);
        assert_eq!(kp.sp_id(), Some(id));
    }

    #[test]
    fn test_upsert_keypair_defaults_to_first_sp() {
        let store = store();
        let first = store.insert_sp(&sample_sp("first")).unwrap();
        store.insert_sp(&sample_sp("second")).unwrap();

        assert_eq!(
            store.upsert_keypair("pub", "priv", None).unwrap(),
            UpsertOutcome::Inserted { sp_id: first }
        );
        assert!(store.get_keypair(first).unwrap().is_some());
    }

    #[test]
    fn test_upsert_keypair_on_empty_store_is_skipped() {
        let store = store();
        assert_eq!(
            store.upsert_keypair("pub", "priv", None).unwrap(),
            UpsertOutcome::Skipped
        );
        assert_eq!(store.count_keypairs().unwrap(), 0);
    }

    #[test]
    fn test_upsert_keypair_for_unknown_sp_fails() {
        let store = store();
        assert!(matches!(
            store.upsert_keypair("pub", "priv", Some(7)),
            Err(Error::ServiceProviderNotFound(7))
        ));
    }

    #[test]
    fn test_delete_keypair() {
        let store = store();
        let id = store.insert_sp(&sample_sp("alpha")).unwrap();
        store.upsert_keypair("pub", "priv", Some(id)).unwrap();

        assert_eq!(store.delete_keypair(id).unwrap(), 1);
        assert_eq!(store.delete_keypair(id).unwrap(), 0);
        assert!(store.get_keypair(id).unwrap().is_none());
    }

    #[test]
    fn test_reset_all_restarts_ids() {
        let store = store();
        for name in ["a", "b", "c"] {
            let id = store.insert_sp(&sample_sp(name)).unwrap();
            store.insert_attribute(id, "email", "user_email", AttributeKind::Normal).unwrap();
        }
        store.upsert_keypair("pub", "priv", None).unwrap();

        store.reset_all().unwrap();

        assert_eq!(store.count_sps().unwrap(), 0);
        assert!(store.list_sps().unwrap().is_empty());
        assert_eq!(store.count_keypairs().unwrap(), 0);
        assert!(store.get_attributes(1).unwrap().is_empty());

        let id = store.insert_sp(&sample_sp("fresh")).unwrap();
        assert_eq!(id, 1);
        assert!(store.get_attributes(id).unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let store = store();
        let id = store.insert_sp(&sample_sp("alpha")).unwrap();
        store.insert_attribute(id, "email", "user_email", AttributeKind::Normal).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.service_providers, 1);
        assert_eq!(stats.attributes, 1);
        assert_eq!(stats.keypairs, 0);
        assert_eq!(stats.schema_version.as_deref(), Some(crate::version::CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_distinct_user_attribute_keys() {
        let store = store();
        store
            .connection()
            .execute_batch(
                "CREATE TABLE wp_usermeta (umeta_id INTEGER PRIMARY KEY, user_id INTEGER, meta_key TEXT, meta_value TEXT);
                 INSERT INTO wp_usermeta (user_id, meta_key, meta_value) VALUES (1, 'last_name', 'Doe');
                 INSERT INTO wp_usermeta (user_id, meta_key, meta_value) VALUES (2, 'last_name', 'Roe');",
            )
            .unwrap();

        assert_eq!(store.list_distinct_user_attribute_keys().unwrap(), vec!["last_name"]);
    }

    // ========== Migrations ==========

    /// SP and attribute tables as they looked at version 1.0
    const LEGACY_V1_0: &str = r#"
        CREATE TABLE wp_sp_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sp_name TEXT NOT NULL,
            issuer TEXT NOT NULL,
            acs_url TEXT NOT NULL,
            signing_cert TEXT,
            nameid_format TEXT NOT NULL,
            nameid_attr VARCHAR(55) NOT NULL DEFAULT 'emailAddress',
            response_signed SMALLINT,
            assertion_signed SMALLINT,
            group_mapping_enabled SMALLINT
        );
        CREATE TABLE wp_sp_attributes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sp_id INTEGER,
            attr_name TEXT NOT NULL,
            attr_value TEXT NOT NULL
        );
        INSERT INTO wp_sp_data (sp_name, issuer, acs_url, nameid_format, response_signed)
            VALUES ('legacy', 'https://legacy.example.com', 'https://legacy.example.com/acs',
                    'urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress', 1);
        INSERT INTO wp_sp_attributes (sp_id, attr_name, attr_value) VALUES (1, 'groupMapName', 'groups');
        INSERT INTO wp_sp_attributes (sp_id, attr_name, attr_value) VALUES (1, 'mail', 'user_email');
    "#;

    fn legacy_store() -> SpStore {
        let store = SpStore::open_in_memory().unwrap();
        store.connection().execute_batch(LEGACY_V1_0).unwrap();
        store.settings().ensure().unwrap();
        store.settings().set(SCHEMA_VERSION_KEY, "1.0").unwrap();
        store
    }

    type ColumnInfo = (String, String, bool, Option<String>, i64);

    fn columns(store: &SpStore, table: &str) -> Vec<ColumnInfo> {
        let mut stmt = store
            .connection()
            .prepare(&format!("PRAGMA table_info({})", table))
            .unwrap();
        let mut cols: Vec<ColumnInfo> = stmt
            .query_map([], |row| {
                Ok((row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
            })
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        cols.sort();
        cols
    }

    #[test]
    fn test_migration_from_1_0_matches_fresh_schema() {
        let migrated = legacy_store();
        let status = migrated.ensure_schema().unwrap();
        match status {
            SchemaStatus::Migrated { from, to, steps } => {
                assert_eq!(from.as_str(), "1.0");
                assert_eq!(to, SchemaVersion::current());
                assert_eq!(steps.len(), migration::STEPS.len());
            }
            other => panic!("expected migration, got {:?}", other),
        }
        assert_eq!(migrated.schema_version().unwrap(), Some(SchemaVersion::current()));

        let fresh = store();
        let tables = TableNames::default();
        for table in [&tables.sp, &tables.attributes, &tables.keypairs] {
            assert_eq!(columns(&migrated, table), columns(&fresh, table), "table {}", table);
        }
    }

    #[test]
    fn test_migration_backfills_legacy_rows() {
        let store = legacy_store();
        store.ensure_schema().unwrap();

        let sp = store.get_sp(1).unwrap().unwrap();
        assert_eq!(sp.protocol, Protocol::Saml);
        assert_eq!(sp.logout_binding, LogoutBinding::HttpRedirect);
        assert!(sp.response_signed);
        assert!(!sp.assertion_encrypted);
        assert_eq!(sp.encryption_cert, None);

        let attrs = store.get_attributes(1).unwrap();
        assert_eq!(attrs[0].kind, AttributeKind::Group);
        assert_eq!(attrs[1].kind, AttributeKind::Normal);

        assert_eq!(
            store.upsert_keypair("pub", "priv", None).unwrap(),
            UpsertOutcome::Inserted { sp_id: 1 }
        );
    }

    #[test]
    fn test_rerunning_migrations_is_harmless() {
        let store = legacy_store();
        store.ensure_schema().unwrap();

        store
            .update_sp(
                &SpPatch {
                    protocol: Some(Protocol::WsFed),
                    ..SpPatch::default()
                },
                &SpMatch::by_id(1),
            )
            .unwrap();
        store
            .delete_attributes(&AttributeMatch::by_sp(1).with_name("groupMapName"))
            .unwrap();
        store.insert_attribute(1, "groupMapName", "groups", AttributeKind::Normal).unwrap();

        store.migrate_from(&SchemaVersion::parse("1.0").unwrap()).unwrap();

        assert_eq!(store.get_sp(1).unwrap().unwrap().protocol, Protocol::WsFed);
        let group_attr = store
            .get_attributes(1)
            .unwrap()
            .into_iter()
            .find(|a| a.name == "groupMapName")
            .unwrap();
        assert_eq!(group_attr.kind, AttributeKind::Normal);
    }

    #[test]
    fn test_migration_from_1_4_only_creates_keypair_table() {
        let store = SpStore::open_in_memory().unwrap();
        let tables = TableNames::default();
        store
            .connection()
            .execute(&schema::create_sp_table(&tables), [])
            .unwrap();
        store
            .connection()
            .execute(&schema::create_attribute_table(&tables), [])
            .unwrap();
        store.settings().ensure().unwrap();
        store.settings().set(SCHEMA_VERSION_KEY, "1.4").unwrap();

        match store.ensure_schema().unwrap() {
            SchemaStatus::Migrated { steps, .. } => assert_eq!(steps, vec!["create key pair table"]),
            other => panic!("expected migration, got {:?}", other),
        }
        assert_eq!(store.count_keypairs().unwrap(), 0);
    }

    #[test]
    fn test_open_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sp.db");

        {
            let store = SpStore::open(&path, TableNames::default()).unwrap();
            store.ensure_schema().unwrap();
            store.insert_sp(&sample_sp("persisted")).unwrap();
        }

        let store = SpStore::open(&path, TableNames::default()).unwrap();
        assert!(matches!(store.ensure_schema().unwrap(), SchemaStatus::UpToDate { .. }));
        assert!(store.find_sp_by_name("persisted").unwrap().is_some());
    }

    fn multisite_store(path: &Path, prefix: &str) -> SpStore {
        SpStore::open(path, TableNames::new(prefix, true).unwrap()).unwrap()
    }

    /// Version 1.0 tables as a multisite network shares them
    fn legacy_network_tables() -> String {
        LEGACY_V1_0.replace("wp_sp_", "sp_")
    }

    #[test]
    fn test_multisite_sites_share_the_version_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.db");

        {
            let site2 = multisite_store(&path, "wp_2_");
            site2.connection().execute_batch(&legacy_network_tables()).unwrap();
            site2.settings().ensure().unwrap();
            site2.settings().set(SCHEMA_VERSION_KEY, "1.0").unwrap();
        }

        let site3 = multisite_store(&path, "wp_3_");
        match site3.ensure_schema().unwrap() {
            SchemaStatus::Migrated { from, .. } => assert_eq!(from.as_str(), "1.0"),
            other => panic!("expected migration, got {:?}", other),
        }
        site3
            .insert_sp(&sample_sp("net").with_encryption_cert("MIIC-enc"))
            .unwrap();

        let site2 = multisite_store(&path, "wp_2_");
        assert!(matches!(site2.ensure_schema().unwrap(), SchemaStatus::UpToDate { .. }));
        assert_eq!(site2.count_sps().unwrap(), 2);
    }

    #[test]
    fn test_unversioned_legacy_tables_are_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.db");

        {
            let site2 = multisite_store(&path, "wp_2_");
            site2.connection().execute_batch(&legacy_network_tables()).unwrap();
            // marker left in the old per-site settings table
            site2
                .connection()
                .execute_batch(
                    "CREATE TABLE wp_2_options (option_name TEXT PRIMARY KEY, option_value TEXT);
                     INSERT INTO wp_2_options VALUES ('spstore_schema_version', '1.0');",
                )
                .unwrap();
        }

        let site3 = multisite_store(&path, "wp_3_");
        match site3.ensure_schema().unwrap() {
            SchemaStatus::Migrated { from, steps, .. } => {
                assert_eq!(from, SchemaVersion::unversioned());
                assert_eq!(steps.len(), migration::STEPS.len());
            }
            other => panic!("expected migration, got {:?}", other),
        }

        site3
            .insert_sp(&sample_sp("net").with_encryption_cert("MIIC-enc"))
            .unwrap();
        let attrs = site3.get_attributes(1).unwrap();
        assert_eq!(attrs[0].kind, AttributeKind::Group);
        assert_eq!(site3.get_sp(1).unwrap().unwrap().protocol, Protocol::Saml);
    }

    #[test]
    fn test_multisite_tables() {
        let tables = TableNames::new("wp_2_", true).unwrap();
        let store = SpStore::new(Connection::open_in_memory().unwrap(), tables);
        store.ensure_schema().unwrap();

        store.insert_sp(&sample_sp("net")).unwrap();
        let on_disk: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM sp_data", [], |row| row.get(0))
            .unwrap();
        assert_eq!(on_disk, 1);
    }
}
