//! Host-owned tables the store reads from
//!
//! The hosting application owns a key/value settings table and a user
//! metadata table. The store only needs a narrow slice of each.

use super::schema;
use crate::Result;
use crate::config::TableNames;
use rusqlite::{Connection, OptionalExtension, params};

/// Key/value settings table (`option_name` -> `option_value`)
pub struct SettingsTable<'a> {
    conn: &'a Connection,
    tables: &'a TableNames,
}

impl<'a> SettingsTable<'a> {
    pub fn new(conn: &'a Connection, tables: &'a TableNames) -> Self {
        Self { conn, tables }
    }

    /// Create the table when no host provides one
    pub fn ensure(&self) -> Result<()> {
        self.conn.execute(&schema::create_settings_table(self.tables), [])?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                &format!("SELECT option_value FROM {} WHERE option_name = ?1", self.tables.settings),
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (option_name, option_value) VALUES (?1, ?2)",
                self.tables.settings
            ),
            params![key, value],
        )?;
        Ok(())
    }
}

/// Host user metadata table; only `meta_key` is read
pub struct UserMetaTable<'a> {
    conn: &'a Connection,
    table: &'a str,
}

impl<'a> UserMetaTable<'a> {
    pub fn new(conn: &'a Connection, tables: &'a TableNames) -> Self {
        Self {
            conn,
            table: &tables.user_meta,
        }
    }

    /// Distinct attribute keys present on any user, sorted
    pub fn distinct_keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT meta_key FROM {} WHERE meta_key IS NOT NULL ORDER BY meta_key",
            self.table
        ))?;

        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(keys)
    }
}
