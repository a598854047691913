//! Schema migrations
//!
//! An ordered list of steps, each gated by the last version that lacked the
//! change. Upgrading from version `v` runs every step whose gate is `>= v`,
//! oldest first, so an old store picks up every later change in one pass.
//!
//! Steps must be idempotent: a column is only added when missing and a
//! backfill only runs right after its column was added.

use super::schema::{self, attr_col, coldef, sp_col};
use crate::config::TableNames;
use crate::version::SchemaVersion;
use crate::Result;
use rusqlite::{Connection, params};

/// A single schema change.
pub struct MigrationStep {
    /// Last version without this change
    pub gate: &'static str,
    pub name: &'static str,
    apply: fn(&Connection, &TableNames) -> Result<()>,
}

impl MigrationStep {
    pub fn gate_version(&self) -> Result<SchemaVersion> {
        SchemaVersion::parse(self.gate)
    }

    pub fn apply(&self, conn: &Connection, tables: &TableNames) -> Result<()> {
        (self.apply)(conn, tables)
    }
}

pub const STEPS: &[MigrationStep] = &[
    MigrationStep {
        gate: "1.0",
        name: "add encryption certificate and assertion encryption flag",
        apply: add_encryption_columns,
    },
    MigrationStep {
        gate: "1.0.2",
        name: "add default relay state",
        apply: add_relay_state_column,
    },
    MigrationStep {
        gate: "1.0.4",
        name: "add logout url and binding type",
        apply: add_logout_columns,
    },
    MigrationStep {
        gate: "1.2",
        name: "add attribute kind and flag group mapping attributes",
        apply: add_attribute_kind_column,
    },
    MigrationStep {
        gate: "1.3",
        name: "add protocol type",
        apply: add_protocol_type_column,
    },
    MigrationStep {
        gate: "1.4",
        name: "create key pair table",
        apply: create_keypair_table,
    },
];

/// Steps that apply when upgrading from `from`, in order
pub fn pending(from: &SchemaVersion) -> Result<Vec<&'static MigrationStep>> {
    let mut out = Vec::new();
    for step in STEPS {
        if step.gate_version()? >= *from {
            out.push(step);
        }
    }
    Ok(out)
}

/// Apply every pending step, then refresh indexes. Returns the step names.
pub fn run_from(
    conn: &Connection,
    tables: &TableNames,
    from: &SchemaVersion,
) -> Result<Vec<&'static str>> {
    let steps = pending(from)?;
    let mut applied = Vec::with_capacity(steps.len());

    for step in steps {
        tracing::info!("Migration (gate {}): {}", step.gate, step.name);
        step.apply(conn, tables)?;
        applied.push(step.name);
    }

    for stmt in schema::create_indexes(tables) {
        conn.execute(&stmt, [])?;
    }

    Ok(applied)
}

/// Whether a table named `table` exists
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Whether `table` has a column named `column`
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.iter().any(|n| n == column))
}

/// Add a column unless it is already there. Returns true if it was added.
pub fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<bool> {
    if column_exists(conn, table, column)? {
        tracing::debug!("{}.{} already present", table, column);
        return Ok(false);
    }

    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition),
        [],
    )?;
    Ok(true)
}

fn add_encryption_columns(conn: &Connection, tables: &TableNames) -> Result<()> {
    add_column_if_missing(conn, &tables.sp, sp_col::ENCRYPTION_CERT, coldef::ENCRYPTION_CERT)?;
    add_column_if_missing(conn, &tables.sp, sp_col::ASSERTION_ENCRYPTED, coldef::ASSERTION_ENCRYPTED)?;
    Ok(())
}

fn add_relay_state_column(conn: &Connection, tables: &TableNames) -> Result<()> {
    add_column_if_missing(conn, &tables.sp, sp_col::DEFAULT_RELAY_STATE, coldef::DEFAULT_RELAY_STATE)?;
    Ok(())
}

fn add_logout_columns(conn: &Connection, tables: &TableNames) -> Result<()> {
    add_column_if_missing(conn, &tables.sp, sp_col::LOGOUT_URL, coldef::LOGOUT_URL)?;
    add_column_if_missing(conn, &tables.sp, sp_col::LOGOUT_BINDING_TYPE, coldef::LOGOUT_BINDING_TYPE)?;
    Ok(())
}

/// Attribute named "groupMapName" was the group claim before kinds existed
const LEGACY_GROUP_ATTRIBUTE: &str = "groupMapName";

fn add_attribute_kind_column(conn: &Connection, tables: &TableNames) -> Result<()> {
    if add_column_if_missing(conn, &tables.attributes, attr_col::KIND, coldef::ATTR_TYPE)? {
        let flagged = conn.execute(
            &format!(
                "UPDATE {} SET {} = 1 WHERE {} = ?1",
                tables.attributes,
                attr_col::KIND,
                attr_col::NAME
            ),
            params![LEGACY_GROUP_ATTRIBUTE],
        )?;
        tracing::debug!("Flagged {} group mapping attribute(s)", flagged);
    }
    Ok(())
}

fn add_protocol_type_column(conn: &Connection, tables: &TableNames) -> Result<()> {
    if add_column_if_missing(conn, &tables.sp, sp_col::PROTOCOL_TYPE, coldef::PROTOCOL_TYPE)? {
        conn.execute(
            &format!("UPDATE {} SET {} = ?1", tables.sp, sp_col::PROTOCOL_TYPE),
            params!["SAML"],
        )?;
    }
    Ok(())
}

fn create_keypair_table(conn: &Connection, tables: &TableNames) -> Result<()> {
    conn.execute(&schema::create_keypair_table(tables), [])?;
    Ok(())
}
