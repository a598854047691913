//! Storage Layer - SQLite-backed persistence
//!
//! Store-owned tables:
//! - sp_data(id, sp_name, issuer, acs_url, certificates, flags, logout, protocol)
//! - sp_attributes(id, sp_id, attr_name, attr_value, attr_type)
//! - sp_keypairs(client_id, public_key, private_key, encryption_algorithm)
//!
//! Host-owned tables read through `host`:
//! - options(option_name, option_value) - schema version marker
//! - usermeta(meta_key, ...) - attribute keys offered for mapping

pub mod host;
pub mod migration;
pub mod schema;
pub mod sqlite;

pub use host::{SettingsTable, UserMetaTable};
pub use migration::MigrationStep;
pub use sqlite::{SchemaStatus, SpStore, StoreStats, UpsertOutcome};
