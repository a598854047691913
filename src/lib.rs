//! # spstore - Service Provider configuration store
//!
//! Persists the identity-provider side of SP federation:
//! - Service Provider records (issuer, ACS URL, certificates, signing flags)
//! - Per-SP attribute mappings, including group-mapping claims
//! - Per-SP signing/encryption key pairs
//! - A schema-version marker with a cumulative, idempotent migration chain
//!
//! The store is a thin SQLite layer: every operation maps onto one or a few
//! bound-parameter statements against an injected connection.

pub mod config;
pub mod model;
pub mod storage;
pub mod ui;
pub mod version;

// Re-exports for convenient access
pub use config::{StoreConfig, TableNames};
pub use model::{
    AttributeKind, AttributeMapping, AttributeMatch, KeyPair, LogoutBinding, NewServiceProvider,
    Protocol, ServiceProvider, SpMatch, SpPatch,
};
pub use storage::{SchemaStatus, SpStore, StoreStats, UpsertOutcome};
pub use version::SchemaVersion;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid schema version: {0}")]
    InvalidVersion(String),

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Service provider not found: {0}")]
    ServiceProviderNotFound(i64),

    #[error("Refusing to run {0} without a match condition")]
    EmptyMatch(&'static str),
}
