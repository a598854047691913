//! Database schema definitions
//!
//! Table names are configurable, so DDL is produced by functions rather than
//! constants. Column definitions used by migrations live here too; a column
//! added by a migration must be declared exactly as the fresh table declares
//! it.

use crate::config::TableNames;

/// SP table columns
pub mod sp_col {
    pub const ID: &str = "id";
    pub const NAME: &str = "sp_name";
    pub const ISSUER: &str = "issuer";
    pub const ACS_URL: &str = "acs_url";
    pub const SIGNING_CERT: &str = "signing_cert";
    pub const ENCRYPTION_CERT: &str = "encryption_cert";
    pub const NAMEID_FORMAT: &str = "nameid_format";
    pub const NAMEID_ATTR: &str = "nameid_attr";
    pub const RESPONSE_SIGNED: &str = "response_signed";
    pub const ASSERTION_SIGNED: &str = "assertion_signed";
    pub const ASSERTION_ENCRYPTED: &str = "assertion_encrypted";
    pub const GROUP_MAPPING_ENABLED: &str = "group_mapping_enabled";
    pub const DEFAULT_RELAY_STATE: &str = "default_relay_state";
    pub const LOGOUT_URL: &str = "logout_url";
    pub const LOGOUT_BINDING_TYPE: &str = "logout_binding_type";
    pub const PROTOCOL_TYPE: &str = "protocol_type";

    /// Every column in table order
    pub const ALL: &[&str] = &[
        ID,
        NAME,
        ISSUER,
        ACS_URL,
        SIGNING_CERT,
        ENCRYPTION_CERT,
        NAMEID_FORMAT,
        NAMEID_ATTR,
        RESPONSE_SIGNED,
        ASSERTION_SIGNED,
        ASSERTION_ENCRYPTED,
        GROUP_MAPPING_ENABLED,
        DEFAULT_RELAY_STATE,
        LOGOUT_URL,
        LOGOUT_BINDING_TYPE,
        PROTOCOL_TYPE,
    ];
}

/// Attribute table columns
pub mod attr_col {
    pub const ID: &str = "id";
    pub const SP_ID: &str = "sp_id";
    pub const NAME: &str = "attr_name";
    pub const VALUE: &str = "attr_value";
    pub const KIND: &str = "attr_type";
}

/// Column definitions shared by the fresh DDL and the migrations
pub mod coldef {
    pub const ENCRYPTION_CERT: &str = "TEXT";
    pub const ASSERTION_ENCRYPTED: &str = "SMALLINT";
    pub const DEFAULT_RELAY_STATE: &str = "TEXT";
    pub const LOGOUT_URL: &str = "TEXT";
    pub const LOGOUT_BINDING_TYPE: &str = "VARCHAR(15) NOT NULL DEFAULT 'HttpRedirect'";
    pub const PROTOCOL_TYPE: &str = "TEXT NOT NULL DEFAULT 'SAML'";
    pub const ATTR_TYPE: &str = "SMALLINT NOT NULL DEFAULT 0";
}

/// SQL to create the SP table at the latest version
pub fn create_sp_table(tables: &TableNames) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sp_name TEXT NOT NULL,
    issuer TEXT NOT NULL,
    acs_url TEXT NOT NULL,
    signing_cert TEXT,
    encryption_cert {encryption_cert},
    nameid_format TEXT NOT NULL,
    nameid_attr VARCHAR(55) NOT NULL DEFAULT 'emailAddress',
    response_signed SMALLINT,
    assertion_signed SMALLINT,
    assertion_encrypted {assertion_encrypted},
    group_mapping_enabled SMALLINT,
    default_relay_state {relay_state},
    logout_url {logout_url},
    logout_binding_type {logout_binding},
    protocol_type {protocol}
)
"#,
        table = tables.sp,
        encryption_cert = coldef::ENCRYPTION_CERT,
        assertion_encrypted = coldef::ASSERTION_ENCRYPTED,
        relay_state = coldef::DEFAULT_RELAY_STATE,
        logout_url = coldef::LOGOUT_URL,
        logout_binding = coldef::LOGOUT_BINDING_TYPE,
        protocol = coldef::PROTOCOL_TYPE,
    )
}

/// SQL to create the attribute mapping table at the latest version.
/// `sp_id` carries no REFERENCES clause: ownership is checked by the store.
pub fn create_attribute_table(tables: &TableNames) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sp_id INTEGER,
    attr_name TEXT NOT NULL,
    attr_value TEXT NOT NULL,
    attr_type {attr_type}
)
"#,
        table = tables.attributes,
        attr_type = coldef::ATTR_TYPE,
    )
}

/// SQL to create the key pair table. No primary key: one row per
/// `client_id` is kept by the store's upsert.
pub fn create_keypair_table(tables: &TableNames) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    client_id VARCHAR(80),
    public_key VARCHAR(8000),
    private_key VARCHAR(8000),
    encryption_algorithm VARCHAR(80) DEFAULT 'RS256'
)
"#,
        table = tables.keypairs,
    )
}

/// SQL to create the settings table when the host does not provide one
pub fn create_settings_table(tables: &TableNames) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    option_name TEXT PRIMARY KEY,
    option_value TEXT NOT NULL
)
"#,
        table = tables.settings,
    )
}

/// SQL to create indexes
pub fn create_indexes(tables: &TableNames) -> Vec<String> {
    vec![
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{t}_issuer ON {t}(issuer)",
            t = tables.sp
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{t}_sp_id ON {t}(sp_id)",
            t = tables.attributes
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{t}_client_id ON {t}(client_id)",
            t = tables.keypairs
        ),
    ]
}

/// All statements that build a fresh store
pub fn all_schema_statements(tables: &TableNames) -> Vec<String> {
    let mut stmts = vec![
        create_sp_table(tables),
        create_attribute_table(tables),
        create_keypair_table(tables),
    ];
    stmts.extend(create_indexes(tables));
    stmts
}
