use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_TABLE_PREFIX: &str = "wp_";

/// Settings table shared by every site of a multisite network
pub const NETWORK_SETTINGS_TABLE: &str = "sp_options";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database: Option<String>,
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    /// Network-wide deployment: SP tables are shared and carry no prefix
    #[serde(default)]
    pub multisite: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: None,
            table_prefix: default_table_prefix(),
            multisite: false,
        }
    }
}

fn default_table_prefix() -> String {
    DEFAULT_TABLE_PREFIX.to_string()
}

/// Physical table names the store reads and writes.
///
/// Names are interpolated into SQL text, so they are validated on
/// construction and never come from request input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub sp: String,
    pub attributes: String,
    pub keypairs: String,
    /// Key/value settings holding the schema version. Shared like the SP
    /// tables in a multisite network.
    pub settings: String,
    /// Host user metadata (source of attribute keys)
    pub user_meta: String,
}

impl TableNames {
    pub fn new(prefix: &str, multisite: bool) -> Result<Self> {
        if !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidTableName(prefix.to_string()));
        }

        let sp_prefix = if multisite { "" } else { prefix };
        let settings = if multisite {
            NETWORK_SETTINGS_TABLE.to_string()
        } else {
            format!("{prefix}options")
        };
        Ok(Self {
            sp: format!("{sp_prefix}sp_data"),
            attributes: format!("{sp_prefix}sp_attributes"),
            keypairs: format!("{sp_prefix}sp_keypairs"),
            settings,
            user_meta: format!("{prefix}usermeta"),
        })
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Self::new(&config.table_prefix, config.multisite)
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            sp: format!("{DEFAULT_TABLE_PREFIX}sp_data"),
            attributes: format!("{DEFAULT_TABLE_PREFIX}sp_attributes"),
            keypairs: format!("{DEFAULT_TABLE_PREFIX}sp_keypairs"),
            settings: format!("{DEFAULT_TABLE_PREFIX}options"),
            user_meta: format!("{DEFAULT_TABLE_PREFIX}usermeta"),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("spstore.toml")
}

pub fn default_database_path() -> PathBuf {
    PathBuf::from("spstore.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<StoreConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: StoreConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &StoreConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
