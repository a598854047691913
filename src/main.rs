//! spstore CLI - administer the Service Provider configuration store

use clap::{Args, Parser, Subcommand};
use spstore::config::{self, StoreConfig};
use spstore::{SpStore, TableNames};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "spstore")]
#[command(version)]
#[command(about = "Service Provider configuration store for an identity provider")]
#[command(long_about = r#"
spstore manages the SP side of an identity provider's federation setup:
  • Service Provider records (issuer, ACS URL, certificates, signing flags)
  • Attribute mappings, including group-mapping claims
  • Per-SP signing/encryption key pairs
  • Schema versioning with automatic migration of older stores

Example usage:
  spstore init
  spstore sp add --name wiki --issuer https://wiki.example.com --acs https://wiki.example.com/acs
  spstore attr add 1 email user_email
  spstore key set --public pub.pem --private key.pem --sp 1
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit machine-readable JSON instead of human output
    #[arg(long, global = true)]
    json: bool,

    /// Path to the config file (default: spstore.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store tables or migrate an older store
    Init,

    /// Show schema version and row counts
    Status,

    /// Manage service providers
    Sp {
        #[command(subcommand)]
        command: SpCommand,
    },

    /// Manage attribute mappings
    Attr {
        #[command(subcommand)]
        command: AttrCommand,
    },

    /// Manage per-SP key pairs
    Key {
        #[command(subcommand)]
        command: KeyCommand,
    },

    /// Delete every SP, attribute mapping and key pair
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },

    /// List the user attribute keys available for mapping
    MetaKeys,

    /// Manage the config file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
pub enum SpCommand {
    /// List all service providers
    List,

    /// Show one service provider with its attributes
    Show { id: i64 },

    /// Find a service provider by issuer, name or ACS URL
    Find {
        #[arg(long, group = "by")]
        issuer: Option<String>,
        #[arg(long, group = "by")]
        name: Option<String>,
        #[arg(long, group = "by")]
        acs: Option<String>,
    },

    /// Register a new service provider
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        issuer: String,
        #[arg(long)]
        acs: String,
        #[command(flatten)]
        options: SpOptions,
    },

    /// Update fields of a service provider
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        issuer: Option<String>,
        #[arg(long)]
        acs: Option<String>,
        #[command(flatten)]
        options: SpOptions,
        /// Remove the stored signing certificate
        #[arg(long, conflicts_with = "signing_cert")]
        clear_signing_cert: bool,
        /// Remove the stored encryption certificate
        #[arg(long, conflicts_with = "encryption_cert")]
        clear_encryption_cert: bool,
    },

    /// Delete a service provider with its attributes and key pair
    Delete { id: i64 },
}

/// Optional SP fields shared by `sp add` and `sp update`
#[derive(Args)]
pub struct SpOptions {
    #[arg(long)]
    pub nameid_format: Option<String>,
    /// User attribute used as NameID
    #[arg(long)]
    pub nameid_attr: Option<String>,
    /// PEM file with the SP signing certificate
    #[arg(long)]
    pub signing_cert: Option<PathBuf>,
    /// PEM file with the SP encryption certificate
    #[arg(long)]
    pub encryption_cert: Option<PathBuf>,
    #[arg(long)]
    pub relay_state: Option<String>,
    #[arg(long)]
    pub logout_url: Option<String>,
    /// HttpRedirect or HttpPost
    #[arg(long)]
    pub logout_binding: Option<String>,
    /// SAML or WS-Fed
    #[arg(long)]
    pub protocol: Option<String>,
    #[arg(long)]
    pub sign_response: Option<bool>,
    #[arg(long)]
    pub sign_assertion: Option<bool>,
    #[arg(long)]
    pub encrypt_assertion: Option<bool>,
    #[arg(long)]
    pub group_mapping: Option<bool>,
}

#[derive(Subcommand)]
pub enum AttrCommand {
    /// List the attribute mappings of an SP
    List { sp_id: i64 },

    /// Map a claim to a user attribute
    Add {
        sp_id: i64,
        /// Claim name sent to the SP
        name: String,
        /// User attribute the claim is filled from
        value: String,
        /// Mark as the group-mapping claim
        #[arg(long)]
        group: bool,
    },

    /// Delete attribute mappings of an SP
    Delete {
        sp_id: i64,
        /// Only delete mappings with this claim name
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum KeyCommand {
    /// Show the key pair of an SP (private key omitted)
    Show { sp_id: i64 },

    /// Store a key pair, replacing any existing one
    Set {
        /// PEM file with the public key or certificate
        #[arg(long)]
        public: PathBuf,
        /// PEM file with the private key
        #[arg(long)]
        private: PathBuf,
        /// SP id (default: first SP in the store)
        #[arg(long)]
        sp: Option<i64>,
    },

    /// Delete the key pair of an SP
    Delete { sp_id: i64 },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub fn is_human(&self) -> bool {
        matches!(self, OutputMode::Human)
    }
}

/// Print the JSON envelope for a successful command
pub fn emit_success(
    output_mode: OutputMode,
    command: &str,
    data: serde_json::Value,
) -> anyhow::Result<()> {
    if output_mode == OutputMode::Json {
        let envelope = serde_json::json!({
            "ok": true,
            "command": command,
            "data": data,
        });
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    if let Commands::Config {
        command: ConfigCommand::Init { force },
    } = cli.command
    {
        let path = cli.config.unwrap_or_else(config::default_config_path);
        return commands::run_config_init(output_mode, &path, force);
    }

    let store_config = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    let database = cli
        .database
        .or_else(|| store_config.database.as_ref().map(PathBuf::from))
        .unwrap_or_else(config::default_database_path);

    let store = open_store(&database, &store_config)?;
    let status = store.ensure_schema()?;
    tracing::debug!("Schema {} ({:?})", status, database);

    match cli.command {
        Commands::Init => commands::run_init(&store, output_mode, &status, &database),
        Commands::Status => commands::run_status(&store, output_mode, &database),
        Commands::Sp { command } => commands::run_sp(&store, output_mode, command),
        Commands::Attr { command } => commands::run_attr(&store, output_mode, command),
        Commands::Key { command } => commands::run_key(&store, output_mode, command),
        Commands::Reset { yes } => commands::run_reset(&store, output_mode, yes),
        Commands::MetaKeys => commands::run_meta_keys(&store, output_mode),
        Commands::Config { .. } => Ok(()),
    }
}

fn open_store(database: &std::path::Path, store_config: &StoreConfig) -> anyhow::Result<SpStore> {
    config::ensure_db_dir(database)?;
    let tables = TableNames::from_config(store_config)?;
    tracing::debug!("Opening {:?} with SP table {}", database, tables.sp);
    Ok(SpStore::open(database, tables)?)
}
