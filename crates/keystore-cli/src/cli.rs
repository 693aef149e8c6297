//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use keystore::Config;

use crate::error::CliError;

/// Keystore - local encrypted secret store with key rotation.
#[derive(Parser, Debug, Clone)]
#[command(name = "keystore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Store root directory. Defaults to the per-user data directory.
    #[arg(short = 'p', long, env = "KEYSTORE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// Master password sealing the data key.
    #[arg(long, env = "KEYSTORE_MASTER_PASSWORD", hide_env_values = true)]
    pub master_password: Option<String>,

    /// Rotation interval in seconds, used to schedule the next rotation.
    #[arg(long, value_name = "SECONDS")]
    pub rotation_interval: Option<u64>,

    /// JSON configuration file; command-line flags take precedence.
    #[arg(short, long, env = "KEYSTORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Builds the store configuration from the config file and flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded.
    pub fn store_config(&self) -> Result<Config, CliError> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };

        if let Some(path) = &self.storage_path {
            config.storage_path = Some(path.clone());
        }
        if let Some(password) = &self.master_password {
            config = config.with_master_password(password.clone());
        }
        if let Some(secs) = self.rotation_interval {
            let mut policy = config.rotation_policy.take().unwrap_or_default();
            policy.interval_seconds = Some(secs);
            config = config.with_rotation_policy(policy);
        }

        Ok(config)
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create the store if needed and report its state.
    Init,

    /// Show store health and rotation state.
    Status,

    /// Print a secret value.
    Get {
        /// Secret key.
        key: String,
    },

    /// Store a secret value.
    ///
    /// The value is taken from the argument, from --file, or from stdin.
    Set {
        /// Secret key.
        key: String,

        /// Secret value.
        #[arg(conflicts_with = "file")]
        value: Option<String>,

        /// Read the value from a file.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Delete a secret. Deleting an absent key succeeds.
    Delete {
        /// Secret key.
        key: String,
    },

    /// List stored secret keys.
    List,

    /// Key management.
    Key {
        /// Key subcommand to execute.
        #[command(subcommand)]
        command: KeyCommands,
    },
}

/// Key subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum KeyCommands {
    /// Generate a new key and re-encrypt every secret under it.
    Rotate,

    /// Show key version and rotation timestamps.
    Metadata,
}
