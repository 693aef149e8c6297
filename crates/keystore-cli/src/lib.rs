//! # keystore-cli
//!
//! Operator command-line interface for the keystore.
//!
//! Provides commands for:
//! - Reading, writing, deleting and listing secrets
//! - Rotating the store key and inspecting rotation metadata
//! - Checking store health and permissions
//!
//! Every invocation opens the store, runs one command, and closes it again.
//! The master password is read from `--master-password` or
//! `KEYSTORE_MASTER_PASSWORD`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, Format, KeyCommands};
pub use error::CliError;
pub use output::OutputFormat;
