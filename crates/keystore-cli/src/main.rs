//! Keystore CLI binary entrypoint.

use std::io;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use keystore::Backend;
use keystore::keyset::KEYSET_FILE;
use keystore::metadata::METADATA_FILE;
use keystore_cli::cli::{Cli, Commands, KeyCommands};
use keystore_cli::commands::{KeyCommand, SecretCommand, StatusCommand, ValueSource};
use keystore_cli::output::OutputFormat;
use keystore_cli::CliError;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let format = OutputFormat::new(cli.format);
    let config = cli.store_config()?;
    let storage_path = config.resolve_storage().ok().map(|location| location.path);

    let manager = Backend::File.create();
    let report_only = matches!(cli.command, Commands::Status)
        && !storage_path.as_deref().is_some_and(store_exists);
    let init = if report_only {
        debug!("no store at the configured path; reporting without creating one");
        Ok(())
    } else {
        manager.initialize(config)
    };
    let mut stdout = io::stdout().lock();

    let result = match (cli.command, init) {
        (Commands::Status, init) => {
            let cmd = StatusCommand::new(manager.as_ref(), storage_path);
            cmd.execute(&mut stdout, &format, init.as_ref().err())
        }
        (_, Err(e)) => Err(e.into()),
        (Commands::Init, Ok(())) => {
            let cmd = StatusCommand::new(manager.as_ref(), storage_path);
            cmd.execute(&mut stdout, &format, None)
        }
        (Commands::Get { key }, Ok(())) => {
            SecretCommand::new(manager.as_ref()).get(&mut stdout, &format, &key)
        }
        (Commands::Set { key, value, file }, Ok(())) => {
            let source = match (&value, &file) {
                (Some(value), _) => ValueSource::Inline(value),
                (None, Some(path)) => ValueSource::File(path),
                (None, None) => ValueSource::Stdin,
            };
            let cmd = SecretCommand::new(manager.as_ref());
            cmd.set(&mut stdout, &format, &key, source, io::stdin())
        }
        (Commands::Delete { key }, Ok(())) => {
            SecretCommand::new(manager.as_ref()).delete(&mut stdout, &format, &key)
        }
        (Commands::List, Ok(())) => SecretCommand::new(manager.as_ref()).list(&mut stdout, &format),
        (Commands::Key { command }, Ok(())) => {
            let cmd = KeyCommand::new(manager.as_ref());
            match command {
                KeyCommands::Rotate => cmd.rotate(&mut stdout, &format),
                KeyCommands::Metadata => cmd.metadata(&mut stdout, &format),
            }
        }
    };

    let closed = manager.close();
    debug!(ok = result.is_ok(), "command finished");
    result?;
    closed?;
    Ok(())
}

/// Whether `root` holds a store that `initialize` would open rather than create.
fn store_exists(root: &Path) -> bool {
    root.join(METADATA_FILE).is_file() || root.join(KEYSET_FILE).is_file()
}
