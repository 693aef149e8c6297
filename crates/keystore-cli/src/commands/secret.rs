//! Secret management command implementation.
//!
//! Handles get, set, delete and list against an initialized store.

use std::io::{Read, Write};
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use keystore::SecretManager;
use serde::Serialize;
use tracing::debug;

use crate::error::CliError;
use crate::output::{CommandResponse, OutputFormat, TableDisplay};

/// Where the value for `set` comes from.
#[derive(Debug, Clone, Copy)]
pub enum ValueSource<'a> {
    /// Given on the command line.
    Inline(&'a str),
    /// Read from a file, byte for byte.
    File(&'a Path),
    /// Read from stdin; one trailing newline is dropped.
    Stdin,
}

/// Handler for secret subcommands.
pub struct SecretCommand<'a, M: SecretManager + ?Sized> {
    manager: &'a M,
}

impl<'a, M: SecretManager + ?Sized> SecretCommand<'a, M> {
    /// Creates a new secret command handler.
    #[must_use]
    pub const fn new(manager: &'a M) -> Self {
        Self { manager }
    }

    /// Prints the value of `key`.
    ///
    /// Text values are printed with a trailing newline. Other values are
    /// written byte for byte, or base64-encoded in JSON output.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret cannot be read.
    pub fn get<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        key: &str,
    ) -> Result<(), CliError> {
        let value = self.manager.get_secret(key)?;
        let text = std::str::from_utf8(value.as_bytes()).ok();

        if format.is_json() {
            let output = match text {
                Some(text) => SecretOutput {
                    key: key.to_string(),
                    value: text.to_string(),
                    encoding: ValueEncoding::Utf8,
                },
                None => SecretOutput {
                    key: key.to_string(),
                    value: STANDARD.encode(value.as_bytes()),
                    encoding: ValueEncoding::Base64,
                },
            };
            format.write(out, &output)?;
        } else if let Some(text) = text {
            writeln!(out, "{text}")?;
        } else {
            out.write_all(value.as_bytes())?;
        }
        Ok(())
    }

    /// Stores a value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be read or stored.
    pub fn set<W: Write, R: Read>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        key: &str,
        source: ValueSource<'_>,
        stdin: R,
    ) -> Result<(), CliError> {
        let value = read_value(source, stdin)?;
        debug!(key, len = value.len(), "storing secret");
        self.manager.set_secret(key, &value)?;
        format.write(out, &CommandResponse::ok(format!("Secret '{key}' stored")))
    }

    /// Deletes `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store refuses the deletion.
    pub fn delete<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        key: &str,
    ) -> Result<(), CliError> {
        self.manager.delete_secret(key)?;
        format.write(out, &CommandResponse::ok(format!("Secret '{key}' deleted")))
    }

    /// Lists stored keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub fn list<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let secrets = self
            .manager
            .list_secrets()?
            .into_iter()
            .map(String::from)
            .collect();
        format.write(out, &SecretList { secrets })
    }
}

fn read_value<R: Read>(source: ValueSource<'_>, mut stdin: R) -> Result<Vec<u8>, CliError> {
    match source {
        ValueSource::Inline(value) => Ok(value.as_bytes().to_vec()),
        ValueSource::File(path) => Ok(std::fs::read(path)?),
        ValueSource::Stdin => {
            let mut buf = Vec::new();
            stdin.read_to_end(&mut buf)?;
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            if buf.is_empty() {
                return Err(CliError::InvalidArgument(
                    "no value given; pass it as an argument, with --file, or on stdin".to_string(),
                ));
            }
            Ok(buf)
        }
    }
}

// Output types

/// How [`SecretOutput::value`] is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValueEncoding {
    /// The value is the plaintext itself.
    #[serde(rename = "utf-8")]
    Utf8,
    /// The plaintext is not UTF-8; the value is standard base64.
    #[serde(rename = "base64")]
    Base64,
}

/// A revealed secret.
#[derive(Debug, Clone, Serialize)]
pub struct SecretOutput {
    /// Secret key.
    pub key: String,
    /// Plaintext value, encoded per `encoding`.
    pub value: String,
    /// Encoding of `value`.
    pub encoding: ValueEncoding,
}

impl TableDisplay for SecretOutput {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{}", self.value)?;
        Ok(())
    }
}

/// List of secret keys.
#[derive(Debug, Clone, Serialize)]
pub struct SecretList {
    /// Secret keys, sorted.
    pub secrets: Vec<String>,
}

impl TableDisplay for SecretList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.secrets.is_empty() {
            writeln!(writer, "No secrets found")?;
            return Ok(());
        }

        writeln!(writer, "KEY")?;
        writeln!(writer, "{}", "─".repeat(40))?;
        for key in &self.secrets {
            writeln!(writer, "{key}")?;
        }

        writeln!(writer)?;
        writeln!(writer, "Total: {} secret(s)", self.secrets.len())?;
        Ok(())
    }
}
