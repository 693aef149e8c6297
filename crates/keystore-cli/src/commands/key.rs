//! Key rotation command implementation.

use std::io::Write;

use chrono::{DateTime, Utc};
use keystore::{KeyRotator, KeysetMetadata};
use serde::Serialize;

use crate::error::CliError;
use crate::output::{OutputFormat, TableDisplay, display_time};

/// Handler for key subcommands.
pub struct KeyCommand<'a> {
    manager: &'a dyn KeyRotator,
}

impl<'a> KeyCommand<'a> {
    /// Creates a new key command handler.
    #[must_use]
    pub const fn new(manager: &'a dyn KeyRotator) -> Self {
        Self { manager }
    }

    /// Rotates the active key and prints the resulting metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the rotation fails.
    pub fn rotate<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let previous = self.manager.key_metadata()?.current_version;
        self.manager.rotate_keys()?;
        let metadata = self.manager.key_metadata()?;
        let output = RotationOutput {
            previous_version: previous,
            metadata: MetadataOutput::from(metadata),
        };
        format.write(out, &output)
    }

    /// Prints the current key metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager is not initialized.
    pub fn metadata<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let metadata = self.manager.key_metadata()?;
        format.write(out, &MetadataOutput::from(metadata))
    }
}

// Output types

/// Key version and rotation timestamps.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataOutput {
    /// Active key version.
    pub current_version: u32,
    /// Store creation time.
    pub created_at: DateTime<Utc>,
    /// When the active key was put in place.
    pub last_rotated: DateTime<Utc>,
    /// Next scheduled rotation.
    pub next_rotation: Option<DateTime<Utc>>,
    /// Whether the scheduled rotation has passed.
    pub rotation_due: bool,
}

impl From<KeysetMetadata> for MetadataOutput {
    fn from(metadata: KeysetMetadata) -> Self {
        Self {
            rotation_due: metadata.rotation_due(Utc::now()),
            current_version: metadata.current_version,
            created_at: metadata.created_at,
            last_rotated: metadata.last_rotated,
            next_rotation: metadata.next_rotation,
        }
    }
}

impl TableDisplay for MetadataOutput {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Key version:    {}", self.current_version)?;
        writeln!(writer, "Created:        {}", self.created_at.to_rfc3339())?;
        writeln!(writer, "Last rotated:   {}", self.last_rotated.to_rfc3339())?;
        writeln!(writer, "Next rotation:  {}", display_time(self.next_rotation))?;
        if self.rotation_due {
            writeln!(writer, "Rotation due:   yes")?;
        }
        Ok(())
    }
}

/// Result of a successful rotation.
#[derive(Debug, Clone, Serialize)]
pub struct RotationOutput {
    /// Key version before the rotation.
    pub previous_version: u32,
    /// Metadata after the rotation.
    #[serde(flatten)]
    pub metadata: MetadataOutput,
}

impl TableDisplay for RotationOutput {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(
            writer,
            "✓ Rotated key v{} -> v{}",
            self.previous_version, self.metadata.current_version
        )?;
        writeln!(writer)?;
        self.metadata.write_table(writer)
    }
}
