//! Store health reporting for `init` and `status`.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use keystore::KeyRotator;
use serde::Serialize;

use crate::error::CliError;
use crate::output::{OutputFormat, TableDisplay, display_time};

/// Handler for the status and init commands.
pub struct StatusCommand<'a> {
    manager: &'a dyn KeyRotator,
    storage_path: Option<PathBuf>,
}

impl<'a> StatusCommand<'a> {
    /// Creates a new status command handler.
    #[must_use]
    pub const fn new(manager: &'a dyn KeyRotator, storage_path: Option<PathBuf>) -> Self {
        Self {
            manager,
            storage_path,
        }
    }

    /// Builds a report of the manager's state.
    ///
    /// `init_error` replaces the generic "not initialized" message when
    /// opening the store failed.
    #[must_use]
    pub fn report(&self, init_error: Option<&keystore::Error>) -> StatusReport {
        let status = self.manager.status();
        let metadata = self.manager.key_metadata().ok();
        let message = match init_error {
            Some(err) => err.to_string(),
            None => status.message,
        };

        StatusReport {
            healthy: status.healthy && init_error.is_none(),
            message,
            storage_path: self.storage_path.clone(),
            key_version: metadata.as_ref().map(|m| m.current_version),
            last_rotated: status.last_rotated,
            next_rotation: metadata.and_then(|m| m.next_rotation),
            rotation_due: status.rotation_due,
        }
    }

    /// Prints the report; an unhealthy store is an error.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Unhealthy`] after printing if the store is not healthy.
    pub fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        init_error: Option<&keystore::Error>,
    ) -> Result<(), CliError> {
        let report = self.report(init_error);
        format.write(out, &report)?;
        if report.healthy {
            Ok(())
        } else {
            Err(CliError::Unhealthy(report.message))
        }
    }
}

/// Health and rotation state of a store.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Whether the store can serve requests.
    pub healthy: bool,
    /// State description or the reason the store is unusable.
    pub message: String,
    /// Store root directory.
    pub storage_path: Option<PathBuf>,
    /// Active key version.
    pub key_version: Option<u32>,
    /// When the active key was put in place.
    pub last_rotated: Option<DateTime<Utc>>,
    /// Next scheduled rotation.
    pub next_rotation: Option<DateTime<Utc>>,
    /// Whether the scheduled rotation has passed.
    pub rotation_due: bool,
}

impl TableDisplay for StatusReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        let mark = if self.healthy { "✓" } else { "✗" };
        writeln!(writer, "{mark} {}", self.message)?;
        writeln!(writer)?;
        if let Some(path) = &self.storage_path {
            writeln!(writer, "Storage:        {}", path.display())?;
        }
        match self.key_version {
            Some(version) => writeln!(writer, "Key version:    {version}")?,
            None => writeln!(writer, "Key version:    -")?,
        }
        writeln!(writer, "Last rotated:   {}", display_time(self.last_rotated))?;
        writeln!(writer, "Next rotation:  {}", display_time(self.next_rotation))?;
        if self.rotation_due {
            writeln!(writer)?;
            writeln!(writer, "! Rotation is due; run `keystore key rotate`")?;
        }
        Ok(())
    }
}
