//! CLI command implementations.
//!
//! Each submodule implements a group of CLI commands:
//! - [`secret`] - get, set, delete and list
//! - [`key`] - key rotation and metadata
//! - [`status`] - store health for `init` and `status`

pub mod key;
pub mod secret;
pub mod status;

pub use key::KeyCommand;
pub use secret::{SecretCommand, ValueEncoding, ValueSource};
pub use status::StatusCommand;
