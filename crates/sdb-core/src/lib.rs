//! sdb Core - Shared functionality for the sdb password store
//!
//! Holds what the store, the CLI and any future front end agree on:
//! where files live and how the user configures them.

pub mod config;
pub mod paths;

pub use config::{CipherKind, Config, HandoffMode, Selection};
pub use paths::Paths;
