//! Parsing and validation of `tessera.toml` cache configuration files.
//!
//! This crate reads the configuration file and produces a strongly-typed
//! [`ProjectConfig`], then resolves it against the project directory into a
//! [`ResolvedConfig`] carrying absolute paths and the compiler-configuration
//! fingerprint that namespaces the cache root.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_file, load_config_from_str, CONFIG_FILE_NAME};
pub use resolve::{config_fingerprint, resolve_config, ResolvedConfig};
pub use types::*;
