//! Configuration module for Vedette
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use vedette::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Watching {} targets", config.targets.len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BlackoutSpec, BrowserConfig, Config, EngineConfig, FetchConfig, FieldSpec, ListingSpec,
    NotifyConfig, PaginationSpec, ProxyConfig, ProxyPolicy, RuleKind, StorageConfig, TargetConfig,
    UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};

// Re-export validation for the `validate` subcommand path
pub use validation::validate;
