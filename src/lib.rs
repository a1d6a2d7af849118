//! Vedette: a scheduled site-watch engine
//!
//! This crate monitors configured websites on independent schedules, extracts
//! structured items via declarative selector rules, detects previously unseen
//! items against a durable store, and dispatches notifications for new ones.

pub mod config;
pub mod crawl;
pub mod extract;
pub mod fetch;
pub mod notify;
pub mod pool;
pub mod schedule;
pub mod store;

use thiserror::Error;

/// Main error type for Vedette operations
#[derive(Debug, Error)]
pub enum VedetteError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetch::FetchError),

    #[error("Render error: {0}")]
    Render(#[from] fetch::RenderError),

    #[error("Extraction error: {0}")]
    Extract(#[from] extract::ExtractError),

    #[error("Resource pool error: {0}")]
    Pool(#[from] pool::PoolError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Notification error: {0}")]
    Notify(#[from] notify::NotifyError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Vedette operations
pub type Result<T> = std::result::Result<T, VedetteError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawl::Engine;
pub use store::SqliteStore;
