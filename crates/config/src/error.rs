//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file at {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write configuration file
    #[error("Failed to write config file at {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to encode TOML configuration
    #[error("Failed to encode TOML config: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    /// Failed to parse JSON (genesis)
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Invalid private key
    #[error("Invalid private key in {0}")]
    InvalidKey(&'static str),

    /// Invalid address format
    #[error("Invalid address format: {0}")]
    InvalidAddress(String),

    /// No genesis validators configured
    #[error("No genesis validators configured: at least one validator required")]
    NoValidators,

    /// Duplicate genesis validator
    #[error("Duplicate genesis validator: {0}")]
    DuplicateValidator(String),

    /// Genesis validator without stake
    #[error("Genesis validator {0} has zero stake")]
    ZeroStake(String),

    /// Configured first proposer is not a validator
    #[error("Genesis proposer {0} is not a validator")]
    ProposerNotValidator(String),

    /// Genesis value path is not absolute or is reserved
    #[error("Invalid genesis value path: {0}")]
    InvalidValuePath(String),

    /// Invalid interval or count
    #[error("Invalid {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Invalid log level
    #[error("Invalid log level: {0}. Valid values: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// Invalid log format
    #[error("Invalid log format: {0}. Valid values: pretty, json, compact")]
    InvalidLogFormat(String),

    /// Genesis block generation failed
    #[error("Failed to generate genesis block: {0}")]
    GenesisBlockGeneration(#[from] stakebft_types::Error),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
