//! Main configuration module
//!
//! All node settings live in one TOML file. Each section maps onto the
//! runtime config of the crate that consumes it.

use crate::error::{ConfigError, ConfigResult};
use crate::genesis::GenesisConfig;
use serde::{Deserialize, Serialize};
use stakebft_consensus::{EngineConfig, PROTOCOL_VERSION};
use stakebft_mempool::OrdererConfig;
use stakebft_storage::chain::{DEFAULT_BLOCKS_IN_MEMORY, DEFAULT_SUBSECTION_LENGTH};
use stakebft_storage::ChainConfig;
use stakebft_types::Keypair;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration struct containing all node settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Node identity
    pub node: NodeConfig,

    /// Consensus engine parameters
    pub consensus: ConsensusConfig,

    /// Transaction pool parameters
    pub mempool: MempoolConfig,

    /// Block storage
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Genesis definition
    pub genesis: GenesisConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        info!("Loading configuration from {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content)?;

        debug!("Configuration parsed successfully, validating...");
        config.validate()?;

        info!(
            validators = config.genesis.validators.len(),
            data_dir = ?config.storage.data_dir,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Load configuration from a TOML string.
    ///
    /// Useful for testing or when configuration is provided as a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration for a single-validator development network run by `key`.
    pub fn development(key: &Keypair) -> Self {
        Self {
            node: NodeConfig {
                private_key: Some(key.secret_hex()),
                ..NodeConfig::default()
            },
            genesis: GenesisConfig::single_validator(key, 100),
            ..Self::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.node.validate()?;
        self.consensus.validate()?;
        self.mempool.validate()?;
        self.storage.validate()?;
        self.logging.validate()?;
        self.genesis.validate()?;

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}

// =============================================================================
// Node Configuration
// =============================================================================

/// Node identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Hex-encoded secp256k1 key the node signs votes with
    pub private_key: Option<String>,

    /// Protocol version tag sent with every message
    pub protocol_version: String,
}

impl NodeConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(key) = &self.private_key {
            Keypair::from_hex(key).map_err(|_| ConfigError::InvalidKey("node.private_key"))?;
        }
        if self.protocol_version.is_empty() {
            return Err(ConfigError::MissingField("node.protocol_version"));
        }
        Ok(())
    }

    /// The node's signing key.
    pub fn keypair(&self) -> ConfigResult<Keypair> {
        let key = self
            .private_key
            .as_deref()
            .ok_or(ConfigError::MissingField("node.private_key"))?;
        Keypair::from_hex(key).map_err(|_| ConfigError::InvalidKey("node.private_key"))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            private_key: None,
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }
}

// =============================================================================
// Consensus Configuration
// =============================================================================

/// Consensus engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Milliseconds between engine ticks
    pub tick_interval_ms: u64,

    /// Blocks back the proposer seed is taken from
    pub seed_lookback: u64,

    /// Unchanged ticks before the engine resynchronizes (0 disables)
    pub stall_ticks: u32,

    /// Rounds ahead of the current one whose messages are kept
    pub max_future_rounds: u64,
}

impl ConsensusConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "consensus.tick_interval_ms",
                reason: "must be positive".into(),
            });
        }
        if self.seed_lookback < 2 {
            return Err(ConfigError::InvalidValue {
                name: "consensus.seed_lookback",
                reason: format!("must be at least 2, got {}", self.seed_lookback),
            });
        }
        if self.max_future_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                name: "consensus.max_future_rounds",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    /// Runtime engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            tick_interval_ms: self.tick_interval_ms,
            seed_lookback: self.seed_lookback,
            stall_ticks: self.stall_ticks,
            max_future_rounds: self.max_future_rounds,
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            tick_interval_ms: engine.tick_interval_ms,
            seed_lookback: engine.seed_lookback,
            stall_ticks: engine.stall_ticks,
            max_future_rounds: engine.max_future_rounds,
        }
    }
}

// =============================================================================
// Mempool Configuration
// =============================================================================

/// Transaction pool parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Milliseconds an uncommitted transaction may stay in the pool
    pub pool_timeout_ms: u64,

    /// Milliseconds a transaction status is tracked, committed or not
    pub tracker_timeout_ms: u64,
}

impl MempoolConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.pool_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "mempool.pool_timeout_ms",
                reason: "must be positive".into(),
            });
        }
        if self.tracker_timeout_ms < self.pool_timeout_ms {
            return Err(ConfigError::InvalidValue {
                name: "mempool.tracker_timeout_ms",
                reason: "must not be shorter than pool_timeout_ms".into(),
            });
        }
        Ok(())
    }

    /// Runtime orderer configuration.
    pub fn orderer_config(&self) -> OrdererConfig {
        OrdererConfig {
            pool_timeout_ms: self.pool_timeout_ms,
            tracker_timeout_ms: self.tracker_timeout_ms,
        }
    }
}

impl Default for MempoolConfig {
    fn default() -> Self {
        let orderer = OrdererConfig::default();
        Self {
            pool_timeout_ms: orderer.pool_timeout_ms,
            tracker_timeout_ms: orderer.tracker_timeout_ms,
        }
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

/// Block storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Block directory; blocks stay in memory only when unset
    pub data_dir: Option<PathBuf>,

    /// Recent blocks kept in memory
    pub blocks_in_memory: usize,

    /// Maximum blocks returned per chain subsection
    pub subsection_length: usize,
}

impl StorageConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.blocks_in_memory == 0 {
            return Err(ConfigError::InvalidValue {
                name: "storage.blocks_in_memory",
                reason: "must be positive".into(),
            });
        }
        if self.subsection_length == 0 {
            return Err(ConfigError::InvalidValue {
                name: "storage.subsection_length",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    /// Runtime chain configuration.
    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            data_dir: self.data_dir.clone(),
            blocks_in_memory: self.blocks_in_memory,
            subsection_length: self.subsection_length,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: Some(PathBuf::from("./data/blocks")),
            blocks_in_memory: DEFAULT_BLOCKS_IN_MEMORY,
            subsection_length: DEFAULT_SUBSECTION_LENGTH,
        }
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json, compact)
    pub format: String,
}

impl LoggingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.level.clone()));
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogFormat(self.format.clone()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
