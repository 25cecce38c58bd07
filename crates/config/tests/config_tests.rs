//! Tests for Config module

use stakebft_config::{
    Config, ConfigError, ConsensusConfig, LoggingConfig, MempoolConfig, NodeConfig, StorageConfig,
};
use stakebft_consensus::{EngineConfig, PROTOCOL_VERSION};
use stakebft_types::Keypair;
use tempfile::tempdir;

fn key() -> Keypair {
    Keypair::from_bytes(&[7u8; 32]).unwrap()
}

fn sample_toml(key: &Keypair) -> String {
    format!(
        r#"
[node]
private_key = "{secret}"

[consensus]
tick_interval_ms = 250
seed_lookback = 5
stall_ticks = 10

[storage]
data_dir = "/tmp/stakebft-blocks"
blocks_in_memory = 4

[logging]
level = "debug"
format = "json"

[genesis]
owner_private_key = "{secret}"
timestamp = 1000

[[genesis.validators]]
address = "{address}"
stake = 100

[genesis.values]
"/apps/greeting" = "hello"
"#,
        secret = key.secret_hex(),
        address = key.address(),
    )
}

#[test]
fn test_default_sections() {
    let config = Config::default();
    assert_eq!(config.consensus.tick_interval_ms, 1000);
    assert_eq!(config.consensus.seed_lookback, 5);
    assert_eq!(config.mempool.pool_timeout_ms, 3_600_000);
    assert_eq!(config.storage.blocks_in_memory, 10);
    assert_eq!(config.storage.subsection_length, 20);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.node.protocol_version, PROTOCOL_VERSION);
}

#[test]
fn test_default_config_needs_genesis() {
    // Keys have no defaults, so the bare default cannot start a network.
    assert!(matches!(
        Config::default().validate(),
        Err(ConfigError::MissingField("genesis.owner_private_key"))
    ));
}

#[test]
fn test_from_str() {
    let key = key();
    let config = Config::from_str(&sample_toml(&key)).unwrap();

    assert_eq!(config.node.keypair().unwrap().address(), key.address());
    assert_eq!(config.consensus.tick_interval_ms, 250);
    assert_eq!(config.consensus.stall_ticks, 10);
    assert_eq!(config.storage.blocks_in_memory, 4);
    // Omitted fields keep their defaults.
    assert_eq!(config.storage.subsection_length, 20);
    assert_eq!(config.mempool.tracker_timeout_ms, 86_400_000);
    assert_eq!(config.genesis.timestamp, 1000);
    assert_eq!(config.genesis.validators.len(), 1);
    assert_eq!(
        config.genesis.values.get("/apps/greeting"),
        Some(&serde_json::json!("hello"))
    );
}

#[test]
fn test_load_and_save() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("node.toml");

    let config = Config::development(&key());
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.node.private_key, config.node.private_key);
    assert_eq!(loaded.genesis.validators, config.genesis.validators);
    assert_eq!(
        loaded.genesis.build_block().unwrap().hash,
        config.genesis.build_block().unwrap().hash
    );
}

#[test]
fn test_load_missing_file() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        Config::load(&dir.path().join("absent.toml")),
        Err(ConfigError::FileRead { .. })
    ));
}

#[test]
fn test_invalid_toml() {
    assert!(matches!(
        Config::from_str("[consensus\ntick_interval_ms = 1"),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_invalid_node_key() {
    let config = NodeConfig {
        private_key: Some("not hex".to_string()),
        ..NodeConfig::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidKey("node.private_key"))
    ));
    assert!(matches!(
        NodeConfig::default().keypair(),
        Err(ConfigError::MissingField("node.private_key"))
    ));
}

#[test]
fn test_invalid_consensus_values() {
    let mut config = ConsensusConfig::default();
    config.tick_interval_ms = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue {
            name: "consensus.tick_interval_ms",
            ..
        })
    ));

    let mut config = ConsensusConfig::default();
    config.seed_lookback = 1;
    assert!(config.validate().is_err());

    let mut config = ConsensusConfig::default();
    config.max_future_rounds = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue {
            name: "consensus.max_future_rounds",
            ..
        })
    ));
}

#[test]
fn test_engine_config_conversion() {
    let config = ConsensusConfig {
        tick_interval_ms: 50,
        seed_lookback: 3,
        stall_ticks: 0,
        max_future_rounds: 8,
    };
    let engine: EngineConfig = config.engine_config();
    assert_eq!(engine.tick_interval_ms, 50);
    assert_eq!(engine.seed_lookback, 3);
    assert_eq!(engine.stall_ticks, 0);
    assert_eq!(engine.max_future_rounds, 8);
}

#[test]
fn test_mempool_timeouts() {
    let mut config = MempoolConfig::default();
    config.tracker_timeout_ms = config.pool_timeout_ms - 1;
    assert!(config.validate().is_err());

    let orderer = MempoolConfig::default().orderer_config();
    assert_eq!(orderer.pool_timeout_ms, 3_600_000);
}

#[test]
fn test_storage_values() {
    let mut config = StorageConfig::default();
    config.subsection_length = 0;
    assert!(config.validate().is_err());

    let config = StorageConfig {
        data_dir: None,
        ..StorageConfig::default()
    };
    let chain = config.chain_config();
    assert!(chain.data_dir.is_none());
    assert_eq!(chain.blocks_in_memory, 10);
}

#[test]
fn test_logging_validation() {
    let mut config = LoggingConfig::default();
    assert!(config.validate().is_ok());

    config.level = "WARN".to_string();
    assert!(config.validate().is_ok());

    config.level = "loud".to_string();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidLogLevel(_))
    ));

    config.level = "info".to_string();
    config.format = "xml".to_string();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidLogFormat(_))
    ));
}
