//! Genesis configuration and block generation
//!
//! Every node of a network must derive the same genesis block, so all of its
//! inputs live here: the owner key that signs the setup transaction, the
//! genesis timestamp, the initial validator stakes and any initial state
//! values. The block itself is built by [`Block::genesis`].

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use stakebft_types::paths::CONSENSUS_ROOT;
use stakebft_types::{Address, Block, GenesisSpec, Keypair, ValidatorSet};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Genesis timestamp used when none is configured (2024-01-01T00:00:00Z).
pub const DEFAULT_GENESIS_TIMESTAMP: u64 = 1_704_067_200_000;

/// Genesis configuration containing initial state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    /// Hex-encoded key that signs the genesis setup transaction
    pub owner_private_key: String,

    /// Genesis timestamp in milliseconds
    pub timestamp: u64,

    /// Proposer of block 1 (defaults to the owner when staked)
    pub proposer: Option<String>,

    /// Initial validators
    pub validators: Vec<GenesisValidator>,

    /// Initial state values keyed by absolute path
    pub values: BTreeMap<String, serde_json::Value>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            owner_private_key: String::new(),
            timestamp: DEFAULT_GENESIS_TIMESTAMP,
            proposer: None,
            validators: Vec::new(),
            values: BTreeMap::new(),
        }
    }
}

impl GenesisConfig {
    /// Genesis with `owner` as the only validator.
    pub fn single_validator(owner: &Keypair, stake: u64) -> Self {
        Self {
            owner_private_key: owner.secret_hex(),
            validators: vec![GenesisValidator {
                address: owner.address().to_hex(),
                stake,
            }],
            ..Self::default()
        }
    }

    /// Load genesis configuration from a JSON file.
    ///
    /// This is an alternative to embedding genesis in the TOML config,
    /// useful for sharing genesis state across multiple nodes.
    pub fn load_json(path: &Path) -> ConfigResult<Self> {
        info!("Loading genesis from JSON file: {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let genesis: GenesisConfig = serde_json::from_str(&content)?;
        genesis.validate()?;
        Ok(genesis)
    }

    /// Save genesis configuration to a JSON file.
    pub fn save_json(&self, path: &Path) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    /// Validate the genesis configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        debug!("Validating genesis configuration");

        self.owner()?;
        let validators = self.validator_set()?;

        if let Some(proposer) = self.proposer_address()? {
            if !validators.contains_key(&proposer) {
                return Err(ConfigError::ProposerNotValidator(proposer.to_hex()));
            }
        }

        for path in self.values.keys() {
            let reserved = path == CONSENSUS_ROOT || path.starts_with(&format!("{CONSENSUS_ROOT}/"));
            if !path.starts_with('/') || reserved {
                return Err(ConfigError::InvalidValuePath(path.clone()));
            }
        }

        debug!(
            validators = validators.len(),
            values = self.values.len(),
            "Genesis validation passed"
        );
        Ok(())
    }

    /// Key that signs the setup transaction.
    pub fn owner(&self) -> ConfigResult<Keypair> {
        if self.owner_private_key.is_empty() {
            return Err(ConfigError::MissingField("genesis.owner_private_key"));
        }
        Keypair::from_hex(&self.owner_private_key)
            .map_err(|_| ConfigError::InvalidKey("genesis.owner_private_key"))
    }

    /// Initial stakes keyed by validator address.
    pub fn validator_set(&self) -> ConfigResult<ValidatorSet> {
        if self.validators.is_empty() {
            return Err(ConfigError::NoValidators);
        }

        let mut set = ValidatorSet::new();
        let mut total: u64 = 0;
        for validator in &self.validators {
            let address = validator.parsed_address()?;
            if validator.stake == 0 {
                return Err(ConfigError::ZeroStake(validator.address.clone()));
            }
            if set.insert(address, validator.stake).is_some() {
                return Err(ConfigError::DuplicateValidator(validator.address.clone()));
            }
            total = total
                .checked_add(validator.stake)
                .ok_or_else(|| ConfigError::InvalidValue {
                    name: "genesis.validators",
                    reason: "total stake overflows u64".into(),
                })?;
        }
        Ok(set)
    }

    fn proposer_address(&self) -> ConfigResult<Option<Address>> {
        self.proposer
            .as_deref()
            .map(|s| Address::from_hex(s).map_err(|_| ConfigError::InvalidAddress(s.to_string())))
            .transpose()
    }

    /// Validated inputs for [`Block::genesis`].
    pub fn to_spec(&self) -> ConfigResult<GenesisSpec> {
        self.validate()?;
        Ok(GenesisSpec {
            owner: self.owner()?,
            timestamp: self.timestamp,
            validators: self.validator_set()?,
            proposer: self.proposer_address()?,
            values: self.values.clone(),
        })
    }

    /// Generate the genesis block.
    pub fn build_block(&self) -> ConfigResult<Block> {
        let spec = self.to_spec()?;
        let block = Block::genesis(&spec)?;
        info!(
            hash = %block.hash,
            validators = spec.validators.len(),
            proposer = %spec.first_proposer(),
            "Generated genesis block"
        );
        Ok(block)
    }
}

/// Genesis validator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenesisValidator {
    /// Validator address (hex, with or without 0x)
    pub address: String,

    /// Initial stake
    pub stake: u64,
}

impl GenesisValidator {
    /// Parsed validator address.
    pub fn parsed_address(&self) -> ConfigResult<Address> {
        Address::from_hex(&self.address).map_err(|_| ConfigError::InvalidAddress(self.address.clone()))
    }
}
