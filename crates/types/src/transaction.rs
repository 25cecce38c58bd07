//! Signed state-write transactions.
//!
//! A [`Transaction`] carries one [`Operation`] against the shared state tree,
//! a per-address `nonce` and a millisecond timestamp. Nonce `-1` marks a
//! transaction with no causal position; non-negative nonces must commit in
//! strict `+1` sequence per address.
//!
//! The signing hash is the Keccak-256 digest of the canonical JSON encoding
//! of `{nonce, operation, timestamp}`. Canonical here means object keys in
//! sorted order, which `serde_json::Value` guarantees because its maps are
//! ordered. Signatures are recoverable secp256k1 signatures, so verifying a
//! transaction is recovering the signer and comparing it with `address`.

use crate::{Address, Error, Result, H256};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Nonce value for transactions that are not part of an address's causal sequence.
pub const UNORDERED_NONCE: i64 = -1;

/// A write against the state tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Operation {
    /// Overwrite the value at `path`.
    #[serde(rename = "SET_VALUE")]
    SetValue {
        /// Slash-separated state path
        #[serde(rename = "ref")]
        path: String,
        /// New value
        value: serde_json::Value,
    },
    /// Apply several operations atomically, in order.
    #[serde(rename = "SET")]
    Set {
        /// Nested operations
        op_list: Vec<Operation>,
    },
}

impl Operation {
    /// Shorthand for a `SET_VALUE` operation.
    pub fn set_value(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self::SetValue {
            path: path.into(),
            value,
        }
    }

    /// Every `(path, value)` pair written by this operation, depth first.
    pub fn writes(&self) -> Vec<(&str, &serde_json::Value)> {
        let mut out = Vec::new();
        self.collect_writes(&mut out);
        out
    }

    fn collect_writes<'a>(&'a self, out: &mut Vec<(&'a str, &'a serde_json::Value)>) {
        match self {
            Self::SetValue { path, value } => out.push((path.as_str(), value)),
            Self::Set { op_list } => op_list.iter().for_each(|op| op.collect_writes(out)),
        }
    }
}

/// Recoverable ECDSA signature, serialized as 65 bytes of hex: `r || s || v`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// R component
    pub r: H256,
    /// S component
    pub s: H256,
    /// Recovery id (0 or 1)
    pub v: u8,
}

impl Signature {
    /// Parses the 65-byte wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 65 {
            return Err(Error::InvalidLength {
                expected: 65,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            r: H256::from_slice(&bytes[0..32])?,
            s: H256::from_slice(&bytes[32..64])?,
            v: bytes[64],
        })
    }

    /// Returns the 65-byte wire form.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[0..32].copy_from_slice(self.r.as_bytes());
        out[32..64].copy_from_slice(self.s.as_bytes());
        out[64] = self.v;
        out
    }

    /// Recovers the address that produced this signature over `prehash`.
    pub fn recover(&self, prehash: &H256) -> Result<Address> {
        let mut sig_bytes = [0u8; 64];
        sig_bytes.copy_from_slice(&self.to_bytes()[..64]);
        let signature = K256Signature::from_slice(&sig_bytes)
            .map_err(|e| Error::Signature(e.to_string()))?;
        let recovery_id = RecoveryId::from_byte(self.v)
            .ok_or_else(|| Error::Signature(format!("invalid recovery id {}", self.v)))?;
        let key = VerifyingKey::recover_from_prehash(prehash.as_bytes(), &signature, recovery_id)
            .map_err(|e| Error::Signature(e.to_string()))?;
        Ok(address_of(&key))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{})", hex::encode(self.to_bytes()))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.to_bytes())))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    Address::from_public_key(&point.as_bytes()[1..])
}

/// A secp256k1 signing key together with its derived address.
#[derive(Clone)]
pub struct Keypair {
    key: SigningKey,
    address: Address,
}

impl Keypair {
    /// Generates a fresh key from the operating system RNG.
    pub fn random() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Builds a keypair from 32 secret bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key = SigningKey::from_slice(bytes).map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(Self::from_signing_key(key))
    }

    /// Builds a keypair from a hex secret, with or without `0x`.
    pub fn from_hex(s: &str) -> Result<Self> {
        Self::from_bytes(&hex::decode(s.strip_prefix("0x").unwrap_or(s))?)
    }

    fn from_signing_key(key: SigningKey) -> Self {
        let address = address_of(key.verifying_key());
        Self { key, address }
    }

    /// Address controlled by this key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Hex encoding of the secret key.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    /// Signs a 32-byte digest. RFC 6979 nonces make this deterministic.
    pub fn sign_prehash(&self, prehash: &H256) -> Result<Signature> {
        let (sig, recovery_id) = self
            .key
            .sign_prehash_recoverable(prehash.as_bytes())
            .map_err(|e| Error::Signature(e.to_string()))?;
        let bytes = sig.to_bytes();
        Ok(Signature {
            r: H256::from_slice(&bytes[0..32])?,
            s: H256::from_slice(&bytes[32..64])?,
            v: recovery_id.to_byte(),
        })
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair").field("address", &self.address).finish_non_exhaustive()
    }
}

/// A signed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Identifier: digest of the signer and the signing hash
    pub hash: H256,
    /// Signer
    pub address: Address,
    /// Per-address sequence number, or [`UNORDERED_NONCE`]
    pub nonce: i64,
    /// Creation time in milliseconds since the epoch
    pub timestamp: u64,
    /// State write
    pub operation: Operation,
    /// Signature over [`Transaction::signing_hash`]
    pub signature: Signature,
}

#[derive(Serialize)]
struct SigningBody<'a> {
    nonce: i64,
    operation: &'a Operation,
    timestamp: u64,
}

impl Transaction {
    /// Creates and signs a transaction.
    pub fn sign(keypair: &Keypair, nonce: i64, timestamp: u64, operation: Operation) -> Result<Self> {
        let signing_hash = Self::compute_signing_hash(nonce, timestamp, &operation)?;
        let signature = keypair.sign_prehash(&signing_hash)?;
        let address = keypair.address();
        Ok(Self {
            hash: Self::compute_hash(&address, &signing_hash),
            address,
            nonce,
            timestamp,
            operation,
            signature,
        })
    }

    fn compute_signing_hash(nonce: i64, timestamp: u64, operation: &Operation) -> Result<H256> {
        let body = SigningBody {
            nonce,
            operation,
            timestamp,
        };
        let canonical = serde_json::to_value(&body)
            .and_then(|v| serde_json::to_vec(&v))
            .map_err(|e| Error::InvalidTransaction(e.to_string()))?;
        Ok(H256::keccak256(&canonical))
    }

    fn compute_hash(address: &Address, signing_hash: &H256) -> H256 {
        let mut data = Vec::with_capacity(20 + 32);
        data.extend_from_slice(address.as_bytes());
        data.extend_from_slice(signing_hash.as_bytes());
        H256::keccak256(&data)
    }

    /// Digest covered by the signature.
    pub fn signing_hash(&self) -> Result<H256> {
        Self::compute_signing_hash(self.nonce, self.timestamp, &self.operation)
    }

    /// Checks that the hash matches the body and the signature recovers to `address`.
    pub fn verify(&self) -> Result<()> {
        let signing_hash = self.signing_hash()?;
        if Self::compute_hash(&self.address, &signing_hash) != self.hash {
            return Err(Error::InvalidTransaction(format!(
                "hash mismatch for {}",
                self.hash
            )));
        }
        let signer = self.signature.recover(&signing_hash)?;
        if signer != self.address {
            return Err(Error::Signature(format!(
                "signed by {signer}, claims {}",
                self.address
            )));
        }
        Ok(())
    }

    /// True when the transaction has a causal position.
    pub fn is_ordered(&self) -> bool {
        self.nonce >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_wire_shape() {
        let op = Operation::set_value("/a/b", json!(1));
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v, json!({"type": "SET_VALUE", "ref": "/a/b", "value": 1}));
    }

    #[test]
    fn nested_writes_are_flattened_in_order() {
        let op = Operation::Set {
            op_list: vec![
                Operation::set_value("/x", json!(1)),
                Operation::Set {
                    op_list: vec![Operation::set_value("/y", json!(2))],
                },
            ],
        };
        let paths: Vec<_> = op.writes().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["/x", "/y"]);
    }
}
