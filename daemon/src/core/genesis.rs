//! Genesis loading.
//!
//! The genesis document carries an ordered list of `(key, value)` records
//! and a founder signature over their canonical encoding. Application is
//! strict: a bad signature, a hash mismatch or an uncompilable `__code__`
//! record is fatal, since a node must never start from a state it cannot
//! reproduce.

use kura_common::{
    config::{compiled_key, contract_of_key, CODE_KEY},
    crypto::{hash_hex, verify_hex},
    encoding::{canonicalize, to_canonical_json},
};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

use super::{
    error::ChainError,
    executor::compiler::{compile_interface, CompileError},
    storage::StateStore,
};

#[derive(Error, Debug)]
pub enum GenesisError {
    #[error("Genesis file not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Genesis is not signed by its origin")]
    Unsigned,

    #[error("Genesis hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch { expected: String, computed: String },

    #[error("Genesis contract '{contract}' does not compile: {source}")]
    Compile {
        contract: String,
        source: CompileError,
    },

    #[error("Genesis record has a non-canonical value at '{0}'")]
    NonCanonicalValue(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisRecord {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisOrigin {
    pub sender: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbciGenesis {
    pub hash: String,
    pub number: u64,
    pub genesis: Vec<GenesisRecord>,
    pub origin: GenesisOrigin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisDocument {
    pub abci_genesis: AbciGenesis,
}

/// Load and parse a genesis document from disk.
pub fn load_genesis_file(path: &Path) -> Result<GenesisDocument, GenesisError> {
    if !path.exists() {
        return Err(GenesisError::FileNotFound(
            path.to_string_lossy().to_string(),
        ));
    }
    let content = std::fs::read_to_string(path)?;
    let doc: GenesisDocument = serde_json::from_str(&content)?;
    Ok(doc)
}

/// Canonical bytes the founder signs: the record list, canonicalized.
pub fn genesis_signing_bytes(records: &[GenesisRecord]) -> Result<String, GenesisError> {
    let value = serde_json::to_value(records)?;
    to_canonical_json(&value).map_err(|_| GenesisError::Unsigned)
}

/// Genesis state hash: digest over the canonical encoding of the record
/// list in input order. The document's `hash` field must match.
pub fn genesis_state_hash(records: &[GenesisRecord]) -> Result<String, GenesisError> {
    Ok(hash_hex(genesis_signing_bytes(records)?.as_bytes()))
}

impl AbciGenesis {
    /// Verify the founder signature and the declared state hash.
    pub fn verify(&self) -> Result<(), GenesisError> {
        let message = genesis_signing_bytes(&self.genesis)?;
        if !verify_hex(&self.origin.sender, &message, &self.origin.signature) {
            return Err(GenesisError::Unsigned);
        }

        let computed = genesis_state_hash(&self.genesis)?;
        if computed != self.hash {
            return Err(GenesisError::HashMismatch {
                expected: self.hash.clone(),
                computed,
            });
        }
        Ok(())
    }
}

/// Apply a verified genesis document: records land in input order and
/// `__code__` records compile into their `__compiled__` siblings. The
/// writes are checkpointed into the block scope; the lifecycle coordinator
/// seals them with `hard_apply`. Returns the genesis state hash.
pub fn apply_genesis(store: &mut StateStore, genesis: &AbciGenesis) -> Result<String, ChainError> {
    genesis.verify()?;
    info!(
        "applying {} genesis records from block {}",
        genesis.genesis.len(),
        genesis.number
    );

    for record in &genesis.genesis {
        let value = canonicalize(&record.value)
            .map_err(|_| GenesisError::NonCanonicalValue(record.key.clone()))?;

        if let Some((contract, rest)) = contract_of_key(&record.key) {
            if rest == CODE_KEY {
                info!("processing genesis contract: {}", contract);
                let source = value.as_str().ok_or_else(|| GenesisError::Compile {
                    contract: contract.to_string(),
                    source: CompileError::BadCompiledManifest("code is not a string".into()),
                })?;
                let compiled =
                    compile_interface(contract, source).map_err(|e| GenesisError::Compile {
                        contract: contract.to_string(),
                        source: e,
                    })?;
                store.set(compiled_key(contract), Value::String(compiled));
            }
        }

        store.set(record.key.clone(), value);
    }

    store.checkpoint_tx();
    Ok(genesis_state_hash(&genesis.genesis).map_err(ChainError::Genesis)?)
}

/// Author a signed genesis document. Test fixtures and the genesis
/// authoring tool use this; the daemon only verifies.
pub fn author_genesis(
    keypair: &kura_common::crypto::KeyPair,
    records: Vec<GenesisRecord>,
    number: u64,
) -> Result<GenesisDocument, GenesisError> {
    let message = genesis_signing_bytes(&records)?;
    let signature = keypair.sign_hex(&message);
    let hash = genesis_state_hash(&records)?;
    Ok(GenesisDocument {
        abci_genesis: AbciGenesis {
            hash,
            number,
            genesis: records,
            origin: GenesisOrigin {
                sender: keypair.public_hex(),
                signature,
            },
        },
    })
}
