//! Height-keyed state patches.
//!
//! Operators ship a JSON document mapping block heights to ordered write
//! lists. When the lifecycle coordinator finalizes a keyed height, the
//! records apply after that block's transactions, their digest folds into
//! the fingerprint, and the applied list is surfaced as observable events.
//! Contract-code patches recompile the interface into the `__compiled__`
//! sibling; a compilation failure skips that patch (never the block).

use kura_common::{
    config::{compiled_key, contract_of_key, CODE_KEY},
    crypto::hash_hex,
    encoding::canonicalize,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;

use super::{error::ChainError, executor::compiler::compile_interface, storage::StateStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePatch {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub comment: String,
}

/// Loaded patch schedule. Heights arrive as JSON-object string keys and are
/// parsed to integers.
#[derive(Debug, Default)]
pub struct StatePatchManager {
    patches: BTreeMap<u64, Vec<StatePatch>>,
    loaded: bool,
}

impl StatePatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the patch file. A missing file is a valid empty schedule.
    pub fn load(&mut self, path: &Path) -> Result<(), ChainError> {
        if !path.exists() {
            info!("no state patches file found at {}", path.display());
            self.loaded = true;
            return Ok(());
        }

        let content = std::fs::read_to_string(path)?;
        let raw: BTreeMap<String, Vec<StatePatch>> = serde_json::from_str(&content)?;

        let mut patches = BTreeMap::new();
        for (height_str, entries) in raw {
            let height: u64 = height_str.parse().map_err(|_| {
                ChainError::Config(format!("invalid patch height '{}'", height_str))
            })?;
            patches.insert(height, entries);
        }

        info!("loaded patches for {} blocks", patches.len());
        self.patches = patches;
        self.loaded = true;
        Ok(())
    }

    /// Direct registration, used by tests and embedded tooling.
    pub fn insert(&mut self, height: u64, patches: Vec<StatePatch>) {
        self.patches.insert(height, patches);
        self.loaded = true;
    }

    pub fn has_patches_for(&self, height: u64) -> bool {
        self.loaded && self.patches.contains_key(&height)
    }

    /// Apply the patches registered for `height`, staging their writes into
    /// the block scope. Returns the fingerprint digest and the applied
    /// records, or `None` when the height carries no patches.
    pub fn apply_for_block(
        &self,
        store: &mut StateStore,
        height: u64,
    ) -> Result<Option<(String, Vec<StatePatch>)>, ChainError> {
        if !self.loaded {
            return Ok(None);
        }
        let Some(patches) = self.patches.get(&height) else {
            return Ok(None);
        };
        if patches.is_empty() {
            return Ok(None);
        }

        info!("applying {} state patches for block {}", patches.len(), height);
        let mut applied = Vec::new();

        for patch in patches {
            info!(
                "applying patch: {} ({})",
                patch.key,
                if patch.comment.is_empty() {
                    "no comment provided"
                } else {
                    patch.comment.as_str()
                }
            );

            let is_code_patch = contract_of_key(&patch.key)
                .map(|(_, rest)| rest == CODE_KEY)
                .unwrap_or(false);

            if is_code_patch {
                let contract = contract_of_key(&patch.key)
                    .map(|(c, _)| c.to_string())
                    .unwrap_or_default();
                let Some(source) = patch.value.as_str() else {
                    error!("code patch for {} is not a string, skipping", contract);
                    continue;
                };

                match compile_interface(&contract, source) {
                    Ok(compiled) => {
                        store.set(patch.key.clone(), patch.value.clone());
                        store.set(compiled_key(&contract), Value::String(compiled.clone()));

                        applied.push(patch.clone());
                        applied.push(StatePatch {
                            key: compiled_key(&contract),
                            value: Value::String(compiled),
                            comment: format!("Compiled manifest for {}", patch.comment),
                        });
                        info!("contract code patch applied for {}", contract);
                    }
                    Err(e) => {
                        // Patch failure must not take the block down
                        error!("failed to compile contract code for {}: {}", contract, e);
                        error!("skipping this patch and continuing with others");
                    }
                }
            } else {
                let value = canonicalize(&patch.value)?;
                store.set(patch.key.clone(), value);
                applied.push(patch.clone());
            }
        }

        store.checkpoint_tx();

        let digest = patch_digest(patches);
        info!("generated digest for state patches: {}", digest);
        Ok(Some((digest, applied)))
    }
}

/// Digest of a patch list: records reduced to `(key, canonical value
/// string)`, key-sorted, canonically encoded, hashed. Comments never
/// affect state, so they never affect the digest.
pub fn patch_digest(patches: &[StatePatch]) -> String {
    let mut serialized: Vec<Value> = patches
        .iter()
        .map(|p| {
            let value_json = canonicalize(&p.value)
                .map(|v| serde_json::to_string(&v).unwrap_or_default())
                .unwrap_or_default();
            json!({"key": p.key, "value": value_json})
        })
        .collect();
    serialized.sort_by(|a, b| {
        a["key"]
            .as_str()
            .unwrap_or_default()
            .cmp(b["key"].as_str().unwrap_or_default())
    });

    let doc = serde_json::to_string(&serialized).unwrap_or_default();
    hash_hex(doc.as_bytes())
}
