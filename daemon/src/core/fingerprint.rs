//! Per-block fingerprint accumulation.
//!
//! Every state-mutating event in a block contributes one hex digest, in the
//! fixed order: transactions (block order), validator updates, rewards,
//! state patches. The application hash sealed at commit is the digest of
//! the concatenated contributions. A block with no contributions keeps the
//! previous application hash; empty blocks do not move the fingerprint.
//!
//! The ordering and the canonical encoding behind each digest are part of
//! the consensus contract; changing either is a hard fork.

use kura_common::crypto::hash_hex;
use log::trace;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One `(key, value)` record of a transaction's write set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateWrite {
    pub key: String,
    pub value: Value,
}

/// Ordered log of fingerprint contributions for the open block.
/// Exclusively owned by the lifecycle coordinator; reset after commit.
#[derive(Debug, Default)]
pub struct FingerprintAccumulator {
    contributions: Vec<String>,
}

impl FingerprintAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.contributions.len()
    }

    /// Contribution of one processed transaction: digest over the canonical
    /// JSON of its hash, its (key-sorted) writes, and its status code.
    pub fn add_transaction(&mut self, tx_hash: &str, writes: &[StateWrite], status: u32) {
        let mut sorted: Vec<&StateWrite> = writes.iter().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));

        let doc = json!({
            "hash": tx_hash,
            "state": sorted,
            "status": status,
        });
        self.contributions.push(digest_of(&doc));
    }

    /// Contribution of the block's validator-set updates. No-op when the
    /// set did not change.
    pub fn add_validator_updates(&mut self, updates: &[(String, i64)]) {
        if updates.is_empty() {
            return;
        }
        let mut sorted: Vec<&(String, i64)> = updates.iter().collect();
        sorted.sort();
        let doc: Vec<Value> = sorted
            .iter()
            .map(|(key, power)| json!({"power": power, "pub_key": key}))
            .collect();
        self.contributions.push(digest_of(&Value::Array(doc)));
    }

    /// Contribution of the block's reward distribution. No-op when no fees
    /// were charged.
    pub fn add_rewards(&mut self, rewards: &[StateWrite]) {
        if rewards.is_empty() {
            return;
        }
        let mut sorted: Vec<&StateWrite> = rewards.iter().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));
        let doc = serde_json::to_value(&sorted).unwrap_or(Value::Null);
        self.contributions.push(digest_of(&doc));
    }

    /// Contribution of applied state patches. The patch manager computes
    /// the digest; it folds in here exactly like a transaction's writes.
    pub fn add_state_patches(&mut self, patch_hash: &str) {
        self.contributions.push(patch_hash.to_string());
    }

    /// Seal the block: the application hash, or the previous hash when
    /// nothing contributed.
    pub fn seal(&self, previous_app_hash: &str) -> String {
        if self.contributions.is_empty() {
            return previous_app_hash.to_string();
        }
        hash_hex(self.contributions.concat().as_bytes())
    }

    /// Clear for the next block.
    pub fn reset(&mut self) {
        self.contributions.clear();
    }
}

fn digest_of(doc: &Value) -> String {
    let encoded = serde_json::to_string(doc).unwrap_or_default();
    trace!("fingerprint contribution over {} bytes", encoded.len());
    hash_hex(encoded.as_bytes())
}
