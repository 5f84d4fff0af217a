//! Validator-set tracking.
//!
//! The authoritative member list lives in state at `masternodes.S:members`
//! (hex Ed25519 keys). After each block the handler diffs that list against
//! what it last reported to the consensus driver and emits power-10
//! additions and power-0 removals. The diff, key-sorted, is also what the
//! fingerprint folds in.

use kura_common::config::VALIDATOR_POWER;
use log::{debug, warn};
use serde_json::Value;
use std::collections::BTreeSet;

use super::{error::ChainError, storage::StateStore};

const MEMBERS_KEY: &str = "masternodes.S:members";

#[derive(Debug, Default)]
pub struct ValidatorHandler {
    /// Set last reported to the driver, hex keys.
    current: BTreeSet<String>,
}

impl ValidatorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the driver's initial validator set at `init_chain`.
    pub fn set_initial(&mut self, keys: impl IntoIterator<Item = String>) {
        self.current = keys.into_iter().collect();
    }

    pub fn current(&self) -> impl Iterator<Item = &String> {
        self.current.iter()
    }

    /// Desired member list from state, or `None` when unset.
    pub fn desired(&self, store: &StateStore) -> Result<Option<BTreeSet<String>>, ChainError> {
        let Some(value) = store.get(MEMBERS_KEY)? else {
            return Ok(None);
        };
        let Some(list) = value.as_array() else {
            warn!("{} is not a list, keeping validator set", MEMBERS_KEY);
            return Ok(None);
        };
        Ok(Some(
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ))
    }

    /// Updates to emit for the block just finalized: additions at power 10,
    /// removals at power 0, sorted by key. Advances the reported set.
    pub fn updates_for_block(
        &mut self,
        store: &StateStore,
    ) -> Result<Vec<(String, i64)>, ChainError> {
        let Some(desired) = self.desired(store)? else {
            return Ok(Vec::new());
        };
        if desired == self.current {
            return Ok(Vec::new());
        }

        let mut updates = Vec::new();
        for removed in self.current.difference(&desired) {
            updates.push((removed.clone(), 0));
        }
        for added in desired.difference(&self.current) {
            updates.push((added.clone(), VALIDATOR_POWER));
        }
        updates.sort();

        debug!(
            "validator set changed: {} -> {} members",
            self.current.len(),
            desired.len()
        );
        self.current = desired;
        Ok(updates)
    }
}
