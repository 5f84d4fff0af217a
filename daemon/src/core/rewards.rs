//! Block reward distribution.
//!
//! When fees are enabled, the stamps charged over a block convert back to
//! currency (`stamps / stamp_rate`) and split according to the ratio vector
//! at `rewards.S:value`: `[validators, foundation, burn, developer]`. The
//! validator share divides evenly across the member list, the foundation
//! share goes to the foundation owner, the burn share is simply never
//! credited, and the developer share follows each charged contract's
//! `__developer__` cell when one exists.

use indexmap::IndexMap;
use kura_common::{config::balance_key, fixed::Fixed};
use log::{debug, warn};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{error::ChainError, fingerprint::StateWrite, storage::StateStore};

const REWARD_RATIOS_KEY: &str = "rewards.S:value";
const MEMBERS_KEY: &str = "masternodes.S:members";
const FOUNDATION_OWNER_KEY: &str = "foundation.owner";

#[derive(Debug, Default)]
pub struct RewardsHandler;

impl RewardsHandler {
    pub fn new() -> Self {
        Self
    }

    /// Compute the reward writes for a block, given the stamps charged per
    /// contract. Returns an empty set when no ratios are configured or no
    /// stamps were charged.
    pub fn calculate(
        &self,
        store: &StateStore,
        stamps_by_contract: &IndexMap<String, u64>,
        stamp_rate: u64,
    ) -> Result<Vec<StateWrite>, ChainError> {
        let total_stamps: u64 = stamps_by_contract.values().sum();
        if total_stamps == 0 {
            return Ok(Vec::new());
        }

        let Some(ratios) = self.ratios(store)? else {
            debug!("no reward ratios configured, skipping distribution");
            return Ok(Vec::new());
        };
        let [validators_share, foundation_share, _burn_share, developer_share] = ratios;

        let rate = Fixed::from_int(stamp_rate.max(1) as i64);
        let total_fee = Fixed::from_int(total_stamps as i64) / rate;

        // Accumulate balance deltas, then materialize against current state
        let mut deltas: BTreeMap<String, Fixed> = BTreeMap::new();

        let members = self.members(store)?;
        if !members.is_empty() {
            let member_reward =
                (total_fee * validators_share) / Fixed::from_int(members.len() as i64);
            if member_reward > Fixed::ZERO {
                for member in &members {
                    add_delta(&mut deltas, member, member_reward);
                }
            }
        }

        if let Some(owner) = store.get(FOUNDATION_OWNER_KEY)? {
            if let Some(owner) = owner.as_str() {
                let foundation_reward = total_fee * foundation_share;
                if foundation_reward > Fixed::ZERO {
                    add_delta(&mut deltas, owner, foundation_reward);
                }
            }
        }

        // Developer share is weighted by the stamps each contract consumed
        for (contract, stamps) in stamps_by_contract {
            if *stamps == 0 {
                continue;
            }
            let developer_key = format!("{}.__developer__", contract);
            let Some(developer) = store.get(&developer_key)? else {
                continue;
            };
            let Some(developer) = developer.as_str().map(str::to_string) else {
                warn!("{} holds a non-string developer entry", developer_key);
                continue;
            };
            let contract_fee = Fixed::from_int(*stamps as i64) / rate;
            let developer_reward = contract_fee * developer_share;
            if developer_reward > Fixed::ZERO {
                add_delta(&mut deltas, &developer, developer_reward);
            }
        }

        let mut writes = Vec::with_capacity(deltas.len());
        for (account, delta) in deltas {
            let key = balance_key(&account);
            let current = store
                .get(&key)?
                .as_ref()
                .and_then(Fixed::from_value)
                .unwrap_or(Fixed::ZERO);
            writes.push(StateWrite {
                key,
                value: (current + delta).to_value(),
            });
        }
        Ok(writes)
    }

    fn ratios(&self, store: &StateStore) -> Result<Option<[Fixed; 4]>, ChainError> {
        let Some(value) = store.get(REWARD_RATIOS_KEY)? else {
            return Ok(None);
        };
        let Some(list) = value.as_array() else {
            warn!("{} is not a list, ignoring rewards", REWARD_RATIOS_KEY);
            return Ok(None);
        };
        if list.len() != 4 {
            warn!(
                "{} holds {} entries, expected 4, ignoring rewards",
                REWARD_RATIOS_KEY,
                list.len()
            );
            return Ok(None);
        }
        let mut ratios = [Fixed::ZERO; 4];
        for (i, entry) in list.iter().enumerate() {
            ratios[i] = Fixed::from_value(entry).unwrap_or(Fixed::ZERO);
        }
        Ok(Some(ratios))
    }

    fn members(&self, store: &StateStore) -> Result<Vec<String>, ChainError> {
        let Some(value) = store.get(MEMBERS_KEY)? else {
            return Ok(Vec::new());
        };
        Ok(value
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn add_delta(deltas: &mut BTreeMap<String, Fixed>, account: &str, amount: Fixed) {
    let entry = deltas.entry(account.to_string()).or_insert(Fixed::ZERO);
    *entry = *entry + amount;
}
