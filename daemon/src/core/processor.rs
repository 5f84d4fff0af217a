//! Per-transaction orchestration during block finalization.
//!
//! The processor seeds the environment, runs the executor, decides the
//! final write set (the executed writes on success, the fee deduction alone
//! on failure), stages those writes into the store, and shapes the result
//! record that feeds both the consensus response and the fingerprint.

use kura_common::{
    config::{balance_key, DEFAULT_STAMP_RATE, STAMP_RATE_KEY},
    fixed::Fixed,
    transaction::Transaction,
};
use log::{debug, error};
use serde_json::Value;

use super::{
    error::ChainError,
    executor::{BlockMeta, Environment, ExecutionRequest, Executor},
    fingerprint::StateWrite,
    storage::StateStore,
};

/// Result record of one processed transaction.
#[derive(Debug, Clone)]
pub struct TxResult {
    pub hash: String,
    pub status: u32,
    pub writes: Vec<StateWrite>,
    pub stamps_used: u64,
    pub result: String,
}

/// A processed transaction plus its reward bookkeeping.
#[derive(Debug, Clone)]
pub struct ProcessedTx {
    pub result: TxResult,
    /// Stamps charged for this transaction, distributed by the rewards
    /// handler at end of block.
    pub stamp_rewards_amount: u64,
    pub stamp_rewards_contract: String,
}

pub struct TxProcessor {
    executor: Executor,
}

impl TxProcessor {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut Executor {
        &mut self.executor
    }

    /// Stamp rate currently in state.
    pub fn stamp_rate(&self, store: &StateStore) -> u64 {
        match store.get(STAMP_RATE_KEY) {
            Ok(Some(value)) => value.as_u64().unwrap_or(DEFAULT_STAMP_RATE),
            Ok(None) => DEFAULT_STAMP_RATE,
            Err(e) => {
                error!("failed to read stamp rate: {}", e);
                DEFAULT_STAMP_RATE
            }
        }
    }

    /// Execute one transaction inside the open block and stage its final
    /// writes. The store's transaction scope is checkpointed on return, so
    /// the block's pending writes grow by exactly the determined set.
    pub fn process_tx(
        &self,
        store: &mut StateStore,
        tx: &Transaction,
        meta: &BlockMeta,
        enabled_fees: bool,
    ) -> Result<ProcessedTx, ChainError> {
        let environment = Environment::for_block_tx(meta, &tx.metadata.signature);
        let stamp_rate = self.stamp_rate(store);

        let output = self.executor.execute(
            store,
            ExecutionRequest {
                sender: &tx.payload.sender,
                contract: &tx.payload.contract,
                function: &tx.payload.function,
                kwargs: &tx.payload.kwargs,
                stamps_supplied: tx.payload.stamps_supplied,
                environment: &environment,
                metering: enabled_fees,
            },
        );

        debug!("status code = {}", output.status_code.code());
        if !output.status_code.is_ok() {
            error!(
                "TX executed unsuccessfully. {} stamps used. {} writes. Result = {}",
                output.stamps_used,
                output.writes.len(),
                output.result
            );
        }

        let writes = self.determine_writes(
            store,
            &output,
            stamp_rate,
            &tx.payload.sender,
        )?;

        for write in &writes {
            store.set(write.key.clone(), write.value.clone());
        }
        store.checkpoint_tx();

        let result = TxResult {
            hash: tx.hash_hex(),
            status: output.status_code.code(),
            writes,
            stamps_used: output.stamps_used,
            result: render_result(&output.result),
        };

        Ok(ProcessedTx {
            stamp_rewards_amount: result.stamps_used,
            stamp_rewards_contract: tx.payload.contract.clone(),
            result,
        })
    }

    /// On success the executed writes stand; on failure the only effect is
    /// the fee deduction `stamps_used / stamp_rate` from the sender's
    /// balance, floored at zero.
    fn determine_writes(
        &self,
        store: &StateStore,
        output: &super::executor::ExecutionOutput,
        stamp_rate: u64,
        sender: &str,
    ) -> Result<Vec<StateWrite>, ChainError> {
        let mut writes: Vec<StateWrite> = if output.status_code.is_ok() {
            output
                .writes
                .iter()
                .map(|(key, value)| StateWrite {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect()
        } else {
            if output.stamps_used == 0 {
                return Ok(Vec::new());
            }
            let key = balance_key(sender);
            let balance = store
                .get(&key)?
                .as_ref()
                .and_then(Fixed::from_value)
                .unwrap_or(Fixed::ZERO);

            let to_deduct = Fixed::from_int(output.stamps_used as i64)
                .checked_div(Fixed::from_int(stamp_rate.max(1) as i64))
                .unwrap_or(Fixed::ZERO);

            let new_balance = match balance.checked_sub(to_deduct) {
                Ok(b) if !b.is_negative() => b,
                _ => Fixed::ZERO,
            };

            vec![StateWrite {
                key,
                value: new_balance.to_value(),
            }]
        };

        writes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(writes)
    }
}

fn render_result(result: &Value) -> String {
    match result {
        Value::Null => "None".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
