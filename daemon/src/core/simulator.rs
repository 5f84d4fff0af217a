//! Transaction simulation.
//!
//! `/simulate_tx` runs a payload against a throwaway fork of the store with
//! metering forced on and an effectively unlimited stamp budget, so wallets
//! can estimate stamp usage and preview writes. Nothing a simulation does
//! can reach durable state: the fork cannot commit and every write stays in
//! the execution overlay.
//!
//! The environment is seeded deterministically from the payload digest and
//! the last committed tag, so repeated simulations of the same payload over
//! the same state return identical results.

use kura_common::crypto::hash_hex;
use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};

use super::{
    error::ChainError,
    executor::{environment::now_from_nanos, Environment, ExecutionRequest},
    fingerprint::StateWrite,
    processor::TxProcessor,
    storage::StateStore,
};

/// Stand-in balance granting the simulation its stamp budget.
const SIMULATION_BALANCE: u64 = 9_999_999;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub status: u32,
    pub state: Vec<StateWrite>,
    pub stamps_used: u64,
    pub result: String,
}

/// Simulate a payload (or a full transaction; the payload is extracted).
pub fn simulate_tx(
    store: &StateStore,
    processor: &TxProcessor,
    document: &Value,
) -> Result<SimulationResult, ChainError> {
    let payload = document.get("payload").unwrap_or(document);
    let payload = payload
        .as_object()
        .ok_or_else(|| ChainError::Config("simulation payload is not an object".into()))?;

    let sender = payload
        .get("sender")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let contract = payload
        .get("contract")
        .and_then(Value::as_str)
        .ok_or_else(|| ChainError::Config("simulation payload missing 'contract'".into()))?;
    let function = payload
        .get("function")
        .and_then(Value::as_str)
        .ok_or_else(|| ChainError::Config("simulation payload missing 'function'".into()))?;
    let empty = Map::new();
    let kwargs = payload
        .get("kwargs")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let fork = store.simulation_fork()?;
    let stamp_rate = processor.stamp_rate(&fork).max(1);
    let environment = simulation_environment(&fork, document)?;

    debug!("simulating {}.{} for {}", contract, function, sender);
    let output = processor.executor().execute(
        &fork,
        ExecutionRequest {
            sender,
            contract,
            function,
            kwargs,
            stamps_supplied: SIMULATION_BALANCE.saturating_mul(stamp_rate),
            environment: &environment,
            metering: true,
        },
    );

    let mut state: Vec<StateWrite> = output
        .writes
        .iter()
        .map(|(key, value)| StateWrite {
            key: key.clone(),
            value: value.clone(),
        })
        .collect();
    state.sort_by(|a, b| a.key.cmp(&b.key));

    Ok(SimulationResult {
        status: output.status_code.code(),
        state,
        stamps_used: output.stamps_used,
        result: match &output.result {
            Value::Null => "None".to_string(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    })
}

fn simulation_environment(store: &StateStore, document: &Value) -> Result<Environment, ChainError> {
    let entropy = hash_hex(serde_json::to_string(document)?.as_bytes());
    let tag = store.last_applied_tag()?;
    Ok(Environment {
        block_hash: entropy.clone(),
        block_num: tag,
        input_hash: entropy.clone(),
        now: now_from_nanos(tag),
        salt: entropy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::Executor;
    use kura_common::config::balance_key;
    use serde_json::json;

    fn setup() -> (StateStore, TxProcessor) {
        let mut store = StateStore::temporary().unwrap();
        store.set(balance_key("alice"), json!(1000));
        store.checkpoint_tx();
        store.hard_apply(1).unwrap();
        (store, TxProcessor::new(Executor::with_system_contracts()))
    }

    fn transfer_payload() -> Value {
        json!({
            "sender": "alice",
            "contract": "currency",
            "function": "transfer",
            "kwargs": {"amount": 100, "to": "bob"},
            "nonce": 1,
            "stamps_supplied": 0,
            "chain_id": "kura-test"
        })
    }

    #[test]
    fn test_simulation_reports_writes_without_mutating() {
        let (store, processor) = setup();
        let result = simulate_tx(&store, &processor, &transfer_payload()).unwrap();

        assert_eq!(result.status, 0);
        assert!(result.stamps_used > 0);
        assert_eq!(result.state.len(), 2);

        // Durable state untouched
        assert_eq!(store.get(&balance_key("alice")).unwrap(), Some(json!(1000)));
        assert_eq!(store.get(&balance_key("bob")).unwrap(), None);
    }

    #[test]
    fn test_simulation_accepts_full_transaction_form() {
        let (store, processor) = setup();
        let full = json!({
            "metadata": {"signature": "00"},
            "payload": transfer_payload(),
        });
        let result = simulate_tx(&store, &processor, &full).unwrap();
        assert_eq!(result.status, 0);
    }

    #[test]
    fn test_simulation_is_deterministic() {
        let (store, processor) = setup();
        let a = simulate_tx(&store, &processor, &transfer_payload()).unwrap();
        let b = simulate_tx(&store, &processor, &transfer_payload()).unwrap();
        assert_eq!(a.stamps_used, b.stamps_used);
        assert_eq!(a.state, b.state);
    }

    #[test]
    fn test_failed_simulation_reports_error() {
        let (store, processor) = setup();
        let payload = json!({
            "sender": "alice",
            "contract": "currency",
            "function": "transfer",
            "kwargs": {"amount": 1_000_000, "to": "bob"},
        });
        let result = simulate_tx(&store, &processor, &payload).unwrap();
        assert_eq!(result.status, 1);
        assert!(result.state.is_empty());
        assert!(result.result.contains("Not enough coins"));
    }

    #[test]
    fn test_malformed_payload_rejected() {
        let (store, processor) = setup();
        assert!(simulate_tx(&store, &processor, &json!("nope")).is_err());
        assert!(simulate_tx(&store, &processor, &json!({"sender": "a"})).is_err());
    }
}
