use indexmap::IndexMap;
use kura_common::{
    config::nonce_key,
    transaction::{Transaction, TransactionError},
};
use log::trace;
use serde_json::json;

use super::{error::ChainError, storage::StateStore};

// Per-sender monotonic nonce tracking.
//
// Committed nonces live in the state store under the reserved prefix, so
// they ride the same rollback, commit and snapshot machinery as contract
// state. Within a block a transient overlay records the highest nonce each
// sender has used so far, making in-block reuse and regressions impossible.
#[derive(Debug, Default)]
pub struct NonceLedger {
    /// sender -> highest nonce used inside the open block
    pending: IndexMap<String, u64>,
}

impl NonceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last committed nonce for `sender`, if the sender has ever
    /// transacted.
    pub fn committed(&self, store: &StateStore, sender: &str) -> Result<Option<u64>, ChainError> {
        Ok(store.get(&nonce_key(sender))?.and_then(|v| v.as_u64()))
    }

    /// Next nonce a well-behaved sender should use: one past the highest
    /// nonce visible (committed or pending in the open block).
    pub fn peek_next(&self, store: &StateStore, sender: &str) -> Result<u64, ChainError> {
        match self.floor(store, sender)? {
            Some(floor) => Ok(floor + 1),
            None => Ok(0),
        }
    }

    fn floor(&self, store: &StateStore, sender: &str) -> Result<Option<u64>, ChainError> {
        let committed = self.committed(store, sender)?;
        let pending = self.pending.get(sender).copied();
        Ok(match (committed, pending) {
            (Some(c), Some(p)) => Some(c.max(p)),
            (Some(c), None) => Some(c),
            (None, Some(p)) => Some(p),
            (None, None) => None,
        })
    }

    /// Validate a transaction's nonce: strictly above the committed nonce,
    /// and strictly above anything the sender already used this block.
    pub fn check(&self, store: &StateStore, tx: &Transaction) -> Result<(), TransactionError> {
        let sender = &tx.payload.sender;
        let floor = self
            .floor(store, sender)
            .map_err(|e| TransactionError::Formatting(format!("nonce lookup failed: {}", e)))?;

        if let Some(floor) = floor {
            if tx.payload.nonce <= floor {
                return Err(TransactionError::NonceInvalid {
                    minimum: floor,
                    got: tx.payload.nonce,
                });
            }
        }
        Ok(())
    }

    /// Record a nonce as used inside the open block. Callers check first.
    pub fn use_nonce(&mut self, sender: &str, nonce: u64) {
        trace!("use nonce {} for {}", nonce, sender);
        let entry = self.pending.entry(sender.to_string()).or_insert(nonce);
        if nonce > *entry {
            *entry = nonce;
        }
    }

    /// Fold the block overlay into the durable ledger. The writes land in
    /// the store's transaction scope; the lifecycle coordinator checkpoints
    /// and hard-applies them with the rest of the block.
    pub fn commit_block(&mut self, store: &mut StateStore) {
        for (sender, nonce) in self.pending.drain(..) {
            store.set(nonce_key(&sender), json!(nonce));
        }
    }

    /// Drop the block overlay without committing (failed block replay).
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Restore-path entry: write a committed nonce directly.
    pub fn restore(&self, store: &mut StateStore, sender: &str, nonce: u64) {
        store.set(nonce_key(sender), json!(nonce));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kura_common::crypto::KeyPair;
    use kura_common::transaction::build_signed_wire;
    use serde_json::json;

    fn tx_with_nonce(nonce: u64) -> Transaction {
        let pair = KeyPair::from_secret_bytes(&[3u8; 32]);
        let wire = build_signed_wire(
            &pair,
            "kura-test",
            "currency",
            "transfer",
            json!({"amount": 1, "to": "bob"}),
            nonce,
            10,
        )
        .unwrap();
        Transaction::from_wire(wire.as_bytes()).unwrap()
    }

    #[test]
    fn test_first_nonce_accepted() {
        let store = StateStore::temporary().unwrap();
        let ledger = NonceLedger::new();
        assert!(ledger.check(&store, &tx_with_nonce(0)).is_ok());
        assert!(ledger.check(&store, &tx_with_nonce(5)).is_ok());
    }

    #[test]
    fn test_nonce_must_exceed_committed() {
        let mut store = StateStore::temporary().unwrap();
        let mut ledger = NonceLedger::new();
        let sender = tx_with_nonce(1).payload.sender.clone();

        ledger.use_nonce(&sender, 3);
        ledger.commit_block(&mut store);
        store.checkpoint_tx();
        store.hard_apply(1).unwrap();

        assert_eq!(ledger.committed(&store, &sender).unwrap(), Some(3));
        assert!(matches!(
            ledger.check(&store, &tx_with_nonce(3)),
            Err(TransactionError::NonceInvalid { minimum: 3, got: 3 })
        ));
        assert!(ledger.check(&store, &tx_with_nonce(4)).is_ok());
    }

    #[test]
    fn test_in_block_ordering() {
        // Scenario S6: nonces 1, 3, 2 in one block -> 1 ok, 3 ok, 2
        // rejected, committed nonce 3.
        let mut store = StateStore::temporary().unwrap();
        let mut ledger = NonceLedger::new();
        let sender = tx_with_nonce(1).payload.sender.clone();

        assert!(ledger.check(&store, &tx_with_nonce(1)).is_ok());
        ledger.use_nonce(&sender, 1);

        assert!(ledger.check(&store, &tx_with_nonce(3)).is_ok());
        ledger.use_nonce(&sender, 3);

        assert!(matches!(
            ledger.check(&store, &tx_with_nonce(2)),
            Err(TransactionError::NonceInvalid { minimum: 3, got: 2 })
        ));

        ledger.commit_block(&mut store);
        store.checkpoint_tx();
        store.hard_apply(1).unwrap();
        assert_eq!(ledger.committed(&store, &sender).unwrap(), Some(3));
        assert!(ledger.pending.is_empty());
    }

    #[test]
    fn test_peek_next() {
        let mut store = StateStore::temporary().unwrap();
        let mut ledger = NonceLedger::new();

        assert_eq!(ledger.peek_next(&store, "fresh").unwrap(), 0);

        ledger.use_nonce("fresh", 7);
        assert_eq!(ledger.peek_next(&store, "fresh").unwrap(), 8);

        ledger.commit_block(&mut store);
        store.checkpoint_tx();
        store.hard_apply(1).unwrap();
        assert_eq!(ledger.peek_next(&store, "fresh").unwrap(), 8);
    }

    #[test]
    fn test_reset_discards_overlay() {
        let store = StateStore::temporary().unwrap();
        let mut ledger = NonceLedger::new();
        ledger.use_nonce("a", 9);
        ledger.reset();
        assert_eq!(ledger.peek_next(&store, "a").unwrap(), 0);
    }
}
