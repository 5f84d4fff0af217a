mod cache;

pub use cache::*;

use crate::core::error::ChainError;
use log::{debug, trace};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

// Durable key prefixes inside the single sled tree. One tree keeps a block
// commit inside one atomic batch.
const STATE_PREFIX: &str = "s:";
const HISTORY_PREFIX: &str = "h:";
const META_LAST_TAG: &str = "m:last_tag";
const META_APPLIED_TAGS: &str = "m:applied_tags";

/// Retention policy for the versioned write log.
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    /// Number of most recent block tags whose write log is kept.
    pub blocks_to_keep: usize,
}

/// Namespaced key-value store with transaction-scoped staging, block-scoped
/// pending writes, and tagged durable commits.
///
/// Read discipline: every `get` returns a value logically owned by the
/// caller. Mutating it never reaches the store unless the caller `set`s the
/// root key again; durable reads deserialize fresh bytes and cache hits
/// clone, so there is no shared structure to alias.
pub struct StateStore {
    db: sled::Db,
    tree: sled::Tree,
    /// Transaction-scoped staging: cleared by `rollback_tx`/`flush_cache`,
    /// folded into `block` by `checkpoint_tx`.
    scratch: WriteSet,
    /// Union of the block's committed transactions, flushed by `hard_apply`.
    block: WriteSet,
    read_cache: ReadCache,
    retention: Option<Retention>,
    /// Simulation forks may never touch durable state.
    simulation: bool,
}

impl StateStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path, cache_size: usize) -> Result<Self, ChainError> {
        let db = sled::open(path)?;
        Self::from_db(db, cache_size)
    }

    /// Ephemeral store for tests and tooling.
    pub fn temporary() -> Result<Self, ChainError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, DEFAULT_READ_CACHE_SIZE)
    }

    fn from_db(db: sled::Db, cache_size: usize) -> Result<Self, ChainError> {
        let tree = db.open_tree("kura_state")?;
        Ok(Self {
            db,
            tree,
            scratch: WriteSet::new(),
            block: WriteSet::new(),
            read_cache: ReadCache::new(cache_size),
            retention: None,
            simulation: false,
        })
    }

    pub fn with_retention(mut self, retention: Option<Retention>) -> Self {
        self.retention = retention;
        self
    }

    /// Fork sharing the durable state but with empty staging scopes and a
    /// commit lockout. Queries simulate transactions against these.
    pub fn simulation_fork(&self) -> Result<StateStore, ChainError> {
        let tree = self.db.open_tree("kura_state")?;
        Ok(StateStore {
            db: self.db.clone(),
            tree,
            scratch: WriteSet::new(),
            block: WriteSet::new(),
            read_cache: ReadCache::new(DEFAULT_READ_CACHE_SIZE),
            retention: None,
            simulation: true,
        })
    }

    // -- read path ----------------------------------------------------------

    /// Current value of `key`, owned by the caller.
    pub fn get(&self, key: &str) -> Result<Option<Value>, ChainError> {
        if let Some(staged) = self.scratch.get(key) {
            return Ok(staged.clone());
        }
        if let Some(staged) = self.block.get(key) {
            return Ok(staged.clone());
        }
        if let Some(cached) = self.read_cache.get(key) {
            return Ok(cached);
        }

        let durable = self.read_durable(key)?;
        self.read_cache.put(key, durable.clone());
        Ok(durable)
    }

    fn read_durable(&self, key: &str) -> Result<Option<Value>, ChainError> {
        let Some(bytes) = self.tree.get(state_key(key))? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&bytes).map_err(|e| {
            ChainError::Corruption(format!("undecodable value at '{}': {}", key, e))
        })?;
        Ok(Some(value))
    }

    /// All `(key, value)` pairs under `prefix`, in key order, with staged
    /// writes overlaid.
    pub fn items(&self, prefix: &str) -> Result<Vec<(String, Value)>, ChainError> {
        let mut merged: BTreeMap<String, Value> = BTreeMap::new();

        for entry in self.tree.scan_prefix(state_key(prefix)) {
            let (key_bytes, value_bytes) = entry?;
            let key = std::str::from_utf8(&key_bytes[STATE_PREFIX.len()..])
                .map_err(|_| ChainError::Corruption("non-utf8 state key".into()))?
                .to_string();
            let value = serde_json::from_slice(&value_bytes).map_err(|e| {
                ChainError::Corruption(format!("undecodable value at '{}': {}", key, e))
            })?;
            merged.insert(key, value);
        }

        for layer in [&self.block, &self.scratch] {
            for (key, staged) in layer.iter() {
                if !key.starts_with(prefix) {
                    continue;
                }
                match staged {
                    Some(value) => {
                        merged.insert(key.clone(), value.clone());
                    }
                    None => {
                        merged.remove(key);
                    }
                }
            }
        }

        Ok(merged.into_iter().collect())
    }

    /// All keys under `prefix`, in order.
    pub fn keys(&self, prefix: &str) -> Result<Vec<String>, ChainError> {
        Ok(self.items(prefix)?.into_iter().map(|(k, _)| k).collect())
    }

    // -- staging ------------------------------------------------------------

    /// Stage a write in the active transaction scope.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        trace!("set {}", key);
        self.scratch.set(key, value);
    }

    /// Stage a delete in the active transaction scope.
    pub fn delete(&mut self, key: impl Into<String>) {
        self.scratch.delete(key.into());
    }

    /// Promote the transaction scope into the block's pending writes.
    pub fn checkpoint_tx(&mut self) {
        let staged = std::mem::take(&mut self.scratch);
        self.block.merge(staged);
    }

    /// Discard the active transaction's staged writes.
    pub fn rollback_tx(&mut self) {
        if !self.scratch.is_empty() {
            trace!("rolling back {} staged writes", self.scratch.len());
        }
        self.scratch.clear();
    }

    /// Discard per-execution scratch writes. Same scope as `rollback_tx`;
    /// named for the simulation path that only ever wants cleanup.
    pub fn flush_cache(&mut self) {
        self.scratch.clear();
    }

    /// Number of writes pending for the current block.
    pub fn pending_block_writes(&self) -> usize {
        self.block.len()
    }

    // -- durable commit -----------------------------------------------------

    /// Tag of the last `hard_apply`, zero if none.
    pub fn last_applied_tag(&self) -> Result<u64, ChainError> {
        let Some(bytes) = self.tree.get(META_LAST_TAG)? else {
            return Ok(0);
        };
        let arr: [u8; 8] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| ChainError::Corruption("malformed last_tag".into()))?;
        Ok(u64::from_be_bytes(arr))
    }

    /// Atomically promote the block's pending writes (plus anything still
    /// staged in the transaction scope) to durable storage under `tag`.
    ///
    /// Tags must be strictly increasing; equal values across nodes are what
    /// makes two stores byte-identical after the same write sequence.
    pub fn hard_apply(&mut self, tag: u64) -> Result<(), ChainError> {
        if self.simulation {
            return Err(ChainError::SimulationCommit);
        }

        let current = self.last_applied_tag()?;
        if tag <= current {
            return Err(ChainError::NonMonotonicCommit {
                current,
                attempted: tag,
            });
        }

        self.checkpoint_tx();
        let writes = self.block.drain();
        debug!("hard_apply tag {} with {} writes", tag, writes.len());

        let mut batch = sled::Batch::default();
        for (key, staged) in &writes {
            let history_key = history_key(tag, key);
            match staged {
                Some(value) => {
                    let bytes = serde_json::to_vec(value)?;
                    batch.insert(state_key(key).into_bytes(), bytes.clone());
                    batch.insert(history_key.into_bytes(), bytes);
                }
                None => {
                    batch.remove(state_key(key).into_bytes());
                    batch.insert(history_key.into_bytes(), b"null".to_vec());
                }
            }
        }

        batch.insert(
            META_LAST_TAG.as_bytes().to_vec(),
            tag.to_be_bytes().to_vec(),
        );

        // The applied-tag list exists to drive pruning; without retention
        // it would only grow, so it is not tracked.
        if let Some(retention) = self.retention {
            let mut applied = self.applied_tags()?;
            applied.push(tag);
            while applied.len() > retention.blocks_to_keep.max(1) {
                let pruned = applied.remove(0);
                for entry in self.tree.scan_prefix(history_tag_prefix(pruned)) {
                    let (key, _) = entry?;
                    batch.remove(key);
                }
            }
            batch.insert(
                META_APPLIED_TAGS.as_bytes().to_vec(),
                serde_json::to_vec(&applied)?,
            );
        }

        self.tree.apply_batch(batch)?;
        self.tree.flush()?;

        // Refresh the read cache with what just landed
        for (key, staged) in &writes {
            self.read_cache.put(key.clone(), staged.clone());
        }

        Ok(())
    }

    fn applied_tags(&self) -> Result<Vec<u64>, ChainError> {
        let Some(bytes) = self.tree.get(META_APPLIED_TAGS)? else {
            return Ok(Vec::new());
        };
        serde_json::from_slice(&bytes)
            .map_err(|_| ChainError::Corruption("malformed applied_tags".into()))
    }

    /// Write-log entries recorded at `tag`, in key order.
    pub fn history_at(&self, tag: u64) -> Result<Vec<(String, Value)>, ChainError> {
        let prefix = history_tag_prefix(tag);
        let mut out = Vec::new();
        for entry in self.tree.scan_prefix(&prefix) {
            let (key_bytes, value_bytes) = entry?;
            let key = std::str::from_utf8(&key_bytes[prefix.len()..])
                .map_err(|_| ChainError::Corruption("non-utf8 history key".into()))?
                .to_string();
            let value = serde_json::from_slice(&value_bytes).map_err(|e| {
                ChainError::Corruption(format!("undecodable history at '{}': {}", key, e))
            })?;
            out.push((key, value));
        }
        Ok(out)
    }
}

fn state_key(key: &str) -> String {
    format!("{}{}", STATE_PREFIX, key)
}

fn history_key(tag: u64, key: &str) -> String {
    format!("{}{:020}|{}", HISTORY_PREFIX, tag, key)
}

fn history_tag_prefix(tag: u64) -> String {
    format!("{}{:020}|", HISTORY_PREFIX, tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> StateStore {
        StateStore::temporary().unwrap()
    }

    #[test]
    fn test_set_get_within_tx_scope() {
        let mut s = store();
        s.set("currency.balances:alice", json!(1000));
        assert_eq!(
            s.get("currency.balances:alice").unwrap(),
            Some(json!(1000))
        );
    }

    #[test]
    fn test_rollback_discards_staged_writes() {
        let mut s = store();
        s.set("con_a.v", json!(1));
        s.rollback_tx();
        assert_eq!(s.get("con_a.v").unwrap(), None);
    }

    #[test]
    fn test_checkpoint_then_rollback_keeps_block_writes() {
        let mut s = store();
        s.set("con_a.v", json!(1));
        s.checkpoint_tx();
        s.set("con_a.v", json!(2));
        s.rollback_tx();
        // The checkpointed value survives, the staged overwrite does not
        assert_eq!(s.get("con_a.v").unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_hard_apply_persists_and_clears_pending() {
        let mut s = store();
        s.set("con_a.v", json!({"n": 1}));
        s.checkpoint_tx();
        s.hard_apply(100).unwrap();
        assert_eq!(s.pending_block_writes(), 0);
        assert_eq!(s.get("con_a.v").unwrap(), Some(json!({"n": 1})));
        assert_eq!(s.last_applied_tag().unwrap(), 100);
    }

    #[test]
    fn test_commit_tags_strictly_increase() {
        let mut s = store();
        s.set("k", json!(1));
        s.hard_apply(50).unwrap();

        s.set("k", json!(2));
        let err = s.hard_apply(50).unwrap_err();
        assert!(matches!(err, ChainError::NonMonotonicCommit { .. }));
    }

    #[test]
    fn test_aliasing_mutation_does_not_leak() {
        // Property: after v = get(k); mutate(v) without set(k, v), a later
        // get(k) still returns the pre-mutation value.
        let mut s = store();
        s.set("con_nested.d:k", json!({"count": 1, "items": [1]}));
        s.checkpoint_tx();
        s.hard_apply(1).unwrap();

        let mut v = s.get("con_nested.d:k").unwrap().unwrap();
        v["count"] = json!(99);
        v["items"].as_array_mut().unwrap().push(json!(2));

        assert_eq!(
            s.get("con_nested.d:k").unwrap(),
            Some(json!({"count": 1, "items": [1]}))
        );
    }

    #[test]
    fn test_items_prefix_scan_with_overlay() {
        let mut s = store();
        s.set("currency.balances:alice", json!(10));
        s.set("currency.balances:bob", json!(20));
        s.set("other.key", json!(1));
        s.checkpoint_tx();
        s.hard_apply(1).unwrap();

        // Overlay: staged update and staged delete
        s.set("currency.balances:bob", json!(25));
        s.set("currency.balances:carol", json!(5));

        let items = s.items("currency.balances:").unwrap();
        let keys: Vec<&str> = items.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            [
                "currency.balances:alice",
                "currency.balances:bob",
                "currency.balances:carol"
            ]
        );
        assert_eq!(items[1].1, json!(25));
    }

    #[test]
    fn test_delete_tombstones_through_layers() {
        let mut s = store();
        s.set("con_a.v", json!(1));
        s.checkpoint_tx();
        s.hard_apply(1).unwrap();

        s.delete("con_a.v");
        assert_eq!(s.get("con_a.v").unwrap(), None);
        assert!(s.keys("con_a.").unwrap().is_empty());

        s.checkpoint_tx();
        s.hard_apply(2).unwrap();
        assert_eq!(s.get("con_a.v").unwrap(), None);
    }

    #[test]
    fn test_identical_sequences_identical_bytes() {
        // Two stores given the same writes and tags agree on every key
        let build = || {
            let mut s = store();
            s.set("a.x", json!({"m": {"b": 1, "a": 2}}));
            s.set("a.y", json!([1, 2, 3]));
            s.checkpoint_tx();
            s.hard_apply(10).unwrap();
            s.set("a.x", json!({"m": {"b": 9, "a": 2}}));
            s.checkpoint_tx();
            s.hard_apply(20).unwrap();
            s
        };
        let s1 = build();
        let s2 = build();
        for key in ["a.x", "a.y"] {
            assert_eq!(
                serde_json::to_vec(&s1.get(key).unwrap()).unwrap(),
                serde_json::to_vec(&s2.get(key).unwrap()).unwrap()
            );
        }
    }

    #[test]
    fn test_history_log_and_retention() {
        let mut s = store().with_retention(Some(Retention { blocks_to_keep: 2 }));
        for tag in 1..=4u64 {
            s.set("a.v", json!(tag));
            s.checkpoint_tx();
            s.hard_apply(tag).unwrap();
        }

        // Only the last two tags keep their write log
        assert!(s.history_at(1).unwrap().is_empty());
        assert!(s.history_at(2).unwrap().is_empty());
        assert_eq!(s.history_at(3).unwrap(), vec![("a.v".into(), json!(3))]);
        assert_eq!(s.history_at(4).unwrap(), vec![("a.v".into(), json!(4))]);

        // Current state untouched by pruning
        assert_eq!(s.get("a.v").unwrap(), Some(json!(4)));
    }

    #[test]
    fn test_simulation_fork_cannot_commit() {
        let mut s = store();
        s.set("a.v", json!(1));
        s.checkpoint_tx();
        s.hard_apply(1).unwrap();

        let mut sim = s.simulation_fork().unwrap();
        assert_eq!(sim.get("a.v").unwrap(), Some(json!(1)));
        sim.set("a.v", json!(999));
        assert!(matches!(
            sim.hard_apply(2),
            Err(ChainError::SimulationCommit)
        ));

        // The live store never sees the simulated write
        sim.flush_cache();
        assert_eq!(s.get("a.v").unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_hard_apply_folds_unpromoted_scratch() {
        // Genesis and patch application set() then hard_apply() directly
        let mut s = store();
        s.set("genesis.key", json!("value"));
        s.hard_apply(7).unwrap();
        assert_eq!(s.get("genesis.key").unwrap(), Some(json!("value")));
    }
}
