//! State snapshots for fast-sync.
//!
//! A snapshot is a directory `snapshot_<height>_<app_hash_prefix>` holding
//! `metadata.json` plus gzip shards of the canonical state document. The
//! document collects contract state, nonces and bookkeeping metadata;
//! chunking is split-after-compress, so concatenating the served chunks in
//! index order reproduces the gzip stream of the full state JSON.
//!
//! The restore path stages incoming chunks in a temporary directory,
//! verifies them against the offered metadata, and applies the decoded
//! document through the store and the nonce ledger before sealing with
//! `hard_apply(block_time)`.

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use kura_common::{
    config::{
        compiled_key, contract_of_key, CODE_KEY, LATEST_BLOCK_HASH_KEY, LATEST_BLOCK_HEIGHT_KEY,
        NONCE_PREFIX, PENDING_NONCE_PREFIX, SNAPSHOT_FORMAT,
    },
    encoding::canonicalize,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::{
    error::ChainError, executor::compiler::compile_interface, nonce::NonceLedger,
    storage::StateStore,
};

#[derive(Debug, Clone, Copy)]
pub struct SnapshotConfig {
    /// Height cadence; zero disables snapshot creation.
    pub interval: u64,
    pub max_snapshots: usize,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub height: u64,
    pub format: u32,
    pub chunks: u32,
    /// App hash at the snapshot height, hex.
    pub app_hash: String,
    /// Block nanosecond timestamp; the commit tag used at restore.
    pub block_time: u64,
    pub chunk_hashes: Vec<String>,
    pub total_size: u64,
}

/// Outcome of a snapshot offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Accept,
    Reject,
    RejectFormat,
    Abort,
}

/// Outcome of applying one restore chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Accept,
    Retry,
    RetrySnapshot,
    Abort,
}

/// Accepted restore target, parsed from the snapshot offer.
#[derive(Debug, Clone)]
struct RestoreTarget {
    metadata: SnapshotMetadata,
    received: BTreeSet<u32>,
}

pub struct SnapshotEngine {
    snapshots_dir: PathBuf,
    config: SnapshotConfig,
    restore: Option<RestoreTarget>,
}

impl SnapshotEngine {
    pub fn new(storage_home: &Path, config: SnapshotConfig) -> Result<Self, ChainError> {
        let snapshots_dir = storage_home.join("snapshots");
        std::fs::create_dir_all(&snapshots_dir)?;
        Ok(Self {
            snapshots_dir,
            config,
            restore: None,
        })
    }

    pub fn should_create(&self, height: u64) -> bool {
        self.config.interval > 0 && height > 0 && height % self.config.interval == 0
    }

    // -- creation -----------------------------------------------------------

    /// Create a snapshot of the store's committed state at `height`.
    pub fn create(
        &self,
        store: &StateStore,
        height: u64,
        app_hash: &str,
        block_time: u64,
    ) -> Result<String, ChainError> {
        info!("creating state snapshot at height {}", height);

        let document = collect_state(store, height, app_hash)?;
        let serialized = serde_json::to_vec(&document)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serialized)?;
        let compressed = encoder.finish()?;

        let snapshot_id = format!("{}_{}", height, &app_hash[..app_hash.len().min(16)]);
        let snapshot_path = self.snapshots_dir.join(format!("snapshot_{}", snapshot_id));
        std::fs::create_dir_all(&snapshot_path)?;

        let chunk_size = self.config.chunk_size.max(1);
        let mut chunk_hashes = Vec::new();
        for (index, shard) in compressed.chunks(chunk_size).enumerate() {
            let chunk_file = snapshot_path.join(format!("chunk_{:04}.gz", index));
            std::fs::write(&chunk_file, shard)?;
            chunk_hashes.push(hex::encode(Sha256::digest(shard)));
        }

        let metadata = SnapshotMetadata {
            height,
            format: SNAPSHOT_FORMAT,
            chunks: chunk_hashes.len() as u32,
            app_hash: app_hash.to_string(),
            block_time,
            chunk_hashes,
            total_size: compressed.len() as u64,
        };
        std::fs::write(
            snapshot_path.join("metadata.json"),
            serde_json::to_vec_pretty(&metadata)?,
        )?;

        info!(
            "created snapshot {} with {} chunks ({} bytes compressed)",
            snapshot_id, metadata.chunks, metadata.total_size
        );

        self.cleanup_old_snapshots()?;
        Ok(snapshot_id)
    }

    fn cleanup_old_snapshots(&self) -> Result<(), ChainError> {
        let mut snapshots = self.scan()?;
        snapshots.sort_by(|a, b| b.0.height.cmp(&a.0.height));

        for (metadata, path) in snapshots.into_iter().skip(self.config.max_snapshots.max(1)) {
            info!("removing old snapshot at height {}", metadata.height);
            if let Err(e) = std::fs::remove_dir_all(&path) {
                error!("failed to remove snapshot {}: {}", path.display(), e);
            }
        }
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(SnapshotMetadata, PathBuf)>, ChainError> {
        let mut snapshots = Vec::new();
        for entry in std::fs::read_dir(&self.snapshots_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir()
                || !entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("snapshot_")
            {
                continue;
            }
            let metadata_file = path.join("metadata.json");
            if !metadata_file.exists() {
                continue;
            }
            match std::fs::read(&metadata_file)
                .map_err(ChainError::from)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(ChainError::from))
            {
                Ok(metadata) => snapshots.push((metadata, path)),
                Err(e) => warn!("skipping unreadable snapshot {}: {}", path.display(), e),
            }
        }
        Ok(snapshots)
    }

    // -- serve path ---------------------------------------------------------

    /// Available snapshots, newest first.
    pub fn list(&self) -> Result<Vec<SnapshotMetadata>, ChainError> {
        let mut metadata: Vec<SnapshotMetadata> =
            self.scan()?.into_iter().map(|(m, _)| m).collect();
        metadata.sort_by(|a, b| b.height.cmp(&a.height));
        Ok(metadata)
    }

    /// Read one chunk of a stored snapshot.
    pub fn load_chunk(&self, height: u64, format: u32, index: u32) -> Result<Vec<u8>, ChainError> {
        let snapshots = self.scan()?;
        let Some((_, path)) = snapshots
            .iter()
            .find(|(m, _)| m.height == height && m.format == format)
        else {
            return Err(ChainError::Snapshot(format!(
                "snapshot not found for height {}, format {}",
                height, format
            )));
        };

        let chunk_file = path.join(format!("chunk_{:04}.gz", index));
        if !chunk_file.exists() {
            return Err(ChainError::Snapshot(format!(
                "chunk {} not found for snapshot at height {}",
                index, height
            )));
        }
        Ok(std::fs::read(chunk_file)?)
    }

    // -- restore path -------------------------------------------------------

    /// Handle a snapshot offer from the driver.
    pub fn offer(&mut self, height: u64, format: u32, chunks: u32, app_hash: &[u8], metadata_bytes: &[u8]) -> OfferOutcome {
        info!(
            "offered snapshot: height={}, format={}, chunks={}",
            height, format, chunks
        );

        if format != SNAPSHOT_FORMAT {
            warn!("unsupported snapshot format: {}", format);
            return OfferOutcome::RejectFormat;
        }
        if app_hash.is_empty() {
            warn!("no app hash provided with snapshot");
            return OfferOutcome::Reject;
        }

        // The metadata document rides along with the offer; without it we
        // can neither verify chunks nor know the commit tag.
        let metadata: SnapshotMetadata = match serde_json::from_slice(metadata_bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!("snapshot offer carries undecodable metadata: {}", e);
                return OfferOutcome::Reject;
            }
        };
        if metadata.height != height || metadata.chunks != chunks {
            warn!("snapshot metadata disagrees with offer, rejecting");
            return OfferOutcome::Reject;
        }
        if metadata.app_hash.as_bytes() != app_hash {
            // Divergence is recorded but ultimately surfaced by the driver
            warn!(
                "snapshot app hash {} differs from the hash the driver expects",
                metadata.app_hash
            );
        }

        if let Err(e) = std::fs::create_dir_all(self.restore_dir()) {
            error!("cannot create restore staging dir: {}", e);
            return OfferOutcome::Abort;
        }

        info!("accepting snapshot for restoration");
        self.restore = Some(RestoreTarget {
            metadata,
            received: BTreeSet::new(),
        });
        OfferOutcome::Accept
    }

    fn restore_dir(&self) -> PathBuf {
        self.snapshots_dir.join("temp_restore")
    }

    /// Stage one incoming chunk; when the last chunk arrives, reassemble
    /// and apply the full document.
    pub fn apply_chunk(
        &mut self,
        store: &mut StateStore,
        ledger: &NonceLedger,
        index: u32,
        data: &[u8],
    ) -> ApplyOutcome {
        let restore_dir = self.restore_dir();
        let Some(target) = self.restore.as_mut() else {
            warn!("snapshot chunk {} arrived without an accepted offer", index);
            return ApplyOutcome::Abort;
        };

        if index >= target.metadata.chunks {
            warn!(
                "chunk index {} out of range ({} chunks)",
                index, target.metadata.chunks
            );
            return ApplyOutcome::RetrySnapshot;
        }

        let expected_hash = &target.metadata.chunk_hashes[index as usize];
        let actual_hash = hex::encode(Sha256::digest(data));
        if &actual_hash != expected_hash {
            warn!("chunk {} hash mismatch, requesting retry", index);
            return ApplyOutcome::Retry;
        }

        let chunk_file = restore_dir.join(format!("chunk_{:04}", index));
        if let Err(e) = std::fs::write(&chunk_file, data) {
            error!("failed to stage chunk {}: {}", index, e);
            return ApplyOutcome::Abort;
        }
        target.received.insert(index);
        debug!(
            "staged chunk {} ({}/{})",
            index,
            target.received.len(),
            target.metadata.chunks
        );

        if target.received.len() < target.metadata.chunks as usize {
            return ApplyOutcome::Accept;
        }

        match self.finalize_restore(store, ledger) {
            Ok(()) => ApplyOutcome::Accept,
            Err(e) => {
                error!("snapshot restore failed: {}", e);
                self.restore = None;
                let _ = std::fs::remove_dir_all(self.restore_dir());
                ApplyOutcome::RetrySnapshot
            }
        }
    }

    fn finalize_restore(
        &mut self,
        store: &mut StateStore,
        ledger: &NonceLedger,
    ) -> Result<(), ChainError> {
        let target = self
            .restore
            .take()
            .ok_or_else(|| ChainError::Snapshot("no restore in progress".into()))?;

        // Reassemble the gzip stream in index order
        let mut compressed = Vec::with_capacity(target.metadata.total_size as usize);
        for index in 0..target.metadata.chunks {
            let chunk_file = self.restore_dir().join(format!("chunk_{:04}", index));
            compressed.extend(std::fs::read(&chunk_file)?);
        }

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut serialized = Vec::new();
        decoder
            .read_to_end(&mut serialized)
            .map_err(|e| ChainError::Snapshot(format!("gzip stream corrupt: {}", e)))?;

        let document: Value = serde_json::from_slice(&serialized)
            .map_err(|e| ChainError::Snapshot(format!("state document corrupt: {}", e)))?;

        apply_state_document(store, ledger, &document)?;

        store.set(LATEST_BLOCK_HEIGHT_KEY, json!(target.metadata.height));
        store.set(LATEST_BLOCK_HASH_KEY, json!(target.metadata.app_hash));
        store.hard_apply(target.metadata.block_time)?;

        std::fs::remove_dir_all(self.restore_dir())?;
        info!(
            "successfully restored state from snapshot at height {}",
            target.metadata.height
        );
        Ok(())
    }
}

/// Collect the full-state document: `{contract_state, nonces,
/// pending_nonces?, metadata}` with contract state grouped per contract and
/// stray keys in a `_global` bucket.
pub fn collect_state(
    store: &StateStore,
    height: u64,
    app_hash: &str,
) -> Result<Value, ChainError> {
    let mut contract_state: Map<String, Value> = Map::new();
    let mut nonces: Map<String, Value> = Map::new();
    let mut pending_nonces: Map<String, Value> = Map::new();

    for (key, value) in store.items("")? {
        if let Some(sender) = key.strip_prefix(NONCE_PREFIX) {
            nonces.insert(sender.to_string(), value);
            continue;
        }
        if let Some(sender) = key.strip_prefix(PENDING_NONCE_PREFIX) {
            pending_nonces.insert(sender.to_string(), value);
            continue;
        }

        let bucket = contract_of_key(&key)
            .map(|(contract, _)| contract.to_string())
            .unwrap_or_else(|| "_global".to_string());
        contract_state
            .entry(bucket)
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .map(|map| map.insert(key.clone(), value));
    }

    let mut document = Map::new();
    document.insert("contract_state".into(), Value::Object(contract_state));
    document.insert("nonces".into(), Value::Object(nonces));
    if !pending_nonces.is_empty() {
        document.insert("pending_nonces".into(), Value::Object(pending_nonces));
    }
    document.insert(
        "metadata".into(),
        json!({"height": height, "app_hash": app_hash}),
    );
    Ok(Value::Object(document))
}

/// Apply a decoded state document to the store and nonce ledger. Contract
/// code entries missing their compiled sibling are recompiled.
fn apply_state_document(
    store: &mut StateStore,
    ledger: &NonceLedger,
    document: &Value,
) -> Result<(), ChainError> {
    let contract_state = document
        .get("contract_state")
        .and_then(Value::as_object)
        .ok_or_else(|| ChainError::Snapshot("document missing contract_state".into()))?;

    let mut code_contracts: Vec<String> = Vec::new();
    let mut seen_compiled: BTreeSet<String> = BTreeSet::new();

    for (_, entries) in contract_state {
        let Some(entries) = entries.as_object() else {
            return Err(ChainError::Snapshot("contract bucket is not a map".into()));
        };
        for (key, value) in entries {
            if let Some((contract, rest)) = contract_of_key(key) {
                if rest == CODE_KEY {
                    code_contracts.push(contract.to_string());
                } else if rest == kura_common::config::COMPILED_KEY {
                    seen_compiled.insert(contract.to_string());
                }
            }
            store.set(key.clone(), canonicalize(value)?);
        }
    }

    // Recompute compiled manifests the document did not carry
    for contract in code_contracts {
        if seen_compiled.contains(&contract) {
            continue;
        }
        let Some(source) = store.get(&kura_common::config::code_key(&contract))? else {
            continue;
        };
        if let Some(source) = source.as_str() {
            match compile_interface(&contract, source) {
                Ok(compiled) => store.set(compiled_key(&contract), Value::String(compiled)),
                Err(e) => warn!("cannot recompile restored contract {}: {}", contract, e),
            }
        }
    }

    if let Some(nonces) = document.get("nonces").and_then(Value::as_object) {
        for (sender, value) in nonces {
            if let Some(nonce) = value.as_u64() {
                ledger.restore(store, sender, nonce);
            }
        }
    }
    if let Some(pending) = document.get("pending_nonces").and_then(Value::as_object) {
        for (sender, value) in pending {
            store.set(
                format!("{}{}", PENDING_NONCE_PREFIX, sender),
                value.clone(),
            );
        }
    }

    Ok(())
}
