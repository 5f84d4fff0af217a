//! Block lifecycle coordination.
//!
//! `App` owns every stateful component and drives the consensus-driver call
//! sequence: genesis, mempool admission, proposal handling, block
//! finalization, commit, queries and snapshot exchange. Handlers execute
//! strictly in request order; only this module calls `hard_apply`.

use kura_common::{
    config::{balance_key, LATEST_BLOCK_HASH_KEY, LATEST_BLOCK_HEIGHT_KEY},
    crypto::hash_hex,
    fixed::Fixed,
    transaction::{
        check_chain_id, check_contract_name, check_signature, check_stamp_budget,
        check_transfer_residual, transfer_amount, Transaction, TransactionError,
    },
};
use log::{debug, error, info, warn};
use indexmap::IndexMap;

use crate::abci::proto::{
    ApplySnapshotChunkResult, ExecTxResult, OfferSnapshotResult, ProposalStatus, RequestApplySnapshotChunk,
    RequestCheckTx, RequestEcho, RequestFinalizeBlock, RequestInitChain, RequestLoadSnapshotChunk,
    RequestOfferSnapshot, RequestPrepareProposal, RequestProcessProposal, RequestQuery,
    ResponseApplySnapshotChunk, ResponseCheckTx, ResponseCommit, ResponseEcho,
    ResponseFinalizeBlock, ResponseInfo, ResponseInitChain, ResponseListSnapshots,
    ResponseLoadSnapshotChunk, ResponseOfferSnapshot, ResponsePrepareProposal,
    ResponseProcessProposal, ResponseQuery, Snapshot, ValidatorUpdate,
};
use crate::config::NodeConfig;

use super::{
    error::ChainError,
    executor::{BlockMeta, Executor},
    fingerprint::FingerprintAccumulator,
    genesis::{apply_genesis, load_genesis_file, GenesisDocument},
    nonce::NonceLedger,
    patches::StatePatchManager,
    processor::TxProcessor,
    query::{handle_query, QueryContext},
    rewards::RewardsHandler,
    snapshot::{ApplyOutcome, OfferOutcome, SnapshotConfig, SnapshotEngine},
    storage::{Retention, StateStore},
    validators::ValidatorHandler,
};

const APP_VERSION: u64 = 1;

/// The ABCI application core.
pub struct App {
    config: NodeConfig,
    store: StateStore,
    ledger: NonceLedger,
    processor: TxProcessor,
    fingerprint: FingerprintAccumulator,
    patches: StatePatchManager,
    snapshots: SnapshotEngine,
    validators: ValidatorHandler,
    rewards: RewardsHandler,
    /// Metadata of the block being finalized, cleared at commit.
    current_block: Option<BlockMeta>,
    /// Stamps charged per contract inside the open block.
    block_stamps: IndexMap<String, u64>,
    /// App hash computed at finalize, sealed at commit.
    provisional_app_hash: Option<String>,
}

impl App {
    /// Open the application over the configured data directory.
    pub fn new(config: NodeConfig) -> Result<Self, ChainError> {
        let retention = config.pruning_enabled.then(|| Retention {
            blocks_to_keep: config.blocks_to_keep,
        });
        let store = StateStore::open(&config.state_dir(), 4096)?.with_retention(retention);
        Self::with_store(config, store)
    }

    /// Build over an explicit store; tests use temporary stores.
    pub fn with_store(config: NodeConfig, store: StateStore) -> Result<Self, ChainError> {
        let snapshots = SnapshotEngine::new(
            &config.home,
            SnapshotConfig {
                interval: config.snapshot_interval,
                max_snapshots: config.max_snapshots,
                chunk_size: config.chunk_size,
            },
        )?;

        let mut patches = StatePatchManager::new();
        patches.load(&config.state_patches_path())?;

        Ok(App {
            config,
            store,
            ledger: NonceLedger::new(),
            processor: TxProcessor::new(Executor::with_system_contracts()),
            fingerprint: FingerprintAccumulator::new(),
            patches,
            snapshots,
            validators: ValidatorHandler::new(),
            rewards: RewardsHandler::new(),
            current_block: None,
            block_stamps: IndexMap::new(),
            provisional_app_hash: None,
        })
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn processor_mut(&mut self) -> &mut TxProcessor {
        &mut self.processor
    }

    pub fn patches_mut(&mut self) -> &mut StatePatchManager {
        &mut self.patches
    }

    pub fn chain_id(&self) -> &str {
        &self.config.chain_id
    }

    fn last_block_height(&self) -> u64 {
        self.store
            .get(LATEST_BLOCK_HEIGHT_KEY)
            .ok()
            .flatten()
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    fn last_app_hash(&self) -> String {
        self.store
            .get(LATEST_BLOCK_HASH_KEY)
            .ok()
            .flatten()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    // -- driver handshake ---------------------------------------------------

    pub fn echo(&self, req: RequestEcho) -> ResponseEcho {
        ResponseEcho {
            message: req.message,
        }
    }

    pub fn info(&self) -> ResponseInfo {
        ResponseInfo {
            data: "kura".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            app_version: APP_VERSION,
            last_block_height: self.last_block_height() as i64,
            last_block_app_hash: self.last_app_hash().into_bytes(),
        }
    }

    // -- genesis ------------------------------------------------------------

    /// Height-zero bootstrap: verify and apply the genesis document, seed
    /// the validator set, seal the initial application hash.
    pub fn init_chain(&mut self, req: RequestInitChain) -> Result<ResponseInitChain, ChainError> {
        if req.chain_id != self.config.chain_id {
            return Err(ChainError::Config(format!(
                "driver chain_id '{}' does not match configured '{}'",
                req.chain_id, self.config.chain_id
            )));
        }

        let document: GenesisDocument = if req.app_state_bytes.is_empty() {
            load_genesis_file(&self.config.genesis_path())?
        } else {
            serde_json::from_slice(&req.app_state_bytes)?
        };

        let genesis_hash = apply_genesis(&mut self.store, &document.abci_genesis)?;

        self.store.set(LATEST_BLOCK_HEIGHT_KEY, serde_json::json!(0));
        self.store
            .set(LATEST_BLOCK_HASH_KEY, serde_json::json!(genesis_hash));

        let tag = document
            .abci_genesis
            .number
            .max(req.time.as_ref().map(|t| t.total_nanos()).unwrap_or(0))
            .max(1);
        self.store.hard_apply(tag)?;

        self.validators.set_initial(
            req.validators
                .iter()
                .map(|v| hex::encode(&v.pub_key))
                .collect::<Vec<String>>(),
        );

        info!(
            "chain initialized: {} records, genesis hash {}",
            document.abci_genesis.genesis.len(),
            genesis_hash
        );

        Ok(ResponseInitChain {
            validators: req.validators,
            app_hash: genesis_hash.into_bytes(),
        })
    }

    // -- mempool ------------------------------------------------------------

    /// Validation pipeline over a decoded transaction. Pure with respect
    /// to the store. Admission applies the full rule set; the block path
    /// skips the admission-only rules (transfer residual, contract-name
    /// format) so such transactions execute and pay for the attempt.
    fn validate_tx(&self, tx: &Transaction, admission: bool) -> Result<(), TransactionError> {
        check_signature(tx)?;
        check_chain_id(tx, &self.config.chain_id)?;
        self.ledger.check(&self.store, tx)?;

        let balance = self
            .store
            .get(&balance_key(&tx.payload.sender))
            .map_err(|e| TransactionError::Formatting(format!("balance lookup failed: {}", e)))?
            .as_ref()
            .and_then(Fixed::from_value)
            .unwrap_or(Fixed::ZERO);
        let stamp_rate = self.processor.stamp_rate(&self.store);

        check_stamp_budget(balance, stamp_rate, tx.payload.stamps_supplied)?;
        if admission {
            check_transfer_residual(
                balance,
                stamp_rate,
                &tx.payload.contract,
                &tx.payload.function,
                transfer_amount(tx),
            )?;
            check_contract_name(tx)?;
        }
        Ok(())
    }

    /// Guardian of the mempool: every node runs this before admitting a
    /// transaction, whether it came from a user or a peer.
    pub fn check_tx(&self, req: RequestCheckTx) -> ResponseCheckTx {
        match Transaction::from_wire(&req.tx).and_then(|tx| {
            self.validate_tx(&tx, true)?;
            Ok(tx)
        }) {
            Ok(tx) => ResponseCheckTx {
                code: 0,
                data: tx.hash_hex().into_bytes(),
                log: "ok".to_string(),
            },
            Err(err) => {
                debug!("check_tx rejected: {}", err);
                ResponseCheckTx {
                    code: err.code(),
                    data: Vec::new(),
                    log: err.to_string(),
                }
            }
        }
    }

    // -- proposals ----------------------------------------------------------

    /// Shape the raw mempool set: drop transactions that fail stateless
    /// decoding and respect the driver's byte budget.
    pub fn prepare_proposal(&self, req: RequestPrepareProposal) -> ResponsePrepareProposal {
        let mut kept = Vec::new();
        let mut total_bytes: i64 = 0;

        for raw in req.txs {
            let Ok(tx) = Transaction::from_wire(&raw) else {
                continue;
            };
            if check_signature(&tx).is_err() || check_chain_id(&tx, &self.config.chain_id).is_err()
            {
                continue;
            }
            if req.max_tx_bytes > 0 && total_bytes + raw.len() as i64 > req.max_tx_bytes {
                break;
            }
            total_bytes += raw.len() as i64;
            kept.push(raw);
        }

        ResponsePrepareProposal { txs: kept }
    }

    /// Stateful failures become failed transactions at finalize, so any
    /// proposed list is acceptable.
    pub fn process_proposal(&self, _req: RequestProcessProposal) -> ResponseProcessProposal {
        ResponseProcessProposal {
            status: ProposalStatus::Accept as i32,
        }
    }

    // -- block execution ----------------------------------------------------

    /// Execute the decided block: transactions in driver order, then state
    /// patches, then validator and reward updates, each feeding the
    /// fingerprint in the fixed contribution order.
    pub fn finalize_block(
        &mut self,
        req: RequestFinalizeBlock,
    ) -> Result<ResponseFinalizeBlock, ChainError> {
        let height = req.height.max(0) as u64;
        let nanos = req.time.as_ref().map(|t| t.total_nanos()).unwrap_or(0).max(1);
        let meta = BlockMeta {
            nanos,
            height,
            hash: hex::encode(&req.hash),
        };
        info!("finalize_block height {} with {} txs", height, req.txs.len());

        self.fingerprint.reset();
        self.ledger.reset();
        self.block_stamps.clear();

        let mut tx_results = Vec::with_capacity(req.txs.len());
        for raw in &req.txs {
            tx_results.push(self.finalize_one_tx(raw, &meta)?);
        }

        self.ledger.commit_block(&mut self.store);
        self.store.checkpoint_tx();

        // Patches apply after transactions; their digest is held back until
        // its slot in the contribution order.
        let patch_digest = match self.patches.apply_for_block(&mut self.store, height)? {
            Some((digest, applied)) => {
                for patch in &applied {
                    debug!("state patch applied: {}", patch.key);
                }
                Some(digest)
            }
            None => None,
        };

        let validator_updates = self.validators.updates_for_block(&self.store)?;
        self.fingerprint.add_validator_updates(&validator_updates);

        if self.config.enable_tx_fee {
            let stamp_rate = self.processor.stamp_rate(&self.store);
            let reward_writes =
                self.rewards
                    .calculate(&self.store, &self.block_stamps, stamp_rate)?;
            for write in &reward_writes {
                self.store.set(write.key.clone(), write.value.clone());
            }
            self.store.checkpoint_tx();
            self.fingerprint.add_rewards(&reward_writes);
        }

        if let Some(digest) = patch_digest {
            self.fingerprint.add_state_patches(&digest);
        }

        let app_hash = self.fingerprint.seal(&self.last_app_hash());

        // Bookkeeping cells ride the block's writes without contributing to
        // the fingerprint.
        self.store
            .set(LATEST_BLOCK_HEIGHT_KEY, serde_json::json!(height));
        self.store
            .set(LATEST_BLOCK_HASH_KEY, serde_json::json!(app_hash));
        self.store.checkpoint_tx();

        self.current_block = Some(meta);
        self.provisional_app_hash = Some(app_hash.clone());

        Ok(ResponseFinalizeBlock {
            tx_results,
            validator_updates: validator_updates
                .into_iter()
                .map(|(key, power)| ValidatorUpdate {
                    pub_key: hex::decode(&key).unwrap_or_default(),
                    power,
                })
                .collect(),
            app_hash: app_hash.into_bytes(),
        })
    }

    fn finalize_one_tx(
        &mut self,
        raw: &[u8],
        meta: &BlockMeta,
    ) -> Result<ExecTxResult, ChainError> {
        let tx = match Transaction::from_wire(raw) {
            Ok(tx) => tx,
            Err(err) => {
                // Zero-effect failed transaction; still part of the
                // fingerprint because it is part of the block.
                let tx_hash = hash_hex(raw);
                warn!("undecodable tx in block: {}", err);
                self.fingerprint.add_transaction(&tx_hash, &[], err.code());
                return Ok(ExecTxResult {
                    code: err.code(),
                    data: tx_hash.into_bytes(),
                    log: err.to_string(),
                    info: String::new(),
                    gas_wanted: 0,
                    gas_used: 0,
                });
            }
        };

        if let Err(err) = self.validate_tx(&tx, false) {
            let tx_hash = tx.hash_hex();
            debug!("tx {} rejected at block time: {}", tx_hash, err);
            self.fingerprint.add_transaction(&tx_hash, &[], err.code());
            return Ok(ExecTxResult {
                code: err.code(),
                data: tx_hash.into_bytes(),
                log: err.to_string(),
                info: String::new(),
                gas_wanted: tx.payload.stamps_supplied as i64,
                gas_used: 0,
            });
        }

        self.ledger.use_nonce(&tx.payload.sender, tx.payload.nonce);

        let processed =
            self.processor
                .process_tx(&mut self.store, &tx, meta, self.config.enable_tx_fee)?;

        self.fingerprint.add_transaction(
            &processed.result.hash,
            &processed.result.writes,
            processed.result.status,
        );

        if processed.stamp_rewards_amount > 0 {
            let entry = self
                .block_stamps
                .entry(processed.stamp_rewards_contract.clone())
                .or_insert(0);
            *entry += processed.stamp_rewards_amount;
        }

        Ok(ExecTxResult {
            code: processed.result.status,
            data: processed.result.hash.clone().into_bytes(),
            log: processed.result.result.clone(),
            info: serde_json::to_string(&processed.result.writes).unwrap_or_default(),
            gas_wanted: tx.payload.stamps_supplied as i64,
            gas_used: processed.result.stamps_used as i64,
        })
    }

    /// Seal the block: one atomic durable apply under the block's
    /// nanosecond tag, then snapshot housekeeping.
    pub fn commit(&mut self) -> Result<ResponseCommit, ChainError> {
        let meta = self
            .current_block
            .take()
            .ok_or(ChainError::NoOpenBlock("commit"))?;
        let app_hash = self
            .provisional_app_hash
            .take()
            .ok_or(ChainError::NoOpenBlock("commit"))?;

        self.store.hard_apply(meta.nanos)?;
        self.fingerprint.reset();
        info!("committed height {} app_hash {}", meta.height, app_hash);

        if self.snapshots.should_create(meta.height) {
            if let Err(e) = self
                .snapshots
                .create(&self.store, meta.height, &app_hash, meta.nanos)
            {
                // Snapshots are a sync convenience, never consensus
                error!("failed to create snapshot at {}: {}", meta.height, e);
            }
        }

        let retain_height = if self.config.pruning_enabled {
            meta.height.saturating_sub(self.config.blocks_to_keep as u64) as i64
        } else {
            0
        };

        Ok(ResponseCommit {
            app_hash: app_hash.into_bytes(),
            retain_height,
        })
    }

    // -- queries ------------------------------------------------------------

    pub fn query(&self, req: RequestQuery) -> ResponseQuery {
        let ctx = QueryContext {
            store: &self.store,
            ledger: &self.ledger,
            processor: &self.processor,
            block_service_mode: self.config.block_service_mode,
        };
        let result = handle_query(&ctx, &req.path);
        ResponseQuery {
            code: result.code,
            log: result.log,
            info: result.info,
            key: result.key.into_bytes(),
            value: result.value,
        }
    }

    // -- snapshot exchange --------------------------------------------------

    pub fn list_snapshots(&self) -> ResponseListSnapshots {
        let snapshots = match self.snapshots.list() {
            Ok(list) => list,
            Err(e) => {
                error!("error listing snapshots: {}", e);
                return ResponseListSnapshots { snapshots: vec![] };
            }
        };
        info!("listing {} available snapshots", snapshots.len());
        ResponseListSnapshots {
            snapshots: snapshots
                .into_iter()
                .map(|m| Snapshot {
                    height: m.height,
                    format: m.format,
                    chunks: m.chunks,
                    hash: m.app_hash.clone().into_bytes(),
                    metadata: serde_json::to_vec(&m).unwrap_or_default(),
                })
                .collect(),
        }
    }

    pub fn offer_snapshot(&mut self, req: RequestOfferSnapshot) -> ResponseOfferSnapshot {
        let Some(snapshot) = req.snapshot else {
            return ResponseOfferSnapshot {
                result: OfferSnapshotResult::Reject as i32,
            };
        };
        let outcome = self.snapshots.offer(
            snapshot.height,
            snapshot.format,
            snapshot.chunks,
            &req.app_hash,
            &snapshot.metadata,
        );
        ResponseOfferSnapshot {
            result: match outcome {
                OfferOutcome::Accept => OfferSnapshotResult::Accept,
                OfferOutcome::Reject => OfferSnapshotResult::Reject,
                OfferOutcome::RejectFormat => OfferSnapshotResult::RejectFormat,
                OfferOutcome::Abort => OfferSnapshotResult::Abort,
            } as i32,
        }
    }

    pub fn load_snapshot_chunk(&self, req: RequestLoadSnapshotChunk) -> ResponseLoadSnapshotChunk {
        match self
            .snapshots
            .load_chunk(req.height, req.format, req.chunk)
        {
            Ok(chunk) => {
                debug!("loaded chunk {} ({} bytes)", req.chunk, chunk.len());
                ResponseLoadSnapshotChunk { chunk }
            }
            Err(e) => {
                error!("failed to load chunk {}: {}", req.chunk, e);
                ResponseLoadSnapshotChunk { chunk: Vec::new() }
            }
        }
    }

    pub fn apply_snapshot_chunk(
        &mut self,
        req: RequestApplySnapshotChunk,
    ) -> ResponseApplySnapshotChunk {
        let outcome =
            self.snapshots
                .apply_chunk(&mut self.store, &self.ledger, req.index, &req.chunk);
        ResponseApplySnapshotChunk {
            result: match outcome {
                ApplyOutcome::Accept => ApplySnapshotChunkResult::Accept,
                ApplyOutcome::Retry => ApplySnapshotChunkResult::Retry,
                ApplyOutcome::RetrySnapshot => ApplySnapshotChunkResult::RetrySnapshot,
                ApplyOutcome::Abort => ApplySnapshotChunkResult::Abort,
            } as i32,
            refetch_chunks: match outcome {
                ApplyOutcome::Retry => vec![req.index],
                _ => Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abci::proto::Timestamp;
    use crate::core::genesis::{author_genesis, GenesisRecord};
    use kura_common::crypto::KeyPair;
    use serde_json::json;

    fn founder() -> KeyPair {
        KeyPair::from_secret_bytes(&[77u8; 32])
    }

    fn test_app() -> App {
        let home = std::env::temp_dir().join(format!(
            "kura_app_{}_{}",
            std::process::id(),
            rand_suffix()
        ));
        std::fs::create_dir_all(&home).unwrap();
        let config = NodeConfig::for_tests("kura-test", &home);
        App::with_store(config, StateStore::temporary().unwrap()).unwrap()
    }

    fn rand_suffix() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .subsec_nanos() as u64
    }

    fn init_request() -> RequestInitChain {
        let records = vec![
            GenesisRecord {
                key: "stamp_cost.S:value".into(),
                value: json!(20),
            },
            GenesisRecord {
                key: "currency.balances:seed".into(),
                value: json!(1_000_000),
            },
        ];
        let doc = author_genesis(&founder(), records, 0).unwrap();
        RequestInitChain {
            time: Some(Timestamp {
                seconds: 1,
                nanos: 0,
            }),
            chain_id: "kura-test".into(),
            validators: vec![],
            app_state_bytes: serde_json::to_vec(&doc).unwrap(),
            initial_height: 1,
        }
    }

    #[test]
    fn test_init_chain_seeds_state_and_hash() {
        let mut app = test_app();
        let res = app.init_chain(init_request()).unwrap();
        assert_eq!(res.app_hash.len(), 64);

        assert_eq!(
            app.store().get("stamp_cost.S:value").unwrap(),
            Some(json!(20))
        );
        let info = app.info();
        assert_eq!(info.last_block_height, 0);
        assert_eq!(info.last_block_app_hash, res.app_hash);
    }

    #[test]
    fn test_init_chain_rejects_wrong_chain_id() {
        let mut app = test_app();
        let mut req = init_request();
        req.chain_id = "other-chain".into();
        assert!(app.init_chain(req).is_err());
    }

    #[test]
    fn test_commit_without_finalize_fails() {
        let mut app = test_app();
        assert!(matches!(
            app.commit(),
            Err(ChainError::NoOpenBlock("commit"))
        ));
    }

    #[test]
    fn test_echo() {
        let app = test_app();
        let res = app.echo(RequestEcho {
            message: "hello".into(),
        });
        assert_eq!(res.message, "hello");
    }

    #[test]
    fn test_check_tx_rejects_garbage() {
        let app = test_app();
        let res = app.check_tx(RequestCheckTx {
            tx: b"zz-not-hex".to_vec(),
        });
        assert_ne!(res.code, 0);
    }

    #[test]
    fn test_empty_finalize_keeps_app_hash() {
        let mut app = test_app();
        let init = app.init_chain(init_request()).unwrap();

        let res = app
            .finalize_block(RequestFinalizeBlock {
                txs: vec![],
                hash: vec![0xab; 32],
                height: 1,
                time: Some(Timestamp {
                    seconds: 2,
                    nanos: 0,
                }),
                proposer_address: vec![],
            })
            .unwrap();
        assert_eq!(res.app_hash, init.app_hash);

        let commit = app.commit().unwrap();
        assert_eq!(commit.app_hash, init.app_hash);
        assert_eq!(app.info().last_block_height, 1);
    }
}
