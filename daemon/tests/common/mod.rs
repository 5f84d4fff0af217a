// Shared fixtures for the integration suites: a disk-backed node with a
// signed genesis, plus helpers to drive the consensus call sequence the
// way the driver would.
#![allow(dead_code)]

use kura_common::crypto::KeyPair;
use kura_common::transaction::build_signed_wire;
use kura_daemon::abci::proto::{
    RequestFinalizeBlock, RequestInitChain, ResponseCommit, ResponseFinalizeBlock, Timestamp,
};
use kura_daemon::config::NodeConfig;
use kura_daemon::core::app::App;
use kura_daemon::core::genesis::{author_genesis, GenesisRecord};
use kura_daemon::core::storage::StateStore;
use serde_json::{json, Value};
use tempdir::TempDir;

pub const CHAIN_ID: &str = "kura-test-1";

pub fn alice() -> KeyPair {
    KeyPair::from_secret_bytes(&[1u8; 32])
}

pub fn founder() -> KeyPair {
    KeyPair::from_secret_bytes(&[9u8; 32])
}

pub struct TestNode {
    pub app: App,
    // Held for the lifetime of the node so the home directory survives
    _home: TempDir,
}

/// Genesis used by the scenario suites: alice holds 1000, bob zero, stamp
/// rate 20.
pub fn standard_genesis() -> Vec<GenesisRecord> {
    vec![
        GenesisRecord {
            key: format!("currency.balances:{}", alice().public_hex()),
            value: json!(1000),
        },
        GenesisRecord {
            key: "currency.balances:bob".into(),
            value: json!(0),
        },
        GenesisRecord {
            key: "stamp_cost.S:value".into(),
            value: json!(20),
        },
    ]
}

pub fn node() -> TestNode {
    node_with(standard_genesis(), 0)
}

pub fn node_with(records: Vec<GenesisRecord>, snapshot_interval: u64) -> TestNode {
    let home = TempDir::new("kura_node").expect("temp home");
    let mut config = NodeConfig::for_tests(CHAIN_ID, home.path());
    config.snapshot_interval = snapshot_interval;

    let mut app = App::with_store(config, StateStore::temporary().expect("store"))
        .expect("app");

    let doc = author_genesis(&founder(), records, 0).expect("genesis");
    app.init_chain(RequestInitChain {
        time: Some(Timestamp {
            seconds: 1,
            nanos: 0,
        }),
        chain_id: CHAIN_ID.into(),
        validators: vec![],
        app_state_bytes: serde_json::to_vec(&doc).expect("genesis bytes"),
        initial_height: 1,
    })
    .expect("init_chain");

    TestNode { app, _home: home }
}

/// Finalize a block at `height` stamped `seconds` into the epoch.
pub fn finalize(
    app: &mut App,
    height: u64,
    seconds: i64,
    txs: Vec<Vec<u8>>,
) -> ResponseFinalizeBlock {
    app.finalize_block(RequestFinalizeBlock {
        txs,
        hash: vec![height as u8; 32],
        height: height as i64,
        time: Some(Timestamp { seconds, nanos: 0 }),
        proposer_address: vec![],
    })
    .expect("finalize_block")
}

pub fn commit(app: &mut App) -> ResponseCommit {
    app.commit().expect("commit")
}

pub fn finalize_and_commit(
    app: &mut App,
    height: u64,
    seconds: i64,
    txs: Vec<Vec<u8>>,
) -> (ResponseFinalizeBlock, ResponseCommit) {
    let finalized = finalize(app, height, seconds, txs);
    let committed = commit(app);
    (finalized, committed)
}

/// Signed wire form of a call from `keypair`.
pub fn signed_tx(
    keypair: &KeyPair,
    contract: &str,
    function: &str,
    kwargs: Value,
    nonce: u64,
    stamps: u64,
) -> Vec<u8> {
    build_signed_wire(keypair, CHAIN_ID, contract, function, kwargs, nonce, stamps)
        .expect("signed tx")
        .into_bytes()
}

pub fn transfer_tx(nonce: u64, amount: i64, stamps: u64) -> Vec<u8> {
    signed_tx(
        &alice(),
        "currency",
        "transfer",
        json!({"amount": amount, "to": "bob"}),
        nonce,
        stamps,
    )
}

/// Read a state cell straight from the node's store.
pub fn get_state(app: &App, key: &str) -> Option<Value> {
    app.store().get(key).expect("store read")
}

pub fn alice_balance_key() -> String {
    format!("currency.balances:{}", alice().public_hex())
}
