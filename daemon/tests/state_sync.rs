// Snapshot round trip: a synced node serves chunks, a fresh node restores
// from them and continues producing identical app hashes.

mod common;

use common::*;
use kura_daemon::abci::proto::{
    RequestApplySnapshotChunk, RequestLoadSnapshotChunk, RequestOfferSnapshot,
};
use serde_json::json;

const SNAPSHOT_INTERVAL: u64 = 1000;

#[test]
fn snapshot_round_trip_restores_state() {
    // Source node: one transfer block at the snapshot height
    let mut source = node_with(standard_genesis(), SNAPSHOT_INTERVAL);
    let (_, committed) = finalize_and_commit(
        &mut source.app,
        SNAPSHOT_INTERVAL,
        5_000,
        vec![transfer_tx(1, 100, 100)],
    );

    let listed = source.app.list_snapshots();
    assert_eq!(listed.snapshots.len(), 1);
    let snapshot = listed.snapshots[0].clone();
    assert_eq!(snapshot.height, SNAPSHOT_INTERVAL);
    assert_eq!(snapshot.format, 1);
    assert_eq!(snapshot.hash, committed.app_hash);

    // Fresh node accepts the offer and streams the chunks
    let mut target = node_with(standard_genesis(), SNAPSHOT_INTERVAL);
    let offer = target.app.offer_snapshot(RequestOfferSnapshot {
        snapshot: Some(snapshot.clone()),
        app_hash: committed.app_hash.clone(),
    });
    assert_eq!(offer.result, 1, "offer should be accepted");

    for index in 0..snapshot.chunks {
        let chunk = source.app.load_snapshot_chunk(RequestLoadSnapshotChunk {
            height: snapshot.height,
            format: snapshot.format,
            chunk: index,
        });
        assert!(!chunk.chunk.is_empty());

        let applied = target.app.apply_snapshot_chunk(RequestApplySnapshotChunk {
            index,
            chunk: chunk.chunk,
            sender: "peer".into(),
        });
        assert_eq!(applied.result, 1, "chunk {} should apply", index);
    }

    // Restored state matches the source
    assert_eq!(
        get_state(&target.app, &alice_balance_key()),
        Some(json!(900))
    );
    assert_eq!(
        get_state(&target.app, "currency.balances:bob"),
        Some(json!(100))
    );
    assert_eq!(
        get_state(&target.app, &format!("__nonces:{}", alice().public_hex())),
        Some(json!(1))
    );

    let info = target.app.info();
    assert_eq!(info.last_block_height, SNAPSHOT_INTERVAL as i64);
    assert_eq!(info.last_block_app_hash, committed.app_hash);

    // Both nodes finalize the next block and agree on the app hash
    let (_, source_next) = finalize_and_commit(
        &mut source.app,
        SNAPSHOT_INTERVAL + 1,
        5_001,
        vec![transfer_tx(2, 50, 100)],
    );
    let (_, target_next) = finalize_and_commit(
        &mut target.app,
        SNAPSHOT_INTERVAL + 1,
        5_001,
        vec![transfer_tx(2, 50, 100)],
    );
    assert_eq!(source_next.app_hash, target_next.app_hash);
    assert_eq!(
        get_state(&target.app, "currency.balances:bob"),
        Some(json!(150))
    );
}

#[test]
fn offer_rejects_unknown_format() {
    let mut target = node_with(standard_genesis(), SNAPSHOT_INTERVAL);
    let mut source = node_with(standard_genesis(), SNAPSHOT_INTERVAL);
    finalize_and_commit(
        &mut source.app,
        SNAPSHOT_INTERVAL,
        5_000,
        vec![transfer_tx(1, 100, 100)],
    );
    let mut snapshot = source.app.list_snapshots().snapshots[0].clone();
    snapshot.format = 9;

    let offer = target.app.offer_snapshot(RequestOfferSnapshot {
        snapshot: Some(snapshot),
        app_hash: b"hash".to_vec(),
    });
    // REJECT_FORMAT
    assert_eq!(offer.result, 4);
}

#[test]
fn offer_without_app_hash_rejected() {
    let mut target = node_with(standard_genesis(), SNAPSHOT_INTERVAL);
    let mut source = node_with(standard_genesis(), SNAPSHOT_INTERVAL);
    finalize_and_commit(
        &mut source.app,
        SNAPSHOT_INTERVAL,
        5_000,
        vec![transfer_tx(1, 100, 100)],
    );
    let snapshot = source.app.list_snapshots().snapshots[0].clone();

    let offer = target.app.offer_snapshot(RequestOfferSnapshot {
        snapshot: Some(snapshot),
        app_hash: vec![],
    });
    // REJECT
    assert_eq!(offer.result, 3);
}

#[test]
fn corrupted_chunk_asks_for_retry() {
    let mut source = node_with(standard_genesis(), SNAPSHOT_INTERVAL);
    finalize_and_commit(
        &mut source.app,
        SNAPSHOT_INTERVAL,
        5_000,
        vec![transfer_tx(1, 100, 100)],
    );
    let listed = source.app.list_snapshots();
    let snapshot = listed.snapshots[0].clone();

    let mut target = node_with(standard_genesis(), SNAPSHOT_INTERVAL);
    let commit_hash = snapshot.hash.clone();
    target.app.offer_snapshot(RequestOfferSnapshot {
        snapshot: Some(snapshot),
        app_hash: commit_hash,
    });

    let applied = target.app.apply_snapshot_chunk(RequestApplySnapshotChunk {
        index: 0,
        chunk: b"corrupted bytes".to_vec(),
        sender: "peer".into(),
    });
    // RETRY, with the chunk queued for refetch
    assert_eq!(applied.result, 3);
    assert_eq!(applied.refetch_chunks, vec![0]);
}
