//! Wire messages exchanged with the consensus driver.
//!
//! The call set is closed, so the messages are written out by hand as prost
//! structs with a `Oneof` per direction instead of being generated from
//! schema files. Field numbers are part of the wire contract and never
//! reused.

use prost::{Message, Oneof};

#[derive(Clone, PartialEq, Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl Timestamp {
    /// Total nanoseconds since the epoch. This is the block's commit tag.
    pub fn total_nanos(&self) -> u64 {
        (self.seconds.max(0) as u64) * 1_000_000_000 + self.nanos.max(0) as u64
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ValidatorUpdate {
    /// Ed25519 verifying key of the validator.
    #[prost(bytes = "vec", tag = "1")]
    pub pub_key: Vec<u8>,
    /// New voting power; zero removes the validator.
    #[prost(int64, tag = "2")]
    pub power: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Snapshot {
    #[prost(uint64, tag = "1")]
    pub height: u64,
    #[prost(uint32, tag = "2")]
    pub format: u32,
    #[prost(uint32, tag = "3")]
    pub chunks: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub hash: Vec<u8>,
    /// Snapshot metadata document (JSON), opaque to the driver.
    #[prost(bytes = "vec", tag = "5")]
    pub metadata: Vec<u8>,
}

/// Result of a single transaction inside `finalize_block`.
#[derive(Clone, PartialEq, Message)]
pub struct ExecTxResult {
    #[prost(uint32, tag = "1")]
    pub code: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
    #[prost(string, tag = "3")]
    pub log: String,
    #[prost(string, tag = "4")]
    pub info: String,
    #[prost(int64, tag = "5")]
    pub gas_wanted: i64,
    #[prost(int64, tag = "6")]
    pub gas_used: i64,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct RequestEcho {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RequestFlush {}

#[derive(Clone, PartialEq, Message)]
pub struct RequestInfo {
    #[prost(string, tag = "1")]
    pub version: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RequestInitChain {
    #[prost(message, optional, tag = "1")]
    pub time: Option<Timestamp>,
    #[prost(string, tag = "2")]
    pub chain_id: String,
    #[prost(message, repeated, tag = "3")]
    pub validators: Vec<ValidatorUpdate>,
    /// Application-owned genesis document bytes (JSON).
    #[prost(bytes = "vec", tag = "4")]
    pub app_state_bytes: Vec<u8>,
    #[prost(int64, tag = "5")]
    pub initial_height: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct RequestCheckTx {
    #[prost(bytes = "vec", tag = "1")]
    pub tx: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RequestQuery {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(int64, tag = "3")]
    pub height: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct RequestPrepareProposal {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub txs: Vec<Vec<u8>>,
    /// Upper bound on the total byte size of the returned list.
    #[prost(int64, tag = "2")]
    pub max_tx_bytes: i64,
    #[prost(int64, tag = "3")]
    pub height: i64,
    #[prost(message, optional, tag = "4")]
    pub time: Option<Timestamp>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RequestProcessProposal {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub txs: Vec<Vec<u8>>,
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
    #[prost(int64, tag = "3")]
    pub height: i64,
    #[prost(message, optional, tag = "4")]
    pub time: Option<Timestamp>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RequestFinalizeBlock {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub txs: Vec<Vec<u8>>,
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
    #[prost(int64, tag = "3")]
    pub height: i64,
    #[prost(message, optional, tag = "4")]
    pub time: Option<Timestamp>,
    #[prost(bytes = "vec", tag = "5")]
    pub proposer_address: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RequestCommit {}

#[derive(Clone, PartialEq, Message)]
pub struct RequestListSnapshots {}

#[derive(Clone, PartialEq, Message)]
pub struct RequestOfferSnapshot {
    #[prost(message, optional, tag = "1")]
    pub snapshot: Option<Snapshot>,
    /// App hash the driver expects the restored state to produce.
    #[prost(bytes = "vec", tag = "2")]
    pub app_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RequestLoadSnapshotChunk {
    #[prost(uint64, tag = "1")]
    pub height: u64,
    #[prost(uint32, tag = "2")]
    pub format: u32,
    #[prost(uint32, tag = "3")]
    pub chunk: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct RequestApplySnapshotChunk {
    #[prost(uint32, tag = "1")]
    pub index: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub chunk: Vec<u8>,
    #[prost(string, tag = "3")]
    pub sender: String,
}

#[derive(Clone, PartialEq, Oneof)]
pub enum RequestValue {
    #[prost(message, tag = "1")]
    Echo(RequestEcho),
    #[prost(message, tag = "2")]
    Flush(RequestFlush),
    #[prost(message, tag = "3")]
    Info(RequestInfo),
    #[prost(message, tag = "4")]
    InitChain(RequestInitChain),
    #[prost(message, tag = "5")]
    Query(RequestQuery),
    #[prost(message, tag = "6")]
    CheckTx(RequestCheckTx),
    #[prost(message, tag = "7")]
    Commit(RequestCommit),
    #[prost(message, tag = "8")]
    ListSnapshots(RequestListSnapshots),
    #[prost(message, tag = "9")]
    OfferSnapshot(RequestOfferSnapshot),
    #[prost(message, tag = "10")]
    LoadSnapshotChunk(RequestLoadSnapshotChunk),
    #[prost(message, tag = "11")]
    ApplySnapshotChunk(RequestApplySnapshotChunk),
    #[prost(message, tag = "12")]
    PrepareProposal(RequestPrepareProposal),
    #[prost(message, tag = "13")]
    ProcessProposal(RequestProcessProposal),
    #[prost(message, tag = "14")]
    FinalizeBlock(RequestFinalizeBlock),
}

#[derive(Clone, PartialEq, Message)]
pub struct Request {
    #[prost(oneof = "RequestValue", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14")]
    pub value: Option<RequestValue>,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Message)]
pub struct ResponseException {
    #[prost(string, tag = "1")]
    pub error: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseEcho {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseFlush {}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseInfo {
    #[prost(string, tag = "1")]
    pub data: String,
    #[prost(string, tag = "2")]
    pub version: String,
    #[prost(uint64, tag = "3")]
    pub app_version: u64,
    #[prost(int64, tag = "4")]
    pub last_block_height: i64,
    #[prost(bytes = "vec", tag = "5")]
    pub last_block_app_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseInitChain {
    #[prost(message, repeated, tag = "1")]
    pub validators: Vec<ValidatorUpdate>,
    #[prost(bytes = "vec", tag = "2")]
    pub app_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseCheckTx {
    #[prost(uint32, tag = "1")]
    pub code: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
    #[prost(string, tag = "3")]
    pub log: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseQuery {
    #[prost(uint32, tag = "1")]
    pub code: u32,
    #[prost(string, tag = "2")]
    pub log: String,
    /// Type tag of `value` (`str`, `int`, `decimal`, `json`).
    #[prost(string, tag = "3")]
    pub info: String,
    #[prost(bytes = "vec", tag = "4")]
    pub key: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponsePrepareProposal {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub txs: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Enumeration, Debug, Eq, PartialOrd, Ord, Hash, Copy)]
#[repr(i32)]
pub enum ProposalStatus {
    Unknown = 0,
    Accept = 1,
    Reject = 2,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseProcessProposal {
    #[prost(enumeration = "ProposalStatus", tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseFinalizeBlock {
    #[prost(message, repeated, tag = "1")]
    pub tx_results: Vec<ExecTxResult>,
    #[prost(message, repeated, tag = "2")]
    pub validator_updates: Vec<ValidatorUpdate>,
    /// Provisional application hash for this block.
    #[prost(bytes = "vec", tag = "3")]
    pub app_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseCommit {
    /// Sealed application hash after `hard_apply`.
    #[prost(bytes = "vec", tag = "1")]
    pub app_hash: Vec<u8>,
    /// Height below which the driver may prune block history.
    #[prost(int64, tag = "2")]
    pub retain_height: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseListSnapshots {
    #[prost(message, repeated, tag = "1")]
    pub snapshots: Vec<Snapshot>,
}

#[derive(Clone, PartialEq, prost::Enumeration, Debug, Eq, PartialOrd, Ord, Hash, Copy)]
#[repr(i32)]
pub enum OfferSnapshotResult {
    Unknown = 0,
    Accept = 1,
    Abort = 2,
    Reject = 3,
    RejectFormat = 4,
    RejectSender = 5,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseOfferSnapshot {
    #[prost(enumeration = "OfferSnapshotResult", tag = "1")]
    pub result: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseLoadSnapshotChunk {
    #[prost(bytes = "vec", tag = "1")]
    pub chunk: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Enumeration, Debug, Eq, PartialOrd, Ord, Hash, Copy)]
#[repr(i32)]
pub enum ApplySnapshotChunkResult {
    Unknown = 0,
    Accept = 1,
    Abort = 2,
    Retry = 3,
    RetrySnapshot = 4,
    RejectSnapshot = 5,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseApplySnapshotChunk {
    #[prost(enumeration = "ApplySnapshotChunkResult", tag = "1")]
    pub result: i32,
    /// Chunk indexes to re-fetch.
    #[prost(uint32, repeated, tag = "2")]
    pub refetch_chunks: Vec<u32>,
}

#[derive(Clone, PartialEq, Oneof)]
pub enum ResponseValue {
    #[prost(message, tag = "1")]
    Exception(ResponseException),
    #[prost(message, tag = "2")]
    Echo(ResponseEcho),
    #[prost(message, tag = "3")]
    Flush(ResponseFlush),
    #[prost(message, tag = "4")]
    Info(ResponseInfo),
    #[prost(message, tag = "5")]
    InitChain(ResponseInitChain),
    #[prost(message, tag = "6")]
    Query(ResponseQuery),
    #[prost(message, tag = "7")]
    CheckTx(ResponseCheckTx),
    #[prost(message, tag = "8")]
    Commit(ResponseCommit),
    #[prost(message, tag = "9")]
    ListSnapshots(ResponseListSnapshots),
    #[prost(message, tag = "10")]
    OfferSnapshot(ResponseOfferSnapshot),
    #[prost(message, tag = "11")]
    LoadSnapshotChunk(ResponseLoadSnapshotChunk),
    #[prost(message, tag = "12")]
    ApplySnapshotChunk(ResponseApplySnapshotChunk),
    #[prost(message, tag = "13")]
    PrepareProposal(ResponsePrepareProposal),
    #[prost(message, tag = "14")]
    ProcessProposal(ResponseProcessProposal),
    #[prost(message, tag = "15")]
    FinalizeBlock(ResponseFinalizeBlock),
}

#[derive(Clone, PartialEq, Message)]
pub struct Response {
    #[prost(
        oneof = "ResponseValue",
        tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15"
    )]
    pub value: Option<ResponseValue>,
}

impl Response {
    pub fn from_value(value: ResponseValue) -> Self {
        Response { value: Some(value) }
    }

    pub fn exception(error: impl Into<String>) -> Self {
        Response::from_value(ResponseValue::Exception(ResponseException {
            error: error.into(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let req = Request {
            value: Some(RequestValue::CheckTx(RequestCheckTx {
                tx: b"deadbeef".to_vec(),
            })),
        };
        let bytes = req.encode_to_vec();
        let decoded = Request::decode(bytes.as_slice()).unwrap();
        assert_eq!(req, decoded);
    }

    #[test]
    fn test_response_round_trip() {
        let res = Response::from_value(ResponseValue::FinalizeBlock(ResponseFinalizeBlock {
            tx_results: vec![ExecTxResult {
                code: 0,
                data: b"hash".to_vec(),
                log: String::new(),
                info: String::new(),
                gas_wanted: 100,
                gas_used: 42,
            }],
            validator_updates: vec![],
            app_hash: vec![1; 32],
        }));
        let bytes = res.encode_to_vec();
        let decoded = Response::decode(bytes.as_slice()).unwrap();
        assert_eq!(res, decoded);
    }

    #[test]
    fn test_timestamp_nanos() {
        let ts = Timestamp {
            seconds: 2,
            nanos: 500,
        };
        assert_eq!(ts.total_nanos(), 2_000_000_500);
    }

    #[test]
    fn test_empty_request_decodes_to_none() {
        let decoded = Request::decode(&[][..]).unwrap();
        assert!(decoded.value.is_none());
    }
}
