//! Execution environment seeding.
//!
//! Contract code has no ambient access to time, randomness or the outside
//! world: everything it may observe is fixed here, derived from block
//! metadata and the transaction itself, so every node computes the same
//! values.

use chrono::{DateTime, Utc};
use kura_common::crypto::hash_hex;
use serde::{Deserialize, Serialize};

/// Metadata of the block currently being finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    /// Block timestamp in nanoseconds; the commit tag.
    pub nanos: u64,
    pub height: u64,
    /// Block hash as hex.
    pub hash: String,
}

/// Fixed environment handed to one contract execution.
#[derive(Debug, Clone)]
pub struct Environment {
    pub block_hash: String,
    pub block_num: u64,
    /// Digest of `nanos ‖ signature`; the per-transaction entropy source.
    pub input_hash: String,
    /// Deterministic "now": block nanos rounded up to the next second.
    pub now: DateTime<Utc>,
    /// Auxiliary salt: the transaction signature.
    pub salt: String,
}

impl Environment {
    /// Seed the environment for one transaction in a block.
    pub fn for_block_tx(meta: &BlockMeta, signature: &str) -> Self {
        Environment {
            block_hash: meta.hash.clone(),
            block_num: meta.height,
            input_hash: input_hash(meta.nanos, signature),
            now: now_from_nanos(meta.nanos),
            salt: signature.to_string(),
        }
    }

    /// String form of `now`, the only clock contracts can read.
    pub fn now_str(&self) -> String {
        self.now.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Digest of the concatenation of the nanosecond timestamp's decimal form
/// and the transaction signature.
pub fn input_hash(nanos: u64, signature: &str) -> String {
    hash_hex(format!("{}{}", nanos, signature).as_bytes())
}

/// Block nanoseconds rounded up to the nearest whole second.
pub fn now_from_nanos(nanos: u64) -> DateTime<Utc> {
    let seconds = nanos.div_ceil(1_000_000_000);
    DateTime::<Utc>::from_timestamp(seconds as i64, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> BlockMeta {
        BlockMeta {
            nanos: 1_700_000_000_500_000_000,
            height: 42,
            hash: "ab".repeat(32),
        }
    }

    #[test]
    fn test_now_rounds_up_to_second() {
        let env = Environment::for_block_tx(&meta(), "sig");
        assert_eq!(env.now.timestamp(), 1_700_000_001);

        // Exact second boundary does not round further
        let exact = BlockMeta {
            nanos: 1_700_000_000_000_000_000,
            ..meta()
        };
        let env = Environment::for_block_tx(&exact, "sig");
        assert_eq!(env.now.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_input_hash_depends_on_both_parts() {
        let a = input_hash(1, "sig");
        assert_eq!(a, input_hash(1, "sig"));
        assert_ne!(a, input_hash(2, "sig"));
        assert_ne!(a, input_hash(1, "gis"));
    }

    #[test]
    fn test_environment_is_deterministic() {
        let e1 = Environment::for_block_tx(&meta(), "sig");
        let e2 = Environment::for_block_tx(&meta(), "sig");
        assert_eq!(e1.input_hash, e2.input_hash);
        assert_eq!(e1.now, e2.now);
        assert_eq!(e1.salt, "sig");
        assert_eq!(e1.block_num, 42);
    }
}
