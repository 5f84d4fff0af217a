// Protocol constants shared by every component.
// These are part of the consensus contract: changing any of them is a fork.

/// Separator between a contract name and a variable name in a state key.
pub const KEY_DELIMITER: char = '.';

/// Separator between a variable name and its index components.
pub const INDEX_SEPARATOR: char = ':';

/// Reserved variable holding a contract's interface source.
pub const CODE_KEY: &str = "__code__";

/// Reserved sibling variable holding the compiled interface manifest.
pub const COMPILED_KEY: &str = "__compiled__";

/// Reserved prefix for the nonce ledger. Nonce cells live at
/// `__nonces:<sender>` so they ride the same cache, rollback and snapshot
/// machinery as contract state.
pub const NONCE_PREFIX: &str = "__nonces:";

/// Reserved prefix for in-flight (mempool-admitted) nonces carried by
/// snapshots of nodes that track them.
pub const PENDING_NONCE_PREFIX: &str = "__pending_nonces:";

/// Meta key: height of the last committed block.
pub const LATEST_BLOCK_HEIGHT_KEY: &str = "__latest_block_height";

/// Meta key: application hash of the last committed block, as hex.
pub const LATEST_BLOCK_HASH_KEY: &str = "__latest_block_hash";

/// Key of the stamp rate cell read by validation and metering.
pub const STAMP_RATE_KEY: &str = "stamp_cost.S:value";

/// Stamp rate assumed when the cell is absent (fresh chains before genesis
/// contracts land).
pub const DEFAULT_STAMP_RATE: u64 = 20;

// Stamp cost table. Every primitive carries a flat cost; writes are an
// order of magnitude dearer than reads.
pub const STAMP_COST_READ: u64 = 3;
pub const STAMP_COST_WRITE: u64 = 25;
pub const STAMP_COST_CALL: u64 = 10;

/// Estimated stamps consumed by a plain transfer; used by the minimum
/// residual rule below.
pub const STAMPS_PER_TRANSFER_ESTIMATE: u64 = 6;

/// Minimum number of transfers worth of stamps a sender must retain after a
/// currency transfer. Stops accounts from emptying themselves to dodge fees.
pub const MIN_RESIDUAL_TRANSFERS: u64 = 2;

/// Longest accepted contract name for submission transactions.
pub const MAX_CONTRACT_NAME_LEN: usize = 255;

/// Prefix required on user-submitted contract names.
pub const USER_CONTRACT_PREFIX: &str = "con_";

/// Voting power assigned to every active validator.
pub const VALIDATOR_POWER: i64 = 10;

// Snapshot defaults (overridable from node configuration)
pub const DEFAULT_SNAPSHOT_INTERVAL: u64 = 1000;
pub const DEFAULT_MAX_SNAPSHOTS: usize = 5;
pub const DEFAULT_SNAPSHOT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Snapshot format version understood by the restore path.
pub const SNAPSHOT_FORMAT: u32 = 1;

/// Default path of the consensus-driver socket.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/kura-abci.sock";

/// Returns the state key of a sender's currency balance.
pub fn balance_key(sender: &str) -> String {
    format!("currency.balances{}{}", INDEX_SEPARATOR, sender)
}

/// Returns the nonce-ledger key for a sender.
pub fn nonce_key(sender: &str) -> String {
    format!("{}{}", NONCE_PREFIX, sender)
}

/// Returns the `__code__` key for a contract.
pub fn code_key(contract: &str) -> String {
    format!("{}{}{}", contract, KEY_DELIMITER, CODE_KEY)
}

/// Returns the `__compiled__` key for a contract.
pub fn compiled_key(contract: &str) -> String {
    format!("{}{}{}", contract, KEY_DELIMITER, COMPILED_KEY)
}

/// Splits a state key into its contract component and the rest, if the key
/// is contract-shaped.
pub fn contract_of_key(key: &str) -> Option<(&str, &str)> {
    let idx = key.find(KEY_DELIMITER)?;
    let (contract, rest) = key.split_at(idx);
    if contract.is_empty() {
        return None;
    }
    Some((contract, &rest[1..]))
}
