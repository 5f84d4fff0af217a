// Kura Network common library
// Shared protocol types used by the daemon and tooling:
// hashing, Ed25519 keys, canonical encoding, fixed-point decimals,
// the transaction codec and its stateless validation rules.

pub mod config;
pub mod crypto;
pub mod encoding;
pub mod fixed;
pub mod transaction;
