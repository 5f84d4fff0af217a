//! Stateless transaction validation rules.
//!
//! Everything here is pure over the transaction itself plus explicitly
//! passed-in state values (balance, stamp rate). The daemon's mempool and
//! block paths call these in the fixed order: schema (done at decode),
//! chain-id, signature, nonce (stateful, in the daemon), stamp sufficiency,
//! contract-name format.

use super::{Transaction, TransactionError};
use crate::config::{
    MAX_CONTRACT_NAME_LEN, MIN_RESIDUAL_TRANSFERS, STAMPS_PER_TRANSFER_ESTIMATE,
    USER_CONTRACT_PREFIX,
};
use crate::fixed::Fixed;

/// Chain-id must match the node's; an empty chain_id never matches.
pub fn check_chain_id(tx: &Transaction, expected: &str) -> Result<(), TransactionError> {
    if tx.payload.chain_id != expected {
        return Err(TransactionError::ChainIdMismatch {
            expected: expected.to_string(),
            got: tx.payload.chain_id.clone(),
        });
    }
    Ok(())
}

/// Signature must verify against the sender key over the canonical payload.
pub fn check_signature(tx: &Transaction) -> Result<(), TransactionError> {
    if !tx.verify_signature() {
        return Err(TransactionError::SignatureInvalid);
    }
    Ok(())
}

/// Character rules for contract names: lowercase ascii letters, digits and
/// underscores, starting with a letter or underscore.
pub fn contract_name_is_formatted(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Submission transactions carry the new contract's name in kwargs; it must
/// fit the length bound, the character set, and the user prefix.
pub fn check_contract_name(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.payload.contract != "submission" || tx.payload.function != "submit_contract" {
        return Ok(());
    }

    let name = tx
        .kwarg("name")
        .and_then(|v| v.as_str())
        .ok_or(TransactionError::InvalidContractName)?;

    if name.len() > MAX_CONTRACT_NAME_LEN
        || !name.starts_with(USER_CONTRACT_PREFIX)
        || !contract_name_is_formatted(name)
    {
        return Err(TransactionError::InvalidContractName);
    }
    Ok(())
}

/// Basic stamp sufficiency: the sender's balance at the current stamp rate
/// must cover the declared stamps. Checked at admission and again at block
/// time.
pub fn check_stamp_budget(
    balance: Fixed,
    stamp_rate: u64,
    stamps_supplied: u64,
) -> Result<(), TransactionError> {
    let rate = Fixed::from_int(stamp_rate as i64);
    if balance * rate < Fixed::from_int(stamps_supplied as i64) {
        return Err(TransactionError::InsufficientStamps);
    }
    Ok(())
}

/// Admission-only residual rule: a currency transfer must leave at least
/// two transfers' worth of stamps behind, so an account cannot empty itself
/// for free. Transactions that slip into a block anyway simply execute and
/// fail, paying for the attempt.
pub fn check_transfer_residual(
    balance: Fixed,
    stamp_rate: u64,
    contract: &str,
    function: &str,
    amount: Fixed,
) -> Result<(), TransactionError> {
    if contract == "currency" && (function == "transfer" || function == "transfer_from") {
        let rate = Fixed::from_int(stamp_rate as i64);
        let residual = ((balance - amount) * rate)
            / Fixed::from_int(STAMPS_PER_TRANSFER_ESTIMATE as i64);
        if residual < Fixed::from_int(MIN_RESIDUAL_TRANSFERS as i64) {
            return Err(TransactionError::InsufficientStamps);
        }
    }
    Ok(())
}

/// Full admission-path stamp check.
pub fn check_enough_stamps(
    balance: Fixed,
    stamp_rate: u64,
    stamps_supplied: u64,
    contract: &str,
    function: &str,
    amount: Fixed,
) -> Result<(), TransactionError> {
    check_stamp_budget(balance, stamp_rate, stamps_supplied)?;
    check_transfer_residual(balance, stamp_rate, contract, function, amount)
}

/// The `amount` kwarg as a decimal, defaulting to zero when absent or not
/// number-shaped.
pub fn transfer_amount(tx: &Transaction) -> Fixed {
    tx.kwarg("amount")
        .and_then(Fixed::from_value)
        .unwrap_or(Fixed::ZERO)
}
