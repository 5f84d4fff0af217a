mod validation;

pub use validation::*;

use crate::{
    crypto::{hash_hex, verify_hex},
    encoding::{canonicalize, decode_hex_json, to_canonical_json, EncodingError},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Typed failure of transaction decoding or validation.
///
/// The numeric code is the stable part of the contract with the consensus
/// driver; the message text is advisory and free to change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Malformed transaction: {0}")]
    Formatting(String),

    #[error("Transaction is not signed by the sender")]
    SignatureInvalid,

    #[error("Transaction chain_id '{got}' does not match node chain_id '{expected}'")]
    ChainIdMismatch { expected: String, got: String },

    #[error("Transaction nonce {got} is not above {minimum}")]
    NonceInvalid { minimum: u64, got: u64 },

    #[error("Transaction sender has too few stamps for this transaction")]
    InsufficientStamps,

    #[error("Transaction contract name is invalid")]
    InvalidContractName,
}

impl TransactionError {
    /// Stable result code reported to the consensus driver.
    /// 0 is success, 1 execution error, 2 out-of-stamps; validation
    /// failures start at 3.
    pub fn code(&self) -> u32 {
        match self {
            TransactionError::Formatting(_) => 3,
            TransactionError::SignatureInvalid => 4,
            TransactionError::NonceInvalid { .. } => 5,
            TransactionError::InsufficientStamps => 6,
            TransactionError::ChainIdMismatch { .. } => 7,
            TransactionError::InvalidContractName => 3,
        }
    }
}

impl From<EncodingError> for TransactionError {
    fn from(err: EncodingError) -> Self {
        TransactionError::Formatting(err.to_string())
    }
}

/// Signed part of a transaction. Field order is the canonical (sorted)
/// order, so serializing the struct directly yields canonical JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxPayload {
    pub chain_id: String,
    pub contract: String,
    pub function: String,
    pub kwargs: Map<String, Value>,
    pub nonce: u64,
    pub sender: String,
    pub stamps_supplied: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxMetadata {
    pub signature: String,
}

/// A decoded transaction: the signed payload plus its signature envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub metadata: TxMetadata,
    pub payload: TxPayload,
}

const PAYLOAD_KEYS: [&str; 7] = [
    "chain_id",
    "contract",
    "function",
    "kwargs",
    "nonce",
    "sender",
    "stamps_supplied",
];

impl Transaction {
    /// Decode the wire form: hex text of canonical-JSON UTF-8 bytes.
    /// Performs the schema check; signature and state checks live in
    /// [`validation`].
    pub fn from_wire(raw: &[u8]) -> Result<Self, TransactionError> {
        let value = decode_hex_json(raw)?;
        Self::from_value(&value)
    }

    /// Build a transaction from an already-parsed JSON document.
    pub fn from_value(value: &Value) -> Result<Self, TransactionError> {
        let tx = value
            .as_object()
            .ok_or_else(|| TransactionError::Formatting("transaction is not an object".into()))?;

        if tx.len() != 2 {
            return Err(TransactionError::Formatting(
                "Transaction has unexpected or missing keys".into(),
            ));
        }

        let metadata = tx
            .get("metadata")
            .and_then(Value::as_object)
            .ok_or_else(|| TransactionError::Formatting("Metadata is missing".into()))?;
        if metadata.len() != 1 {
            return Err(TransactionError::Formatting(
                "Wrong number of metadata entries".into(),
            ));
        }
        let signature = metadata
            .get("signature")
            .and_then(Value::as_str)
            .ok_or_else(|| TransactionError::Formatting("Signature is missing".into()))?;

        let payload = tx
            .get("payload")
            .and_then(Value::as_object)
            .ok_or_else(|| TransactionError::Formatting("Payload is missing".into()))?;
        check_payload_keys(payload)?;

        let kwargs = payload
            .get("kwargs")
            .and_then(Value::as_object)
            .ok_or_else(|| TransactionError::Formatting("Payload key 'kwargs' is invalid".into()))?;
        let canonical_kwargs = canonicalize(&Value::Object(kwargs.clone()))
            .map_err(TransactionError::from)?
            .as_object()
            .cloned()
            .unwrap_or_default();

        let payload = TxPayload {
            chain_id: require_str(payload, "chain_id")?,
            contract: require_str(payload, "contract")?,
            function: require_str(payload, "function")?,
            kwargs: canonical_kwargs,
            nonce: require_u64(payload, "nonce")?,
            sender: require_str(payload, "sender")?,
            stamps_supplied: require_u64(payload, "stamps_supplied")?,
        };

        if payload.sender.is_empty() {
            return Err(TransactionError::Formatting(
                "Payload key 'sender' is missing".into(),
            ));
        }
        if payload.contract.is_empty() {
            return Err(TransactionError::Formatting(
                "Payload key 'contract' is missing".into(),
            ));
        }
        if payload.function.is_empty() {
            return Err(TransactionError::Formatting(
                "Payload key 'function' is missing".into(),
            ));
        }

        Ok(Transaction {
            metadata: TxMetadata {
                signature: signature.to_string(),
            },
            payload,
        })
    }

    /// Canonical JSON of the payload: the exact bytes the sender signed.
    pub fn canonical_payload_json(&self) -> String {
        // The struct's field order is sorted and kwargs are canonicalized
        // at decode time, so plain serialization is already canonical.
        serde_json::to_string(&self.payload).unwrap_or_default()
    }

    /// Canonical JSON of the full transaction (metadata + payload).
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// The transaction hash: SHA3-256 over the canonical encoding of the
    /// full transaction, as lowercase hex.
    pub fn hash_hex(&self) -> String {
        hash_hex(self.canonical_json().as_bytes())
    }

    /// Verify the metadata signature against the sender key over the
    /// canonical payload encoding.
    pub fn verify_signature(&self) -> bool {
        verify_hex(
            &self.payload.sender,
            &self.canonical_payload_json(),
            &self.metadata.signature,
        )
    }

    /// Named kwarg accessor.
    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.payload.kwargs.get(name)
    }
}

fn check_payload_keys(payload: &Map<String, Value>) -> Result<(), TransactionError> {
    for key in PAYLOAD_KEYS {
        if !payload.contains_key(key) {
            return Err(TransactionError::Formatting(format!(
                "Payload key '{}' is missing",
                key
            )));
        }
    }
    if payload.len() != PAYLOAD_KEYS.len() {
        return Err(TransactionError::Formatting(
            "Payload keys are not valid".into(),
        ));
    }
    Ok(())
}

fn require_str(map: &Map<String, Value>, key: &str) -> Result<String, TransactionError> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TransactionError::Formatting(format!("Payload key '{}' is invalid", key)))
}

fn require_u64(map: &Map<String, Value>, key: &str) -> Result<u64, TransactionError> {
    map.get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| TransactionError::Formatting(format!("Payload key '{}' is invalid", key)))
}

/// Test-side helper: build and sign a transaction the way a wallet would,
/// returning the hex wire form.
pub fn build_signed_wire(
    keypair: &crate::crypto::KeyPair,
    chain_id: &str,
    contract: &str,
    function: &str,
    kwargs: Value,
    nonce: u64,
    stamps_supplied: u64,
) -> Result<String, TransactionError> {
    let kwargs = canonicalize(&kwargs)
        .map_err(TransactionError::from)?
        .as_object()
        .cloned()
        .unwrap_or_default();

    let payload = TxPayload {
        chain_id: chain_id.to_string(),
        contract: contract.to_string(),
        function: function.to_string(),
        kwargs,
        nonce,
        sender: keypair.public_hex(),
        stamps_supplied,
    };

    let payload_json = serde_json::to_string(&payload)
        .map_err(|e| TransactionError::Formatting(e.to_string()))?;
    let signature = keypair.sign_hex(&payload_json);

    let tx = Transaction {
        metadata: TxMetadata { signature },
        payload,
    };
    let json = to_canonical_json(
        &serde_json::to_value(&tx).map_err(|e| TransactionError::Formatting(e.to_string()))?,
    )
    .map_err(TransactionError::from)?;
    Ok(hex::encode(json.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use serde_json::json;

    fn keypair() -> KeyPair {
        KeyPair::from_secret_bytes(&[42u8; 32])
    }

    fn wire_tx(nonce: u64) -> String {
        build_signed_wire(
            &keypair(),
            "kura-test",
            "currency",
            "transfer",
            json!({"amount": 100, "to": "bob"}),
            nonce,
            100,
        )
        .unwrap()
    }

    #[test]
    fn test_decode_round_trip_preserves_signed_bytes() {
        // Property: decoding then canonically re-encoding the payload
        // yields the exact bytes that were signed.
        let wire = wire_tx(1);
        let tx = Transaction::from_wire(wire.as_bytes()).unwrap();
        assert!(tx.verify_signature());

        let re_encoded = hex::encode(tx.canonical_json().as_bytes());
        assert_eq!(wire, re_encoded);
    }

    #[test]
    fn test_hash_is_stable() {
        let wire = wire_tx(1);
        let a = Transaction::from_wire(wire.as_bytes()).unwrap();
        let b = Transaction::from_wire(wire.as_bytes()).unwrap();
        assert_eq!(a.hash_hex(), b.hash_hex());
        assert_eq!(a.hash_hex().len(), 64);
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let wire = wire_tx(1);
        let mut tx = Transaction::from_wire(wire.as_bytes()).unwrap();
        tx.payload.nonce = 99;
        assert!(!tx.verify_signature());
    }

    #[test]
    fn test_missing_payload_key_rejected() {
        let value = json!({
            "metadata": {"signature": "00"},
            "payload": {
                "chain_id": "kura-test",
                "contract": "currency",
                "function": "transfer",
                "kwargs": {},
                "nonce": 1,
                "sender": "ab"
                // stamps_supplied missing
            }
        });
        let err = Transaction::from_value(&value).unwrap_err();
        assert!(matches!(err, TransactionError::Formatting(_)));
        assert_eq!(err.code(), 3);
    }

    #[test]
    fn test_unknown_payload_key_rejected() {
        let value = json!({
            "metadata": {"signature": "00"},
            "payload": {
                "chain_id": "kura-test",
                "contract": "currency",
                "function": "transfer",
                "kwargs": {},
                "nonce": 1,
                "sender": "ab",
                "stamps_supplied": 10,
                "surprise": true
            }
        });
        assert!(Transaction::from_value(&value).is_err());
    }

    #[test]
    fn test_extra_metadata_entries_rejected() {
        let value = json!({
            "metadata": {"signature": "00", "timestamp": 1},
            "payload": {
                "chain_id": "c", "contract": "x", "function": "f",
                "kwargs": {}, "nonce": 1, "sender": "ab", "stamps_supplied": 1
            }
        });
        assert!(Transaction::from_value(&value).is_err());
    }

    #[test]
    fn test_bad_wire_hex_rejected() {
        assert!(matches!(
            Transaction::from_wire(b"not hex at all"),
            Err(TransactionError::Formatting(_))
        ));
    }

    #[test]
    fn test_fixed_kwargs_canonicalize_in_signature() {
        // A wallet that signs {"amount": {"__fixed__": "1.50"}} and one that
        // signs the normalized literal agree on bytes after decode.
        let wire = build_signed_wire(
            &keypair(),
            "kura-test",
            "currency",
            "transfer",
            json!({"amount": {"__fixed__": "1.50"}, "to": "bob"}),
            1,
            50,
        )
        .unwrap();
        let tx = Transaction::from_wire(wire.as_bytes()).unwrap();
        assert!(tx.verify_signature());
        assert_eq!(
            tx.kwarg("amount"),
            Some(&json!({"__fixed__": "1.5"}))
        );
    }
}
