//! Ed25519 primitives for transaction and genesis signatures.
//!
//! Senders are identified by the hex form of their Ed25519 verifying key;
//! signatures are hex-encoded detached signatures over canonical payload
//! bytes.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use std::fmt;
use thiserror::Error;

/// Size of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Error types for key handling.
#[derive(Error, Debug, Clone)]
pub enum KeyError {
    #[error("Invalid public key length: expected {PUBLIC_KEY_SIZE}, got {0}")]
    InvalidPublicKeyLength(usize),

    #[error("Invalid signature length: expected {SIGNATURE_SIZE}, got {0}")]
    InvalidSignatureLength(usize),

    #[error("Failed to parse public key")]
    InvalidPublicKey,

    #[error("Invalid hex string: {0}")]
    HexError(String),
}

/// Ed25519 public key (32 bytes), exchanged as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Result<Self, KeyError> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| KeyError::InvalidPublicKey)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        if slice.len() != PUBLIC_KEY_SIZE {
            return Err(KeyError::InvalidPublicKeyLength(slice.len()));
        }
        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        bytes.copy_from_slice(slice);
        Self::from_bytes(&bytes)
    }

    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex).map_err(|e| KeyError::HexError(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// Verify a detached signature over `msg`.
    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> bool {
        let Ok(sig_bytes) = <[u8; SIGNATURE_SIZE]>::try_from(signature) else {
            return false;
        };
        let sig = DalekSignature::from_bytes(&sig_bytes);
        self.0.verify(msg, &sig).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Verify a hex signature from a hex verifying key over a UTF-8 message.
///
/// This is the exact check the transaction validator performs: the key and
/// signature travel as hex strings, the message is the canonical payload
/// encoding.
pub fn verify_hex(vk_hex: &str, msg: &str, signature_hex: &str) -> bool {
    let Ok(vk) = PublicKey::from_hex(vk_hex) else {
        return false;
    };
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    vk.verify(msg.as_bytes(), &signature)
}

/// Signing keypair. Only test fixtures and the genesis authoring path
/// create these; the daemon itself never holds secret keys.
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(bytes),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key())
    }

    pub fn public_hex(&self) -> String {
        self.public_key().to_hex()
    }

    /// Sign a UTF-8 message, returning the hex signature.
    pub fn sign_hex(&self, msg: &str) -> String {
        let sig = self.signing.sign(msg.as_bytes());
        hex::encode(sig.to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_hex())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_keypair() -> KeyPair {
        KeyPair::from_secret_bytes(&[7u8; 32])
    }

    #[test]
    fn test_sign_and_verify_hex() {
        let pair = fixed_keypair();
        let msg = r#"{"chain_id":"kura-test","nonce":1}"#;
        let sig = pair.sign_hex(msg);
        assert!(verify_hex(&pair.public_hex(), msg, &sig));
    }

    #[test]
    fn test_verify_rejects_tampered_message() {
        let pair = fixed_keypair();
        let sig = pair.sign_hex("original");
        assert!(!verify_hex(&pair.public_hex(), "tampered", &sig));
    }

    #[test]
    fn test_verify_rejects_bad_inputs() {
        let pair = fixed_keypair();
        let sig = pair.sign_hex("msg");
        // Bad hex in key
        assert!(!verify_hex("zz", "msg", &sig));
        // Truncated signature
        assert!(!verify_hex(&pair.public_hex(), "msg", &sig[..10]));
    }

    #[test]
    fn test_public_key_hex_round_trip() {
        let pk = fixed_keypair().public_key();
        let parsed = PublicKey::from_hex(&pk.to_hex()).unwrap();
        assert_eq!(pk, parsed);
    }
}
