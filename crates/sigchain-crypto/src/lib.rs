//! Shared cryptographic primitives for sigchain verification
//!
//! This crate holds the content-addressed identifiers ([`LinkId`], [`SigId`],
//! [`Kid`]), the NaCl signature packet codec and the Ed25519 verification
//! helper used by the `sigchain-verifier` crate. Nothing here performs I/O.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
pub(crate) use sha2::{Digest, Sha256};

mod kid;
pub use kid::{Kid, KidError};

mod link_id;
pub use link_id::{compute_link_id, parse_link_id, prev_matches, LinkId, SigId, DIGEST_LEN};

mod packet;
#[cfg(feature = "ed25519")]
pub use packet::sign_packet;
pub use packet::{PacketError, SigPacket};

/// Error type for identifier and base64 decoding failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64 encoding: {0}")]
    BadBase64(#[from] base64::DecodeError),
    #[error("invalid hex encoding: {0}")]
    BadHex(#[from] hex::FromHexError),
    #[error("wrong length: expected {expected} bytes, got {actual}")]
    BadLength { expected: usize, actual: usize },
    #[error("signature id must end in {expected:?}, got {actual:?}")]
    BadSuffix {
        expected: &'static str,
        actual: String,
    },
}

/// Encode bytes as standard base64 (RFC 4648, padded).
///
/// Armored signature packets and V2 stubs travel in this encoding.
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a standard base64 string (RFC 4648, padded).
///
/// Surrounding ASCII whitespace is ignored, since armored text frequently
/// arrives with a trailing newline.
///
/// # Errors
/// Returns `DecodeError::BadBase64` if the input is not valid base64
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(DecodeError::from)
}

/// Decode a hex string into exactly `N` bytes.
///
/// # Errors
/// Returns `DecodeError::BadHex` on malformed hex and
/// `DecodeError::BadLength` when the decoded length is not `N`.
pub fn decode_hex_array<const N: usize>(encoded: &str) -> Result<[u8; N], DecodeError> {
    let bytes = hex::decode(encoded)?;
    let actual = bytes.len();
    bytes
        .try_into()
        .map_err(|_| DecodeError::BadLength {
            expected: N,
            actual,
        })
}

/// Verify an Ed25519 signature over a message.
///
/// Only available with the `ed25519` feature.
///
/// # Errors
/// Returns `VerifyError` if the public key is invalid or the signature
/// does not match.
#[cfg(feature = "ed25519")]
pub fn verify_ed25519(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), VerifyError> {
    use ed25519_dalek::{Signature, VerifyingKey};

    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| VerifyError::InvalidPublicKey)?;
    let sig = Signature::from_bytes(signature);
    verifying_key
        .verify_strict(message, &sig)
        .map_err(|_| VerifyError::SignatureMismatch)
}

/// Errors from Ed25519 signature verification.
#[cfg(feature = "ed25519")]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("invalid Ed25519 public key")]
    InvalidPublicKey,
    #[error("signature verification failed")]
    SignatureMismatch,
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any byte sequence can be encoded and decoded back to the original
        #[test]
        fn roundtrip_encode_decode(bytes: Vec<u8>) {
            let encoded = encode_base64(&bytes);
            let decoded = decode_base64(&encoded).unwrap();
            prop_assert_eq!(decoded, bytes);
        }

        /// Link ids are a pure function of their input
        #[test]
        fn compute_link_id_deterministic(bytes: Vec<u8>) {
            prop_assert_eq!(compute_link_id(&bytes), compute_link_id(&bytes));
        }

        /// Distinct inputs never share a link id
        #[test]
        fn compute_link_id_distinguishes_inputs(a: Vec<u8>, b: Vec<u8>) {
            prop_assume!(a != b);
            prop_assert_ne!(compute_link_id(&a), compute_link_id(&b));
        }

        /// Hex rendering of a link id always parses back to the same id
        #[test]
        fn link_id_hex_parses_back(bytes: Vec<u8>) {
            let id = compute_link_id(&bytes);
            prop_assert_eq!(parse_link_id(&id.to_string()).unwrap(), id);
        }
    }
}
