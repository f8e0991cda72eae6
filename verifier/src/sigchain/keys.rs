//! Public key resolution for signature checks.

use ed25519_dalek::VerifyingKey;
use sigchain_crypto::Kid;

/// Errors from resolving a KID to a usable public key.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("unknown key {0}")]
    Unknown(Kid),
    #[error("key {0} is not a valid Ed25519 point")]
    InvalidPoint(Kid),
}

/// Key-management collaborator: turns a KID into the key that verifies it.
///
/// Implementations must be thread-safe; one resolver is shared by every
/// chain verified through a [`super::ChainVerifier`].
pub trait KeyResolver: Send + Sync {
    /// # Errors
    /// Returns `KeyError` if the key is unknown or unusable.
    fn resolve_public_key(&self, kid: &Kid) -> Result<VerifyingKey, KeyError>;
}

/// Resolves Ed25519 keys directly from the key material embedded in the KID.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedKeyResolver;

impl KeyResolver for EmbeddedKeyResolver {
    fn resolve_public_key(&self, kid: &Kid) -> Result<VerifyingKey, KeyError> {
        VerifyingKey::from_bytes(&kid.ed25519_public_key())
            .map_err(|_| KeyError::InvalidPoint(kid.clone()))
    }
}
