//! Key Identifier (KID): a validated, type-safe wrapper for key identifiers.
//!
//! An Ed25519 KID is `0x01 || 0x20 || pubkey[32] || 0x0a`, rendered as 70
//! lowercase hex characters. Unlike a digest-based identifier, the public key
//! can be recovered from the KID itself.

use std::fmt;
use std::str::FromStr;

/// A validated key identifier.
///
/// Construct via [`Kid::from_ed25519`] (from a public key),
/// [`Kid::from_bytes`] (from packet bytes) or [`Kid::from_str`] (from hex,
/// e.g. a payload field).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Kid([u8; KID_LEN]);

/// Error returned when bytes or a string are not a valid KID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid KID: {reason}")]
pub struct KidError {
    reason: &'static str,
}

/// Encoding version byte.
const KID_VERSION: u8 = 0x01;
/// Algorithm byte for Ed25519 signing keys.
const KID_TYPE_ED25519: u8 = 0x20;
/// Trailer byte closing every KID.
const KID_SUFFIX: u8 = 0x0a;
/// Total KID length in bytes.
const KID_LEN: usize = 35;

impl Kid {
    /// Build the KID for an Ed25519 public key.
    #[must_use]
    pub fn from_ed25519(public_key: &[u8; 32]) -> Self {
        let mut bytes = [0u8; KID_LEN];
        bytes[0] = KID_VERSION;
        bytes[1] = KID_TYPE_ED25519;
        bytes[2..34].copy_from_slice(public_key);
        bytes[34] = KID_SUFFIX;
        Self(bytes)
    }

    /// Validate raw KID bytes (as carried in a signature packet).
    ///
    /// # Errors
    /// Returns `KidError` if the length, version, key type or suffix is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KidError> {
        let bytes: [u8; KID_LEN] = bytes.try_into().map_err(|_| KidError {
            reason: "must be exactly 35 bytes",
        })?;
        Self::validate(&bytes)?;
        Ok(Self(bytes))
    }

    /// The Ed25519 public key embedded in this KID.
    #[must_use]
    pub fn ed25519_public_key(&self) -> [u8; 32] {
        let mut key = [0u8; 32];
        key.copy_from_slice(&self.0[2..34]);
        key
    }

    /// Return the raw KID bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KID_LEN] {
        &self.0
    }

    fn validate(bytes: &[u8; KID_LEN]) -> Result<(), KidError> {
        if bytes[0] != KID_VERSION {
            return Err(KidError {
                reason: "unsupported KID version",
            });
        }
        if bytes[1] != KID_TYPE_ED25519 {
            return Err(KidError {
                reason: "unsupported key type (only Ed25519 is accepted)",
            });
        }
        if bytes[KID_LEN - 1] != KID_SUFFIX {
            return Err(KidError {
                reason: "missing KID suffix byte",
            });
        }
        Ok(())
    }
}

impl FromStr for Kid {
    type Err = KidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != KID_LEN * 2 {
            return Err(KidError {
                reason: "must be exactly 70 hex characters",
            });
        }
        let bytes = hex::decode(s).map_err(|_| KidError {
            reason: "contains invalid characters (expected hex)",
        })?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for Kid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl serde::Serialize for Kid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Kid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_ed25519_has_expected_layout() {
        let kid = Kid::from_ed25519(&[7u8; 32]);
        let hex = kid.to_string();
        assert_eq!(hex.len(), 70);
        assert!(hex.starts_with("0120"));
        assert!(hex.ends_with("0a"));
    }

    #[test]
    fn public_key_is_recoverable() {
        let key = [9u8; 32];
        assert_eq!(Kid::from_ed25519(&key).ed25519_public_key(), key);
    }

    #[test]
    fn from_str_accepts_valid_kid() {
        let kid = Kid::from_ed25519(&[0u8; 32]);
        let parsed: Kid = kid.to_string().parse().expect("valid");
        assert_eq!(kid, parsed);
    }

    #[test]
    fn from_str_rejects_wrong_length() {
        assert!("0120".parse::<Kid>().is_err());
        assert!("a".repeat(71).parse::<Kid>().is_err());
    }

    #[test]
    fn from_str_rejects_invalid_chars() {
        let mut s = Kid::from_ed25519(&[1u8; 32]).to_string();
        s.replace_range(10..11, "z");
        assert!(s.parse::<Kid>().is_err());
    }

    #[test]
    fn from_bytes_rejects_pgp_key_type() {
        let mut bytes = *Kid::from_ed25519(&[1u8; 32]).as_bytes();
        bytes[1] = 0x11;
        let err = Kid::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("Ed25519"));
    }

    #[test]
    fn from_bytes_rejects_missing_suffix() {
        let mut bytes = *Kid::from_ed25519(&[1u8; 32]).as_bytes();
        bytes[34] = 0;
        assert!(Kid::from_bytes(&bytes).is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let kid = Kid::from_ed25519(&[42u8; 32]);
        let json = serde_json::to_string(&kid).expect("serialize");
        let parsed: Kid = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(kid, parsed);
    }
}
