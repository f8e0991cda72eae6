//! Content-addressed identifiers for links and signatures.

use std::fmt;
use std::str::FromStr;

use crate::{decode_hex_array, DecodeError, Digest, Sha256};

/// Length of every digest-based identifier in bytes.
pub const DIGEST_LEN: usize = 32;

/// Suffix appended to the hex form of a signature id.
const SIG_ID_SUFFIX: &str = "0f";

/// SHA-256 digest of a link's canonical bytes.
///
/// These are public identifiers, so equality is an ordinary byte comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId([u8; DIGEST_LEN]);

/// Identifier of a signature: SHA-256 of the decoded signature packet.
///
/// Rendered as 64 hex characters followed by `0f`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SigId([u8; DIGEST_LEN]);

/// Compute the link id of raw canonical bytes.
#[must_use]
pub fn compute_link_id(raw: &[u8]) -> LinkId {
    LinkId::digest(raw)
}

/// Parse a hex-encoded link id.
///
/// # Errors
/// Returns `DecodeError::BadHex` on malformed hex and `DecodeError::BadLength`
/// when the decoded bytes are not exactly [`DIGEST_LEN`] long.
pub fn parse_link_id(hex: &str) -> Result<LinkId, DecodeError> {
    hex.parse()
}

/// Compare a link's `prev` pointer with the id it should reference.
///
/// Two absent ids match (a genesis link has no predecessor); an absent id
/// never matches a present one.
#[must_use]
pub fn prev_matches(prev: Option<&LinkId>, expected: Option<&LinkId>) -> bool {
    match (prev, expected) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

impl LinkId {
    /// Hash `raw` into a link id.
    #[must_use]
    pub fn digest(raw: &[u8]) -> Self {
        Self(Sha256::digest(raw).into())
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl SigId {
    /// Hash the decoded bytes of a signature packet into its id.
    #[must_use]
    pub fn digest(packet: &[u8]) -> Self {
        Self(Sha256::digest(packet).into())
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl FromStr for LinkId {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_hex_array(s).map(Self)
    }
}

impl FromStr for SigId {
    type Err = DecodeError;

    /// Accepts the suffixed 66-character form or the bare 64-character digest.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != DIGEST_LEN * 2 + SIG_ID_SUFFIX.len() {
            return decode_hex_array(s).map(Self);
        }
        let split = DIGEST_LEN * 2;
        let (Some(digest), Some(suffix)) = (s.get(..split), s.get(split..)) else {
            return decode_hex_array(s).map(Self);
        };
        if suffix != SIG_ID_SUFFIX {
            return Err(DecodeError::BadSuffix {
                expected: SIG_ID_SUFFIX,
                actual: suffix.to_string(),
            });
        }
        decode_hex_array(digest).map(Self)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Display for SigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SIG_ID_SUFFIX}", hex::encode(self.0))
    }
}

macro_rules! hex_serde {
    ($ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_serde!(LinkId);
hex_serde!(SigId);
