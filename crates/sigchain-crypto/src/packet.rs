//! Signature packet, the armored container carrying a link signature.
//!
//! A packet is a MessagePack map, base64-armored for transport:
//!
//! | Field            | Value                                   |
//! |------------------|-----------------------------------------|
//! | `body.detached`  | `false` (signed bytes ride in `payload`) |
//! | `body.hash_type` | `10`                                    |
//! | `body.key`       | signer KID bytes (35)                   |
//! | `body.payload`   | the signed bytes                        |
//! | `body.sig`       | Ed25519 signature (64)                  |
//! | `body.sig_type`  | `32` (Ed25519)                          |
//! | `tag`            | `514`                                   |
//! | `version`        | `1`                                     |
//!
//! The signature id of a packet is the SHA-256 of its decoded bytes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

use crate::{decode_base64, encode_base64, DecodeError, Kid, KidError, SigId};

/// Packet tag for signatures.
const TAG_SIGNATURE: u16 = 514;
/// Current packet version.
const PACKET_VERSION: u8 = 1;
/// Signature type for Ed25519.
const SIG_TYPE_ED25519: u8 = 32;
/// Hash type advertised by signers.
const HASH_TYPE: u8 = 10;
/// Maximum accepted packet size.
const MAX_PACKET_SIZE: usize = 1 << 20;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireBody {
    detached: bool,
    hash_type: u8,
    #[serde_as(as = "Bytes")]
    key: Vec<u8>,
    #[serde_as(as = "Bytes")]
    payload: Vec<u8>,
    #[serde_as(as = "Bytes")]
    sig: Vec<u8>,
    sig_type: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WirePacket {
    body: WireBody,
    tag: u16,
    version: u8,
}

/// A parsed and validated signature packet.
///
/// Construct via [`SigPacket::decode_armored`] / [`SigPacket::decode`] (from
/// the wire) or [`sign_packet`] (when producing links, e.g. in tests).
#[derive(Clone, PartialEq, Eq)]
pub struct SigPacket {
    kid: Kid,
    payload: Vec<u8>,
    signature: [u8; 64],
    raw: Vec<u8>,
}

/// Errors from packet parsing or construction.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("packet armor: {0}")]
    Armor(#[from] DecodeError),
    #[error("packet too large")]
    TooLarge,
    #[error("packet encoding: {0}")]
    Encoding(String),
    #[error("unsupported packet tag {0}")]
    UnsupportedTag(u16),
    #[error("unsupported packet version {0}")]
    UnsupportedVersion(u8),
    #[error("unsupported signature type {0} (only Ed25519 is accepted)")]
    UnsupportedSigType(u8),
    #[error("detached signatures are not accepted")]
    Detached,
    #[error("signature must be 64 bytes, got {0}")]
    BadSignatureLength(usize),
    #[error(transparent)]
    Kid(#[from] KidError),
}

impl SigPacket {
    /// Parse an armored (base64) packet.
    ///
    /// # Errors
    /// Returns an error if the armor, encoding or any header field is invalid.
    pub fn decode_armored(text: &str) -> Result<Self, PacketError> {
        Self::decode(decode_base64(text)?)
    }

    /// Parse raw packet bytes.
    ///
    /// # Errors
    /// Returns an error if the encoding or any header field is invalid.
    pub fn decode(raw: Vec<u8>) -> Result<Self, PacketError> {
        if raw.len() > MAX_PACKET_SIZE {
            return Err(PacketError::TooLarge);
        }
        let wire: WirePacket =
            rmp_serde::from_slice(&raw).map_err(|e| PacketError::Encoding(e.to_string()))?;

        if wire.tag != TAG_SIGNATURE {
            return Err(PacketError::UnsupportedTag(wire.tag));
        }
        if wire.version != PACKET_VERSION {
            return Err(PacketError::UnsupportedVersion(wire.version));
        }
        if wire.body.sig_type != SIG_TYPE_ED25519 {
            return Err(PacketError::UnsupportedSigType(wire.body.sig_type));
        }
        if wire.body.detached {
            return Err(PacketError::Detached);
        }

        let sig_len = wire.body.sig.len();
        let signature: [u8; 64] = wire
            .body
            .sig
            .try_into()
            .map_err(|_| PacketError::BadSignatureLength(sig_len))?;
        let kid = Kid::from_bytes(&wire.body.key)?;

        Ok(Self {
            kid,
            payload: wire.body.payload,
            signature,
            raw,
        })
    }

    /// The signer's key identifier.
    #[must_use]
    pub const fn kid(&self) -> &Kid {
        &self.kid
    }

    /// The signed bytes carried inside the packet.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub const fn signature(&self) -> &[u8; 64] {
        &self.signature
    }

    /// Signature id: SHA-256 of the decoded packet bytes.
    #[must_use]
    pub fn sig_id(&self) -> SigId {
        SigId::digest(&self.raw)
    }

    /// The raw packet bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Base64 armor for transport.
    #[must_use]
    pub fn to_armored(&self) -> String {
        encode_base64(&self.raw)
    }

    /// Verify the packet signature over its payload with `public_key`.
    ///
    /// # Errors
    /// Returns `VerifyError` if the key is invalid or the signature does not match.
    #[cfg(feature = "ed25519")]
    pub fn verify(&self, public_key: &[u8; 32]) -> Result<(), crate::VerifyError> {
        crate::verify_ed25519(public_key, &self.payload, &self.signature)
    }
}

impl fmt::Debug for SigPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigPacket")
            .field("kid", &self.kid)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// Sign `payload` with `signing_key` and wrap it in a packet.
///
/// # Errors
/// Returns `PacketError::Encoding` if MessagePack encoding fails.
#[cfg(feature = "ed25519")]
pub fn sign_packet(
    signing_key: &ed25519_dalek::SigningKey,
    payload: &[u8],
) -> Result<SigPacket, PacketError> {
    use ed25519_dalek::Signer;

    let signature = signing_key.sign(payload).to_bytes();
    let kid = Kid::from_ed25519(&signing_key.verifying_key().to_bytes());

    let wire = WirePacket {
        body: WireBody {
            detached: false,
            hash_type: HASH_TYPE,
            key: kid.as_bytes().to_vec(),
            payload: payload.to_vec(),
            sig: signature.to_vec(),
            sig_type: SIG_TYPE_ED25519,
        },
        tag: TAG_SIGNATURE,
        version: PACKET_VERSION,
    };
    let raw = rmp_serde::to_vec_named(&wire).map_err(|e| PacketError::Encoding(e.to_string()))?;

    Ok(SigPacket {
        kid,
        payload: payload.to_vec(),
        signature,
        raw,
    })
}

#[cfg(all(test, feature = "ed25519"))]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn test_key() -> SigningKey {
        SigningKey::from_bytes(&[3u8; 32])
    }

    fn encode(wire: &WirePacket) -> Vec<u8> {
        rmp_serde::to_vec_named(wire).expect("encode")
    }

    fn wire_for(payload: &[u8]) -> WirePacket {
        let packet = sign_packet(&test_key(), payload).expect("sign");
        rmp_serde::from_slice(packet.as_bytes()).expect("decode wire")
    }

    #[test]
    fn sign_and_decode_roundtrip() {
        let packet = sign_packet(&test_key(), b"payload").expect("sign");
        let parsed = SigPacket::decode_armored(&packet.to_armored()).expect("decode");

        assert_eq!(parsed, packet);
        assert_eq!(parsed.payload(), b"payload");
        assert_eq!(parsed.sig_id(), packet.sig_id());
        assert_eq!(
            parsed.kid(),
            &Kid::from_ed25519(&test_key().verifying_key().to_bytes())
        );
    }

    #[test]
    fn verify_accepts_signer_key() {
        let packet = sign_packet(&test_key(), b"payload").expect("sign");
        let public_key = packet.kid().ed25519_public_key();
        packet.verify(&public_key).expect("valid signature");
    }

    #[test]
    fn verify_rejects_other_key() {
        let packet = sign_packet(&test_key(), b"payload").expect("sign");
        let other = SigningKey::from_bytes(&[4u8; 32]).verifying_key().to_bytes();
        assert!(matches!(
            packet.verify(&other),
            Err(crate::VerifyError::SignatureMismatch)
        ));
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let mut wire = wire_for(b"payload");
        wire.body.payload = b"pAyload".to_vec();
        let packet = SigPacket::decode(encode(&wire)).expect("structurally valid");
        let public_key = packet.kid().ed25519_public_key();
        assert!(packet.verify(&public_key).is_err());
    }

    #[test]
    fn sig_id_depends_on_packet_bytes() {
        let a = sign_packet(&test_key(), b"one").expect("sign");
        let b = sign_packet(&test_key(), b"two").expect("sign");
        assert_ne!(a.sig_id(), b.sig_id());
    }

    #[test]
    fn decode_rejects_wrong_tag() {
        let mut wire = wire_for(b"payload");
        wire.tag = 515;
        assert!(matches!(
            SigPacket::decode(encode(&wire)),
            Err(PacketError::UnsupportedTag(515))
        ));
    }

    #[test]
    fn decode_rejects_detached() {
        let mut wire = wire_for(b"payload");
        wire.body.detached = true;
        assert!(matches!(
            SigPacket::decode(encode(&wire)),
            Err(PacketError::Detached)
        ));
    }

    #[test]
    fn decode_rejects_short_signature() {
        let mut wire = wire_for(b"payload");
        wire.body.sig.truncate(10);
        assert!(matches!(
            SigPacket::decode(encode(&wire)),
            Err(PacketError::BadSignatureLength(10))
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            SigPacket::decode(vec![0xc1, 0x00]),
            Err(PacketError::Encoding(_))
        ));
        assert!(matches!(
            SigPacket::decode_armored("%%%"),
            Err(PacketError::Armor(_))
        ));
    }
}
