//! V2 outer link, the compact binary envelope.
//!
//! Encoded as a 7-element MessagePack array:
//!
//! | Index | Field                   | Encoding        |
//! |-------|-------------------------|-----------------|
//! | 0     | version (2)             | int             |
//! | 1     | seqno                   | int             |
//! | 2     | prev                    | bin(32) or nil  |
//! | 3     | curr                    | bin(32)         |
//! | 4     | link type               | int             |
//! | 5     | seq type                | int             |
//! | 6     | ignore if unsupported   | bool            |
//!
//! `curr` commits to the inner JSON payload; the link id is the digest of the
//! encoded outer bytes, so a stub (outer bytes only) still chains.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sigchain_crypto::{decode_base64, encode_base64, Kid, LinkId, SigId, SigPacket};

use super::error::{BadSignatureError, DecodeError, FieldMismatchError};
use super::keys::KeyResolver;
use super::link_type::{SeqType, SigchainV2Type};

/// The only outer link version.
pub const OUTER_VERSION: u64 = 2;

#[serde_as]
#[derive(Serialize, Deserialize)]
struct WireOuter(
    u64,
    u64,
    #[serde_as(as = "Option<Bytes>", no_default)] Option<[u8; 32]>,
    #[serde_as(as = "Bytes")] [u8; 32],
    u64,
    u8,
    bool,
);

/// Structural fields of a V2 link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OuterLinkV2 {
    pub version: u64,
    pub seqno: u64,
    pub prev: Option<LinkId>,
    pub curr: LinkId,
    pub link_type: SigchainV2Type,
    pub seq_type: SeqType,
    pub ignore_if_unsupported: bool,
}

/// A decoded outer link plus what decoding recovered around it.
#[derive(Debug, Clone)]
pub struct OuterLinkV2WithMetadata {
    pub outer: OuterLinkV2,
    /// The encoded outer bytes exactly as received.
    pub raw: Vec<u8>,
    /// Signer recovered from the signature packet; `None` for stubs.
    pub kid: Option<Kid>,
    pub sig_id: Option<SigId>,
    packet: Option<SigPacket>,
}

impl OuterLinkV2 {
    /// Build a fresh outer link committing to `inner_payload`.
    #[must_use]
    pub fn new(
        seqno: u64,
        prev: Option<LinkId>,
        inner_payload: &[u8],
        link_type: SigchainV2Type,
        seq_type: SeqType,
    ) -> Self {
        Self {
            version: OUTER_VERSION,
            seqno,
            prev,
            curr: LinkId::digest(inner_payload),
            link_type,
            seq_type,
            ignore_if_unsupported: false,
        }
    }

    /// Encode to the wire form.
    ///
    /// # Errors
    /// Returns `DecodeError::MalformedOuter` if MessagePack encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        let wire = WireOuter(
            self.version,
            self.seqno,
            self.prev.map(|p| *p.as_bytes()),
            *self.curr.as_bytes(),
            self.link_type.wire_value(),
            self.seq_type.wire_value(),
            self.ignore_if_unsupported,
        );
        rmp_serde::to_vec(&wire).map_err(|e| DecodeError::MalformedOuter(e.to_string()))
    }

    /// Decode the wire form.
    ///
    /// Only canonical encodings are accepted: the bytes must re-encode to
    /// themselves, so the link id of a decoded link is stable.
    ///
    /// # Errors
    /// Returns `DecodeError` on malformed or non-canonical bytes, an
    /// unsupported version or an unknown link type.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireOuter =
            rmp_serde::from_slice(raw).map_err(|e| DecodeError::MalformedOuter(e.to_string()))?;
        let WireOuter(version, seqno, prev, curr, link_type, seq_type, ignore_if_unsupported) =
            wire;

        if version != OUTER_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        if seqno == 0 {
            return Err(DecodeError::MalformedOuter("seqno must be >= 1".into()));
        }

        let outer = Self {
            version,
            seqno,
            prev: prev.map(LinkId::from_bytes),
            curr: LinkId::from_bytes(curr),
            link_type: SigchainV2Type::try_from(link_type)?,
            seq_type: SeqType::try_from(seq_type)?,
            ignore_if_unsupported,
        };
        if outer.encode()? != raw {
            return Err(DecodeError::MalformedOuter("non-canonical encoding".into()));
        }
        Ok(outer)
    }

    /// Strict field-by-field comparison against a link rebuilt from its
    /// payload.
    ///
    /// # Errors
    /// Returns the first `FieldMismatchError` found.
    pub fn assert_fields(
        &self,
        version: u64,
        seqno: u64,
        prev: Option<&LinkId>,
        curr: &LinkId,
        link_type: SigchainV2Type,
    ) -> Result<(), FieldMismatchError> {
        if self.version != version {
            return Err(FieldMismatchError::Version {
                signed: self.version,
                built: version,
            });
        }
        if self.seqno != seqno {
            return Err(FieldMismatchError::Seqno {
                signed: self.seqno,
                built: seqno,
            });
        }
        if self.prev.as_ref() != prev {
            return Err(FieldMismatchError::Prev {
                signed: self.prev,
                built: prev.copied(),
            });
        }
        if &self.curr != curr {
            return Err(FieldMismatchError::Curr {
                signed: self.curr,
                built: *curr,
            });
        }
        if self.link_type != link_type {
            return Err(FieldMismatchError::LinkType {
                signed: self.link_type,
                built: link_type,
            });
        }
        Ok(())
    }
}

/// Decode an armored signature whose payload is an outer link.
///
/// # Errors
/// Returns `DecodeError` if the packet or the outer link inside it is malformed.
pub fn decode_armored(text: &str) -> Result<OuterLinkV2WithMetadata, DecodeError> {
    let packet = SigPacket::decode_armored(text)?;
    let raw = packet.payload().to_vec();
    let outer = OuterLinkV2::decode(&raw)?;
    Ok(OuterLinkV2WithMetadata {
        outer,
        raw,
        kid: Some(packet.kid().clone()),
        sig_id: Some(packet.sig_id()),
        packet: Some(packet),
    })
}

/// Decode a stub: a base64 outer link whose payload was elided.
///
/// No signature travels with a stub, so none is checked.
///
/// # Errors
/// Returns `DecodeError` if the base64 or the outer link is malformed.
pub fn decode_stubbed(text: &str) -> Result<OuterLinkV2WithMetadata, DecodeError> {
    let raw = decode_base64(text)?;
    let outer = OuterLinkV2::decode(&raw)?;
    Ok(OuterLinkV2WithMetadata {
        outer,
        raw,
        kid: None,
        sig_id: None,
        packet: None,
    })
}

impl OuterLinkV2WithMetadata {
    /// Link id: digest of the outer bytes actually present.
    #[must_use]
    pub fn link_id(&self) -> LinkId {
        LinkId::digest(&self.raw)
    }

    #[must_use]
    pub const fn is_stubbed(&self) -> bool {
        self.packet.is_none()
    }

    /// Base64 stub form of this link.
    #[must_use]
    pub fn to_stub(&self) -> String {
        encode_base64(&self.raw)
    }

    /// Verify the signature over the outer bytes with the key behind the
    /// recovered KID. Returns that KID.
    ///
    /// # Errors
    /// `BadSignatureError::Missing` for a stub, `KeyResolution` if the key
    /// cannot be resolved, `Mismatch` if the signature does not verify.
    pub fn verify(&self, keys: &dyn KeyResolver) -> Result<Kid, BadSignatureError> {
        let packet = self.packet.as_ref().ok_or(BadSignatureError::Missing)?;
        if packet.payload() != self.raw.as_slice() {
            return Err(BadSignatureError::PayloadMismatch);
        }
        let kid = packet.kid().clone();
        let key = keys.resolve_public_key(&kid)?;
        packet
            .verify(&key.to_bytes())
            .map_err(|_| BadSignatureError::Mismatch { kid: kid.clone() })?;
        Ok(kid)
    }
}
