//! One chain link and its verification lifecycle.
//!
//! A link moves through `Unpacked → HashVerified → PayloadVerified →
//! ChainVerified`. Transitions only go forward; each verification step
//! returns immediately once the link is already past it. Revocation is an
//! overlay flag set after a later link in the same chain retires this one.
//!
//! Two entry points exist and they stay separate:
//! - [`ChainLink::from_server_bytes`] runs every check.
//! - [`ChainLink::from_trusted_storage`] trusts the persisted `sig_verified`
//!   marker and skips hash and signature checks.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigchain_crypto::{decode_base64, Kid, LinkId, SigId, SigPacket};
use tracing::{debug, warn};

use super::error::{
    BadSignatureError, ChainMismatchError, DecodeError, FieldMismatchError, HashMismatchError,
    ImportError, StubNotAllowedError,
};
use super::exceptions::{whitespace_fixed, ExceptionTable};
use super::keys::KeyResolver;
use super::link_type::{SigchainV2Type, TeamRole};
use super::merkle::MerkleTriple;
use super::outer_v2::{self, OuterLinkV2, OuterLinkV2WithMetadata};
use super::payload::{unpack_payload, RevokeSection, UnpackedFields};

/// How far a link has been verified. Ordered; only ever advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VerificationState {
    Unpacked,
    HashVerified,
    PayloadVerified,
    ChainVerified,
}

/// A full link as served: payload, armored signature and server metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullRecord {
    pub seqno: u64,
    /// Link id the server asserts.
    pub payload_hash: LinkId,
    pub sig_id: SigId,
    pub kid: Kid,
    pub ctime: i64,
    /// 1 for JSON links, 2 for outer-link envelopes.
    pub sig_version: u64,
    /// Armored signature packet.
    pub sig: String,
    pub payload_json: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// A V2 link with its payload elided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubRecord {
    /// Base64 outer link.
    pub s2: String,
}

/// One element of the raw link list a server returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ServerLinkRecord {
    Full(FullRecord),
    Stub(StubRecord),
}

impl ServerLinkRecord {
    /// Parse one server record.
    ///
    /// # Errors
    /// Returns `DecodeError::MalformedRecord` if the JSON is invalid or lacks
    /// required fields.
    pub fn parse(raw: &[u8]) -> Result<Self, DecodeError> {
        let value: serde_json::Value = serde_json::from_slice(raw).map_err(DecodeError::record)?;
        Self::from_value(value)
    }

    /// The link id this record claims, before any verification: the
    /// server's `payload_hash`, or the digest of a stub's outer bytes.
    ///
    /// # Errors
    /// Returns `DecodeError` if a stub's base64 is malformed.
    pub fn asserted_id(&self) -> Result<LinkId, DecodeError> {
        match self {
            Self::Full(full) => Ok(full.payload_hash),
            Self::Stub(stub) => Ok(LinkId::digest(&decode_base64(&stub.s2)?)),
        }
    }

    #[must_use]
    pub const fn is_stub(&self) -> bool {
        matches!(self, Self::Stub(_))
    }

    fn from_value(value: serde_json::Value) -> Result<Self, DecodeError> {
        if value.get("s2").is_some() {
            serde_json::from_value(value)
                .map(Self::Stub)
                .map_err(DecodeError::record)
        } else {
            serde_json::from_value(value)
                .map(Self::Full)
                .map_err(DecodeError::record)
        }
    }
}

/// Signer key material recorded when a signature verifies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedKeyInfo {
    pub kid: Kid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eldest_kid: Option<Kid>,
    /// `ctime` of the link the key signed.
    pub signed_at: i64,
}

#[derive(Serialize, Deserialize)]
struct StoredLink<R> {
    record: R,
    sig_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_info: Option<ComputedKeyInfo>,
}

/// What a link needs to verify: the chain it belongs to.
#[derive(Clone, Copy)]
pub struct ChainContext<'a> {
    pub keys: &'a dyn KeyResolver,
    pub exceptions: &'a ExceptionTable,
    /// Reader's role for team chains; `None` for user chains.
    pub role: Option<TeamRole>,
}

#[derive(Debug, Clone)]
enum Envelope {
    V1 { packet: SigPacket },
    V2 { outer: OuterLinkV2WithMetadata },
    Stub { outer: OuterLinkV2WithMetadata },
}

/// One link of a sigchain and how far it has been verified.
#[derive(Debug, Clone)]
pub struct ChainLink {
    id: LinkId,
    seqno: u64,
    prev: Option<LinkId>,
    link_type: SigchainV2Type,
    record: ServerLinkRecord,
    envelope: Envelope,
    /// `None` for stubs.
    fields: Option<UnpackedFields>,
    /// Computed from the signature packet; `None` for stubs.
    sig_id: Option<SigId>,
    state: VerificationState,
    whitespace_fixed: bool,
    revoked: bool,
    key_info: Option<ComputedKeyInfo>,
}

impl ChainLink {
    /// Import a link fetched from the server, running every check: schema,
    /// hash (with known exceptions), signature, V2 replay and server metadata.
    ///
    /// # Errors
    /// Returns the first `ImportError` met.
    pub fn from_server_bytes(ctx: &ChainContext<'_>, raw: &[u8]) -> Result<Self, ImportError> {
        Self::from_server_record(ctx, ServerLinkRecord::parse(raw)?)
    }

    /// [`ChainLink::from_server_bytes`] for an already parsed record.
    ///
    /// # Errors
    /// Returns the first `ImportError` met.
    pub fn from_server_record(
        ctx: &ChainContext<'_>,
        record: ServerLinkRecord,
    ) -> Result<Self, ImportError> {
        let mut link = Self::unpack(record)?;

        if link.is_stubbed() {
            link.check_stub_policy(ctx.role)?;
            link.verify_hash(ctx.exceptions)?;
            link.advance(VerificationState::PayloadVerified);
            debug!(seqno = link.seqno, link_type = %link.link_type, "accepted stubbed link");
            return Ok(link);
        }

        link.check_inner_payload()?;
        link.verify_hash(ctx.exceptions)?;
        link.verify_signature(ctx.keys)?;
        link.check_server_metadata()?;
        Ok(link)
    }

    /// Load a link persisted with [`ChainLink::to_storage_bytes`].
    ///
    /// When the stored form carries `sig_verified`, hash and signature checks
    /// are skipped and the stored key info is restored. Otherwise the link is
    /// returned `Unpacked`, to be verified by the caller.
    ///
    /// # Errors
    /// Returns `ImportError::Decode` if the stored form is malformed.
    pub fn from_trusted_storage(raw: &[u8]) -> Result<Self, ImportError> {
        let stored: StoredLink<serde_json::Value> =
            serde_json::from_slice(raw).map_err(DecodeError::record)?;
        let mut link = Self::unpack(ServerLinkRecord::from_value(stored.record)?)?;
        if stored.sig_verified {
            debug!(seqno = link.seqno, "trusting stored verification");
            link.key_info = stored.key_info;
            link.advance(VerificationState::PayloadVerified);
        }
        Ok(link)
    }

    /// Stored form: the server record plus the verification marker.
    ///
    /// # Errors
    /// Returns an error if JSON serialization fails.
    pub fn to_storage_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&StoredLink {
            record: &self.record,
            sig_verified: self.state >= VerificationState::PayloadVerified,
            key_info: self.key_info.clone(),
        })
    }

    fn unpack(record: ServerLinkRecord) -> Result<Self, DecodeError> {
        let (id, envelope, fields) = match &record {
            ServerLinkRecord::Stub(stub) => {
                let outer = outer_v2::decode_stubbed(&stub.s2)?;
                (outer.link_id(), Envelope::Stub { outer }, None)
            }
            ServerLinkRecord::Full(full) => {
                let payload = full.payload_json.as_bytes();
                match full.sig_version {
                    1 => {
                        let packet = SigPacket::decode_armored(&full.sig)?;
                        let fields = unpack_payload(payload, 1)?;
                        (full.payload_hash, Envelope::V1 { packet }, Some(fields))
                    }
                    2 => {
                        let outer = outer_v2::decode_armored(&full.sig)?;
                        let fields = unpack_payload(payload, 2)?;
                        (full.payload_hash, Envelope::V2 { outer }, Some(fields))
                    }
                    other => return Err(DecodeError::UnsupportedVersion(other)),
                }
            }
        };

        let (seqno, prev, link_type, sig_id) = match (&envelope, &fields) {
            (Envelope::V1 { packet }, Some(fields)) => (
                fields.seqno,
                fields.prev,
                fields.link_type,
                Some(packet.sig_id()),
            ),
            (Envelope::V2 { outer } | Envelope::Stub { outer }, _) => (
                outer.outer.seqno,
                outer.outer.prev,
                outer.outer.link_type,
                outer.sig_id,
            ),
            (Envelope::V1 { .. }, None) => {
                return Err(DecodeError::MalformedPayload("missing payload".into()))
            }
        };

        Ok(Self {
            id,
            seqno,
            prev,
            link_type,
            record,
            envelope,
            fields,
            sig_id,
            state: VerificationState::Unpacked,
            whitespace_fixed: false,
            revoked: false,
            key_info: None,
        })
    }

    /// Recompute the link id and compare it with the asserted one.
    ///
    /// Links listed in the exception table get the whitespace fixup before
    /// hashing, or are accepted despite a mismatch.
    ///
    /// # Errors
    /// Returns `HashMismatchError` if the digests differ and no exception applies.
    pub fn verify_hash(&mut self, exceptions: &ExceptionTable) -> Result<(), HashMismatchError> {
        if self.state >= VerificationState::HashVerified {
            return Ok(());
        }

        let computed = match &self.envelope {
            Envelope::V1 { .. } => {
                self.whitespace_fixed = self
                    .sig_id
                    .as_ref()
                    .is_some_and(|sig_id| exceptions.needs_whitespace_fix(sig_id));
                LinkId::digest(&self.signed_payload())
            }
            Envelope::V2 { outer } | Envelope::Stub { outer } => outer.link_id(),
        };

        if computed != self.id {
            let reason = self
                .sig_id
                .as_ref()
                .and_then(|sig_id| exceptions.is_bad_link(sig_id));
            match reason {
                Some(reason) => {
                    warn!(
                        seqno = self.seqno,
                        link_id = %self.id,
                        reason,
                        "accepting link with known bad hash"
                    );
                }
                None => {
                    return Err(HashMismatchError {
                        expected: self.id,
                        computed,
                    })
                }
            }
        }

        self.advance(VerificationState::HashVerified);
        Ok(())
    }

    /// Verify the signature with the key behind the signer's KID and record
    /// the signer's key info. Returns the link's signature id.
    ///
    /// # Errors
    /// `HashNotVerified` if called before [`ChainLink::verify_hash`],
    /// `Missing` for stubs, and any other `BadSignatureError` when the
    /// signature does not check out.
    pub fn verify_signature(&mut self, keys: &dyn KeyResolver) -> Result<SigId, BadSignatureError> {
        let sig_id = self.sig_id.ok_or(BadSignatureError::Missing)?;
        if self.state >= VerificationState::PayloadVerified {
            return Ok(sig_id);
        }
        if self.state < VerificationState::HashVerified {
            return Err(BadSignatureError::HashNotVerified);
        }

        let asserted = self.fields.as_ref().map(|f| &f.kid);
        let kid = match &self.envelope {
            Envelope::V1 { packet } => {
                if packet.payload() != self.signed_payload().as_ref() {
                    return Err(BadSignatureError::PayloadMismatch);
                }
                let kid = packet.kid().clone();
                if asserted.is_some_and(|a| a != &kid) {
                    return Err(BadSignatureError::WrongKey { kid });
                }
                let key = keys.resolve_public_key(&kid)?;
                packet
                    .verify(&key.to_bytes())
                    .map_err(|_| BadSignatureError::Mismatch { kid: kid.clone() })?;
                kid
            }
            Envelope::V2 { outer } => {
                if let (Some(signer), Some(asserted)) = (&outer.kid, asserted) {
                    if signer != asserted {
                        return Err(BadSignatureError::WrongKey {
                            kid: signer.clone(),
                        });
                    }
                }
                outer.verify(keys)?
            }
            Envelope::Stub { .. } => return Err(BadSignatureError::Missing),
        };

        self.key_info = Some(ComputedKeyInfo {
            kid,
            eldest_kid: self.fields.as_ref().and_then(|f| f.eldest_kid.clone()),
            signed_at: self.fields.as_ref().map_or(0, |f| f.ctime),
        });
        self.advance(VerificationState::PayloadVerified);
        Ok(sig_id)
    }

    /// Compare a full V2 link's inner payload with the outer link that was
    /// actually signed.
    ///
    /// # Errors
    /// Returns the first `FieldMismatchError`.
    pub fn check_inner_payload(&self) -> Result<(), FieldMismatchError> {
        let (Envelope::V2 { outer }, Some(fields), ServerLinkRecord::Full(full)) =
            (&self.envelope, &self.fields, &self.record)
        else {
            return Ok(());
        };
        outer.outer.assert_fields(
            fields.version,
            fields.seqno,
            fields.prev.as_ref(),
            &LinkId::digest(full.payload_json.as_bytes()),
            fields.link_type,
        )
    }

    /// Compare what the server asserted about a link with what the signed
    /// payload says.
    ///
    /// # Errors
    /// Returns `KidMismatch`, `FingerprintMismatch`, `CtimeMismatch`,
    /// `SeqnoMismatch` or `SigIdMismatch` on the first disagreement.
    pub fn check_server_metadata(&self) -> Result<(), ImportError> {
        let (ServerLinkRecord::Full(server), Some(fields)) = (&self.record, &self.fields) else {
            return Ok(());
        };

        if server.kid != fields.kid {
            return Err(ImportError::KidMismatch {
                server: server.kid.clone(),
                payload: fields.kid.clone(),
            });
        }
        if let Some(fingerprint) = &server.fingerprint {
            let matches = fields
                .fingerprint
                .as_ref()
                .is_some_and(|f| f.eq_ignore_ascii_case(fingerprint));
            if !matches {
                return Err(ImportError::FingerprintMismatch {
                    server: Some(fingerprint.clone()),
                    payload: fields.fingerprint.clone(),
                });
            }
        }
        if server.ctime != fields.ctime {
            return Err(ImportError::CtimeMismatch {
                server: server.ctime,
                payload: fields.ctime,
            });
        }
        if server.seqno != self.seqno {
            return Err(ImportError::SeqnoMismatch {
                server: server.seqno,
                payload: self.seqno,
            });
        }
        if let Some(computed) = self.sig_id {
            if server.sig_id != computed {
                return Err(ImportError::SigIdMismatch {
                    server: server.sig_id,
                    computed,
                });
            }
        }
        Ok(())
    }

    /// Bytes the signer signed: the payload, with the whitespace fixup
    /// applied when the exception table called for it.
    fn signed_payload(&self) -> Cow<'_, [u8]> {
        let payload = match &self.record {
            ServerLinkRecord::Full(full) => full.payload_json.as_bytes(),
            ServerLinkRecord::Stub(_) => &[],
        };
        if self.whitespace_fixed {
            Cow::Owned(whitespace_fixed(payload))
        } else {
            Cow::Borrowed(payload)
        }
    }

    pub(crate) fn check_stub_policy(
        &self,
        role: Option<TeamRole>,
    ) -> Result<(), StubNotAllowedError> {
        let allowed = if self.link_type.is_team_type() {
            self.link_type
                .team_allow_stub(role.unwrap_or(TeamRole::None))
        } else {
            self.link_type.user_allow_stub()
        };
        if allowed {
            Ok(())
        } else {
            Err(StubNotAllowedError {
                link_type: self.link_type,
                role,
            })
        }
    }

    /// Check this link against the Merkle tip, when the tip is this link.
    ///
    /// # Errors
    /// Returns `MerkleLinkMismatch` or `MerkleSigMismatch` when the tip has
    /// this seqno but commits to a different link.
    pub fn cross_check_merkle(
        &self,
        triple: Option<&MerkleTriple>,
    ) -> Result<(), ChainMismatchError> {
        let Some(triple) = triple.filter(|t| t.seqno == self.seqno) else {
            return Ok(());
        };
        if triple.link_id != self.id {
            return Err(ChainMismatchError::MerkleLinkMismatch {
                seqno: self.seqno,
                merkle: triple.link_id,
                chain: self.id,
            });
        }
        if let (Some(merkle), Some(chain)) = (triple.sig_id, self.sig_id) {
            if merkle != chain {
                return Err(ChainMismatchError::MerkleSigMismatch {
                    seqno: self.seqno,
                    merkle,
                    chain: Some(chain),
                });
            }
        }
        Ok(())
    }

    /// This link's `(seqno, id, sig id)`.
    #[must_use]
    pub const fn to_merkle_triple(&self) -> MerkleTriple {
        MerkleTriple::new(self.seqno, self.id, self.sig_id)
    }

    /// Whether the link's expiration time is at or before `now`. Stubs carry
    /// no expiration.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.fields
            .as_ref()
            .is_some_and(|f| f.etime <= now.timestamp())
    }

    pub(crate) fn mark_chain_verified(&mut self) {
        if self.state >= VerificationState::PayloadVerified {
            self.advance(VerificationState::ChainVerified);
        }
    }

    pub(crate) fn mark_revoked(&mut self) {
        self.revoked = true;
    }

    fn advance(&mut self, to: VerificationState) {
        if to > self.state {
            self.state = to;
        }
    }

    #[must_use]
    pub const fn id(&self) -> LinkId {
        self.id
    }

    #[must_use]
    pub const fn seqno(&self) -> u64 {
        self.seqno
    }

    #[must_use]
    pub const fn prev(&self) -> Option<LinkId> {
        self.prev
    }

    #[must_use]
    pub const fn link_type(&self) -> SigchainV2Type {
        self.link_type
    }

    #[must_use]
    pub const fn sig_id(&self) -> Option<SigId> {
        self.sig_id
    }

    #[must_use]
    pub const fn state(&self) -> VerificationState {
        self.state
    }

    #[must_use]
    pub const fn is_revoked(&self) -> bool {
        self.revoked
    }

    #[must_use]
    pub const fn is_stubbed(&self) -> bool {
        matches!(self.envelope, Envelope::Stub { .. })
    }

    /// Payload fields; `None` for stubs.
    #[must_use]
    pub const fn fields(&self) -> Option<&UnpackedFields> {
        self.fields.as_ref()
    }

    /// The signing KID the payload asserts.
    #[must_use]
    pub fn kid(&self) -> Option<&Kid> {
        self.fields.as_ref().map(|f| &f.kid)
    }

    #[must_use]
    pub fn revoke_section(&self) -> Option<&RevokeSection> {
        self.fields.as_ref().and_then(|f| f.revoke.as_ref())
    }

    /// The outer link, for V2 links and stubs.
    #[must_use]
    pub const fn outer(&self) -> Option<&OuterLinkV2> {
        match &self.envelope {
            Envelope::V2 { outer } | Envelope::Stub { outer } => Some(&outer.outer),
            Envelope::V1 { .. } => None,
        }
    }

    #[must_use]
    pub const fn key_info(&self) -> Option<&ComputedKeyInfo> {
        self.key_info.as_ref()
    }

    #[must_use]
    pub const fn record(&self) -> &ServerLinkRecord {
        &self.record
    }
}
