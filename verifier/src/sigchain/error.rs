//! Error taxonomy for link and chain verification.
//!
//! Per-link failures are collected in [`ImportError`]; ordering and Merkle
//! failures in [`ChainMismatchError`]. [`ChainVerificationError`] wraps either
//! one with the position of the link that failed.

use sigchain_crypto::{Kid, LinkId, PacketError, SigId};

use super::link_type::{SigchainV2Type, TeamRole};

/// Malformed bytes or missing fields. Fatal to the link, never retried.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Encoding(#[from] sigchain_crypto::DecodeError),
    #[error("signature packet: {0}")]
    Packet(#[from] PacketError),
    #[error("malformed server record: {0}")]
    MalformedRecord(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("malformed outer link: {0}")]
    MalformedOuter(String),
    #[error("unknown link type {0}")]
    UnknownLinkType(u64),
    #[error("unknown link type string {0:?}")]
    UnknownLinkTypeName(String),
    #[error("unsupported link version {0}")]
    UnsupportedVersion(u64),
}

impl DecodeError {
    pub(crate) fn payload(err: impl std::fmt::Display) -> Self {
        Self::MalformedPayload(err.to_string())
    }

    pub(crate) fn record(err: impl std::fmt::Display) -> Self {
        Self::MalformedRecord(err.to_string())
    }
}

/// The recomputed digest of a link disagrees with the id it claims.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("hash mismatch: expected {expected}, computed {computed}")]
pub struct HashMismatchError {
    pub expected: LinkId,
    pub computed: LinkId,
}

/// Cryptographic failure. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum BadSignatureError {
    #[error("signature does not verify for key {kid}")]
    Mismatch { kid: Kid },
    #[error("signed bytes differ from the link payload")]
    PayloadMismatch,
    #[error("signer key {kid} is not the expected key")]
    WrongKey { kid: Kid },
    #[error("link carries no signature")]
    Missing,
    #[error("cannot resolve public key: {0}")]
    KeyResolution(#[from] super::keys::KeyError),
    #[error("signature verification requested before hash verification")]
    HashNotVerified,
}

/// A freshly built link does not match what was actually signed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldMismatchError {
    #[error("version mismatch: signed {signed}, built {built}")]
    Version { signed: u64, built: u64 },
    #[error("seqno mismatch: signed {signed}, built {built}")]
    Seqno { signed: u64, built: u64 },
    #[error("prev mismatch: signed {signed:?}, built {built:?}")]
    Prev {
        signed: Option<LinkId>,
        built: Option<LinkId>,
    },
    #[error("curr mismatch: signed {signed}, built {built}")]
    Curr { signed: LinkId, built: LinkId },
    #[error("link type mismatch: signed {signed:?}, built {built:?}")]
    LinkType {
        signed: SigchainV2Type,
        built: SigchainV2Type,
    },
}

/// A stub was presented where link-type policy requires full content.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stubbed {link_type:?} link not allowed for role {role:?}")]
pub struct StubNotAllowedError {
    pub link_type: SigchainV2Type,
    /// `None` on a user (non-team) chain.
    pub role: Option<TeamRole>,
}

/// Everything that can go wrong turning raw bytes into one verified link.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    HashMismatch(#[from] HashMismatchError),
    #[error(transparent)]
    BadSignature(#[from] BadSignatureError),
    #[error(transparent)]
    FieldMismatch(#[from] FieldMismatchError),
    #[error(transparent)]
    StubNotAllowed(#[from] StubNotAllowedError),
    #[error("kid mismatch: server asserted {server}, payload asserted {payload}")]
    KidMismatch { server: Kid, payload: Kid },
    #[error("fingerprint mismatch: server asserted {server:?}, payload asserted {payload:?}")]
    FingerprintMismatch {
        server: Option<String>,
        payload: Option<String>,
    },
    #[error("ctime mismatch: server asserted {server}, payload asserted {payload}")]
    CtimeMismatch { server: i64, payload: i64 },
    #[error("seqno mismatch: server asserted {server}, payload asserted {payload}")]
    SeqnoMismatch { server: u64, payload: u64 },
    #[error("sig id mismatch: server asserted {server}, computed {computed}")]
    SigIdMismatch { server: SigId, computed: SigId },
}

impl From<sigchain_crypto::DecodeError> for ImportError {
    fn from(err: sigchain_crypto::DecodeError) -> Self {
        Self::Decode(err.into())
    }
}

/// Ordering or Merkle inconsistency: the chain was forked, rolled back or
/// truncated. Aborts loading the whole chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainMismatchError {
    #[error("seqno out of order: expected {expected}, got {actual}")]
    SeqnoGap { expected: u64, actual: u64 },
    #[error("prev mismatch at seqno {seqno}: expected {expected:?}, got {actual:?}")]
    PrevMismatch {
        seqno: u64,
        expected: Option<LinkId>,
        actual: Option<LinkId>,
    },
    #[error("merkle leaf at seqno {seqno} commits to {merkle}, chain has {chain}")]
    MerkleLinkMismatch {
        seqno: u64,
        merkle: LinkId,
        chain: LinkId,
    },
    #[error("merkle leaf at seqno {seqno} commits to sig {merkle}, chain has {chain:?}")]
    MerkleSigMismatch {
        seqno: u64,
        merkle: SigId,
        chain: Option<SigId>,
    },
    #[error("chain truncated: merkle leaf at seqno {merkle_seqno}, chain ends at {chain_tip}")]
    Truncated { merkle_seqno: u64, chain_tip: u64 },
    #[error("link at seqno {seqno} is past the merkle tip {merkle_seqno}")]
    PastMerkleTip { seqno: u64, merkle_seqno: u64 },
}

/// What went wrong, for [`ChainVerificationError`].
#[derive(Debug, thiserror::Error)]
pub enum ChainErrorKind {
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    ChainMismatch(#[from] ChainMismatchError),
}

/// First fatal error met while verifying a chain, with the failing position.
#[derive(Debug, thiserror::Error)]
#[error("chain verification failed at seqno {seqno:?} (link {link_id:?}): {kind}")]
pub struct ChainVerificationError {
    /// Position of the failing link, when it could be determined.
    pub seqno: Option<u64>,
    pub link_id: Option<LinkId>,
    pub kind: ChainErrorKind,
}

impl ChainVerificationError {
    pub(crate) fn new(
        seqno: Option<u64>,
        link_id: Option<LinkId>,
        kind: impl Into<ChainErrorKind>,
    ) -> Self {
        Self {
            seqno,
            link_id,
            kind: kind.into(),
        }
    }

    /// True for ordering / Merkle failures (fork, rollback, truncation).
    #[must_use]
    pub const fn is_chain_mismatch(&self) -> bool {
        matches!(self.kind, ChainErrorKind::ChainMismatch(_))
    }
}
