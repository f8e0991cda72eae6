//! Sigchain link verification.
//!
//! A sigchain is an append-only, hash-chained sequence of signed links for one
//! user or team. This module decodes both envelope formats, verifies each
//! link's hash and signature, enforces ordering against the previous link and
//! the Merkle tip, and caches links that verified.
//!
//! Entry point: [`ChainVerifier::verify_chain`].

pub mod cache;
pub mod error;
pub mod exceptions;
pub mod keys;
pub mod link;
pub mod link_type;
pub mod merkle;
pub mod outer_v2;
pub mod payload;
pub mod verify;

pub use cache::{CacheStats, LinkCache};
pub use error::{
    BadSignatureError, ChainErrorKind, ChainMismatchError, ChainVerificationError, DecodeError,
    FieldMismatchError, HashMismatchError, ImportError, StubNotAllowedError,
};
pub use exceptions::ExceptionTable;
pub use keys::{EmbeddedKeyResolver, KeyError, KeyResolver};
pub use link::{
    ChainContext, ChainLink, ComputedKeyInfo, FullRecord, ServerLinkRecord, StubRecord,
    VerificationState,
};
pub use link_type::{SeqType, SigchainV2Type, TeamRole};
pub use merkle::MerkleTriple;
pub use outer_v2::{OuterLinkV2, OuterLinkV2WithMetadata};
pub use payload::{unpack_payload, RevokeSection, UnpackedFields};
pub use verify::ChainVerifier;
