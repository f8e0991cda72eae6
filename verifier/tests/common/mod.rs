//! Common test utilities for integration tests.
//!
//! This module provides:
//!
//! - [`verifier`] / [`counting_verifier`] - verifiers with an empty exception
//!   table and a fresh link cache
//! - [`to_raw`] - serialize fixture records into the raw bytes a server returns
//! - [`team_chain`] - a three-link team chain, full or as a reader sees it
//!
//! Records themselves are built with `sigchain_verifier::testing::ChainFixture`
//! (behind the `test-utils` feature).

#![allow(dead_code)]

use std::sync::Arc;

use serde::Serialize;
use sigchain_crypto::LinkId;
use sigchain_verifier::sigchain::{
    ChainVerifier, EmbeddedKeyResolver, ExceptionTable, LinkCache, SigchainV2Type,
};
use sigchain_verifier::testing::{ChainFixture, CountingResolver};

/// Verifier with no known exceptions and its own cache.
pub fn verifier() -> ChainVerifier {
    ChainVerifier::new(Arc::new(LinkCache::default()), Arc::new(EmbeddedKeyResolver))
        .with_exceptions(ExceptionTable::empty())
}

/// Verifier whose key lookups are counted.
pub fn counting_verifier() -> (ChainVerifier, Arc<CountingResolver>) {
    let keys = Arc::new(CountingResolver::default());
    let verifier = ChainVerifier::new(Arc::new(LinkCache::default()), keys.clone())
        .with_exceptions(ExceptionTable::empty());
    (verifier, keys)
}

pub fn to_raw<R: Serialize>(records: &[R]) -> Vec<Vec<u8>> {
    records.iter().map(ChainFixture::to_bytes).collect()
}

/// `id` with its first byte flipped.
pub fn with_flipped_byte(id: LinkId) -> LinkId {
    let mut bytes = *id.as_bytes();
    bytes[0] ^= 0x01;
    LinkId::from_bytes(bytes)
}

/// `team.root`, then `second` at seqno 2, then `team.rotate_key`.
///
/// With `stub_second`, link 2 arrives stubbed, as a reader receives it.
/// Returns the raw links and the id of each link.
pub fn team_chain(
    fixture: &ChainFixture,
    second: SigchainV2Type,
    stub_second: bool,
) -> (Vec<Vec<u8>>, Vec<LinkId>) {
    let root = fixture.v2_record(1, None, SigchainV2Type::TeamRoot);
    let middle = fixture.v2_record(2, Some(root.payload_hash), second);
    let rotate = fixture.v2_record(3, Some(middle.payload_hash), SigchainV2Type::TeamRotateKey);
    let ids = vec![root.payload_hash, middle.payload_hash, rotate.payload_hash];

    let middle_raw = if stub_second {
        ChainFixture::to_bytes(&fixture.stub_record(2, Some(root.payload_hash), second))
    } else {
        ChainFixture::to_bytes(&middle)
    };
    let raw = vec![
        ChainFixture::to_bytes(&root),
        middle_raw,
        ChainFixture::to_bytes(&rotate),
    ];
    (raw, ids)
}
