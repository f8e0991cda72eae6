//! End-to-end chain verification: ordering, Merkle tip, tampering, caching.

mod common;

use common::{to_raw, verifier, with_flipped_byte};
use proptest::prelude::*;
use sigchain_crypto::{LinkId, SigId};
use sigchain_verifier::sigchain::{
    ChainErrorKind, ChainMismatchError, ImportError, MerkleTriple, SigchainV2Type,
    VerificationState,
};
use sigchain_verifier::testing::ChainFixture;

#[test]
fn broken_prev_pointer_fails_at_that_link_and_keeps_earlier_links_cached() {
    let fixture = ChainFixture::new(1);
    let first = fixture.v1_record(1, None, SigchainV2Type::Eldest);
    let second = fixture.v1_record(
        2,
        Some(with_flipped_byte(first.payload_hash)),
        SigchainV2Type::Sibkey,
    );
    let third = fixture.v1_record(3, Some(second.payload_hash), SigchainV2Type::Sibkey);
    let verifier = verifier();

    let err = verifier
        .verify_chain(&to_raw(&[first.clone(), second.clone(), third]), None, None)
        .unwrap_err();

    assert!(err.is_chain_mismatch());
    assert_eq!(err.seqno, Some(2));
    assert_eq!(err.link_id, Some(second.payload_hash));
    assert!(matches!(
        err.kind,
        ChainErrorKind::ChainMismatch(ChainMismatchError::PrevMismatch { seqno: 2, .. })
    ));

    let cached = verifier.cache().get(&first.payload_hash).unwrap();
    assert_eq!(cached.state(), VerificationState::ChainVerified);
    assert!(!verifier.cache().contains(&second.payload_hash));
}

#[test]
fn chain_matching_the_merkle_tip_verifies() {
    let fixture = ChainFixture::new(2);
    let records = fixture.v1_chain(4);
    let tip = MerkleTriple::new(4, records[3].payload_hash, Some(records[3].sig_id));

    let links = verifier()
        .verify_chain(&to_raw(&records), Some(&tip), None)
        .unwrap();

    assert_eq!(links.len(), 4);
    assert_eq!(links[3].to_merkle_triple(), tip);
    for (link, record) in links.iter().zip(&records) {
        assert_eq!(link.id(), record.payload_hash);
        assert_eq!(link.state(), VerificationState::ChainVerified);
        assert!(!link.is_revoked());
    }
}

#[test]
fn forked_chain_is_detected_by_the_merkle_tip() {
    let fixture = ChainFixture::new(2);
    let records = fixture.v1_chain(3);
    let forked_tip = MerkleTriple::new(3, LinkId::digest(b"the other branch"), None);

    let err = verifier()
        .verify_chain(&to_raw(&records), Some(&forked_tip), None)
        .unwrap_err();

    assert_eq!(err.seqno, Some(3));
    assert!(matches!(
        err.kind,
        ChainErrorKind::ChainMismatch(ChainMismatchError::MerkleLinkMismatch { seqno: 3, .. })
    ));
}

#[test]
fn merkle_tip_with_another_signature_is_a_mismatch() {
    let fixture = ChainFixture::new(2);
    let records = fixture.v1_chain(2);
    let tip = MerkleTriple::new(2, records[1].payload_hash, Some(SigId::digest(b"replaced")));

    let err = verifier()
        .verify_chain(&to_raw(&records), Some(&tip), None)
        .unwrap_err();
    assert!(matches!(
        err.kind,
        ChainErrorKind::ChainMismatch(ChainMismatchError::MerkleSigMismatch { .. })
    ));
}

#[test]
fn withheld_links_are_truncation() {
    let fixture = ChainFixture::new(3);
    let records = fixture.v1_chain(3);
    let tip = MerkleTriple::new(3, records[2].payload_hash, None);

    let err = verifier()
        .verify_chain(&to_raw(&records[..2]), Some(&tip), None)
        .unwrap_err();
    assert!(err.is_chain_mismatch());
    assert!(matches!(
        err.kind,
        ChainErrorKind::ChainMismatch(ChainMismatchError::Truncated {
            merkle_seqno: 3,
            chain_tip: 2
        })
    ));
}

#[test]
fn mixed_v1_and_v2_links_chain_together() {
    let fixture = ChainFixture::new(4);
    let eldest = fixture.v1_record(1, None, SigchainV2Type::Eldest);
    let device = fixture.v2_record(2, Some(eldest.payload_hash), SigchainV2Type::Device);
    let sibkey = fixture.v1_record(3, Some(device.payload_hash), SigchainV2Type::Sibkey);

    let links = verifier()
        .verify_chain(&to_raw(&[eldest, device, sibkey]), None, None)
        .unwrap();

    assert!(links[0].outer().is_none());
    assert_eq!(links[1].outer().unwrap().link_type, SigchainV2Type::Device);
    assert_eq!(links[2].prev(), Some(links[1].id()));
}

#[test]
fn import_failure_reports_position() {
    let fixture = ChainFixture::new(5);
    let mut records = fixture.v1_chain(3);
    records[1].payload_json = records[1].payload_json.replace("keybase.io", "keybase.in");

    let err = verifier()
        .verify_chain(&to_raw(&records), None, None)
        .unwrap_err();

    assert!(!err.is_chain_mismatch());
    assert_eq!(err.seqno, Some(2));
    assert_eq!(err.link_id, Some(records[1].payload_hash));
    assert!(matches!(
        err.kind,
        ChainErrorKind::Import(ImportError::HashMismatch(_))
    ));
}

#[test]
fn malformed_prev_is_a_decode_error() {
    let fixture = ChainFixture::new(5);
    let first = fixture.v1_record(1, None, SigchainV2Type::Eldest);
    let mut value = fixture.payload_value(2, Some(first.payload_hash), SigchainV2Type::Sibkey, 1);
    value["prev"] = serde_json::json!("not-hex");
    let second = fixture.v1_record_from_payload(2, value.to_string());

    let err = verifier()
        .verify_chain(&to_raw(&[first, second]), None, None)
        .unwrap_err();
    assert!(matches!(
        err.kind,
        ChainErrorKind::Import(ImportError::Decode(_))
    ));
}

#[test]
fn revocations_mark_earlier_links() {
    let fixture = ChainFixture::new(6);
    let device = ChainFixture::new(7);

    let eldest = fixture.v1_record(1, None, SigchainV2Type::Eldest);
    let device_link = device.v1_record(2, Some(eldest.payload_hash), SigchainV2Type::Sibkey);
    let revoke = fixture.v1_revoke_record(3, Some(device_link.payload_hash), &[device.kid()], &[]);

    let links = verifier()
        .verify_chain(&to_raw(&[eldest, device_link, revoke]), None, None)
        .unwrap();

    assert!(!links[0].is_revoked());
    assert!(links[1].is_revoked());
    assert!(!links[2].is_revoked());
}

#[test]
fn second_verification_reuses_the_cache() {
    let fixture = ChainFixture::new(8);
    let raw = to_raw(&fixture.v1_chain(5));
    let verifier = verifier();

    let first = verifier.verify_chain(&raw, None, None).unwrap();
    let second = verifier.verify_chain(&raw, None, None).unwrap();

    let ids = |links: &[sigchain_verifier::sigchain::ChainLink]| {
        links.iter().map(|l| l.id()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));

    let stats = verifier.link_cache_stats();
    assert_eq!(stats.hits, 5);
    assert_eq!(stats.misses, 5);
    assert_eq!(stats.inserts, 10);
    assert_eq!(stats.len, 5);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn well_formed_chains_of_any_length_verify(seed in any::<u8>(), len in 1u64..8) {
        let fixture = ChainFixture::new(seed);
        let links = verifier().verify_chain(&to_raw(&fixture.v1_chain(len)), None, None).unwrap();
        prop_assert_eq!(links.len() as u64, len);
        prop_assert!(links.windows(2).all(|w| w[1].prev() == Some(w[0].id())));
    }

    #[test]
    fn tampering_any_payload_byte_is_rejected(
        len in 2u64..5,
        pick in any::<prop::sample::Index>(),
        byte in any::<prop::sample::Index>(),
    ) {
        let fixture = ChainFixture::new(9);
        let mut records = fixture.v1_chain(len);
        let target = pick.index(records.len());
        let mut payload = records[target].payload_json.clone().into_bytes();
        let at = byte.index(payload.len());
        payload[at] = if payload[at] == b'0' { b'1' } else { b'0' };
        records[target].payload_json = String::from_utf8_lossy(&payload).into_owned();

        let result = verifier().verify_chain(&to_raw(&records), None, None);
        prop_assert!(result.is_err());
    }
}
