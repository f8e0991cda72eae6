//! Stubbed links on team and user chains, per reader role.

mod common;

use common::{counting_verifier, team_chain, verifier};
use sigchain_verifier::sigchain::{
    ChainErrorKind, ImportError, SigchainV2Type, StubNotAllowedError, TeamRole,
    VerificationState,
};
use sigchain_verifier::testing::ChainFixture;

#[test]
fn reader_accepts_stubbed_subteam_link_without_checking_its_signature() {
    let fixture = ChainFixture::new(20);
    let (raw, ids) = team_chain(&fixture, SigchainV2Type::TeamNewSubteam, true);
    let (verifier, keys) = counting_verifier();

    let links = verifier
        .verify_chain(&raw, None, Some(TeamRole::Reader))
        .unwrap();

    assert_eq!(links.len(), 3);
    assert!(links[1].is_stubbed());
    assert_eq!(links[1].id(), ids[1]);
    assert_eq!(links[1].state(), VerificationState::ChainVerified);
    assert!(links[1].sig_id().is_none());
    assert!(links[1].key_info().is_none());
    assert_eq!(links[2].prev(), Some(ids[1]));
    // Only the two full links needed a key.
    assert_eq!(keys.calls(), 2);
}

#[test]
fn stubbed_rotate_key_is_rejected() {
    let fixture = ChainFixture::new(21);
    let root = fixture.v2_record(1, None, SigchainV2Type::TeamRoot);
    let rotate = fixture.stub_record(2, Some(root.payload_hash), SigchainV2Type::TeamRotateKey);
    let raw = vec![ChainFixture::to_bytes(&root), ChainFixture::to_bytes(&rotate)];

    let err = verifier()
        .verify_chain(&raw, None, Some(TeamRole::Reader))
        .unwrap_err();

    assert_eq!(err.seqno, Some(2));
    match err.kind {
        ChainErrorKind::Import(ImportError::StubNotAllowed(StubNotAllowedError {
            link_type,
            role,
        })) => {
            assert_eq!(link_type, SigchainV2Type::TeamRotateKey);
            assert_eq!(role, Some(TeamRole::Reader));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn admins_never_accept_stubs() {
    let fixture = ChainFixture::new(22);
    let (raw, _) = team_chain(&fixture, SigchainV2Type::TeamInvite, true);

    for role in [TeamRole::Admin, TeamRole::Owner] {
        let err = verifier().verify_chain(&raw, None, Some(role)).unwrap_err();
        assert!(
            matches!(
                err.kind,
                ChainErrorKind::Import(ImportError::StubNotAllowed(_))
            ),
            "case '{role:?}': {err:?}"
        );
    }
}

#[test]
fn stub_allowance_by_role() {
    let fixture = ChainFixture::new(23);
    let cases = [
        (SigchainV2Type::TeamNewSubteam, TeamRole::None, true),
        (SigchainV2Type::TeamNewSubteam, TeamRole::Writer, true),
        (SigchainV2Type::TeamRenameSubteam, TeamRole::Reader, true),
        (SigchainV2Type::TeamInvite, TeamRole::Writer, true),
        (SigchainV2Type::TeamChangeMembership, TeamRole::Reader, false),
        (SigchainV2Type::TeamLeave, TeamRole::Reader, false),
        (SigchainV2Type::TeamInvite, TeamRole::Admin, false),
    ];

    for (link_type, role, allowed) in cases {
        let (raw, _) = team_chain(&fixture, link_type, true);
        let result = verifier().verify_chain(&raw, None, Some(role));
        assert_eq!(
            result.is_ok(),
            allowed,
            "case '{link_type} as {role:?}': {result:?}"
        );
    }
}

#[test]
fn admin_sees_full_links() {
    let fixture = ChainFixture::new(24);
    let (raw, ids) = team_chain(&fixture, SigchainV2Type::TeamInvite, false);

    let links = verifier()
        .verify_chain(&raw, None, Some(TeamRole::Admin))
        .unwrap();
    assert!(links.iter().all(|l| !l.is_stubbed()));
    assert_eq!(links.iter().map(|l| l.id()).collect::<Vec<_>>(), ids);
}

#[test]
fn user_chain_stubs_only_unsigned_statements() {
    let fixture = ChainFixture::new(25);
    let eldest = fixture.v1_record(1, None, SigchainV2Type::Eldest);

    let track = fixture.stub_record(2, Some(eldest.payload_hash), SigchainV2Type::Track);
    let raw = vec![ChainFixture::to_bytes(&eldest), ChainFixture::to_bytes(&track)];
    let links = verifier().verify_chain(&raw, None, None).unwrap();
    assert!(links[1].is_stubbed());

    let sibkey = fixture.stub_record(2, Some(eldest.payload_hash), SigchainV2Type::Sibkey);
    let raw = vec![ChainFixture::to_bytes(&eldest), ChainFixture::to_bytes(&sibkey)];
    let err = verifier().verify_chain(&raw, None, None).unwrap_err();
    assert!(matches!(
        err.kind,
        ChainErrorKind::Import(ImportError::StubNotAllowed(StubNotAllowedError {
            role: None,
            ..
        }))
    ));
}

#[test]
fn cached_full_link_is_not_served_for_a_stub_and_vice_versa() {
    let fixture = ChainFixture::new(26);
    let (full, ids) = team_chain(&fixture, SigchainV2Type::TeamInvite, false);
    let (stubbed, _) = team_chain(&fixture, SigchainV2Type::TeamInvite, true);
    let verifier = verifier();

    let as_admin = verifier
        .verify_chain(&full, None, Some(TeamRole::Admin))
        .unwrap();
    assert!(!as_admin[1].is_stubbed());

    let as_reader = verifier
        .verify_chain(&stubbed, None, Some(TeamRole::Reader))
        .unwrap();
    assert!(as_reader[1].is_stubbed());
    assert_eq!(as_reader[1].id(), ids[1]);

    let again = verifier
        .verify_chain(&full, None, Some(TeamRole::Admin))
        .unwrap();
    assert!(!again[1].is_stubbed());
    assert!(again[1].fields().is_some());
}

#[test]
fn stub_with_a_different_position_breaks_the_chain() {
    let fixture = ChainFixture::new(27);
    let root = fixture.v2_record(1, None, SigchainV2Type::TeamRoot);
    let invite = fixture.stub_record(3, Some(root.payload_hash), SigchainV2Type::TeamInvite);

    let raw = vec![ChainFixture::to_bytes(&root), ChainFixture::to_bytes(&invite)];

    let err = verifier()
        .verify_chain(&raw, None, Some(TeamRole::Reader))
        .unwrap_err();
    assert!(err.is_chain_mismatch());
}

#[test]
fn stub_cached_for_a_reader_is_refused_to_an_admin() {
    let fixture = ChainFixture::new(28);
    let (stubbed, ids) = team_chain(&fixture, SigchainV2Type::TeamInvite, true);
    let verifier = verifier();

    let as_reader = verifier
        .verify_chain(&stubbed, None, Some(TeamRole::Reader))
        .unwrap();
    assert!(as_reader[1].is_stubbed());
    assert!(verifier.cache().contains(&ids[1]));

    for role in [TeamRole::Admin, TeamRole::Owner] {
        let err = verifier
            .verify_chain(&stubbed, None, Some(role))
            .unwrap_err();
        assert_eq!(err.seqno, Some(2), "case '{role:?}'");
        assert_eq!(err.link_id, Some(ids[1]), "case '{role:?}'");
        assert!(
            matches!(
                err.kind,
                ChainErrorKind::Import(ImportError::StubNotAllowed(StubNotAllowedError {
                    link_type: SigchainV2Type::TeamInvite,
                    ..
                }))
            ),
            "case '{role:?}': {err:?}"
        );
    }

    // The reader still gets the cached stub afterwards.
    let again = verifier
        .verify_chain(&stubbed, None, Some(TeamRole::Writer))
        .unwrap();
    assert!(again[1].is_stubbed());
}
