//! Deterministic chain builders and collaborator mocks for tests.

#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::missing_const_for_fn,
    clippy::must_use_candidate
)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use ed25519_dalek::{SigningKey, VerifyingKey};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use sigchain_crypto::{encode_base64, sign_packet, Kid, LinkId, SigId, SigPacket};

use crate::loader::{LinkSource, SourceError};
use crate::sigchain::{
    EmbeddedKeyResolver, FullRecord, KeyError, KeyResolver, MerkleTriple, OuterLinkV2, SeqType,
    SigchainV2Type, StubRecord,
};

const BASE_CTIME: i64 = 1_500_000_000;
const EXPIRE_IN: i64 = 504_576_000;

/// Builds signed server records for one signer with a fixed Ed25519 key.
pub struct ChainFixture {
    signing_key: SigningKey,
    uid: String,
    username: String,
}

impl ChainFixture {
    /// A signer whose key is derived from `seed`.
    pub fn new(seed: u8) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&[seed; 32]),
            uid: format!("{seed:032x}"),
            username: format!("user{seed}"),
        }
    }

    pub fn kid(&self) -> Kid {
        Kid::from_ed25519(&self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, payload: &[u8]) -> SigPacket {
        sign_packet(&self.signing_key, payload).unwrap()
    }

    pub fn ctime(seqno: u64) -> i64 {
        BASE_CTIME + i64::try_from(seqno).unwrap()
    }

    /// The JSON payload of a link as a value, for tests that edit it.
    pub fn payload_value(
        &self,
        seqno: u64,
        prev: Option<LinkId>,
        link_type: SigchainV2Type,
        version: u64,
    ) -> serde_json::Value {
        json!({
            "body": {
                "key": {
                    "kid": self.kid(),
                    "uid": self.uid,
                    "username": self.username,
                    "host": "keybase.io"
                },
                "type": link_type.as_str(),
                "version": version
            },
            "client": {"name": "sigchain-fixture", "version": env!("CARGO_PKG_VERSION")},
            "ctime": Self::ctime(seqno),
            "expire_in": EXPIRE_IN,
            "prev": prev,
            "seqno": seqno,
            "tag": "signature"
        })
    }

    pub fn payload_json(
        &self,
        seqno: u64,
        prev: Option<LinkId>,
        link_type: SigchainV2Type,
        version: u64,
    ) -> String {
        self.payload_value(seqno, prev, link_type, version)
            .to_string()
    }

    /// A V1 record signing `payload` exactly as given.
    pub fn v1_record_from_payload(&self, seqno: u64, payload: String) -> FullRecord {
        let packet = self.sign(payload.as_bytes());
        FullRecord {
            seqno,
            payload_hash: LinkId::digest(payload.as_bytes()),
            sig_id: packet.sig_id(),
            kid: self.kid(),
            ctime: Self::ctime(seqno),
            sig_version: 1,
            sig: packet.to_armored(),
            payload_json: payload,
            fingerprint: None,
        }
    }

    pub fn v1_record(
        &self,
        seqno: u64,
        prev: Option<LinkId>,
        link_type: SigchainV2Type,
    ) -> FullRecord {
        self.v1_record_from_payload(seqno, self.payload_json(seqno, prev, link_type, 1))
    }

    /// A V1 record hit by the whitespace-stripping bug: signed and hashed
    /// with a trailing newline, served without it.
    pub fn v1_record_missing_newline(
        &self,
        seqno: u64,
        prev: Option<LinkId>,
        link_type: SigchainV2Type,
    ) -> FullRecord {
        let payload = self.payload_json(seqno, prev, link_type, 1);
        let mut record = self.v1_record_from_payload(seqno, format!("{payload}\n"));
        record.payload_json = payload;
        record
    }

    pub fn v1_revoke_record(
        &self,
        seqno: u64,
        prev: Option<LinkId>,
        kids: &[Kid],
        sig_ids: &[SigId],
    ) -> FullRecord {
        let mut value = self.payload_value(seqno, prev, SigchainV2Type::Revoke, 1);
        value["body"]["revoke"] = json!({ "kids": kids, "sig_ids": sig_ids });
        self.v1_record_from_payload(seqno, value.to_string())
    }

    /// An eldest link followed by sibkey links, each pointing at the last.
    pub fn v1_chain(&self, len: u64) -> Vec<FullRecord> {
        let mut records: Vec<FullRecord> = Vec::new();
        for seqno in 1..=len {
            let prev = records.last().map(|r| r.payload_hash);
            let link_type = if seqno == 1 {
                SigchainV2Type::Eldest
            } else {
                SigchainV2Type::Sibkey
            };
            records.push(self.v1_record(seqno, prev, link_type));
        }
        records
    }

    /// Inner payload and encoded outer link of a V2 link.
    pub fn v2_parts(
        &self,
        seqno: u64,
        prev: Option<LinkId>,
        link_type: SigchainV2Type,
    ) -> (String, Vec<u8>) {
        let inner = self.payload_json(seqno, prev, link_type, 2);
        let seq_type = if link_type.is_team_type() {
            SeqType::Semiprivate
        } else {
            SeqType::Public
        };
        let outer = OuterLinkV2::new(seqno, prev, inner.as_bytes(), link_type, seq_type);
        (inner, outer.encode().unwrap())
    }

    pub fn v2_record(
        &self,
        seqno: u64,
        prev: Option<LinkId>,
        link_type: SigchainV2Type,
    ) -> FullRecord {
        let (inner, outer) = self.v2_parts(seqno, prev, link_type);
        let packet = self.sign(&outer);
        FullRecord {
            seqno,
            payload_hash: LinkId::digest(&outer),
            sig_id: packet.sig_id(),
            kid: self.kid(),
            ctime: Self::ctime(seqno),
            sig_version: 2,
            sig: packet.to_armored(),
            payload_json: inner,
            fingerprint: None,
        }
    }

    /// The stubbed form of [`ChainFixture::v2_record`] with the same arguments.
    pub fn stub_record(
        &self,
        seqno: u64,
        prev: Option<LinkId>,
        link_type: SigchainV2Type,
    ) -> StubRecord {
        let (_, outer) = self.v2_parts(seqno, prev, link_type);
        StubRecord {
            s2: encode_base64(&outer),
        }
    }

    pub fn to_bytes(record: &impl Serialize) -> Vec<u8> {
        serde_json::to_vec(record).unwrap()
    }
}

/// Resolver that counts how often it was asked for a key.
#[derive(Debug, Default)]
pub struct CountingResolver {
    calls: AtomicUsize,
}

impl CountingResolver {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KeyResolver for CountingResolver {
    fn resolve_public_key(&self, kid: &Kid) -> Result<VerifyingKey, KeyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        EmbeddedKeyResolver.resolve_public_key(kid)
    }
}

/// In-memory [`LinkSource`] with configurable chains.
#[derive(Default)]
pub struct MockLinkSource {
    chains: Mutex<HashMap<String, (Vec<Vec<u8>>, Option<MerkleTriple>)>>,
    fetch_calls: Mutex<Vec<String>>,
}

impl MockLinkSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: &str, links: Vec<Vec<u8>>, merkle_leaf: Option<MerkleTriple>) {
        self.chains
            .lock()
            .insert(identity.to_string(), (links, merkle_leaf));
    }

    /// Identities passed to `fetch_raw_links`.
    pub fn fetch_calls(&self) -> Vec<String> {
        self.fetch_calls.lock().clone()
    }
}

#[async_trait]
impl LinkSource for MockLinkSource {
    async fn fetch_raw_links(&self, identity: &str) -> Result<Vec<Vec<u8>>, SourceError> {
        self.fetch_calls.lock().push(identity.to_string());
        self.chains
            .lock()
            .get(identity)
            .map(|(links, _)| links.clone())
            .ok_or_else(|| SourceError::NotFound(identity.to_string()))
    }

    async fn fetch_merkle_leaf(&self, identity: &str) -> Result<Option<MerkleTriple>, SourceError> {
        self.chains
            .lock()
            .get(identity)
            .map(|(_, leaf)| *leaf)
            .ok_or_else(|| SourceError::NotFound(identity.to_string()))
    }
}
