//! Schema-validated parsing of the signed JSON payload.
//!
//! V1 links carry everything in this payload; V2 links carry it as the inner
//! payload committed to by the outer link's `curr`. Required fields that are
//! missing or mistyped reject the link; unknown extra fields are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sigchain_crypto::{Kid, LinkId, SigId};

use super::error::DecodeError;
use super::link_type::SigchainV2Type;

const SIGNATURE_TAG: &str = "signature";

#[derive(Deserialize)]
struct PayloadJson {
    body: BodyJson,
    ctime: i64,
    expire_in: i64,
    #[serde(deserialize_with = "required_nullable")]
    prev: Option<LinkId>,
    seqno: u64,
    tag: String,
}

#[derive(Deserialize)]
struct BodyJson {
    key: KeyJson,
    #[serde(rename = "type")]
    link_type: String,
    version: u64,
    #[serde(default)]
    revoke: Option<RevokeSection>,
}

#[derive(Deserialize)]
struct KeyJson {
    kid: Kid,
    uid: String,
    username: String,
    #[serde(default)]
    eldest_kid: Option<Kid>,
    #[serde(default)]
    fingerprint: Option<String>,
}

/// Keys and signatures a `revoke` section retires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<Kid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kids: Vec<Kid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig_id: Option<SigId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sig_ids: Vec<SigId>,
}

impl RevokeSection {
    pub fn revoked_kids(&self) -> impl Iterator<Item = &Kid> {
        self.kid.iter().chain(self.kids.iter())
    }

    pub fn revoked_sig_ids(&self) -> impl Iterator<Item = &SigId> {
        self.sig_id.iter().chain(self.sig_ids.iter())
    }
}

/// `prev` must be present in the payload even when it is `null`.
fn required_nullable<'de, D>(deserializer: D) -> Result<Option<LinkId>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<LinkId>::deserialize(deserializer)
}

/// Fields unpacked from a signed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackedFields {
    pub seqno: u64,
    pub prev: Option<LinkId>,
    /// Creation time, seconds since the Unix epoch.
    pub ctime: i64,
    /// Expiration time: `ctime + expire_in`.
    pub etime: i64,
    pub uid: String,
    pub username: String,
    pub kid: Kid,
    pub eldest_kid: Option<Kid>,
    pub fingerprint: Option<String>,
    pub link_type: SigchainV2Type,
    /// `body.version`: 1 for V1 links, 2 for V2 inner payloads.
    pub version: u64,
    pub revoke: Option<RevokeSection>,
}

impl UnpackedFields {
    #[must_use]
    pub fn ctime_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.ctime, 0)
    }

    #[must_use]
    pub fn etime_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.etime, 0)
    }
}

/// Parse and validate a signed JSON payload.
///
/// `expected_version` is the `body.version` the envelope requires.
///
/// # Errors
/// Returns `DecodeError::MalformedPayload` if any required field is absent,
/// mistyped or inconsistent, and `DecodeError::UnknownLinkTypeName` for an
/// unrecognised `body.type`.
pub fn unpack_payload(raw: &[u8], expected_version: u64) -> Result<UnpackedFields, DecodeError> {
    let json: PayloadJson = serde_json::from_slice(raw).map_err(DecodeError::payload)?;

    if json.tag != SIGNATURE_TAG {
        return Err(DecodeError::MalformedPayload(format!(
            "unexpected tag {:?}",
            json.tag
        )));
    }
    if json.body.version != expected_version {
        return Err(DecodeError::MalformedPayload(format!(
            "body.version {} where {expected_version} is required",
            json.body.version
        )));
    }
    if json.seqno == 0 {
        return Err(DecodeError::MalformedPayload("seqno must be >= 1".into()));
    }
    if json.expire_in < 0 {
        return Err(DecodeError::MalformedPayload(
            "expire_in must not be negative".into(),
        ));
    }
    let etime = json
        .ctime
        .checked_add(json.expire_in)
        .ok_or_else(|| DecodeError::MalformedPayload("ctime + expire_in overflows".into()))?;
    let link_type: SigchainV2Type = json.body.link_type.parse()?;

    Ok(UnpackedFields {
        seqno: json.seqno,
        prev: json.prev,
        ctime: json.ctime,
        etime,
        uid: json.body.key.uid,
        username: json.body.key.username,
        kid: json.body.key.kid,
        eldest_kid: json.body.key.eldest_kid,
        fingerprint: json.body.key.fingerprint,
        link_type,
        version: json.body.version,
        revoke: json.body.revoke,
    })
}
