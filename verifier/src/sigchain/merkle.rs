//! Merkle tip of a chain, as published in the global tree.

use serde::{Deserialize, Serialize};
use sigchain_crypto::{LinkId, SigId};

/// `(seqno, link id, sig id)` of the last link the Merkle tree commits to.
///
/// Used only to cross-check a chain; never trusted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleTriple {
    pub seqno: u64,
    pub link_id: LinkId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig_id: Option<SigId>,
}

impl MerkleTriple {
    #[must_use]
    pub const fn new(seqno: u64, link_id: LinkId, sig_id: Option<SigId>) -> Self {
        Self {
            seqno,
            link_id,
            sig_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_shape() {
        let triple = MerkleTriple::new(3, LinkId::digest(b"tip"), None);
        let value = serde_json::to_value(triple).unwrap();
        assert_eq!(value["seqno"], 3);
        assert_eq!(value["link_id"], LinkId::digest(b"tip").to_string());
        assert!(value.get("sig_id").is_none());

        let back: MerkleTriple = serde_json::from_value(value).unwrap();
        assert_eq!(back, triple);
    }
}
