//! Chain-level verification: ordering, Merkle tip, caching and revocation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sigchain_crypto::{prev_matches, Kid, LinkId, SigId};
use tracing::{debug, info, warn};

use super::cache::{CacheStats, LinkCache};
use super::error::{ChainMismatchError, ChainVerificationError, ImportError};
use super::exceptions::ExceptionTable;
use super::keys::KeyResolver;
use super::link::{ChainContext, ChainLink, ServerLinkRecord, VerificationState};
use super::link_type::TeamRole;
use super::merkle::MerkleTriple;

/// Verifies whole chains against a shared link cache.
///
/// Cheap to share: chains of distinct identities may be verified
/// concurrently through one verifier.
#[derive(Clone)]
pub struct ChainVerifier {
    cache: Arc<LinkCache>,
    keys: Arc<dyn KeyResolver>,
    exceptions: Arc<ExceptionTable>,
    reject_past_merkle_tip: bool,
}

impl ChainVerifier {
    /// A verifier using the historical exception tables.
    #[must_use]
    pub fn new(cache: Arc<LinkCache>, keys: Arc<dyn KeyResolver>) -> Self {
        Self {
            cache,
            keys,
            exceptions: Arc::new(ExceptionTable::historical()),
            reject_past_merkle_tip: false,
        }
    }

    #[must_use]
    pub fn with_exceptions(mut self, exceptions: ExceptionTable) -> Self {
        self.exceptions = Arc::new(exceptions);
        self
    }

    /// Fail chains that extend past the Merkle tip instead of warning.
    #[must_use]
    pub const fn with_reject_past_merkle_tip(mut self, reject: bool) -> Self {
        self.reject_past_merkle_tip = reject;
        self
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<LinkCache> {
        &self.cache
    }

    #[must_use]
    pub fn link_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Verify a chain, oldest link first.
    ///
    /// Every link is imported (or reused from the cache), checked to follow
    /// its predecessor and cross-checked against `merkle_leaf`. Each link is
    /// published to the cache as soon as it is chain-verified, so a failure
    /// later in the chain leaves the earlier links cached. `role` is the
    /// reader's role on a team chain, `None` on a user chain.
    ///
    /// # Errors
    /// Returns the first fatal error with the failing position.
    pub fn verify_chain<B: AsRef<[u8]>>(
        &self,
        raw_links: &[B],
        merkle_leaf: Option<&MerkleTriple>,
        role: Option<TeamRole>,
    ) -> Result<Vec<ChainLink>, ChainVerificationError> {
        self.verify_chain_with_trusted(raw_links, &HashMap::new(), merkle_leaf, role)
    }

    /// [`ChainVerifier::verify_chain`] with links already loaded from trusted
    /// storage, keyed by link id.
    ///
    /// A trusted link that was stored as signature-verified stands in for the
    /// raw link with the same asserted id, skipping its hash and signature
    /// checks. Ordering, Merkle and stub policy checks still run on it.
    ///
    /// # Errors
    /// Returns the first fatal error with the failing position.
    pub fn verify_chain_with_trusted<B: AsRef<[u8]>>(
        &self,
        raw_links: &[B],
        trusted: &HashMap<LinkId, ChainLink>,
        merkle_leaf: Option<&MerkleTriple>,
        role: Option<TeamRole>,
    ) -> Result<Vec<ChainLink>, ChainVerificationError> {
        let ctx = ChainContext {
            keys: self.keys.as_ref(),
            exceptions: &self.exceptions,
            role,
        };
        let mut links: Vec<ChainLink> = Vec::with_capacity(raw_links.len());

        for raw in raw_links {
            let expected_seqno = links.last().map_or(1, |l| l.seqno() + 1);
            let expected_prev = links.last().map(ChainLink::id);

            let mut link = self
                .import(&ctx, trusted, raw.as_ref())
                .map_err(|(link_id, e)| {
                    ChainVerificationError::new(Some(expected_seqno), link_id, e)
                })?;
            let at = |e: ChainMismatchError, link: &ChainLink| {
                ChainVerificationError::new(Some(link.seqno()), Some(link.id()), e)
            };

            if link.seqno() != expected_seqno {
                return Err(at(
                    ChainMismatchError::SeqnoGap {
                        expected: expected_seqno,
                        actual: link.seqno(),
                    },
                    &link,
                ));
            }
            if !prev_matches(link.prev().as_ref(), expected_prev.as_ref()) {
                return Err(at(
                    ChainMismatchError::PrevMismatch {
                        seqno: link.seqno(),
                        expected: expected_prev,
                        actual: link.prev(),
                    },
                    &link,
                ));
            }
            link.cross_check_merkle(merkle_leaf).map_err(|e| at(e, &link))?;
            if let Some(leaf) = merkle_leaf.filter(|leaf| link.seqno() > leaf.seqno) {
                if self.reject_past_merkle_tip {
                    return Err(at(
                        ChainMismatchError::PastMerkleTip {
                            seqno: link.seqno(),
                            merkle_seqno: leaf.seqno,
                        },
                        &link,
                    ));
                }
                warn!(
                    seqno = link.seqno(),
                    merkle_seqno = leaf.seqno,
                    "link is past the merkle tip"
                );
            }

            link.mark_chain_verified();
            self.cache.insert(&link);
            debug!(seqno = link.seqno(), link_id = %link.id(), "link verified");
            links.push(link);
        }

        let chain_tip = links.last().map_or(0, ChainLink::seqno);
        if let Some(leaf) = merkle_leaf.filter(|leaf| leaf.seqno > chain_tip) {
            return Err(ChainVerificationError::new(
                Some(leaf.seqno),
                Some(leaf.link_id),
                ChainMismatchError::Truncated {
                    merkle_seqno: leaf.seqno,
                    chain_tip,
                },
            ));
        }

        apply_revocations(&mut links);
        info!(links = links.len(), chain_tip, "chain verified");
        Ok(links)
    }

    /// Import one link, reusing a cached or trusted copy when one exists.
    fn import(
        &self,
        ctx: &ChainContext<'_>,
        trusted: &HashMap<LinkId, ChainLink>,
        raw: &[u8],
    ) -> Result<ChainLink, (Option<LinkId>, ImportError)> {
        let record = ServerLinkRecord::parse(raw).map_err(|e| (None, e.into()))?;
        let id = record.asserted_id().map_err(|e| (None, e.into()))?;

        let cached = self
            .cache
            .get(&id)
            .filter(|cached| cached.is_stubbed() == record.is_stub());
        if let Some(cached) = cached {
            debug!(link_id = %id, "link cache hit");
            // Stubs are cached per link, not per reader.
            if cached.is_stubbed() {
                cached
                    .check_stub_policy(ctx.role)
                    .map_err(|e| (Some(id), e.into()))?;
            }
            return Ok(ChainLink::clone(&cached));
        }

        let stored = trusted.get(&id).filter(|stored| {
            stored.state() >= VerificationState::PayloadVerified
                && stored.is_stubbed() == record.is_stub()
        });
        if let Some(stored) = stored {
            debug!(link_id = %id, "using trusted stored link");
            if stored.is_stubbed() {
                stored
                    .check_stub_policy(ctx.role)
                    .map_err(|e| (Some(id), e.into()))?;
            }
            return Ok(stored.clone());
        }
        ChainLink::from_server_record(ctx, record).map_err(|e| (Some(id), e))
    }
}

/// Mark links whose key or signature a later link revokes.
fn apply_revocations(links: &mut [ChainLink]) {
    let mut revoked_kids: HashSet<Kid> = HashSet::new();
    let mut revoked_sig_ids: HashSet<SigId> = HashSet::new();

    for link in links.iter_mut().rev() {
        let kid_revoked = link.kid().is_some_and(|kid| revoked_kids.contains(kid));
        let sig_revoked = link
            .sig_id()
            .is_some_and(|sig_id| revoked_sig_ids.contains(&sig_id));
        if kid_revoked || sig_revoked {
            debug!(seqno = link.seqno(), "link revoked by a later link");
            link.mark_revoked();
        }
        if let Some(revoke) = link.revoke_section() {
            revoked_kids.extend(revoke.revoked_kids().cloned());
            revoked_sig_ids.extend(revoke.revoked_sig_ids().copied());
        }
    }
}

impl std::fmt::Debug for ChainVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainVerifier")
            .field("cache", &self.cache)
            .field("exceptions", &self.exceptions.len())
            .field("reject_past_merkle_tip", &self.reject_past_merkle_tip)
            .finish_non_exhaustive()
    }
}
