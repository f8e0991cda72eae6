//! Fetch-side collaborators and the async glue that feeds `verify_chain`.
//!
//! Fetching is the only place that suspends; verification itself runs
//! synchronously once the raw links and the Merkle leaf are in hand.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use sigchain_crypto::LinkId;
use tracing::{debug, info, warn};

use crate::sigchain::{
    ChainLink, ChainVerificationError, ChainVerifier, MerkleTriple, ServerLinkRecord, TeamRole,
};

/// Errors from fetch and persistence collaborators.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid identity {0:?}")]
    InvalidIdentity(String),
    #[error("no chain found for {0}")]
    NotFound(String),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed chain file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("stored link is unusable: {0}")]
    Storage(String),
}

/// Network or storage collaborator that supplies raw chain data.
#[async_trait::async_trait]
pub trait LinkSource: Send + Sync {
    /// Raw server records of `identity`'s chain, oldest first.
    ///
    /// # Errors
    /// Returns `SourceError` if the chain cannot be fetched.
    async fn fetch_raw_links(&self, identity: &str) -> Result<Vec<Vec<u8>>, SourceError>;

    /// The Merkle tree's view of `identity`'s tip, if it has one.
    ///
    /// # Errors
    /// Returns `SourceError` if the leaf cannot be fetched.
    async fn fetch_merkle_leaf(&self, identity: &str) -> Result<Option<MerkleTriple>, SourceError>;
}

/// Persistence collaborator for verified links.
#[async_trait::async_trait]
pub trait LinkStore: Send + Sync {
    /// # Errors
    /// Returns `SourceError::Storage` if the stored form cannot be read back.
    async fn load_cached_link(&self, id: &LinkId) -> Result<Option<ChainLink>, SourceError>;

    /// # Errors
    /// Returns `SourceError::Storage` if the link cannot be persisted.
    async fn store_cached_link(&self, link: &ChainLink) -> Result<(), SourceError>;
}

#[derive(Deserialize)]
struct ChainFile {
    links: Vec<serde_json::Value>,
    #[serde(default)]
    merkle_leaf: Option<MerkleTriple>,
}

/// Reads `<dir>/<identity>.json` files of the form
/// `{ "links": [<server record>, ...], "merkle_leaf": <triple>? }`.
#[derive(Debug, Clone)]
pub struct FileLinkSource {
    dir: PathBuf,
}

impl FileLinkSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, identity: &str) -> Result<PathBuf, SourceError> {
        let valid = !identity.is_empty()
            && !identity.starts_with('.')
            && identity
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(SourceError::InvalidIdentity(identity.to_string()));
        }
        Ok(self.dir.join(format!("{identity}.json")))
    }

    async fn read(&self, identity: &str) -> Result<ChainFile, SourceError> {
        let path = self.path_for(identity)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(identity.to_string()))
            }
            Err(source) => return Err(SourceError::Io { path, source }),
        };
        serde_json::from_slice(&bytes).map_err(|source| SourceError::Malformed { path, source })
    }
}

#[async_trait::async_trait]
impl LinkSource for FileLinkSource {
    async fn fetch_raw_links(&self, identity: &str) -> Result<Vec<Vec<u8>>, SourceError> {
        let file = self.read(identity).await?;
        let path = self.dir.clone();
        file.links
            .iter()
            .map(|record| {
                serde_json::to_vec(record).map_err(|source| SourceError::Malformed {
                    path: path.clone(),
                    source,
                })
            })
            .collect()
    }

    async fn fetch_merkle_leaf(&self, identity: &str) -> Result<Option<MerkleTriple>, SourceError> {
        Ok(self.read(identity).await?.merkle_leaf)
    }
}

/// In-memory [`LinkStore`] holding the trusted-storage form of each link.
#[derive(Debug, Default)]
pub struct MemoryLinkStore {
    links: Mutex<HashMap<LinkId, Vec<u8>>>,
}

impl MemoryLinkStore {
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl LinkStore for MemoryLinkStore {
    async fn load_cached_link(&self, id: &LinkId) -> Result<Option<ChainLink>, SourceError> {
        let stored = self.links.lock().get(id).cloned();
        stored
            .map(|bytes| {
                ChainLink::from_trusted_storage(&bytes)
                    .map_err(|e| SourceError::Storage(e.to_string()))
            })
            .transpose()
    }

    async fn store_cached_link(&self, link: &ChainLink) -> Result<(), SourceError> {
        let bytes = link
            .to_storage_bytes()
            .map_err(|e| SourceError::Storage(e.to_string()))?;
        self.links.lock().insert(link.id(), bytes);
        Ok(())
    }
}

/// Errors from [`ChainLoader::load`].
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Verification(#[from] ChainVerificationError),
}

/// Fetches a chain through a [`LinkSource`] and verifies it.
#[derive(Clone)]
pub struct ChainLoader {
    source: Arc<dyn LinkSource>,
    store: Option<Arc<dyn LinkStore>>,
    verifier: ChainVerifier,
}

impl ChainLoader {
    #[must_use]
    pub fn new(source: Arc<dyn LinkSource>, verifier: ChainVerifier) -> Self {
        Self {
            source,
            store: None,
            verifier,
        }
    }

    /// Persist every link of a verified chain to `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn LinkStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub const fn verifier(&self) -> &ChainVerifier {
        &self.verifier
    }

    /// Fetch and verify `identity`'s chain.
    ///
    /// With a store attached, links it already holds as verified skip their
    /// hash and signature checks. Every link is still checked for ordering
    /// and against the Merkle leaf.
    ///
    /// # Errors
    /// Returns `LoadError::Source` if fetching fails and
    /// `LoadError::Verification` if the chain does not verify.
    pub async fn load(
        &self,
        identity: &str,
        role: Option<TeamRole>,
    ) -> Result<Vec<ChainLink>, LoadError> {
        let raw_links = self.source.fetch_raw_links(identity).await?;
        let merkle_leaf = self.source.fetch_merkle_leaf(identity).await?;
        debug!(identity, links = raw_links.len(), "fetched chain");

        let trusted = match &self.store {
            Some(store) => load_trusted(store.as_ref(), &raw_links).await,
            None => HashMap::new(),
        };
        let links = self.verifier.verify_chain_with_trusted(
            &raw_links,
            &trusted,
            merkle_leaf.as_ref(),
            role,
        )?;

        if let Some(store) = &self.store {
            for link in &links {
                store.store_cached_link(link).await?;
            }
        }
        info!(identity, links = links.len(), "loaded chain");
        Ok(links)
    }
}

/// Stored links for the ids the raw links assert.
///
/// Unparseable raw links are left to verification to report. An unreadable
/// store entry only costs the fast path for that link.
async fn load_trusted(
    store: &dyn LinkStore,
    raw_links: &[Vec<u8>],
) -> HashMap<LinkId, ChainLink> {
    let mut trusted = HashMap::new();
    for raw in raw_links {
        let Ok(id) = ServerLinkRecord::parse(raw).and_then(|record| record.asserted_id()) else {
            continue;
        };
        match store.load_cached_link(&id).await {
            Ok(Some(link)) => {
                trusted.insert(id, link);
            }
            Ok(None) => {}
            Err(e) => warn!(link_id = %id, error = %e, "ignoring unreadable stored link"),
        }
    }
    debug!(hits = trusted.len(), "loaded trusted links");
    trusted
}

impl std::fmt::Debug for ChainLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainLoader")
            .field("verifier", &self.verifier)
            .field("store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}
