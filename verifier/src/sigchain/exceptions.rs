//! Known-exception tables.
//!
//! Some links already accepted by the network cannot pass a naive hash check:
//! historical client bugs produced links whose payload hash is wrong, and a
//! whitespace-stripping bug dropped the trailing newline from others. Both
//! are keyed by signature id and consulted only after a hash mismatch.
//!
//! The tables are append-only historical data. Entries are matched by exact
//! signature id only.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use sigchain_crypto::SigId;

/// Links accepted unconditionally despite a hash mismatch, with the reason.
///
/// Append-only. Each entry is `(sig id hex, reason)`.
// No production entries are vendored yet, so every mismatch is fatal until
// they are imported verbatim from network history. Tests build their own
// tables with `ExceptionTable::with_bad_link`.
static BAD_LINKS: &[(&str, &str)] = &[];

/// Links whose payload lost its trailing newline before being stored.
///
/// Append-only. Each entry is a sig id hex.
// Empty for the same reason as `BAD_LINKS`.
static WHITESPACE_FIX_LINKS: &[&str] = &[];

/// Lookup tables for links that need a documented workaround.
///
/// [`ExceptionTable::historical`] is what production verification uses;
/// the builder methods exist so callers can run against a narrower table.
#[derive(Debug, Clone, Default)]
pub struct ExceptionTable {
    bad_links: HashMap<SigId, Cow<'static, str>>,
    whitespace_fix: HashSet<SigId>,
}

impl ExceptionTable {
    /// The fixed historical tables.
    #[must_use]
    pub fn historical() -> Self {
        let bad_links = BAD_LINKS
            .iter()
            .filter_map(|(sig_id, reason)| {
                let id = sig_id.parse::<SigId>().ok();
                debug_assert!(id.is_some(), "malformed bad-link entry {sig_id}");
                id.map(|id| (id, Cow::Borrowed(*reason)))
            })
            .collect();
        let whitespace_fix = WHITESPACE_FIX_LINKS
            .iter()
            .filter_map(|sig_id| {
                let id = sig_id.parse::<SigId>().ok();
                debug_assert!(id.is_some(), "malformed whitespace entry {sig_id}");
                id
            })
            .collect();
        Self {
            bad_links,
            whitespace_fix,
        }
    }

    /// A table with no exceptions at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bad_link(mut self, sig_id: SigId, reason: impl Into<Cow<'static, str>>) -> Self {
        self.bad_links.insert(sig_id, reason.into());
        self
    }

    #[must_use]
    pub fn with_whitespace_fix(mut self, sig_id: SigId) -> Self {
        self.whitespace_fix.insert(sig_id);
        self
    }

    /// Reason for unconditionally accepting the link signed as `sig_id`.
    #[must_use]
    pub fn is_bad_link(&self, sig_id: &SigId) -> Option<&str> {
        self.bad_links.get(sig_id).map(AsRef::as_ref)
    }

    /// Whether `sig_id`'s payload must get a trailing newline before hashing.
    #[must_use]
    pub fn needs_whitespace_fix(&self, sig_id: &SigId) -> bool {
        self.whitespace_fix.contains(sig_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bad_links.len() + self.whitespace_fix.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Apply the whitespace fixup: append the single newline the bug stripped.
#[must_use]
pub fn whitespace_fixed(payload: &[u8]) -> Vec<u8> {
    let mut fixed = Vec::with_capacity(payload.len() + 1);
    fixed.extend_from_slice(payload);
    fixed.push(b'\n');
    fixed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn historical_entries_all_parse() {
        let table = ExceptionTable::historical();
        assert_eq!(table.len(), BAD_LINKS.len() + WHITESPACE_FIX_LINKS.len());
    }

    #[test]
    fn builder_entries_are_found() {
        let bad = SigId::digest(b"bad");
        let ws = SigId::digest(b"ws");
        let table = ExceptionTable::empty()
            .with_bad_link(bad, "client bug corrupted prev pointer")
            .with_whitespace_fix(ws);

        assert_eq!(
            table.is_bad_link(&bad),
            Some("client bug corrupted prev pointer")
        );
        assert!(table.is_bad_link(&ws).is_none());
        assert!(table.needs_whitespace_fix(&ws));
        assert!(!table.needs_whitespace_fix(&bad));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn whitespace_fix_appends_exactly_one_newline() {
        assert_eq!(whitespace_fixed(b"{}"), b"{}\n");
        assert_eq!(whitespace_fixed(b""), b"\n");
    }
}
