//! Scope identity.
//!
//! Tokens are compared by identity, never by structure (spec §9): a
//! monotonic counter behind an atomic is sufficient, mirroring the
//! `NodeIndex`/`ScopeId`-style counters used elsewhere in this corpus for
//! tree node identity.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT: AtomicU64 = AtomicU64::new(0);

/// Unique, comparable identity of a [`super::Scope`]. Stable for the
/// process lifetime; never reused even after the scope it names is closed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    pub(crate) fn fresh() -> ScopeId {
        ScopeId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScopeId({})", self.0)
    }
}
