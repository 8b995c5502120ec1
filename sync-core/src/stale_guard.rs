//! Generation counter for discarding superseded async results.
//!
//! Capture a token before an async operation; when it resolves, drop the
//! result if the token has gone stale.
//!
//! Two modes:
//! - **Exclusive** ([`StaleGuard::begin`]): only the most recently started
//!   operation may apply its result (opening a project).
//! - **Concurrent-safe** ([`StaleGuard::snapshot`]): operations may run side
//!   by side and all apply, as long as no `begin`/`reset` intervened
//!   (loading independent collections of an open project).
//!
//! Each store owns its guard; there is no shared global counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// A snapshot of a guard's generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StaleToken(u64);

impl StaleToken {
    /// The generation this token captured.
    pub fn generation(&self) -> u64 {
        self.0
    }
}

/// Monotonic generation counter.
#[derive(Debug, Default)]
pub struct StaleGuard {
    generation: AtomicU64,
}

impl StaleGuard {
    /// Create a guard at generation 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an exclusive operation, invalidating every earlier token.
    pub fn begin(&self) -> StaleToken {
        StaleToken(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Capture the current generation without invalidating anything.
    pub fn snapshot(&self) -> StaleToken {
        StaleToken(self.generation.load(Ordering::SeqCst))
    }

    /// Invalidate all in-flight work (project or document-set switch).
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// True iff `token` was issued before the latest `begin`/`reset`.
    pub fn is_stale(&self, token: StaleToken) -> bool {
        token.0 != self.generation.load(Ordering::SeqCst)
    }

    /// The current generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_invalidates_previous_tokens() {
        let guard = StaleGuard::new();
        let t1 = guard.begin();
        let t2 = guard.begin();

        assert!(guard.is_stale(t1));
        assert!(!guard.is_stale(t2));
    }

    #[test]
    fn back_to_back_snapshots_are_mutually_valid() {
        let guard = StaleGuard::new();
        let s1 = guard.snapshot();
        let s2 = guard.snapshot();

        assert_eq!(s1, s2);
        assert!(!guard.is_stale(s1));
        assert!(!guard.is_stale(s2));
    }

    #[test]
    fn snapshot_after_begin_shares_its_generation() {
        let guard = StaleGuard::new();
        let t = guard.begin();
        let s = guard.snapshot();

        assert_eq!(t, s);
        assert!(!guard.is_stale(t));
        assert!(!guard.is_stale(s));
    }

    #[test]
    fn reset_invalidates_snapshots_and_begins() {
        let guard = StaleGuard::new();
        let t = guard.begin();
        let s = guard.snapshot();

        guard.reset();

        assert!(guard.is_stale(t));
        assert!(guard.is_stale(s));
        assert!(!guard.is_stale(guard.snapshot()));
    }

    #[test]
    fn begin_invalidates_snapshots() {
        let guard = StaleGuard::new();
        let s = guard.snapshot();
        let _ = guard.begin();
        assert!(guard.is_stale(s));
    }

    #[test]
    fn guards_are_independent() {
        let a = StaleGuard::new();
        let b = StaleGuard::new();
        let token = b.snapshot();

        a.begin();
        a.reset();

        assert!(!b.is_stale(token));
        assert_eq!(b.generation(), 0);
        assert_eq!(a.generation(), 2);
    }
}
