//! Rolling-window unjust-kill count cache.
//!
//! Counting a player's unjustified kills means an aggregate query over a
//! trailing day / week / month window, which is too expensive to run on
//! every reputation check. Each `(player, period)` pair therefore caches
//! its count together with explicit staleness bookkeeping:
//!
//! - `query_time` — when the count was fetched;
//! - `expire_time` — the earliest instant at which the cached count
//!   becomes provably wrong because the **oldest counted kill** ages out
//!   of the window (`oldest + window`). A window whose kills are all
//!   recent stays valid far into the future; a window with a kill about
//!   to age out expires soon.
//!
//! A window with zero kills has no aging boundary, so such entries are
//! held for a short fixed horizon instead (the configured minimum
//! re-query interval) to avoid hitting the store on every call while
//! still picking up a kill that just happened.
//!
//! Windows refresh independently: fetching the day count never touches
//! the week or month entries.

use std::collections::HashMap;

use tracing::debug;

use crate::error::Result;
use crate::types::{PlayerId, UnjustKillPeriod};

/// Cached state for one `(player, period)` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEntry {
    /// Cached kill count.
    pub count: u32,
    /// Wall-clock time (unix seconds) the count was fetched.
    pub query_time: i64,
    /// Earliest instant the cached count may be an overcount.
    pub expire_time: i64,
}

impl WindowEntry {
    /// Whether this entry may still be returned at `now`.
    #[must_use]
    pub fn is_valid(&self, now: i64) -> bool {
        now < self.expire_time
    }
}

/// Result of one windowed aggregate against the store.
#[derive(Debug, Clone, Copy)]
pub struct WindowSample {
    /// Number of unjustified kills inside the window.
    pub count: u32,
    /// Timestamp of the oldest counted kill, if any.
    pub oldest: Option<i64>,
}

/// Per-player, per-window cache of unjust-kill counts.
#[derive(Debug, Default)]
pub struct UnjustKillCache {
    entries: HashMap<(PlayerId, UnjustKillPeriod), WindowEntry>,
    zero_kill_recheck_secs: i64,
}

impl UnjustKillCache {
    /// Create an empty cache with the given zero-kill re-query horizon.
    #[must_use]
    pub fn new(zero_kill_recheck_secs: i64) -> Self {
        Self {
            entries: HashMap::new(),
            zero_kill_recheck_secs,
        }
    }

    /// Return the cached count for `(player, period)` at `now`, refreshing
    /// through `fetch` when the entry is missing or stale.
    ///
    /// `fetch` runs the windowed aggregate against the store. The caller
    /// is expected to hold this cache's lock across the whole call, which
    /// is what guarantees a single store query for concurrent cold reads
    /// of the same key.
    ///
    /// # Errors
    ///
    /// Propagates the `fetch` error. A failed refresh leaves any previous
    /// (stale) entry in place, so a transient store fault degrades to
    /// slightly stale data instead of no data.
    pub fn count_or_refresh<F>(
        &mut self,
        player: PlayerId,
        period: UnjustKillPeriod,
        now: i64,
        fetch: F,
    ) -> Result<u32>
    where
        F: FnOnce() -> Result<WindowSample>,
    {
        if let Some(entry) = self.entries.get(&(player, period)) {
            if entry.is_valid(now) {
                debug!(%player, %period, count = entry.count, "Unjust kill cache hit");
                return Ok(entry.count);
            }
        }

        let sample = fetch()?;
        let expire_time = match sample.oldest {
            Some(oldest) => oldest + period.window_secs(),
            None => now + self.zero_kill_recheck_secs.min(period.window_secs()),
        };
        let entry = WindowEntry {
            count: sample.count,
            query_time: now,
            expire_time,
        };
        self.entries.insert((player, period), entry);

        debug!(
            %player,
            %period,
            count = entry.count,
            expire_time,
            "Unjust kill cache refreshed"
        );
        Ok(entry.count)
    }

    /// Peek at the cached entry for `(player, period)` without refreshing.
    #[must_use]
    pub fn peek(&self, player: PlayerId, period: UnjustKillPeriod) -> Option<WindowEntry> {
        self.entries.get(&(player, period)).copied()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
