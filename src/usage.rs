// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metered read/write accounting against daily ceilings.
//!
//! The remote store bills per document read and per document written, with
//! a free daily allowance. The meter counts both inside a rolling 24 h
//! window and answers whether another read is still affordable.
//!
//! The window is evaluated lazily: every public call first checks whether
//! 24 h have passed since `window_start` and, if so, zeroes both counters.
//! No timer runs.
//!
//! # Example
//!
//! ```
//! use inbox_sync::{UsageLevel, UsageLimits};
//!
//! let limits = UsageLimits::default();
//! assert_eq!(UsageLevel::classify(10, limits.daily_reads, limits.warn_ratio), UsageLevel::Normal);
//! assert_eq!(UsageLevel::classify(40_000, limits.daily_reads, limits.warn_ratio), UsageLevel::Warn);
//! assert_eq!(UsageLevel::classify(50_001, limits.daily_reads, limits.warn_ratio), UsageLevel::Exceeded);
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Length of one accounting window.
pub const USAGE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Counters for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageStats {
    pub reads: u64,
    pub writes: u64,
    pub window_start: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    Reads,
    Writes,
}

impl UsageKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reads => "reads",
            Self::Writes => "writes",
        }
    }
}

impl std::fmt::Display for UsageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How close a counter is to its ceiling.
///
/// - **Normal** (< warn ratio): no action
/// - **Warn** (≥ warn ratio): logged once, nothing blocked
/// - **Exceeded** (> ceiling): operations of that kind are skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UsageLevel {
    Normal = 0,
    Warn = 1,
    Exceeded = 2,
}

impl UsageLevel {
    #[must_use]
    pub fn classify(used: u64, limit: u64, warn_ratio: f64) -> Self {
        if used > limit {
            Self::Exceeded
        } else if used as f64 >= limit as f64 * warn_ratio {
            Self::Warn
        } else {
            Self::Normal
        }
    }

    #[must_use]
    pub fn allows(&self) -> bool {
        !matches!(self, Self::Exceeded)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal usage",
            Self::Warn => "Warning - approaching daily ceiling",
            Self::Exceeded => "Exceeded - operations skipped until window resets",
        }
    }
}

impl std::fmt::Display for UsageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Daily ceilings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageLimits {
    pub daily_reads: u64,
    pub daily_writes: u64,
    /// Fraction of a ceiling at which `Warn` begins
    pub warn_ratio: f64,
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            daily_reads: 50_000,
            daily_writes: 20_000,
            warn_ratio: 0.8,
        }
    }
}

/// Thread-safe usage meter. Mutated only through its methods.
pub struct UsageMeter {
    limits: UsageLimits,
    stats: Mutex<UsageStats>,
}

impl UsageMeter {
    #[must_use]
    pub fn new(limits: UsageLimits) -> Self {
        Self {
            limits,
            stats: Mutex::new(UsageStats {
                reads: 0,
                writes: 0,
                window_start: Instant::now(),
            }),
        }
    }

    /// Add `n` metered reads. Returns the new read total.
    pub fn record_reads(&self, n: u64) -> u64 {
        let reads = self.with_window(|stats| {
            stats.reads = stats.reads.saturating_add(n);
            stats.reads
        });
        crate::metrics::set_usage(UsageKind::Reads.as_str(), reads);
        reads
    }

    /// Add `n` metered writes. Returns the new write total.
    pub fn record_writes(&self, n: u64) -> u64 {
        let writes = self.with_window(|stats| {
            stats.writes = stats.writes.saturating_add(n);
            stats.writes
        });
        crate::metrics::set_usage(UsageKind::Writes.as_str(), writes);
        writes
    }

    #[must_use]
    pub fn snapshot(&self) -> UsageStats {
        self.with_window(|stats| *stats)
    }

    /// False once reads exceed the daily read ceiling.
    #[must_use]
    pub fn under_limit(&self) -> bool {
        self.with_window(|stats| stats.reads <= self.limits.daily_reads)
    }

    /// False once writes exceed the daily write ceiling.
    #[must_use]
    pub fn writes_under_limit(&self) -> bool {
        self.with_window(|stats| stats.writes <= self.limits.daily_writes)
    }

    #[must_use]
    pub fn read_level(&self) -> UsageLevel {
        let reads = self.snapshot().reads;
        UsageLevel::classify(reads, self.limits.daily_reads, self.limits.warn_ratio)
    }

    #[must_use]
    pub fn write_level(&self) -> UsageLevel {
        let writes = self.snapshot().writes;
        UsageLevel::classify(writes, self.limits.daily_writes, self.limits.warn_ratio)
    }

    #[must_use]
    pub fn level(&self, kind: UsageKind) -> UsageLevel {
        match kind {
            UsageKind::Reads => self.read_level(),
            UsageKind::Writes => self.write_level(),
        }
    }

    /// `(used, limit)` for one counter.
    #[must_use]
    pub fn usage_of(&self, kind: UsageKind) -> (u64, u64) {
        let stats = self.snapshot();
        match kind {
            UsageKind::Reads => (stats.reads, self.limits.daily_reads),
            UsageKind::Writes => (stats.writes, self.limits.daily_writes),
        }
    }

    /// Time until the current window rolls over.
    #[must_use]
    pub fn resets_in(&self) -> Duration {
        let start = self.snapshot().window_start;
        (start + USAGE_WINDOW).saturating_duration_since(Instant::now())
    }

    #[must_use]
    pub fn limits(&self) -> UsageLimits {
        self.limits
    }

    fn with_window<R>(&self, f: impl FnOnce(&mut UsageStats) -> R) -> R {
        let mut stats = self.stats.lock();
        let now = Instant::now();
        if now.duration_since(stats.window_start) >= USAGE_WINDOW {
            *stats = UsageStats {
                reads: 0,
                writes: 0,
                window_start: now,
            };
        }
        f(&mut stats)
    }
}

impl Default for UsageMeter {
    fn default() -> Self {
        Self::new(UsageLimits::default())
    }
}
