//! Run configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Score below which a tile is treated as having no matching atom.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1e-7;

/// Per-attempt timeout when acquiring output stripe locks.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5);

/// Output resolution multiplier. Each value has its own atom bank in a dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpsampleFactor {
    X2,
    X4,
    X8,
}

impl UpsampleFactor {
    pub fn value(self) -> u32 {
        match self {
            UpsampleFactor::X2 => 2,
            UpsampleFactor::X4 => 4,
            UpsampleFactor::X8 => 8,
        }
    }

    #[inline]
    pub fn scale(self) -> usize {
        self.value() as usize
    }
}

impl TryFrom<u32> for UpsampleFactor {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            2 => Ok(UpsampleFactor::X2),
            4 => Ok(UpsampleFactor::X4),
            8 => Ok(UpsampleFactor::X8),
            other => Err(Error::InvalidFactor(other)),
        }
    }
}

impl std::fmt::Display for UpsampleFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x", self.value())
    }
}

/// Tunables of a single amplification run.
#[derive(Debug, Clone)]
pub struct AmplifyConfig {
    /// Minimum correlation score for an atom to be kept.
    pub match_threshold: f32,
    /// Number of independent partitions the matching stage is split into.
    pub matching_chunks: usize,
    /// Timeout of each lock attempt during synthesis. Attempts are retried forever.
    pub lock_timeout: Duration,
}

impl Default for AmplifyConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            matching_chunks: common::parallel::default_chunk_count(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl AmplifyConfig {
    /// Set the minimum matching score.
    pub fn with_match_threshold(mut self, threshold: f32) -> Self {
        assert!(
            threshold >= 0.0 && threshold.is_finite(),
            "match_threshold must be finite and non-negative"
        );
        self.match_threshold = threshold;
        self
    }

    /// Set the number of matching partitions.
    pub fn with_matching_chunks(mut self, chunks: usize) -> Self {
        assert!(chunks > 0, "matching_chunks must be > 0");
        self.matching_chunks = chunks;
        self
    }

    /// Set the per-attempt lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        assert!(!timeout.is_zero(), "lock_timeout must be non-zero");
        self.lock_timeout = timeout;
        self
    }
}
