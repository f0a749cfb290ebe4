//! Core identity, round and clock types shared by the coordination components

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Validator identity (opaque, unique within a registry)
pub type ValidatorId = String;

/// Task identity (caller-supplied or generated)
pub type TaskId = String;

/// Default length of an election round in seconds
pub const DEFAULT_ROUND_WINDOW_SECS: u64 = 100;

/// Election round number, derived from wall-clock time
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ElectionRound(pub u64);

impl ElectionRound {
    /// Round containing the given unix timestamp
    pub fn from_unix(unix_secs: u64, window_secs: u64) -> Self {
        Self(unix_secs / window_secs.max(1))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for ElectionRound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node role in the current round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Dispatches tasks to the compute gateway
    Leader,
    /// Attests to results produced by the leader
    Validator,
}

/// Source of wall-clock time for round computation
pub trait Clock: Send + Sync {
    /// Seconds since the unix epoch
    fn unix_seconds(&self) -> u64;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Manually driven clock, for simulations and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(unix_secs: u64) -> Self {
        Self {
            now: AtomicU64::new(unix_secs),
        }
    }

    pub fn set(&self, unix_secs: u64) {
        self.now.store(unix_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn unix_seconds(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
