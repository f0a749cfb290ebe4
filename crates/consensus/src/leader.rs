//! Leader election - deterministic, time-driven rotation over the validator set
//!
//! The round is `unix_seconds / window`. The leader for a round is chosen by
//! hashing the round number and reducing the digest modulo the number of
//! validators, taken in sorted order. No messages are exchanged: any node with
//! the same validator set computes the same leader, and can compute every
//! future leader in advance.

use crate::registry::ValidatorRegistry;
use crate::types::{Clock, ElectionRound, NodeRole, ValidatorId};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Election errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionError {
    #[error("no validators registered, no leader available")]
    NoValidators,
}

/// Compute the round for a unix timestamp
pub fn current_round(unix_secs: u64, window_secs: u64) -> ElectionRound {
    ElectionRound::from_unix(unix_secs, window_secs)
}

/// Seed derived from the round's decimal representation
pub fn round_seed(round: ElectionRound) -> u64 {
    let digest = blake3::hash(round.to_string().as_bytes());
    let bytes = digest.as_bytes();
    let mut low = [0u8; 8];
    low.copy_from_slice(&bytes[24..32]);
    u64::from_be_bytes(low)
}

/// Elect the leader for a round
///
/// The input order does not matter; identities are sorted and deduplicated
/// before indexing.
pub fn elect_leader(
    round: ElectionRound,
    validators: &[ValidatorId],
) -> Result<ValidatorId, ElectionError> {
    let mut ordered: Vec<&ValidatorId> = validators.iter().collect();
    ordered.sort();
    ordered.dedup();

    if ordered.is_empty() {
        return Err(ElectionError::NoValidators);
    }

    let index = (round_seed(round) % ordered.len() as u64) as usize;
    Ok(ordered[index].clone())
}

/// Outcome of evaluating the election
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Election {
    pub round: ElectionRound,
    pub leader: ValidatorId,
    pub is_local_leader: bool,
}

impl Election {
    /// Role of the local node in this round
    pub fn role(&self) -> NodeRole {
        if self.is_local_leader {
            NodeRole::Leader
        } else {
            NodeRole::Validator
        }
    }
}

/// Last evaluated election, cached per process
#[derive(Debug, Clone, Default, Serialize)]
pub struct LeaderState {
    pub round: ElectionRound,
    pub leader: Option<ValidatorId>,
    pub is_leader: bool,
}

/// Stateful election driver
///
/// Holds the clock, the round window and the cached `LeaderState`. Evaluation
/// only ever writes the cache, never the registry.
pub struct LeaderElection {
    clock: Arc<dyn Clock>,
    window_secs: u64,
    state: RwLock<LeaderState>,
}

impl LeaderElection {
    pub fn new(clock: Arc<dyn Clock>, window_secs: u64) -> Self {
        let window_secs = window_secs.max(1);
        let round = current_round(clock.unix_seconds(), window_secs);
        Self {
            clock,
            window_secs,
            state: RwLock::new(LeaderState {
                round,
                ..Default::default()
            }),
        }
    }

    /// Round for the current wall-clock time
    pub fn current_round(&self) -> ElectionRound {
        current_round(self.clock.unix_seconds(), self.window_secs)
    }

    /// Evaluate the election for the current round and refresh the cache
    ///
    /// The clock is read under the cache lock and the cached round never moves
    /// backwards, even if the wall clock does.
    pub fn evaluate(&self, registry: &ValidatorRegistry) -> Result<Election, ElectionError> {
        let mut state = self.state.write();
        let round = self.current_round().max(state.round);
        let validators = registry.all_validators();
        let elected = elect_leader(round, &validators);
        state.round = round;

        match elected {
            Ok(leader) => {
                let is_local_leader = leader == registry.local_id();
                if state.leader.as_ref() != Some(&leader) {
                    tracing::info!(
                        "Elected new leader for round {}: {} (me: {})",
                        round,
                        leader,
                        is_local_leader
                    );
                }
                state.leader = Some(leader.clone());
                state.is_leader = is_local_leader;

                Ok(Election {
                    round,
                    leader,
                    is_local_leader,
                })
            }
            Err(e) => {
                tracing::warn!("Election for round {} failed: {}", round, e);
                state.leader = None;
                state.is_leader = false;
                Err(e)
            }
        }
    }

    /// Last evaluated election
    pub fn cached(&self) -> LeaderState {
        self.state.read().clone()
    }

    /// Leaders for `count` rounds starting at `from`
    pub fn schedule(
        &self,
        registry: &ValidatorRegistry,
        from: ElectionRound,
        count: usize,
    ) -> Result<Vec<(ElectionRound, ValidatorId)>, ElectionError> {
        let validators = registry.all_validators();
        let mut round = from;
        let mut schedule = Vec::with_capacity(count);
        for _ in 0..count {
            schedule.push((round, elect_leader(round, &validators)?));
            round = round.next();
        }
        Ok(schedule)
    }
}
