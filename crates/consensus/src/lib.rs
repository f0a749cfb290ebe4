//! Coprocessor consensus - leader rotation and attestations
//!
//! Architecture:
//! - Validators share a static registry of identities
//! - Time is cut into fixed rounds; each round deterministically elects one leader
//! - Only the leader dispatches tasks to the compute gateway
//! - Validators attest to results; attestations are stored, not tallied

pub mod attestation;
pub mod leader;
pub mod registry;
pub mod types;

pub use attestation::{
    sign_attestation, verify_attestation, Attestation, AttestationError, AttestationPool,
};
pub use leader::{current_round, elect_leader, Election, ElectionError, LeaderElection, LeaderState};
pub use registry::ValidatorRegistry;
pub use types::*;
