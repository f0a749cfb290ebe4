//! Attestation pool - per-task, per-validator attestations
//!
//! The pool is a passive store: one entry per (task, validator), last write
//! wins. It makes no quorum decisions.
//!
//! `sign_attestation` / `verify_attestation` hash the task id, payload and
//! signer together. No private key is involved, so a "signature" proves
//! nothing about who produced it.

use crate::registry::ValidatorRegistry;
use crate::types::{TaskId, ValidatorId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Attestation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttestationError {
    #[error("validator {0} is not registered")]
    Unauthorized(ValidatorId),
}

/// A single validator's attestation for a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Attestation payload (opaque)
    pub payload: String,
    /// Unix seconds
    pub timestamp: i64,
    /// Hash-based signature, if the validator supplied one
    pub signature: Option<String>,
}

impl Attestation {
    pub fn new(payload: impl Into<String>, timestamp: i64) -> Self {
        Self {
            payload: payload.into(),
            timestamp,
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Check the attached signature. `None` if no signature was supplied.
    pub fn verify(&self, task_id: &str, signer: &str) -> Option<bool> {
        self.signature
            .as_deref()
            .map(|sig| verify_attestation(task_id, &self.payload, signer, sig))
    }
}

/// Hex digest of (task id, payload, signer)
pub fn sign_attestation(task_id: &str, payload: &str, signer: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(task_id.as_bytes());
    hasher.update(payload.as_bytes());
    hasher.update(signer.as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

/// Recompute the digest and compare
pub fn verify_attestation(task_id: &str, payload: &str, signer: &str, signature: &str) -> bool {
    sign_attestation(task_id, payload, signer) == signature
}

/// Thread-safe attestation store
#[derive(Default)]
pub struct AttestationPool {
    attestations: RwLock<HashMap<TaskId, HashMap<ValidatorId, Attestation>>>,
}

impl AttestationPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a validator's attestation for a task
    ///
    /// Rejected without touching the pool if the validator is not registered.
    pub fn submit(
        &self,
        registry: &ValidatorRegistry,
        task_id: &str,
        validator_id: &str,
        attestation: Attestation,
    ) -> Result<(), AttestationError> {
        if !registry.is_validator(validator_id) {
            tracing::warn!(
                "Rejected attestation for task {} from unregistered validator {}",
                task_id,
                validator_id
            );
            return Err(AttestationError::Unauthorized(validator_id.to_string()));
        }

        let replaced = self
            .attestations
            .write()
            .entry(task_id.to_string())
            .or_default()
            .insert(validator_id.to_string(), attestation)
            .is_some();

        tracing::debug!(
            "Attestation for task {} from {} ({})",
            task_id,
            validator_id,
            if replaced { "replaced" } else { "new" }
        );
        Ok(())
    }

    /// Attestation payloads for a task, keyed by validator
    pub fn get(&self, task_id: &str) -> HashMap<ValidatorId, String> {
        self.attestations
            .read()
            .get(task_id)
            .map(|by_validator| {
                by_validator
                    .iter()
                    .map(|(validator, att)| (validator.clone(), att.payload.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Full attestation records for a task
    pub fn get_detailed(&self, task_id: &str) -> HashMap<ValidatorId, Attestation> {
        self.attestations
            .read()
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of tasks with at least one attestation
    pub fn task_count(&self) -> usize {
        self.attestations.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ValidatorRegistry {
        ValidatorRegistry::new("A", ["B", "C"])
    }

    #[test]
    fn test_aggregation() {
        let registry = registry();
        let pool = AttestationPool::new();

        pool.submit(&registry, "T", "A", Attestation::new("payloadA", 1))
            .unwrap();
        pool.submit(&registry, "T", "B", Attestation::new("payloadB", 2))
            .unwrap();

        let expected: HashMap<ValidatorId, String> = [
            ("A".to_string(), "payloadA".to_string()),
            ("B".to_string(), "payloadB".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(pool.get("T"), expected);

        // Resubmission overwrites only A's entry
        pool.submit(&registry, "T", "A", Attestation::new("payloadA2", 3))
            .unwrap();
        let attestations = pool.get("T");
        assert_eq!(attestations.len(), 2);
        assert_eq!(attestations["A"], "payloadA2");
        assert_eq!(attestations["B"], "payloadB");
        assert_eq!(pool.get_detailed("T")["A"].timestamp, 3);
    }

    #[test]
    fn test_unauthorized_never_mutates() {
        let registry = registry();
        let pool = AttestationPool::new();

        let err = pool
            .submit(&registry, "T", "Mallory", Attestation::new("forged", 1))
            .unwrap_err();
        assert_eq!(err, AttestationError::Unauthorized("Mallory".to_string()));
        assert!(pool.get("T").is_empty());
        assert_eq!(pool.task_count(), 0);

        pool.submit(&registry, "T", "C", Attestation::new("ok", 1))
            .unwrap();
        assert!(pool
            .submit(&registry, "T", "Mallory", Attestation::new("forged", 2))
            .is_err());
        assert_eq!(pool.get("T").len(), 1);
    }

    #[test]
    fn test_unknown_task_is_empty() {
        let pool = AttestationPool::new();
        assert!(pool.get("missing").is_empty());
    }

    #[test]
    fn test_task_count() {
        let registry = registry();
        let pool = AttestationPool::new();
        pool.submit(&registry, "T1", "A", Attestation::new("x", 1))
            .unwrap();
        pool.submit(&registry, "T1", "B", Attestation::new("x", 1))
            .unwrap();
        pool.submit(&registry, "T2", "A", Attestation::new("x", 1))
            .unwrap();
        assert_eq!(pool.task_count(), 2);
    }

    #[test]
    fn test_sign_and_verify() {
        let sig = sign_attestation("T1", "validated_computation", "A");
        assert_eq!(sig.len(), 64);
        assert!(verify_attestation("T1", "validated_computation", "A", &sig));
        assert!(!verify_attestation("T1", "validated_computation", "B", &sig));
        assert!(!verify_attestation("T2", "validated_computation", "A", &sig));

        let att = Attestation::new("validated_computation", 1).with_signature(sig);
        assert_eq!(att.verify("T1", "A"), Some(true));
        assert_eq!(att.verify("T1", "B"), Some(false));
        assert_eq!(Attestation::new("x", 1).verify("T1", "A"), None);
    }
}
