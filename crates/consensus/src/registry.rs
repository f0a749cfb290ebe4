//! Validator registry - the set of identities allowed to lead and attest

use crate::types::ValidatorId;
use parking_lot::RwLock;
use std::collections::BTreeSet;

/// Thread-safe validator membership set
///
/// Identities are kept sorted so every node iterates them in the same order.
/// The local identity is always a member.
pub struct ValidatorRegistry {
    /// This node's identity
    local_id: ValidatorId,
    /// Registered validators
    validators: RwLock<BTreeSet<ValidatorId>>,
}

impl ValidatorRegistry {
    /// Build a registry from a configured list plus the local identity
    pub fn new<I, S>(local_id: impl Into<ValidatorId>, configured: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ValidatorId>,
    {
        let local_id = local_id.into();
        let mut validators: BTreeSet<ValidatorId> =
            configured.into_iter().map(Into::into).collect();
        validators.insert(local_id.clone());

        tracing::info!(
            "Validator registry initialized with {} validators (local: {})",
            validators.len(),
            local_id
        );

        Self {
            local_id,
            validators: RwLock::new(validators),
        }
    }

    /// This node's identity
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Check whether an identity is a registered validator
    pub fn is_validator(&self, id: &str) -> bool {
        self.validators.read().contains(id)
    }

    /// All validators in sorted order
    pub fn all_validators(&self) -> Vec<ValidatorId> {
        self.validators.read().iter().cloned().collect()
    }

    /// Register an additional validator. Returns false if already present.
    pub fn register(&self, id: impl Into<ValidatorId>) -> bool {
        let id = id.into();
        let added = self.validators.write().insert(id.clone());
        if added {
            tracing::info!("Registered validator {}", id);
        }
        added
    }

    pub fn len(&self) -> usize {
        self.validators.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.read().is_empty()
    }
}
