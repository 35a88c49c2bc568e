//! # Policy Reconciler
//!
//! Drives create / read / update / delete for a named trust framework
//! policy. The canonical XML comparator decides inside [`apply`] whether a
//! desired document actually differs from the remote copy; `update` itself
//! is unconditional once invoked.
//!
//! [`apply`]: PolicyReconciler::apply

use crate::canonical;
use crate::client::{ApiError, TrustFrameworkApi};
use crate::models::{PolicyObservedState, PolicySpec};
use crate::reconciler::{validation, Reconcile, ReconcileError};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Reconciles trust framework policies.
pub struct PolicyReconciler {
    api: Arc<dyn TrustFrameworkApi>,
}

impl fmt::Debug for PolicyReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyReconciler").finish_non_exhaustive()
    }
}

impl PolicyReconciler {
    pub fn new(api: Arc<dyn TrustFrameworkApi>) -> Self {
        Self { api }
    }

    /// Converge the remote policy on the declared spec.
    ///
    /// Returns the observed state and whether any remote mutation was
    /// issued. The update is gated on canonical equivalence, so
    /// formatting-only drift (whitespace, comments, processing
    /// instructions) produces no remote call.
    pub async fn apply(
        &self,
        spec: &PolicySpec,
    ) -> Result<(PolicyObservedState, bool), ReconcileError> {
        validation::validate_policy_spec(spec).map_err(ReconcileError::Validation)?;

        match self.read(&spec.name).await? {
            None => Ok((self.create(spec).await?, true)),
            Some(current) => {
                if canonical::equivalent(&current.document, &spec.document) {
                    debug!(
                        "policy {} is canonically unchanged, skipping update",
                        spec.name
                    );
                    Ok((current, false))
                } else {
                    Ok((self.update(&spec.name, spec).await?, true))
                }
            }
        }
    }
}

#[async_trait]
impl Reconcile for PolicyReconciler {
    type Spec = PolicySpec;
    type Observed = PolicyObservedState;

    async fn create(&self, spec: &Self::Spec) -> Result<Self::Observed, ReconcileError> {
        validation::validate_policy_spec(spec).map_err(ReconcileError::Validation)?;

        // The policy name travels inside the document; the remote side keys
        // the object by it, so the spec name becomes the stable identifier.
        self.api.create_policy(&spec.document).await?;
        info!("created trust framework policy {}", spec.name);

        match self.read(&spec.name).await? {
            Some(observed) => Ok(observed),
            None => Err(ReconcileError::Vanished(spec.name.clone())),
        }
    }

    async fn read(&self, name: &str) -> Result<Option<Self::Observed>, ReconcileError> {
        match self.api.get_policy(name).await {
            Ok(document) => Ok(Some(PolicyObservedState {
                name: name.to_string(),
                document,
            })),
            Err(ApiError::NotFound) => {
                debug!("policy {name} was not found, clearing state");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, name: &str, spec: &Self::Spec) -> Result<Self::Observed, ReconcileError> {
        // Unconditional once invoked; no-op suppression happens in apply
        // through the comparator.
        self.api.update_policy(name, &spec.document).await?;
        info!("updated trust framework policy {name}");

        match self.read(name).await? {
            Some(observed) => Ok(observed),
            None => Err(ReconcileError::Vanished(name.to_string())),
        }
    }

    async fn delete(&self, name: &str) -> Result<(), ReconcileError> {
        self.api.delete_policy(name).await?;
        info!("deleted trust framework policy {name}");
        Ok(())
    }
}
