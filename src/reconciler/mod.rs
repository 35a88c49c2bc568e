//! # Reconcilers
//!
//! Drive declared specs to their remote state through the
//! [`TrustFrameworkApi`](crate::client::TrustFrameworkApi) seam. One
//! reconciler per resource kind, each exposing the same four-operation
//! surface plus a convergence-style `apply`.

use crate::client::ApiError;
use crate::models::ValidationError;
use async_trait::async_trait;
use thiserror::Error;

pub mod key_container;
pub mod policy;
pub mod validation;

pub use key_container::KeyContainerReconciler;
pub use policy::PolicyReconciler;

/// Failure of a reconciliation step.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The declared spec is invalid; no remote call was made.
    #[error("validation failed: {}", format_errors(.0))]
    Validation(Vec<ValidationError>),

    /// A remote operation failed. The dedicated not-found signal never
    /// reaches this variant from a read; it is translated to an absent
    /// observed state instead.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The resource vanished remotely between a mutation and its read-back.
    #[error("resource {0} disappeared during reconciliation")]
    Vanished(String),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The four operations every resource kind supports.
///
/// `read` reports absence as `Ok(None)`; a not-found response is an expected
/// signal, never an error. Each call is an independent request/response
/// cycle with no state held in between; cancellation is dropping the
/// returned future, and any partial remote effect is picked up by the next
/// `read`.
#[async_trait]
pub trait Reconcile: Send + Sync {
    type Spec;
    type Observed;

    /// Create the resource remotely and return what was observed afterwards.
    async fn create(&self, spec: &Self::Spec) -> Result<Self::Observed, ReconcileError>;

    /// Fetch the current remote state, or `None` if the resource no longer
    /// exists.
    async fn read(&self, id: &str) -> Result<Option<Self::Observed>, ReconcileError>;

    /// Bring an existing resource in line with the spec.
    async fn update(&self, id: &str, spec: &Self::Spec) -> Result<Self::Observed, ReconcileError>;

    /// Delete the resource. Success clears the caller's handle.
    async fn delete(&self, id: &str) -> Result<(), ReconcileError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_join_into_one_message() {
        let err = ReconcileError::Validation(vec![
            ValidationError::new("use", "required for key type 'secret'"),
            ValidationError::new("kty", "required for key type 'secret'"),
        ]);

        assert_eq!(
            err.to_string(),
            "validation failed: use: required for key type 'secret'; kty: required for key type 'secret'"
        );
    }

    #[test]
    fn test_api_errors_pass_through_transparently() {
        let err = ReconcileError::from(ApiError::status(500, "boom".to_string()));
        assert_eq!(err.to_string(), "unexpected status 500 with response: boom");
    }
}
