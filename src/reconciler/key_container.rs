//! # Key Material State Machine
//!
//! Maps a declared key container spec onto the remote call sequence
//! create, materialize (generate | upload secret | upload certificate |
//! upload PKCS#12), read. The materialization path is decided locally by
//! validation; the remote side is never asked which path applies.

use crate::client::{ApiError, TrustFrameworkApi};
use crate::models::{
    CertificateUpload, KeyAttributes, KeyContainerObservedState, KeyContainerSpec,
    Materialization, Pkcs12Upload,
};
use crate::reconciler::{validation, Reconcile, ReconcileError};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Reconciles trust framework key sets.
pub struct KeyContainerReconciler {
    api: Arc<dyn TrustFrameworkApi>,
}

impl fmt::Debug for KeyContainerReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyContainerReconciler").finish_non_exhaustive()
    }
}

impl KeyContainerReconciler {
    pub fn new(api: Arc<dyn TrustFrameworkApi>) -> Self {
        Self { api }
    }

    /// Issue the single materialization call selected for the container.
    ///
    /// A failure here leaves the freshly created container in place without
    /// any rollback; the next `read` reveals the true remote state and a
    /// re-run of `create` (after `delete`) is the recovery path.
    async fn materialize(&self, id: &str, plan: &Materialization) -> Result<(), ApiError> {
        match plan {
            Materialization::Generate { kty, use_, nbf, exp } => {
                debug!("requesting generated key for key set {id}");
                let key = KeyAttributes {
                    kty: Some(*kty),
                    use_: Some(*use_),
                    nbf: *nbf,
                    exp: *exp,
                    k: None,
                };
                self.api.generate_key(id, &key).await
            }
            Materialization::UploadSecret { kty, use_, k, nbf, exp } => {
                debug!("uploading secret for key set {id}");
                let key = KeyAttributes {
                    kty: Some(*kty),
                    use_: Some(*use_),
                    nbf: *nbf,
                    exp: *exp,
                    k: Some(k.clone()),
                };
                self.api.upload_secret(id, &key).await
            }
            Materialization::UploadCertificate { certificate } => {
                debug!("uploading certificate for key set {id}");
                let upload = CertificateUpload {
                    key: certificate.clone(),
                };
                self.api.upload_certificate(id, &upload).await
            }
            Materialization::UploadPkcs12 { pfx, password } => {
                debug!("uploading PKCS#12 bundle for key set {id}");
                let upload = Pkcs12Upload {
                    key: pfx.clone(),
                    password: password.clone(),
                };
                self.api.upload_pkcs12(id, &upload).await
            }
        }
    }

    /// Whether the observed remote state already satisfies the declared
    /// materialization. Upload paths carry opaque material the active-key
    /// read does not echo back, so for those the presence of an active key
    /// is what can be checked.
    fn satisfied_by(plan: &Materialization, observed: &KeyContainerObservedState) -> bool {
        match plan {
            Materialization::Generate { kty, use_, nbf, exp }
            | Materialization::UploadSecret { kty, use_, nbf, exp, .. } => {
                observed.kty == Some(*kty)
                    && observed.use_ == Some(*use_)
                    && (nbf.is_none() || observed.nbf == *nbf)
                    && (exp.is_none() || observed.exp == *exp)
            }
            Materialization::UploadCertificate { .. } | Materialization::UploadPkcs12 { .. } => {
                observed.has_active_key()
            }
        }
    }

    /// Converge the remote key set on the declared spec.
    ///
    /// Returns the observed state and whether any remote mutation was
    /// issued. Key material is immutable remotely, so a mismatch is
    /// resolved by recreating the container.
    pub async fn apply(
        &self,
        spec: &KeyContainerSpec,
    ) -> Result<(KeyContainerObservedState, bool), ReconcileError> {
        let plan =
            validation::validate_key_container_spec(spec).map_err(ReconcileError::Validation)?;

        match self.read(&spec.name).await? {
            None => Ok((self.create(spec).await?, true)),
            Some(observed) if Self::satisfied_by(&plan, &observed) => {
                debug!("key set {} already satisfies its spec, skipping", observed.id);
                Ok((observed, false))
            }
            Some(observed) => {
                info!("key set {} drifted from its spec, recreating", observed.id);
                Ok((self.update(&observed.id, spec).await?, true))
            }
        }
    }
}

#[async_trait]
impl Reconcile for KeyContainerReconciler {
    type Spec = KeyContainerSpec;
    type Observed = KeyContainerObservedState;

    async fn create(&self, spec: &Self::Spec) -> Result<Self::Observed, ReconcileError> {
        // Validation happens before the container is allocated; a bad spec
        // never causes a remote call.
        let plan =
            validation::validate_key_container_spec(spec).map_err(ReconcileError::Validation)?;

        let container = self.api.create_key_container(&spec.name).await?;
        info!("created trust framework key set {}", container.id);

        self.materialize(&container.id, &plan).await?;

        match self.read(&container.id).await? {
            Some(observed) => Ok(observed),
            None => Err(ReconcileError::Vanished(container.id)),
        }
    }

    async fn read(&self, id: &str) -> Result<Option<Self::Observed>, ReconcileError> {
        let container = match self.api.get_key_container(id).await {
            Ok(container) => container,
            Err(ApiError::NotFound) => {
                debug!("key set {id} was not found, clearing state");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut observed = KeyContainerObservedState {
            id: container.id,
            ..KeyContainerObservedState::default()
        };

        // A container without keys is a valid state: created but not yet
        // materialized.
        if container.keys.is_empty() {
            return Ok(Some(observed));
        }

        let key = match self.api.get_active_key(id).await {
            Ok(key) => key,
            Err(ApiError::NotFound) => {
                debug!("active key for key set {id} was not found, clearing state");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        observed.use_ = key.use_;
        observed.kty = key.kty;
        observed.nbf = key.nbf;
        observed.exp = key.exp;
        Ok(Some(observed))
    }

    async fn update(&self, id: &str, spec: &Self::Spec) -> Result<Self::Observed, ReconcileError> {
        // Remote key material cannot be replaced in place; every attribute
        // forces a new container.
        self.delete(id).await?;
        self.create(spec).await
    }

    async fn delete(&self, id: &str) -> Result<(), ReconcileError> {
        self.api.delete_key_container(id).await?;
        info!("deleted trust framework key set {id}");
        Ok(())
    }
}
