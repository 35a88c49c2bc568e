//! # Remote Resource Client
//!
//! The seam between the reconcilers and the Microsoft Graph trust framework
//! endpoints. Reconcilers only ever talk to the [`TrustFrameworkApi`] trait;
//! the shipped implementation is [`graph::GraphClient`], and tests substitute
//! recording mocks.

use crate::models::{CertificateUpload, KeyAttributes, KeyContainer, Pkcs12Upload};
use async_trait::async_trait;
use thiserror::Error;

pub mod graph;

pub use graph::{
    ClientSecretCredential, GraphClient, GraphClientConfig, StaticTokenCredential, TokenCredential,
};

/// Errors surfaced by remote operations.
///
/// `NotFound` is a dedicated signal, not a failure: reconcilers interpret it
/// as "the object no longer exists remotely" and clear their local identity.
/// Every other variant aborts the current reconciliation step.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The referenced remote object does not exist.
    #[error("remote object was not found")]
    NotFound,

    /// Any unexpected response status. Carries the response body verbatim
    /// when one was present.
    #[error("unexpected status {status}{}", .body.as_deref().map_or_else(|| " received with no body".to_string(), |b| format!(" with response: {b}")))]
    Status { status: u16, body: Option<String> },

    /// The response could not be decoded into the expected shape.
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Network or TLS level failure below this layer, propagated unchanged.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// Token acquisition failure.
    #[error("credential failure: {0}")]
    Credential(#[source] anyhow::Error),
}

impl ApiError {
    /// Build the error for an unexpected response status.
    pub fn status(status: u16, body: String) -> Self {
        let trimmed = body.trim();
        ApiError::Status {
            status,
            body: (!trimmed.is_empty()).then(|| trimmed.to_string()),
        }
    }
}

/// Operations the reconcilers issue against the trust framework API.
///
/// Every method is a single synchronous request/response cycle; no retries
/// or caching happen at this layer. Cancellation is expressed by dropping
/// the returned future.
#[async_trait]
pub trait TrustFrameworkApi: Send + Sync {
    /// Create an empty key set. The remote side allocates the identifier
    /// that becomes the container's permanent handle.
    async fn create_key_container(&self, name: &str) -> Result<KeyContainer, ApiError>;

    /// Fetch a key set. An empty `keys` list is a valid result.
    async fn get_key_container(&self, id: &str) -> Result<KeyContainer, ApiError>;

    /// Fetch the attributes of the container's currently active key.
    async fn get_active_key(&self, id: &str) -> Result<KeyAttributes, ApiError>;

    /// Ask the remote side to generate key material with the given attributes.
    async fn generate_key(&self, id: &str, key: &KeyAttributes) -> Result<(), ApiError>;

    /// Upload an explicit secret with the given attributes.
    async fn upload_secret(&self, id: &str, key: &KeyAttributes) -> Result<(), ApiError>;

    /// Upload certificate bytes.
    async fn upload_certificate(
        &self,
        id: &str,
        certificate: &CertificateUpload,
    ) -> Result<(), ApiError>;

    /// Upload a PKCS#12 bundle together with its passphrase.
    async fn upload_pkcs12(&self, id: &str, pfx: &Pkcs12Upload) -> Result<(), ApiError>;

    /// Delete a key set.
    async fn delete_key_container(&self, id: &str) -> Result<(), ApiError>;

    /// Fetch a policy's raw XML document.
    async fn get_policy(&self, name: &str) -> Result<String, ApiError>;

    /// Create a policy. The policy name is embedded in the document.
    async fn create_policy(&self, document: &str) -> Result<(), ApiError>;

    /// Replace a policy document in place.
    async fn update_policy(&self, name: &str, document: &str) -> Result<(), ApiError>;

    /// Delete a policy.
    async fn delete_policy(&self, name: &str) -> Result<(), ApiError>;
}
