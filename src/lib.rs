//! # Trust Framework Reconciler
//!
//! Reconciles declared Azure AD B2C trust framework resources — key sets
//! (cryptographic key containers) and XML policies — against the Microsoft
//! Graph API, and suppresses spurious "changed" signals caused by
//! semantically irrelevant XML formatting differences.
//!
//! The crate is organized around three pieces:
//!
//! - [`canonical`] — order-preserving canonical XML comparison, used to
//!   decide whether a declared policy document differs semantically from
//!   the remote copy.
//! - [`reconciler`] — the key material state machine and the policy
//!   reconciler, each exposing create / read / update / delete plus a
//!   convergence-style `apply`.
//! - [`client`] — the [`client::TrustFrameworkApi`] seam the reconcilers
//!   call through, with a reqwest-backed Microsoft Graph implementation.
//!
//! Callers own the specs for the duration of one reconciliation call;
//! observed states are built fresh on every read and never cached.
//!
//! ```no_run
//! use std::sync::Arc;
//! use trustframework_reconciler::client::{GraphClient, GraphClientConfig};
//! use trustframework_reconciler::models::PolicySpec;
//! use trustframework_reconciler::reconciler::PolicyReconciler;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = GraphClientConfig::from_env()?;
//! let api = Arc::new(GraphClient::new(&config)?);
//! let policies = PolicyReconciler::new(api);
//!
//! let spec = PolicySpec {
//!     name: "B2C_1A_TrustFrameworkBase".to_string(),
//!     document: std::fs::read_to_string("policies/base.xml")?,
//! };
//! let (observed, changed) = policies.apply(&spec).await?;
//! println!("policy {} changed: {changed}", observed.name);
//! # Ok(())
//! # }
//! ```

pub mod canonical;
pub mod client;
pub mod models;
pub mod reconciler;

pub use client::{ApiError, TrustFrameworkApi};
pub use models::{
    KeyContainerObservedState, KeyContainerSpec, PolicyObservedState, PolicySpec, ValidationError,
};
pub use reconciler::{KeyContainerReconciler, PolicyReconciler, Reconcile, ReconcileError};
