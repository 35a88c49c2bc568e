//! # Microsoft Graph Client
//!
//! Native REST implementation of [`TrustFrameworkApi`] against the Graph
//! beta trust framework endpoints, with bearer token acquisition through the
//! Azure AD client-credentials grant.
//!
//! The base URL is overridable so tests and mock servers can stand in for
//! the real API.

use super::{ApiError, TrustFrameworkApi};
use crate::models::{CertificateUpload, KeyAttributes, KeyContainer, Pkcs12Upload};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Production Graph endpoint.
pub const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/beta";

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
const CONTENT_TYPE_XML: &str = "application/xml";

/// Refresh tokens this long before their stated expiry.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 120;

/// Connection settings for the Graph client.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphClientConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// Override for tests and mock servers; defaults to [`DEFAULT_BASE_URL`].
    #[serde(default)]
    pub base_url: Option<String>,
}

impl fmt::Debug for GraphClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphClientConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GraphClientConfig {
    /// Load the configuration from `B2C_TENANT_ID`, `B2C_CLIENT_ID`,
    /// `B2C_CLIENT_SECRET` and the optional `B2C_GRAPH_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let require = |var: &str| {
            std::env::var(var).with_context(|| format!("environment variable {var} is not set"))
        };

        Ok(Self {
            tenant_id: require("B2C_TENANT_ID")?,
            client_id: require("B2C_CLIENT_ID")?,
            client_secret: require("B2C_CLIENT_SECRET")?,
            base_url: std::env::var("B2C_GRAPH_BASE_URL").ok(),
        })
    }
}

/// A bearer token together with its expiry.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    /// Whether the token is within the refresh margin of its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_on - Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS) <= now
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Credential source for Graph requests.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken>;
}

/// Client-credentials grant against the Azure AD v2 token endpoint, with the
/// token cached until shortly before expiry.
pub struct ClientSecretCredential {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    http: Client,
    cached: Mutex<Option<AccessToken>>,
}

impl fmt::Debug for ClientSecretCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecretCredential")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl ClientSecretCredential {
    pub fn new(tenant_id: &str, client_id: &str, client_secret: &str) -> Result<Self> {
        for (field, value) in [
            ("tenant_id", tenant_id),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("credential field {field} must not be empty"));
            }
        }

        Ok(Self {
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            http: Client::new(),
            cached: Mutex::new(None),
        })
    }

    async fn request_token(&self, scopes: &[&str]) -> Result<AccessToken> {
        let url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant_id
        );
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", &scopes.join(" ")),
        ];

        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .context("token request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "token endpoint returned status {status}: {body}"
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("could not decode token response")?;

        debug!("acquired Graph token for tenant {}", self.tenant_id);
        Ok(AccessToken {
            token: token.access_token,
            expires_on: Utc::now() + Duration::seconds(token.expires_in),
        })
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken> {
        // Lock is never held across an await.
        {
            let cached = self
                .cached
                .lock()
                .map_err(|_| anyhow!("token cache lock poisoned"))?;
            if let Some(token) = cached.as_ref() {
                if !token.is_expired(Utc::now()) {
                    return Ok(token.clone());
                }
            }
        }

        let token = self.request_token(scopes).await?;

        let mut cached = self
            .cached
            .lock()
            .map_err(|_| anyhow!("token cache lock poisoned"))?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

/// Fixed-token credential for tests and mock servers.
#[derive(Debug, Clone)]
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self, _scopes: &[&str]) -> Result<AccessToken> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_on: Utc::now() + Duration::hours(1),
        })
    }
}

/// Reqwest-backed [`TrustFrameworkApi`] implementation.
pub struct GraphClient {
    http: Client,
    base_url: String,
    credential: Arc<dyn TokenCredential>,
}

impl fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GraphClient {
    /// Build a client with a client-secret credential from configuration.
    pub fn new(config: &GraphClientConfig) -> Result<Self> {
        let credential = ClientSecretCredential::new(
            &config.tenant_id,
            &config.client_id,
            &config.client_secret,
        )?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        if base_url != DEFAULT_BASE_URL {
            info!("routing Graph requests to {base_url}");
        }

        Ok(Self::with_credential(base_url, Arc::new(credential)))
    }

    /// Build a client against an arbitrary endpoint with a caller-supplied
    /// credential.
    pub fn with_credential(
        base_url: impl Into<String>,
        credential: Arc<dyn TokenCredential>,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
        }
    }

    async fn authorized(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let token = self
            .credential
            .get_token(&[GRAPH_SCOPE])
            .await
            .map_err(ApiError::Credential)?;

        Ok(self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(token.token))
    }

    /// Check the response against the statuses an operation expects. 404
    /// becomes the dedicated not-found signal; anything else unexpected is
    /// surfaced with its body.
    async fn expect_status(
        response: Response,
        expected: &[StatusCode],
    ) -> Result<Response, ApiError> {
        let status = response.status();
        if expected.contains(&status) {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::status(status.as_u16(), body))
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl TrustFrameworkApi for GraphClient {
    async fn create_key_container(&self, name: &str) -> Result<KeyContainer, ApiError> {
        let response = self
            .authorized(Method::POST, "/trustFramework/keySets")
            .await?
            .json(&serde_json::json!({ "id": name }))
            .send()
            .await?;
        let response = Self::expect_status(response, &[StatusCode::CREATED]).await?;
        Self::decode(response).await
    }

    async fn get_key_container(&self, id: &str) -> Result<KeyContainer, ApiError> {
        let response = self
            .authorized(Method::GET, &format!("/trustFramework/keySets/{id}"))
            .await?
            .send()
            .await?;
        let response = Self::expect_status(response, &[StatusCode::OK]).await?;
        Self::decode(response).await
    }

    async fn get_active_key(&self, id: &str) -> Result<KeyAttributes, ApiError> {
        let response = self
            .authorized(
                Method::GET,
                &format!("/trustFramework/keySets/{id}/getActiveKey"),
            )
            .await?
            .send()
            .await?;
        let response = Self::expect_status(response, &[StatusCode::OK]).await?;
        Self::decode(response).await
    }

    async fn generate_key(&self, id: &str, key: &KeyAttributes) -> Result<(), ApiError> {
        let response = self
            .authorized(
                Method::POST,
                &format!("/trustFramework/keySets/{id}/generateKey"),
            )
            .await?
            .json(key)
            .send()
            .await?;
        Self::expect_status(response, &[StatusCode::OK]).await?;
        Ok(())
    }

    async fn upload_secret(&self, id: &str, key: &KeyAttributes) -> Result<(), ApiError> {
        let response = self
            .authorized(
                Method::POST,
                &format!("/trustFramework/keySets/{id}/uploadSecret"),
            )
            .await?
            .json(key)
            .send()
            .await?;
        Self::expect_status(response, &[StatusCode::OK]).await?;
        Ok(())
    }

    async fn upload_certificate(
        &self,
        id: &str,
        certificate: &CertificateUpload,
    ) -> Result<(), ApiError> {
        let response = self
            .authorized(
                Method::POST,
                &format!("/trustFramework/keySets/{id}/uploadCertificate"),
            )
            .await?
            .json(certificate)
            .send()
            .await?;
        Self::expect_status(response, &[StatusCode::OK]).await?;
        Ok(())
    }

    async fn upload_pkcs12(&self, id: &str, pfx: &Pkcs12Upload) -> Result<(), ApiError> {
        let response = self
            .authorized(
                Method::POST,
                &format!("/trustFramework/keySets/{id}/uploadPkcs12"),
            )
            .await?
            .json(pfx)
            .send()
            .await?;
        Self::expect_status(response, &[StatusCode::OK]).await?;
        Ok(())
    }

    async fn delete_key_container(&self, id: &str) -> Result<(), ApiError> {
        let response = self
            .authorized(Method::DELETE, &format!("/trustFramework/keySets/{id}"))
            .await?
            .send()
            .await?;
        Self::expect_status(response, &[StatusCode::NO_CONTENT]).await?;
        Ok(())
    }

    async fn get_policy(&self, name: &str) -> Result<String, ApiError> {
        let response = self
            .authorized(
                Method::GET,
                &format!("/trustframework/policies/{name}/$value"),
            )
            .await?
            .send()
            .await?;
        let response = Self::expect_status(response, &[StatusCode::OK]).await?;
        Ok(response.text().await?)
    }

    async fn create_policy(&self, document: &str) -> Result<(), ApiError> {
        let response = self
            .authorized(Method::POST, "/trustFramework/policies")
            .await?
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_XML)
            .body(document.to_string())
            .send()
            .await?;
        Self::expect_status(response, &[StatusCode::CREATED]).await?;
        Ok(())
    }

    async fn update_policy(&self, name: &str, document: &str) -> Result<(), ApiError> {
        let response = self
            .authorized(
                Method::PUT,
                &format!("/trustframework/policies/{name}/$value"),
            )
            .await?
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_XML)
            .body(document.to_string())
            .send()
            .await?;
        // The endpoint reports 201 for a create-through-replace and 200 for
        // a plain replace; both are success.
        Self::expect_status(response, &[StatusCode::OK, StatusCode::CREATED]).await?;
        Ok(())
    }

    async fn delete_policy(&self, name: &str) -> Result<(), ApiError> {
        let response = self
            .authorized(Method::DELETE, &format!("/trustframework/policies/{name}"))
            .await?
            .send()
            .await?;
        Self::expect_status(response, &[StatusCode::NO_CONTENT]).await?;
        Ok(())
    }
}
