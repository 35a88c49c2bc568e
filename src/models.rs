//! # Models
//!
//! Declared specifications, observed state snapshots, and the wire shapes
//! exchanged with the Microsoft Graph trust framework endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A single structured validation failure, scoped to the field that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Key container kind, selecting the materialization path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyType {
    Secret,
    Certificate,
    Pkcs12,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Secret => "secret",
            KeyType::Certificate => "certificate",
            KeyType::Pkcs12 => "pkcs12",
        }
    }
}

impl FromStr for KeyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "cer" and "pfx" are the short names the original schema accepted
        match s.to_ascii_lowercase().as_str() {
            "secret" => Ok(KeyType::Secret),
            "certificate" | "cer" => Ok(KeyType::Certificate),
            "pkcs12" | "pfx" => Ok(KeyType::Pkcs12),
            other => Err(format!(
                "invalid key type '{other}', valid values are 'secret', 'certificate' and 'pkcs12'"
            )),
        }
    }
}

/// Intended key usage. Comparisons against remote values are case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyUse {
    Sig,
    Enc,
}

impl KeyUse {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyUse::Sig => "sig",
            KeyUse::Enc => "enc",
        }
    }
}

impl FromStr for KeyUse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sig" => Ok(KeyUse::Sig),
            "enc" => Ok(KeyUse::Enc),
            other => Err(format!(
                "invalid 'use' value '{other}', valid values are 'sig' and 'enc'"
            )),
        }
    }
}

/// Key algorithm family (`kty` in JWK terms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyAlgorithm {
    Rsa,
    Oct,
}

impl KeyAlgorithm {
    /// The JWK registry spelling (RFC 7518 §6.1): uppercase "RSA",
    /// lowercase "oct".
    pub fn as_str(self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "RSA",
            KeyAlgorithm::Oct => "oct",
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rsa" => Ok(KeyAlgorithm::Rsa),
            "oct" => Ok(KeyAlgorithm::Oct),
            other => Err(format!(
                "invalid 'kty' value '{other}', valid values are 'rsa' and 'oct'"
            )),
        }
    }
}

macro_rules! string_conversions {
    ($($ty:ty),+) => {$(
        impl TryFrom<String> for $ty {
            type Error = String;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$ty> for String {
            fn from(v: $ty) -> String {
                v.as_str().to_string()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    )+};
}

string_conversions!(KeyType, KeyUse, KeyAlgorithm);

/// Declared intent for a trust framework key set.
///
/// All optionality mirrors the declarative configuration surface; which
/// combinations are legal for a given `key_type` is decided by
/// [`crate::reconciler::validation::validate_key_container_spec`] before any
/// remote call is made.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyContainerSpec {
    /// Key set name. Must begin with `B2C_1A_`.
    pub name: String,
    pub key_type: KeyType,
    #[serde(default, rename = "use")]
    pub use_: Option<KeyUse>,
    #[serde(default)]
    pub kty: Option<KeyAlgorithm>,
    /// Not-valid-before, NumericDate per RFC 7519.
    #[serde(default)]
    pub nbf: Option<i64>,
    /// Expiry, NumericDate per RFC 7519.
    #[serde(default)]
    pub exp: Option<i64>,
    /// Raw secret string, or base64 certificate / PKCS#12 bytes.
    #[serde(default)]
    pub value: Option<String>,
    /// PKCS#12 bundle passphrase.
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for KeyContainerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyContainerSpec")
            .field("name", &self.name)
            .field("key_type", &self.key_type)
            .field("use_", &self.use_)
            .field("kty", &self.kty)
            .field("nbf", &self.nbf)
            .field("exp", &self.exp)
            .field("value", &self.value.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// The single materialization path selected for a validated key container
/// spec. Each variant carries only the fields legal for that path, so an
/// impossible combination (for example a certificate with a `use`) cannot be
/// represented past validation.
#[derive(Clone, PartialEq, Eq)]
pub enum Materialization {
    Generate {
        kty: KeyAlgorithm,
        use_: KeyUse,
        nbf: Option<i64>,
        exp: Option<i64>,
    },
    UploadSecret {
        kty: KeyAlgorithm,
        use_: KeyUse,
        k: String,
        nbf: Option<i64>,
        exp: Option<i64>,
    },
    UploadCertificate {
        /// Base64-encoded certificate bytes.
        certificate: String,
    },
    UploadPkcs12 {
        /// Base64-encoded PKCS#12 bundle.
        pfx: String,
        password: String,
    },
}

impl fmt::Debug for Materialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Materialization::Generate { kty, use_, nbf, exp } => f
                .debug_struct("Generate")
                .field("kty", kty)
                .field("use_", use_)
                .field("nbf", nbf)
                .field("exp", exp)
                .finish(),
            Materialization::UploadSecret { kty, use_, nbf, exp, .. } => f
                .debug_struct("UploadSecret")
                .field("kty", kty)
                .field("use_", use_)
                .field("k", &"<redacted>")
                .field("nbf", nbf)
                .field("exp", exp)
                .finish(),
            Materialization::UploadCertificate { .. } => f
                .debug_struct("UploadCertificate")
                .field("certificate", &"<redacted>")
                .finish(),
            Materialization::UploadPkcs12 { .. } => f
                .debug_struct("UploadPkcs12")
                .field("pfx", &"<redacted>")
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Observed state of a key container after a read.
///
/// A container with no key yet reports all key attributes as `None`; that is
/// a valid state, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyContainerObservedState {
    pub id: String,
    pub use_: Option<KeyUse>,
    pub kty: Option<KeyAlgorithm>,
    pub nbf: Option<i64>,
    pub exp: Option<i64>,
}

impl KeyContainerObservedState {
    /// Whether the container holds an active key.
    pub fn has_active_key(&self) -> bool {
        self.use_.is_some() || self.kty.is_some() || self.nbf.is_some() || self.exp.is_some()
    }
}

/// Declared intent for a trust framework policy. The `name` is both the
/// logical identifier and the remote object's stable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    pub name: String,
    /// The policy XML document.
    pub document: String,
}

/// Observed state of a policy after a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyObservedState {
    pub name: String,
    pub document: String,
}

// ---------------------------------------------------------------------------
// Wire shapes for the Graph trust framework endpoints
// ---------------------------------------------------------------------------

/// A trust framework key set as returned by the Graph API.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyContainer {
    pub id: String,
    #[serde(default)]
    pub keys: Vec<KeyAttributes>,
}

/// JWK-style attributes of a single key, used both for key requests
/// (generate / upload secret) and for active-key reads.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct KeyAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kty: Option<KeyAlgorithm>,
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_: Option<KeyUse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Secret value when uploading an explicit secret. Never returned by
    /// active-key reads for symmetric keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

impl fmt::Debug for KeyAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyAttributes")
            .field("kty", &self.kty)
            .field("use_", &self.use_)
            .field("nbf", &self.nbf)
            .field("exp", &self.exp)
            .field("k", &self.k.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Body for `uploadCertificate`.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateUpload {
    /// Base64-encoded certificate bytes.
    pub key: String,
}

/// Body for `uploadPkcs12`.
#[derive(Clone, Serialize)]
pub struct Pkcs12Upload {
    /// Base64-encoded PKCS#12 bundle.
    pub key: String,
    pub password: String,
}

impl fmt::Debug for Pkcs12Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pkcs12Upload")
            .field("key", &"<redacted>")
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_enums_parse_case_insensitively() {
        assert_eq!("SIG".parse::<KeyUse>().unwrap(), KeyUse::Sig);
        assert_eq!("Enc".parse::<KeyUse>().unwrap(), KeyUse::Enc);
        assert_eq!("RSA".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::Rsa);
        assert_eq!("oct".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::Oct);
        assert_eq!("Secret".parse::<KeyType>().unwrap(), KeyType::Secret);
        assert!("hmac".parse::<KeyAlgorithm>().is_err());
        assert!("both".parse::<KeyUse>().is_err());
    }

    #[test]
    fn test_key_type_accepts_original_short_names() {
        assert_eq!("cer".parse::<KeyType>().unwrap(), KeyType::Certificate);
        assert_eq!("pfx".parse::<KeyType>().unwrap(), KeyType::Pkcs12);
    }

    #[test]
    fn test_key_attributes_wire_names() {
        let attrs = KeyAttributes {
            kty: Some(KeyAlgorithm::Rsa),
            use_: Some(KeyUse::Enc),
            nbf: Some(1_640_995_200),
            exp: None,
            k: None,
        };

        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json["kty"], "RSA");
        assert_eq!(json["use"], "enc");
        let symmetric = KeyAttributes {
            kty: Some(KeyAlgorithm::Oct),
            ..KeyAttributes::default()
        };
        assert_eq!(
            serde_json::to_value(&symmetric).unwrap()["kty"],
            "oct",
            "symmetric kty uses the registry's lowercase spelling"
        );
        assert_eq!(json["nbf"], 1_640_995_200);
        assert!(json.get("exp").is_none(), "unset fields must be omitted");
        assert!(json.get("k").is_none());
    }

    #[test]
    fn test_key_container_deserializes_with_missing_keys() {
        let container: KeyContainer =
            serde_json::from_str(r#"{"id": "B2C_1A_TokenSigning"}"#).unwrap();
        assert_eq!(container.id, "B2C_1A_TokenSigning");
        assert!(container.keys.is_empty());
    }

    #[test]
    fn test_active_key_deserializes_remote_casing() {
        let key: KeyAttributes =
            serde_json::from_str(r#"{"kty": "RSA", "use": "SIG", "exp": 1700000000}"#).unwrap();
        assert_eq!(key.kty, Some(KeyAlgorithm::Rsa));
        assert_eq!(key.use_, Some(KeyUse::Sig));
        assert_eq!(key.exp, Some(1_700_000_000));
    }

    #[test]
    fn test_spec_debug_redacts_sensitive_fields() {
        let spec = KeyContainerSpec {
            name: "B2C_1A_Test".to_string(),
            key_type: KeyType::Secret,
            use_: Some(KeyUse::Enc),
            kty: Some(KeyAlgorithm::Oct),
            nbf: None,
            exp: None,
            value: Some("mypassword".to_string()),
            password: None,
        };

        let rendered = format!("{spec:?}");
        assert!(!rendered.contains("mypassword"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_observed_state_reports_active_key() {
        let empty = KeyContainerObservedState {
            id: "B2C_1A_Empty".to_string(),
            ..Default::default()
        };
        assert!(!empty.has_active_key());

        let populated = KeyContainerObservedState {
            id: "B2C_1A_Signing".to_string(),
            kty: Some(KeyAlgorithm::Rsa),
            ..Default::default()
        };
        assert!(populated.has_active_key());
    }
}
