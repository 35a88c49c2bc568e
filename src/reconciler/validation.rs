//! # Spec Validation
//!
//! Pure validation of declared specs, run before any remote call. Each
//! function returns every problem it finds as structured, field-scoped
//! errors rather than stopping at the first one.

use crate::canonical;
use crate::models::{
    KeyContainerSpec, KeyType, Materialization, PolicySpec, ValidationError,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use std::sync::OnceLock;

/// Tenant-scoped prefix every trust framework resource name must carry.
pub const RESOURCE_NAME_PREFIX: &str = "B2C_1A_";

fn name_charset() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("static pattern compiles"))
}

/// Validate a trust framework resource name.
pub fn validate_resource_name(name: &str, field: &str) -> Result<(), ValidationError> {
    let Some(rest) = name.strip_prefix(RESOURCE_NAME_PREFIX) else {
        return Err(ValidationError::new(
            field,
            format!("name '{name}' must begin with {RESOURCE_NAME_PREFIX}"),
        ));
    };

    if rest.is_empty() {
        return Err(ValidationError::new(
            field,
            format!("name '{name}' must continue past the {RESOURCE_NAME_PREFIX} prefix"),
        ));
    }

    if !name_charset().is_match(rest) {
        return Err(ValidationError::new(
            field,
            format!(
                "name '{name}' must contain only alphanumeric characters and underscores"
            ),
        ));
    }

    Ok(())
}

/// Validate a declared key container spec and select its materialization
/// path.
///
/// Exactly one path follows deterministically from `key_type` and the
/// presence of `value`; the remote side is never consulted. The returned
/// [`Materialization`] carries only the fields legal for the chosen path, so
/// downstream code cannot observe an invalid combination.
pub fn validate_key_container_spec(
    spec: &KeyContainerSpec,
) -> Result<Materialization, Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = validate_resource_name(&spec.name, "name") {
        errors.push(e);
    }

    let plan = match spec.key_type {
        KeyType::Certificate => {
            if spec.use_.is_some() {
                errors.push(ValidationError::new(
                    "use",
                    "the 'use' field must not be specified for key type 'certificate'",
                ));
            }
            if spec.password.is_some() {
                errors.push(ValidationError::new(
                    "password",
                    "the 'password' field is only meaningful for key type 'pkcs12'",
                ));
            }
            match &spec.value {
                Some(value) => {
                    check_base64(value, "value", &mut errors);
                    Some(Materialization::UploadCertificate {
                        certificate: value.clone(),
                    })
                }
                None => {
                    errors.push(ValidationError::new(
                        "value",
                        "the 'value' field is required for key type 'certificate'",
                    ));
                    None
                }
            }
        }
        KeyType::Pkcs12 => {
            if spec.use_.is_some() {
                errors.push(ValidationError::new(
                    "use",
                    "the 'use' field must not be specified for key type 'pkcs12'",
                ));
            }
            if spec.value.is_none() {
                errors.push(ValidationError::new(
                    "value",
                    "the 'value' field is required for key type 'pkcs12'",
                ));
            }
            if spec.password.is_none() {
                errors.push(ValidationError::new(
                    "password",
                    "the 'password' field is required for key type 'pkcs12'",
                ));
            }
            match (&spec.value, &spec.password) {
                (Some(value), Some(password)) => {
                    check_base64(value, "value", &mut errors);
                    Some(Materialization::UploadPkcs12 {
                        pfx: value.clone(),
                        password: password.clone(),
                    })
                }
                _ => None,
            }
        }
        KeyType::Secret => {
            if spec.password.is_some() {
                errors.push(ValidationError::new(
                    "password",
                    "the 'password' field is only meaningful for key type 'pkcs12'",
                ));
            }
            let use_ = spec.use_;
            if use_.is_none() {
                errors.push(ValidationError::new(
                    "use",
                    "the 'use' field is required for key type 'secret'",
                ));
            }
            let kty = spec.kty;
            if kty.is_none() {
                errors.push(ValidationError::new(
                    "kty",
                    "the 'kty' field is required for key type 'secret'",
                ));
            }
            match (kty, use_) {
                (Some(kty), Some(use_)) => Some(match &spec.value {
                    Some(k) => Materialization::UploadSecret {
                        kty,
                        use_,
                        k: k.clone(),
                        nbf: spec.nbf,
                        exp: spec.exp,
                    },
                    None => Materialization::Generate {
                        kty,
                        use_,
                        nbf: spec.nbf,
                        exp: spec.exp,
                    },
                }),
                _ => None,
            }
        }
    };

    match (plan, errors.is_empty()) {
        (Some(plan), true) => Ok(plan),
        (_, _) => Err(errors),
    }
}

/// Validate a declared policy spec: the name prefix plus the strict XML
/// acceptance gate.
pub fn validate_policy_spec(spec: &PolicySpec) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = validate_resource_name(&spec.name, "name") {
        errors.push(e);
    }
    if let Err(mut gate_errors) = canonical::validate_policy_document("document", &spec.document) {
        errors.append(&mut gate_errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_base64(value: &str, field: &str, errors: &mut Vec<ValidationError>) {
    if BASE64.decode(value.trim()).is_err() {
        errors.push(ValidationError::new(
            field,
            "the field must be valid base64",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KeyAlgorithm, KeyUse};

    fn secret_spec() -> KeyContainerSpec {
        KeyContainerSpec {
            name: "B2C_1A_TokenEncryption".to_string(),
            key_type: KeyType::Secret,
            use_: Some(KeyUse::Enc),
            kty: Some(KeyAlgorithm::Rsa),
            nbf: None,
            exp: None,
            value: None,
            password: None,
        }
    }

    #[test]
    fn test_resource_name_prefix_is_required() {
        assert!(validate_resource_name("B2C_1A_Signing", "name").is_ok());

        let err = validate_resource_name("Signing", "name").unwrap_err();
        assert_eq!(err.field, "name");
        assert!(err.message.contains("B2C_1A_"));

        assert!(validate_resource_name("B2C_1A_", "name").is_err());
        assert!(validate_resource_name("B2C_1A_bad name", "name").is_err());
    }

    #[test]
    fn test_secret_without_value_generates() {
        let plan = validate_key_container_spec(&secret_spec()).unwrap();
        assert_eq!(
            plan,
            Materialization::Generate {
                kty: KeyAlgorithm::Rsa,
                use_: KeyUse::Enc,
                nbf: None,
                exp: None,
            }
        );
    }

    #[test]
    fn test_secret_with_value_uploads() {
        let mut spec = secret_spec();
        spec.value = Some("mypassword".to_string());
        spec.nbf = Some(1_640_995_200);

        let plan = validate_key_container_spec(&spec).unwrap();
        assert_eq!(
            plan,
            Materialization::UploadSecret {
                kty: KeyAlgorithm::Rsa,
                use_: KeyUse::Enc,
                k: "mypassword".to_string(),
                nbf: Some(1_640_995_200),
                exp: None,
            }
        );
    }

    #[test]
    fn test_secret_requires_use() {
        let mut spec = secret_spec();
        spec.use_ = None;

        let errors = validate_key_container_spec(&spec).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "use"));
    }

    #[test]
    fn test_secret_requires_kty() {
        let mut spec = secret_spec();
        spec.kty = None;

        let errors = validate_key_container_spec(&spec).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "kty"));
    }

    #[test]
    fn test_certificate_forbids_use() {
        let spec = KeyContainerSpec {
            name: "B2C_1A_SamlCert".to_string(),
            key_type: KeyType::Certificate,
            use_: Some(KeyUse::Sig),
            kty: None,
            nbf: None,
            exp: None,
            value: Some("AQIDBA==".to_string()),
            password: None,
        };

        let errors = validate_key_container_spec(&spec).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "use");
    }

    #[test]
    fn test_certificate_requires_value() {
        let spec = KeyContainerSpec {
            name: "B2C_1A_SamlCert".to_string(),
            key_type: KeyType::Certificate,
            use_: None,
            kty: None,
            nbf: None,
            exp: None,
            value: None,
            password: None,
        };

        let errors = validate_key_container_spec(&spec).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "value"));
    }

    #[test]
    fn test_certificate_value_must_be_base64() {
        let spec = KeyContainerSpec {
            name: "B2C_1A_SamlCert".to_string(),
            key_type: KeyType::Certificate,
            use_: None,
            kty: None,
            nbf: None,
            exp: None,
            value: Some("not base64 !!".to_string()),
            password: None,
        };

        let errors = validate_key_container_spec(&spec).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "value"));
    }

    #[test]
    fn test_pkcs12_requires_value_and_password() {
        let spec = KeyContainerSpec {
            name: "B2C_1A_SamlIdp".to_string(),
            key_type: KeyType::Pkcs12,
            use_: None,
            kty: None,
            nbf: None,
            exp: None,
            value: Some("AQIDBA==".to_string()),
            password: None,
        };

        let errors = validate_key_container_spec(&spec).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "password"));

        let complete = KeyContainerSpec {
            password: Some("pfx-pass".to_string()),
            ..spec
        };
        let plan = validate_key_container_spec(&complete).unwrap();
        assert!(matches!(plan, Materialization::UploadPkcs12 { .. }));
    }

    #[test]
    fn test_pkcs12_forbids_use() {
        let spec = KeyContainerSpec {
            name: "B2C_1A_SamlIdp".to_string(),
            key_type: KeyType::Pkcs12,
            use_: Some(KeyUse::Enc),
            kty: None,
            nbf: None,
            exp: None,
            value: Some("AQIDBA==".to_string()),
            password: Some("pfx-pass".to_string()),
        };

        let errors = validate_key_container_spec(&spec).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "use"));
    }

    #[test]
    fn test_every_problem_is_reported() {
        let spec = KeyContainerSpec {
            name: "wrong".to_string(),
            key_type: KeyType::Secret,
            use_: None,
            kty: None,
            nbf: None,
            exp: None,
            value: None,
            password: Some("stray".to_string()),
        };

        let errors = validate_key_container_spec(&spec).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"name"));
        assert!(fields.contains(&"use"));
        assert!(fields.contains(&"kty"));
        assert!(fields.contains(&"password"));
    }

    #[test]
    fn test_policy_spec_gate() {
        let valid = PolicySpec {
            name: "B2C_1A_Base".to_string(),
            document: r#"<?xml version="1.0"?><TrustFrameworkPolicy/>"#.to_string(),
        };
        assert!(validate_policy_spec(&valid).is_ok());

        let bad_version = PolicySpec {
            document: r#"<?xml version="2.0"?><TrustFrameworkPolicy/>"#.to_string(),
            ..valid.clone()
        };
        assert!(validate_policy_spec(&bad_version).is_err());

        let bad_name = PolicySpec {
            name: "Base".to_string(),
            ..valid
        };
        let errors = validate_policy_spec(&bad_name).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "name"));
    }
}
