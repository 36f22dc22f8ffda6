//! JWT access-strategy configuration
//!
//! The compact JWT authorization grammar: an ordered list of trusted token
//! issuers and an ordered list of authorization entries (required scopes ×
//! audiences). The position of an entry in `authorizations` is semantically
//! significant — it is the addressable index the hash-based diff uses to
//! match generated AuthorizationPolicies across reconciliation passes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Typed JWT configuration carried by a path rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtConfig {
    /// Trusted token issuers, in authored order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authentications: Vec<JwtAuthentication>,
    /// Authorization entries, in authored order
    ///
    /// The list index identifies the generated policy object across passes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorizations: Vec<JwtAuthorization>,
}

/// A trusted token issuer and how to extract its tokens from requests
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtAuthentication {
    /// Token issuer URL
    pub issuer: String,
    /// JWKS endpoint used to validate token signatures
    pub jwks_uri: String,
    /// Headers the token may be extracted from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_headers: Vec<JwtHeader>,
    /// Query parameters the token may be extracted from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_params: Vec<String>,
}

/// A header carrying a JWT, with an optional value prefix
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtHeader {
    /// Header name
    pub name: String,
    /// Prefix before the token value (e.g., "Bearer ")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// One authorization entry: scopes ANDed with audiences
///
/// OR semantics across audiences require separate entries.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtAuthorization {
    /// Scopes the token must carry (AND)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_scopes: Vec<String>,
    /// Audiences the token must carry (AND)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audiences: Vec<String>,
}

/// Legacy delegated-proxy JWT configuration
///
/// Old specs configured the delegated proxy's JWT handler directly. It is
/// structurally flat (parallel issuer/JWKS lists, one scope set) and only
/// reliably converts to [`JwtConfig`] when it names exactly one issuer and
/// one JWKS URL.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct LegacyJwtConfig {
    /// Trusted issuer URLs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_issuers: Vec<String>,
    /// JWKS endpoint URLs, parallel to `trusted_issuers`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jwks_urls: Vec<String>,
    /// Scopes the token must carry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_scope: Vec<String>,
    /// Audiences the token must carry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_audience: Vec<String>,
}

impl LegacyJwtConfig {
    /// Whether this legacy config can be expressed as a typed [`JwtConfig`]
    ///
    /// The typed shape pairs each issuer with its JWKS URI, so only configs
    /// with exactly one of each convert without guessing.
    pub fn is_convertible(&self) -> bool {
        self.trusted_issuers.len() == 1 && self.jwks_urls.len() == 1
    }

    /// Convert to the typed shape; `None` when not convertible
    pub fn to_jwt_config(&self) -> Option<JwtConfig> {
        if !self.is_convertible() {
            return None;
        }
        Some(JwtConfig {
            authentications: vec![JwtAuthentication {
                issuer: self.trusted_issuers[0].clone(),
                jwks_uri: self.jwks_urls[0].clone(),
                from_headers: vec![],
                from_params: vec![],
            }],
            authorizations: vec![JwtAuthorization {
                required_scopes: self.required_scope.clone(),
                audiences: self.target_audience.clone(),
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_config_with_single_issuer_converts() {
        let legacy = LegacyJwtConfig {
            trusted_issuers: vec!["https://issuer.example.com".to_string()],
            jwks_urls: vec!["https://issuer.example.com/keys".to_string()],
            required_scope: vec!["read".to_string()],
            target_audience: vec!["orders".to_string()],
        };

        let typed = legacy.to_jwt_config().expect("convertible");
        assert_eq!(typed.authentications.len(), 1);
        assert_eq!(typed.authentications[0].issuer, "https://issuer.example.com");
        assert_eq!(typed.authorizations[0].required_scopes, vec!["read"]);
        assert_eq!(typed.authorizations[0].audiences, vec!["orders"]);
    }

    #[test]
    fn legacy_config_with_multiple_issuers_does_not_convert() {
        let legacy = LegacyJwtConfig {
            trusted_issuers: vec!["https://a".to_string(), "https://b".to_string()],
            jwks_urls: vec!["https://a/keys".to_string(), "https://b/keys".to_string()],
            ..LegacyJwtConfig::default()
        };
        assert!(!legacy.is_convertible());
        assert!(legacy.to_jwt_config().is_none());
    }
}
