//! Istio RequestAuthentication types

use serde::{Deserialize, Serialize};

use super::authorization_policy::WorkloadSelector;
use super::{ObjectMeta, TargetObject};

/// Istio RequestAuthentication
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestAuthentication {
    /// API version
    #[serde(default = "RequestAuthentication::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "RequestAuthentication::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: RequestAuthenticationSpec,
}

impl RequestAuthentication {
    fn default_api_version() -> String {
        Self::API_VERSION.to_string()
    }
    fn default_kind() -> String {
        Self::KIND.to_string()
    }

    /// A RequestAuthentication with the given metadata and spec
    pub fn new(metadata: ObjectMeta, spec: RequestAuthenticationSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

impl TargetObject for RequestAuthentication {
    const API_VERSION: &'static str = "security.istio.io/v1beta1";
    const KIND: &'static str = "RequestAuthentication";
    const PLURAL: &'static str = "requestauthentications";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// RequestAuthentication spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestAuthenticationSpec {
    /// Workload selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<WorkloadSelector>,
    /// Trusted token issuers, in authored order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jwt_rules: Vec<JwtRule>,
}

/// One trusted issuer
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtRule {
    /// Token issuer URL
    pub issuer: String,
    /// JWKS endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    /// Headers the token may be extracted from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_headers: Vec<JwtRuleHeader>,
    /// Query parameters the token may be extracted from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_params: Vec<String>,
}

/// Token-carrying header
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtRuleHeader {
    /// Header name
    pub name: String,
    /// Prefix before the token value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}
