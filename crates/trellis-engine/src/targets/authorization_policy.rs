//! Istio AuthorizationPolicy types
//!
//! Fine-grained access control enforced at the sidecar. These objects have
//! no natural key: identity across reconciliation passes is the
//! content-hash + index label pair, see [`crate::hash_state`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ObjectMeta, TargetObject};

/// Istio AuthorizationPolicy
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicy {
    /// API version
    #[serde(default = "AuthorizationPolicy::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "AuthorizationPolicy::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: AuthorizationPolicySpec,
}

impl AuthorizationPolicy {
    fn default_api_version() -> String {
        Self::API_VERSION.to_string()
    }
    fn default_kind() -> String {
        Self::KIND.to_string()
    }

    /// An AuthorizationPolicy with the given metadata and spec
    pub fn new(metadata: ObjectMeta, spec: AuthorizationPolicySpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

impl TargetObject for AuthorizationPolicy {
    const API_VERSION: &'static str = "security.istio.io/v1beta1";
    const KIND: &'static str = "AuthorizationPolicy";
    const PLURAL: &'static str = "authorizationpolicies";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// AuthorizationPolicy spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicySpec {
    /// Workload selector; omitted for selector-less (external) backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<WorkloadSelector>,
    /// Action: ALLOW, DENY, AUDIT, CUSTOM
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    /// Access rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<AuthorizationRule>,
}

/// Workload selector
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelector {
    /// Match labels
    pub match_labels: BTreeMap<String, String>,
}

/// One access rule: sources, operations and conditions
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct AuthorizationRule {
    /// Who may call (trust boundary)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from: Vec<RuleFrom>,
    /// What may be called
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<RuleTo>,
    /// Claim conditions, ANDed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<Condition>,
}

/// Rule source wrapper
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct RuleFrom {
    /// Source specification
    pub source: Source,
}

/// Caller identity
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// SPIFFE workload principals
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub principals: Vec<String>,
    /// Authenticated request principals (`issuer/subject`, `*` for any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_principals: Vec<String>,
}

/// Rule operation wrapper
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct RuleTo {
    /// Operation specification
    pub operation: Operation,
}

/// Accessed operation
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Exposed hosts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    /// HTTP methods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    /// Paths, in the Envoy template grammar
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

/// One claim condition
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Attribute key (e.g., `request.auth.claims[scp]`)
    pub key: String,
    /// Accepted values (ORed within one condition)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}
