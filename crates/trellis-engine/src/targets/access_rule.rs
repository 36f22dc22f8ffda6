//! Delegated-authorization proxy AccessRule types
//!
//! The rule CRD consumed by the trellis-authz proxy for strategies the mesh
//! cannot enforce natively (token introspection, sessions, ...). Routes
//! secured this way point the VirtualService at the proxy, which matches
//! requests against these rules and forwards them upstream.

use serde::{Deserialize, Serialize};

use super::{ObjectMeta, TargetObject};

/// Delegated proxy AccessRule
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessRule {
    /// API version
    #[serde(default = "AccessRule::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "AccessRule::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: AccessRuleSpec,
}

impl AccessRule {
    fn default_api_version() -> String {
        Self::API_VERSION.to_string()
    }
    fn default_kind() -> String {
        Self::KIND.to_string()
    }

    /// An AccessRule with the given metadata and spec
    pub fn new(metadata: ObjectMeta, spec: AccessRuleSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

impl TargetObject for AccessRule {
    const API_VERSION: &'static str = "authz.trellis.dev/v1alpha1";
    const KIND: &'static str = "AccessRule";
    const PLURAL: &'static str = "accessrules";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// AccessRule spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessRuleSpec {
    /// Where matched requests are forwarded
    pub upstream: Upstream,
    /// What requests the rule matches
    #[serde(rename = "match")]
    pub route_match: RouteMatch,
    /// Authentication handlers tried in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authenticators: Vec<ProxyHandler>,
    /// Authorization handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer: Option<ProxyHandler>,
    /// Request mutators applied before forwarding
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mutators: Vec<ProxyHandler>,
}

/// Forwarding target
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    /// Upstream URL
    pub url: String,
}

/// Request matcher
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteMatch {
    /// Match URL pattern (`<http|https>://host<path>`)
    pub url: String,
    /// HTTP methods the rule matches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
}

/// Named proxy handler with opaque config
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyHandler {
    /// Handler name
    pub handler: String,
    /// Handler-specific configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}
