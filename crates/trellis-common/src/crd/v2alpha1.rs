//! ExposureRule v2alpha1 — the hub shape
//!
//! Multiple hosts, and access control expressed as typed fields: a path rule
//! carries exactly one of `noAuth: true` or a `jwt` config. All conversion
//! between shapes goes through this version.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use super::jwt::{JwtAuthentication, JwtAuthorization, JwtConfig, JwtHeader};
pub use super::v1beta1::{OriginMatch, Service};

use crate::{Error, Result};

/// The v2alpha1 ExposureRule spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gateway.trellis.dev",
    version = "v2alpha1",
    kind = "ExposureRule",
    plural = "exposurerules",
    namespaced,
    status = "ExposureRuleStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ExposureRuleSpec {
    /// Hosts the rules are exposed on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    /// Backend service, overridable per rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,
    /// Gateway reference (`namespace/name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Path rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
    /// Route timeout in seconds, overridable per rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    /// CORS policy replacing the gateway defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_policy: Option<CorsPolicy>,
}

/// One path rule
///
/// Exactly one of `no_auth` and `jwt` determines the downstream object
/// shape; validation rejects rules setting both or neither.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Path pattern; `{*}` and `{**}` template operators are supported
    pub path: String,
    /// HTTP methods the rule applies to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    /// Expose the path without any authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_auth: Option<bool>,
    /// Protect the path with JWT validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<JwtConfig>,
    /// Request mutation applied before forwarding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestMutation>,
    /// Backend service override for this rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,
    /// Route timeout override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

impl Rule {
    /// Whether the rule exposes its path without authentication
    pub fn is_no_auth(&self) -> bool {
        self.no_auth.unwrap_or(false)
    }

    /// Whether the rule matches every path
    pub fn applies_to_all_paths(&self) -> bool {
        self.path == "/*"
    }
}

/// Headers and cookies set on matched requests before forwarding
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestMutation {
    /// Headers to set
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Cookies to set
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, String>,
}

/// CORS policy with max-age in plain seconds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorsPolicy {
    /// Allowed origins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_origins: Vec<OriginMatch>,
    /// Allowed methods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_methods: Vec<String>,
    /// Allowed headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_headers: Vec<String>,
    /// Whether credentials are allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_credentials: Option<bool>,
    /// Headers exposed to the browser
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expose_headers: Vec<String>,
    /// Preflight max age in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
}

/// Lifecycle state of a v2alpha1 ExposureRule
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum State {
    /// All downstream objects reconciled
    Ready,
    /// Reconciliation in progress
    #[default]
    Processing,
    /// Reconciliation failed
    Error,
    /// The rule is being deleted
    Deleting,
    /// Reconciled with warnings
    Warning,
}

/// Status of a v2alpha1 ExposureRule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExposureRuleStatus {
    /// Lifecycle state
    #[serde(default)]
    pub state: State,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When the rule was last processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_time: Option<DateTime<Utc>>,
}

/// The effective backend service of a rule: rule-level overrides spec-level
pub fn effective_service<'a>(
    spec: &'a ExposureRuleSpec,
    rule: &'a Rule,
    rule_name: &str,
) -> Result<&'a Service> {
    rule.service
        .as_ref()
        .or(spec.service.as_ref())
        .ok_or_else(|| {
            Error::validation_for(rule_name, "rule resolves to no backend service")
        })
}

/// The namespace the effective service (and its generated objects) live in
pub fn effective_service_namespace(
    exposure: &ExposureRule,
    rule: &Rule,
) -> Result<String> {
    let name = exposure.metadata.name.as_deref().unwrap_or_default();
    let service = effective_service(&exposure.spec, rule, name)?;
    Ok(service
        .namespace
        .clone()
        .or_else(|| exposure.metadata.namespace.clone())
        .unwrap_or_else(|| "default".to_string()))
}
