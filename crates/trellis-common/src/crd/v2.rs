//! ExposureRule v2 — the current shape
//!
//! Structurally the hub shape, but declared with its own types: conversion
//! to and from v2alpha1 is an explicit field mapping, so the two versions
//! can evolve independently without a serde round-trip silently deciding
//! which fields survive.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use super::jwt::JwtConfig;
pub use super::v1beta1::{OriginMatch, Service};
pub use super::v2alpha1::RequestMutation;

/// The v2 ExposureRule spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gateway.trellis.dev",
    version = "v2",
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

/// Lifecycle state of a v2 ExposureRule
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

/// Status of a v2 ExposureRule
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
