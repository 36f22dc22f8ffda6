//! Typed target objects produced by the engine
//!
//! Hand-rolled serde structs for the object kinds the engine manages. Only
//! the fields the engine reads or writes are modelled; unknown fields from
//! the cluster are ignored on decode and never round-tripped.

pub mod access_rule;
pub mod authorization_policy;
pub mod request_authentication;
pub mod virtual_service;

pub use access_rule::{AccessRule, AccessRuleSpec, ProxyHandler, RouteMatch, Upstream};
pub use authorization_policy::{
    AuthorizationPolicy, AuthorizationPolicySpec, AuthorizationRule, Condition, Operation,
    RuleFrom, RuleTo, Source, WorkloadSelector,
};
pub use request_authentication::{
    JwtRule, JwtRuleHeader, RequestAuthentication, RequestAuthenticationSpec,
};
pub use virtual_service::{
    Destination, HeaderOperations, Headers, HttpMatchRequest, HttpRoute, HttpRouteDestination,
    IstioCorsPolicy, PortSelector, StringMatch, VirtualService, VirtualServiceSpec,
};

use std::collections::BTreeMap;

use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};

use trellis_common::store::StoredObject;

/// Kubernetes object metadata carried by every target object
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name (empty until a generated name is assigned)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Prefix for server-side name generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
    /// Resource namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Optimistic-concurrency version, preserved on updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ObjectMeta {
    /// Metadata with a fixed name
    pub fn named(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Metadata with a server-generated name
    pub fn generated(prefix: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            generate_name: Some(prefix.into()),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add all labels from the given map
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels.extend(labels);
        self
    }
}

/// Compile-time identity of a target object kind
pub trait TargetObject {
    /// Full API version (e.g., "security.istio.io/v1beta1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "AuthorizationPolicy")
    const KIND: &'static str;
    /// Plural resource name (e.g., "authorizationpolicies")
    const PLURAL: &'static str;

    /// Object metadata
    fn metadata(&self) -> &ObjectMeta;
    /// Mutable object metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Build an ApiResource from the type's constants
    fn api_resource() -> ApiResource {
        let (group, version) = match Self::API_VERSION.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), Self::API_VERSION.to_string()),
        };
        ApiResource {
            group,
            version,
            kind: Self::KIND.to_string(),
            api_version: Self::API_VERSION.to_string(),
            plural: Self::PLURAL.to_string(),
        }
    }
}

// Every target object is storable by its metadata. One impl per concrete
// kind: the store trait lives in trellis-common, so a blanket impl over
// TargetObject would fall foul of the orphan rule.
macro_rules! stored_by_metadata {
    ($($ty:ty),* $(,)?) => {
        $(
            impl StoredObject for $ty {
                fn name(&self) -> &str {
                    &self.metadata.name
                }
                fn generate_name(&self) -> Option<&str> {
                    self.metadata.generate_name.as_deref()
                }
                fn namespace(&self) -> &str {
                    &self.metadata.namespace
                }
                fn labels(&self) -> &BTreeMap<String, String> {
                    &self.metadata.labels
                }
                fn set_name(&mut self, name: String) {
                    self.metadata.name = name;
                }
            }
        )*
    };
}

stored_by_metadata!(
    VirtualService,
    AccessRule,
    RequestAuthentication,
    AuthorizationPolicy,
);
