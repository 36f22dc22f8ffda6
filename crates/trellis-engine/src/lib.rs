//! Reconciliation engine for ExposureRules
//!
//! Turns an ExposureRule into the downstream policy objects that realize it
//! (Istio VirtualService, RequestAuthentication, AuthorizationPolicy, and
//! the delegated proxy's AccessRule), diffs them against cluster state, and
//! emits a minimal create/update/delete action set:
//!
//! - **Creators**: pure `intent -> desired object(s)` functions per kind
//! - **Processors**: desired vs. actual diffing, natural-key and hash-based
//! - **Migration**: the annotation-driven delegated-to-mesh state machine
//! - **Reconciliation**: façades composing processors per enforcement mode

pub mod builders;
pub mod change;
pub mod hash_state;
pub mod migration;
pub mod processors;
pub mod reconciliation;
pub mod service;
pub mod targets;

#[cfg(test)]
pub(crate) mod test_support;

// Bridge trellis_common types into this crate's namespace.
pub(crate) use trellis_common::{crd, labels, Error};

/// Result type alias using the shared Error type
pub type Result<T> = std::result::Result<T, Error>;

/// SPIFFE principal of the ingress gateway, the trust boundary for
/// mesh-enforced routes
pub const INGRESS_GATEWAY_PRINCIPAL: &str =
    "cluster.local/ns/istio-system/sa/istio-ingressgateway-service-account";

/// SPIFFE principal of the delegated authorization proxy, trusted while a
/// migrating route still passes through it
pub const DELEGATED_PROXY_PRINCIPAL: &str =
    "cluster.local/ns/trellis-system/sa/trellis-authz-proxy";

/// Default route timeout in seconds when neither rule nor spec sets one
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u32 = 180;
