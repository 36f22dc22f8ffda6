//! Fluent builders for target objects
//!
//! Side-effect-free constructors used by the creators. Every builder stamps
//! the ownership label through [`crate::labels`], so no creator can produce
//! an unowned object.

use std::collections::BTreeMap;

use crate::labels;
use crate::targets::{
    AccessRule, AccessRuleSpec, AuthorizationPolicy, AuthorizationPolicySpec, AuthorizationRule,
    Condition, Destination, HeaderOperations, Headers, HttpMatchRequest, HttpRoute,
    HttpRouteDestination, IstioCorsPolicy, JwtRule, ObjectMeta, Operation, PortSelector,
    ProxyHandler, RequestAuthentication, RequestAuthenticationSpec, RouteMatch, RuleFrom, RuleTo,
    Source, StringMatch, Upstream, VirtualService, VirtualServiceSpec, WorkloadSelector,
};

fn owned_metadata(prefix: &str, namespace: &str, owner: (&str, &str)) -> ObjectMeta {
    ObjectMeta::generated(prefix, namespace)
        .with_labels(labels::owner_labels(owner.0, owner.1))
}

// =============================================================================
// VirtualService
// =============================================================================

/// Builder for [`VirtualService`]
pub struct VirtualServiceBuilder {
    metadata: ObjectMeta,
    spec: VirtualServiceSpec,
}

impl VirtualServiceBuilder {
    /// A VirtualService owned by the given ExposureRule, with a generated name
    pub fn owned_by(prefix: &str, namespace: &str, owner: (&str, &str)) -> Self {
        Self {
            metadata: owned_metadata(prefix, namespace, owner),
            spec: VirtualServiceSpec::default(),
        }
    }

    /// Add an exposed host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.spec.hosts.push(host.into());
        self
    }

    /// Add a gateway reference
    pub fn gateway(mut self, gateway: impl Into<String>) -> Self {
        self.spec.gateways.push(gateway.into());
        self
    }

    /// Add an HTTP route
    pub fn route(mut self, route: HttpRoute) -> Self {
        self.spec.http.push(route);
        self
    }

    /// Finish building
    pub fn build(self) -> VirtualService {
        let mut vs = VirtualService::new(self.metadata);
        vs.spec = self.spec;
        vs
    }
}

/// Builder for one [`HttpRoute`]
#[derive(Default)]
pub struct HttpRouteBuilder {
    route: HttpRoute,
    request_headers: HeaderOperations,
}

impl HttpRouteBuilder {
    /// An empty route
    pub fn new() -> Self {
        Self::default()
    }

    /// Match the URI with the given matcher
    pub fn uri(mut self, uri: StringMatch) -> Self {
        self.ensure_match().uri = Some(uri);
        self
    }

    /// Match any of the given methods (regex alternation; no-op when empty)
    pub fn methods(mut self, methods: &[String]) -> Self {
        if !methods.is_empty() {
            self.ensure_match().method = Some(StringMatch::Regex(methods.join("|")));
        }
        self
    }

    /// Route to the given destination host and port
    pub fn destination(mut self, host: impl Into<String>, port: u32) -> Self {
        self.route.route.push(HttpRouteDestination {
            destination: Destination {
                host: host.into(),
                port: Some(PortSelector { number: port }),
            },
        });
        self
    }

    /// Set the route timeout
    pub fn timeout_seconds(mut self, seconds: u32) -> Self {
        self.route.timeout = Some(format!("{}s", seconds));
        self
    }

    /// Set a request header before forwarding
    pub fn set_request_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.set.insert(name.into(), value.into());
        self
    }

    /// Strip a header from the upstream response
    pub fn remove_response_header(mut self, name: impl Into<String>) -> Self {
        let headers = self.route.headers.get_or_insert_with(Headers::default);
        headers
            .response
            .get_or_insert_with(HeaderOperations::default)
            .remove
            .push(name.into());
        self
    }

    /// Set the route CORS policy
    pub fn cors(mut self, cors: IstioCorsPolicy) -> Self {
        self.route.cors_policy = Some(cors);
        self
    }

    /// Finish building
    pub fn build(mut self) -> HttpRoute {
        if !self.request_headers.set.is_empty() || !self.request_headers.remove.is_empty() {
            self.route
                .headers
                .get_or_insert_with(Headers::default)
                .request = Some(self.request_headers);
        }
        self.route
    }

    fn ensure_match(&mut self) -> &mut HttpMatchRequest {
        if self.route.matches.is_empty() {
            self.route.matches.push(HttpMatchRequest::default());
        }
        self.route.matches.last_mut().expect("just pushed")
    }
}

// =============================================================================
// AuthorizationPolicy
// =============================================================================

/// Builder for [`AuthorizationPolicy`]
pub struct AuthorizationPolicyBuilder {
    metadata: ObjectMeta,
    spec: AuthorizationPolicySpec,
}

impl AuthorizationPolicyBuilder {
    /// An ALLOW policy owned by the given ExposureRule, with a generated name
    pub fn owned_by(prefix: &str, namespace: &str, owner: (&str, &str)) -> Self {
        Self {
            metadata: owned_metadata(prefix, namespace, owner),
            spec: AuthorizationPolicySpec {
                action: "ALLOW".to_string(),
                ..AuthorizationPolicySpec::default()
            },
        }
    }

    /// Add a label
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Set the workload selector (omitted when empty)
    pub fn selector(mut self, match_labels: BTreeMap<String, String>) -> Self {
        if !match_labels.is_empty() {
            self.spec.selector = Some(WorkloadSelector { match_labels });
        }
        self
    }

    /// Add an access rule
    pub fn rule(mut self, rule: AuthorizationRule) -> Self {
        self.spec.rules.push(rule);
        self
    }

    /// Finish building
    pub fn build(self) -> AuthorizationPolicy {
        AuthorizationPolicy::new(self.metadata, self.spec)
    }
}

/// Builder for one [`AuthorizationRule`]
#[derive(Default)]
pub struct RuleBuilder {
    rule: AuthorizationRule,
}

impl RuleBuilder {
    /// An empty rule
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow callers matching the given source
    pub fn from_source(mut self, source: Source) -> Self {
        self.rule.from.push(RuleFrom { source });
        self
    }

    /// Allow the given SPIFFE workload principals
    pub fn from_principals(mut self, principals: Vec<String>) -> Self {
        self.rule.from.push(RuleFrom {
            source: Source {
                principals,
                request_principals: vec![],
            },
        });
        self
    }

    /// Allow the given authenticated request principals
    pub fn from_request_principals(mut self, request_principals: Vec<String>) -> Self {
        self.rule.from.push(RuleFrom {
            source: Source {
                principals: vec![],
                request_principals,
            },
        });
        self
    }

    /// Restrict the rule to the given operation
    pub fn to(mut self, hosts: Vec<String>, methods: Vec<String>, paths: Vec<String>) -> Self {
        self.rule.to.push(RuleTo {
            operation: Operation {
                hosts,
                methods,
                paths,
            },
        });
        self
    }

    /// Add a claim condition
    pub fn when(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.rule.when.push(Condition {
            key: key.into(),
            values,
        });
        self
    }

    /// Finish building
    pub fn build(self) -> AuthorizationRule {
        self.rule
    }
}

// =============================================================================
// RequestAuthentication
// =============================================================================

/// Builder for [`RequestAuthentication`]
pub struct RequestAuthenticationBuilder {
    metadata: ObjectMeta,
    spec: RequestAuthenticationSpec,
}

impl RequestAuthenticationBuilder {
    /// A RequestAuthentication owned by the given ExposureRule
    pub fn owned_by(prefix: &str, namespace: &str, owner: (&str, &str)) -> Self {
        Self {
            metadata: owned_metadata(prefix, namespace, owner),
            spec: RequestAuthenticationSpec::default(),
        }
    }

    /// Set the workload selector (omitted when empty)
    pub fn selector(mut self, match_labels: BTreeMap<String, String>) -> Self {
        if !match_labels.is_empty() {
            self.spec.selector = Some(WorkloadSelector { match_labels });
        }
        self
    }

    /// Add a trusted issuer
    pub fn jwt_rule(mut self, rule: JwtRule) -> Self {
        self.spec.jwt_rules.push(rule);
        self
    }

    /// Finish building
    pub fn build(self) -> RequestAuthentication {
        RequestAuthentication::new(self.metadata, self.spec)
    }
}

// =============================================================================
// AccessRule
// =============================================================================

/// Builder for [`AccessRule`]
pub struct AccessRuleBuilder {
    metadata: ObjectMeta,
    spec: AccessRuleSpec,
}

impl AccessRuleBuilder {
    /// An AccessRule owned by the given ExposureRule
    pub fn owned_by(prefix: &str, namespace: &str, owner: (&str, &str)) -> Self {
        Self {
            metadata: owned_metadata(prefix, namespace, owner),
            spec: AccessRuleSpec::default(),
        }
    }

    /// Forward matched requests to the given URL
    pub fn upstream(mut self, url: impl Into<String>) -> Self {
        self.spec.upstream = Upstream { url: url.into() };
        self
    }

    /// Match requests by URL pattern and methods
    pub fn matching(mut self, url: impl Into<String>, methods: Vec<String>) -> Self {
        self.spec.route_match = RouteMatch {
            url: url.into(),
            methods,
        };
        self
    }

    /// Add an authentication handler
    pub fn authenticator(mut self, handler: ProxyHandler) -> Self {
        self.spec.authenticators.push(handler);
        self
    }

    /// Set the authorization handler
    pub fn authorizer(mut self, handler: impl Into<String>) -> Self {
        self.spec.authorizer = Some(ProxyHandler {
            handler: handler.into(),
            config: None,
        });
        self
    }

    /// Add a request mutator
    pub fn mutator(mut self, handler: ProxyHandler) -> Self {
        self.spec.mutators.push(handler);
        self
    }

    /// Finish building
    pub fn build(self) -> AccessRule {
        AccessRule::new(self.metadata, self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_stamp_the_ownership_label() {
        let vs = VirtualServiceBuilder::owned_by("orders-api-", "shop", ("orders-api", "shop"))
            .host("orders.example.com")
            .build();
        assert!(crate::labels::is_owned_by(
            &vs.metadata.labels,
            "orders-api",
            "shop"
        ));
        assert_eq!(vs.metadata.generate_name.as_deref(), Some("orders-api-"));
    }

    #[test]
    fn route_builder_collects_headers_and_matches() {
        let route = HttpRouteBuilder::new()
            .uri(StringMatch::Prefix("/".to_string()))
            .methods(&["GET".to_string(), "POST".to_string()])
            .destination("orders.shop.svc.cluster.local", 8080)
            .timeout_seconds(180)
            .set_request_header("x-forwarded-host", "orders.example.com")
            .build();

        assert_eq!(
            route.matches[0].method,
            Some(StringMatch::Regex("GET|POST".to_string()))
        );
        assert_eq!(route.timeout.as_deref(), Some("180s"));
        let set = &route.headers.unwrap().request.unwrap().set;
        assert_eq!(set.get("x-forwarded-host").unwrap(), "orders.example.com");
    }

    #[test]
    fn empty_selector_is_omitted() {
        let ap = AuthorizationPolicyBuilder::owned_by("r-", "shop", ("r", "shop"))
            .selector(BTreeMap::new())
            .rule(RuleBuilder::new().from_principals(vec!["p".to_string()]).build())
            .build();
        assert!(ap.spec.selector.is_none());
        assert_eq!(ap.spec.action, "ALLOW");
    }
}
