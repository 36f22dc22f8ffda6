//! VirtualService reconciliation
//!
//! Exactly one VirtualService exists per ExposureRule — every route lives
//! in its `http` list — so the diff is degenerate: once an owned object
//! exists the action is always an update. Two creators share the
//! processor: the mesh creator routes straight to the backend service, the
//! delegated creator sends proxy-enforced routes through the authorization
//! proxy.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::builders::{HttpRouteBuilder, VirtualServiceBuilder};
use crate::change::{ObjectChange, TargetKind};
use crate::crd::{v1beta1, v2alpha1};
use crate::processors::ReconciliationProcessor;
use crate::reconciliation::{CorsDefaults, ReconciliationConfig, Stores};
use crate::service::{
    effective_service_v1beta1, service_hostname, service_namespace,
};
use crate::targets::{IstioCorsPolicy, StringMatch, VirtualService};
use crate::{Error, Result, DEFAULT_HTTP_TIMEOUT_SECONDS};
use trellis_common::crd::v1beta1::OriginMatch;
use trellis_common::store::list_owned;

/// Response headers stripped so the gateway-level CORS policy is the only
/// one the browser sees
const UPSTREAM_CORS_HEADERS: [&str; 6] = [
    "access-control-allow-origin",
    "access-control-allow-credentials",
    "access-control-allow-methods",
    "access-control-allow-headers",
    "access-control-expose-headers",
    "access-control-max-age",
];

/// Builds the single desired VirtualService for an ExposureRule
pub trait VirtualServiceCreator: Send + Sync {
    /// Compute the desired object
    fn create(&self) -> Result<VirtualService>;
}

/// Handles the VirtualService in the reconciliation of an ExposureRule
pub struct VirtualServiceProcessor {
    creator: Box<dyn VirtualServiceCreator>,
    owner: (String, String),
}

impl VirtualServiceProcessor {
    /// Processor wrapping the given creator
    pub fn new(creator: Box<dyn VirtualServiceCreator>, owner: (String, String)) -> Self {
        Self { creator, owner }
    }
}

#[async_trait]
impl ReconciliationProcessor for VirtualServiceProcessor {
    fn kind(&self) -> TargetKind {
        TargetKind::VirtualService
    }

    async fn evaluate(&self, stores: &Stores) -> Result<Vec<ObjectChange>> {
        let desired = self.creator.create()?;
        let existing = list_owned(&*stores.virtual_services, &self.owner.0, &self.owner.1)
            .await?
            .into_iter()
            .next();

        let change = match existing {
            Some(mut existing) => {
                if existing.spec == desired.spec {
                    ObjectChange::unchanged(existing)
                } else {
                    existing.spec = desired.spec;
                    ObjectChange::update(existing)
                }
            }
            None => ObjectChange::create(desired),
        };

        Ok(vec![change])
    }
}

fn origin_match_to_istio(origin: &OriginMatch) -> StringMatch {
    match origin {
        OriginMatch::Exact(value) => StringMatch::Exact(value.clone()),
        OriginMatch::Prefix(value) => StringMatch::Prefix(value.clone()),
        OriginMatch::Regex(value) => StringMatch::Regex(value.clone()),
    }
}

fn cors_from_defaults(defaults: &CorsDefaults) -> IstioCorsPolicy {
    IstioCorsPolicy {
        allow_origins: defaults.allow_origins.clone(),
        allow_methods: defaults.allow_methods.clone(),
        allow_headers: defaults.allow_headers.clone(),
        ..IstioCorsPolicy::default()
    }
}

/// Cookie pairs folded into one `Cookie` header value
fn cookie_header(cookies: &std::collections::BTreeMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

// =============================================================================
// Mesh creator (hub shape)
// =============================================================================

/// Creator for mesh enforcement: every route goes to its backend service
pub struct MeshVirtualServiceCreator {
    rule: Arc<v2alpha1::ExposureRule>,
    default_cors: Option<CorsDefaults>,
}

impl MeshVirtualServiceCreator {
    /// Creator for a hub-shape ExposureRule
    pub fn new(rule: Arc<v2alpha1::ExposureRule>, config: &ReconciliationConfig) -> Self {
        Self {
            rule,
            default_cors: config.default_cors.clone(),
        }
    }

    fn cors(&self) -> Option<IstioCorsPolicy> {
        if let Some(cors) = &self.rule.spec.cors_policy {
            // A spec-level policy fully replaces the gateway defaults
            return Some(IstioCorsPolicy {
                allow_origins: cors.allow_origins.iter().map(origin_match_to_istio).collect(),
                allow_methods: cors.allow_methods.clone(),
                allow_headers: cors.allow_headers.clone(),
                expose_headers: cors.expose_headers.clone(),
                allow_credentials: cors.allow_credentials,
                max_age: cors.max_age.map(|secs| format!("{}s", secs)),
            });
        }
        self.default_cors.as_ref().map(cors_from_defaults)
    }
}

impl VirtualServiceCreator for MeshVirtualServiceCreator {
    fn create(&self) -> Result<VirtualService> {
        let (owner_name, owner_namespace) = crate::reconciliation::owner_of_hub(&self.rule);
        let spec = &self.rule.spec;

        let mut builder = VirtualServiceBuilder::owned_by(
            &format!("{}-", owner_name),
            &owner_namespace,
            (&owner_name, &owner_namespace),
        );
        for host in &spec.hosts {
            builder = builder.host(host.clone());
        }
        if let Some(gateway) = &spec.gateway {
            builder = builder.gateway(gateway.clone());
        }

        let forwarded_host = spec.hosts.first().cloned().ok_or_else(|| {
            Error::validation_for(&owner_name, "exposure rule has no hosts")
        })?;

        for rule in &spec.rules {
            let service = v2alpha1::effective_service(spec, rule, &owner_name)?;
            let namespace = v2alpha1::effective_service_namespace(&self.rule, rule)?;

            let uri = if rule.applies_to_all_paths() {
                StringMatch::Prefix("/".to_string())
            } else {
                StringMatch::Regex(template_path_to_regex(&rule.path))
            };

            let mut route = HttpRouteBuilder::new()
                .uri(uri)
                .methods(&rule.methods)
                .destination(service_hostname(service, &namespace), service.port)
                .timeout_seconds(
                    rule.timeout
                        .or(spec.timeout)
                        .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECONDS),
                )
                .set_request_header("x-forwarded-host", forwarded_host.clone());

            // Request mutation is a property of JWT-secured routes only.
            if rule.jwt.is_some() {
                if let Some(request) = &rule.request {
                    for (name, value) in &request.headers {
                        route = route.set_request_header(name.clone(), value.clone());
                    }
                    if !request.cookies.is_empty() {
                        route = route.set_request_header("Cookie", cookie_header(&request.cookies));
                    }
                }
            }

            if let Some(cors) = self.cors() {
                route = route.cors(cors);
            }
            for header in UPSTREAM_CORS_HEADERS {
                route = route.remove_response_header(header);
            }

            builder = builder.route(route.build());
        }

        Ok(builder.build())
    }
}

/// Translate the `{*}`/`{**}` path template operators into the regex the
/// proxy actually evaluates, anchored at both ends.
fn template_path_to_regex(path: &str) -> String {
    let translated = path
        .replace("{**}", "([A-Za-z0-9-._~!$&'()*+,;=:@/]|%[0-9a-fA-F]{2})*")
        .replace("{*}", "([A-Za-z0-9-._~!$&'()*+,;=:@]|%[0-9a-fA-F]{2})+");
    format!("^{}$", translated)
}

// =============================================================================
// Delegated creator (legacy shape)
// =============================================================================

/// Creator for delegated enforcement: proxy-enforced routes go through the
/// authorization proxy, mesh-enforced ones straight to the service
pub struct DelegatedVirtualServiceCreator {
    rule: Arc<v1beta1::ExposureRule>,
    proxy_host: String,
    proxy_port: u32,
    default_cors: Option<CorsDefaults>,
}

impl DelegatedVirtualServiceCreator {
    /// Creator for a legacy-shape ExposureRule
    pub fn new(rule: Arc<v1beta1::ExposureRule>, config: &ReconciliationConfig) -> Self {
        Self {
            rule,
            proxy_host: config.delegated_proxy_host.clone(),
            proxy_port: config.delegated_proxy_port,
            default_cors: config.default_cors.clone(),
        }
    }

    fn cors(&self) -> Option<IstioCorsPolicy> {
        if let Some(cors) = &self.rule.spec.cors_policy {
            return Some(IstioCorsPolicy {
                allow_origins: cors.allow_origins.iter().map(origin_match_to_istio).collect(),
                allow_methods: cors.allow_methods.clone(),
                allow_headers: cors.allow_headers.clone(),
                expose_headers: cors.expose_headers.clone(),
                allow_credentials: cors.allow_credentials,
                max_age: cors.max_age.clone(),
            });
        }
        self.default_cors.as_ref().map(cors_from_defaults)
    }
}

impl VirtualServiceCreator for DelegatedVirtualServiceCreator {
    fn create(&self) -> Result<VirtualService> {
        let (owner_name, owner_namespace) = crate::reconciliation::owner_of_legacy(&self.rule);
        let spec = &self.rule.spec;
        let host = spec.host.clone().ok_or_else(|| {
            Error::validation_for(&owner_name, "exposure rule has no host")
        })?;

        let mut builder = VirtualServiceBuilder::owned_by(
            &format!("{}-", owner_name),
            &owner_namespace,
            (&owner_name, &owner_namespace),
        )
        .host(host.clone());
        if let Some(gateway) = &spec.gateway {
            builder = builder.gateway(gateway.clone());
        }

        // One route per distinct (path, method-set); later duplicates are
        // proxy-side concerns and merge into the same AccessRule.
        let mut seen: BTreeSet<(String, Vec<String>)> = BTreeSet::new();

        for rule in &spec.rules {
            if !seen.insert((rule.path.clone(), rule.methods.clone())) {
                continue;
            }

            let service = effective_service_v1beta1(spec, rule, &owner_name)?;
            let namespace =
                service_namespace(service, self.rule.metadata.namespace.as_deref());

            let (destination_host, destination_port) = if rule.requires_delegation()? {
                (self.proxy_host.clone(), self.proxy_port)
            } else {
                (service_hostname(service, &namespace), service.port)
            };

            let uri = if rule.path == "/*" {
                StringMatch::Prefix("/".to_string())
            } else {
                StringMatch::Regex(format!("^{}$", rule.path))
            };

            let mut route = HttpRouteBuilder::new()
                .uri(uri)
                .methods(&rule.methods)
                .destination(destination_host, destination_port)
                .timeout_seconds(
                    rule.timeout
                        .or(spec.timeout)
                        .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECONDS),
                )
                .set_request_header("x-forwarded-host", host.clone());

            // Mutators ride along on JWT-secured routes; proxy-enforced
            // routes apply them in the proxy instead.
            if rule.jwt_config()?.is_some() {
                for mutator in &rule.mutators {
                    match mutator.name.as_str() {
                        v1beta1::MUTATOR_HEADER => {
                            if let Some(config) = &mutator.config {
                                let headers: std::collections::BTreeMap<String, String> =
                                    serde_json::from_value(
                                        config.get("headers").cloned().unwrap_or_default(),
                                    )
                                    .map_err(|e| {
                                        Error::decode_of("header mutator config", e.to_string())
                                    })?;
                                for (name, value) in headers {
                                    route = route.set_request_header(name, value);
                                }
                            }
                        }
                        v1beta1::MUTATOR_COOKIE => {
                            if let Some(config) = &mutator.config {
                                let cookies: std::collections::BTreeMap<String, String> =
                                    serde_json::from_value(
                                        config.get("cookies").cloned().unwrap_or_default(),
                                    )
                                    .map_err(|e| {
                                        Error::decode_of("cookie mutator config", e.to_string())
                                    })?;
                                if !cookies.is_empty() {
                                    route = route
                                        .set_request_header("Cookie", cookie_header(&cookies));
                                }
                            }
                        }
                        other => {
                            return Err(Error::validation_for(
                                &owner_name,
                                format!("unknown mutator handler {:?}", other),
                            ));
                        }
                    }
                }
            }

            if let Some(cors) = self.cors() {
                route = route.cors(cors);
            }

            builder = builder.route(route.build());
        }

        Ok(builder.build())
    }
}
