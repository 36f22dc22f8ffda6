//! Backend service resolution
//!
//! Every path rule resolves to exactly one effective backend service:
//! rule-level overrides spec-level. The only cluster read the creators
//! perform goes through [`ServiceResolver`], which turns a service
//! reference into the pod selector its policy objects attach to.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service as CoreService;
use kube::{Api, Client};

#[cfg(test)]
use mockall::automock;

use crate::crd::v1beta1;
use crate::{Error, Result};

/// Backend service reference, shared by all ExposureRule shapes
pub use trellis_common::crd::v1beta1::Service as ServiceRef;

/// Cluster-internal hostname of a backend service
///
/// External services are addressed by their name, which already is a
/// hostname; everything else gets the cluster-local FQDN.
pub fn service_hostname(service: &ServiceRef, namespace: &str) -> String {
    if service.is_external.unwrap_or(false) {
        service.name.clone()
    } else {
        format!("{}.{}.svc.cluster.local", service.name, namespace)
    }
}

/// The effective backend service of a v1beta1 rule
pub fn effective_service_v1beta1<'a>(
    spec: &'a v1beta1::ExposureRuleSpec,
    rule: &'a v1beta1::Rule,
    rule_name: &str,
) -> Result<&'a ServiceRef> {
    rule.service
        .as_ref()
        .or(spec.service.as_ref())
        .ok_or_else(|| Error::validation_for(rule_name, "rule resolves to no backend service"))
}

/// The namespace a service's generated objects live in
pub fn service_namespace(service: &ServiceRef, rule_namespace: Option<&str>) -> String {
    service
        .namespace
        .clone()
        .or_else(|| rule_namespace.map(String::from))
        .unwrap_or_else(|| "default".to_string())
}

/// Resolves a backend service's pod selector
///
/// A missing service is a lookup error and aborts generation for the
/// affected rule. Services without a selector (external backends,
/// selector-less services) resolve to an empty map; callers omit the
/// workload selector in that case.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceResolver: Send + Sync {
    /// Pod selector of `service` in `namespace`
    async fn pod_selector(
        &self,
        rule_name: &str,
        namespace: &str,
        service: &ServiceRef,
    ) -> Result<BTreeMap<String, String>>;
}

/// Kube-backed service resolver
pub struct KubeServiceResolver {
    client: Client,
}

impl KubeServiceResolver {
    /// Create a resolver using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceResolver for KubeServiceResolver {
    async fn pod_selector(
        &self,
        rule_name: &str,
        namespace: &str,
        service: &ServiceRef,
    ) -> Result<BTreeMap<String, String>> {
        if service.is_external.unwrap_or(false) {
            return Ok(BTreeMap::new());
        }

        let api: Api<CoreService> = Api::namespaced(self.client.clone(), namespace);
        let found = match api.get(&service.name).await {
            Ok(found) => found,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(Error::lookup_for(
                    rule_name,
                    format!("backend service {}/{} not found", namespace, service.name),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(found
            .spec
            .and_then(|spec| spec.selector)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, external: bool) -> ServiceRef {
        ServiceRef {
            name: name.to_string(),
            namespace: None,
            port: 8080,
            is_external: external.then_some(true),
        }
    }

    #[test]
    fn internal_services_get_cluster_local_hostnames() {
        assert_eq!(
            service_hostname(&service("orders", false), "shop"),
            "orders.shop.svc.cluster.local"
        );
    }

    #[test]
    fn external_services_are_addressed_by_name() {
        assert_eq!(
            service_hostname(&service("api.partner.example.com", true), "shop"),
            "api.partner.example.com"
        );
    }

    #[test]
    fn namespace_prefers_the_service_reference() {
        let mut svc = service("orders", false);
        svc.namespace = Some("backends".to_string());
        assert_eq!(service_namespace(&svc, Some("shop")), "backends");

        let svc = service("orders", false);
        assert_eq!(service_namespace(&svc, Some("shop")), "shop");
        assert_eq!(service_namespace(&svc, None), "default");
    }
}
