//! AuthorizationPolicy generation and hash-based reconciliation
//!
//! Turns the ordered authorization list of a JWT-secured rule into policy
//! objects. The scope claim may appear under any of three historically used
//! claim keys, so scoped entries produce one policy `Rule` per claim key
//! inside the same object (union-of-claim-keys semantics); scopes and
//! audiences within one entry AND together. OR across audiences requires
//! separate entries.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::builders::{AuthorizationPolicyBuilder, RuleBuilder};
use crate::change::{ObjectChange, TargetKind};
use crate::crd::jwt::JwtAuthorization;
use crate::crd::v2alpha1::{self, ExposureRule};
use crate::hash_state::{self, Actual, Desired};
use crate::processors::ReconciliationProcessor;
use crate::reconciliation::Stores;
use crate::targets::{AuthorizationPolicy, Source};
use crate::{Result, DELEGATED_PROXY_PRINCIPAL, INGRESS_GATEWAY_PRINCIPAL};
use trellis_common::store::list_owned;

/// Claim keys the scope claim has historically been stored under.
///
/// A closed, exhaustive enumeration: the keys are a wire-level compatibility
/// contract, and changing the set changes every stored policy hash.
pub const SCOPE_CLAIM_KEYS: [&str; 3] = [
    "request.auth.claims[scp]",
    "request.auth.claims[scope]",
    "request.auth.claims[scopes]",
];

/// Claim key carrying the token audience
pub const AUDIENCE_CLAIM_KEY: &str = "request.auth.claims[aud]";

/// Handles AuthorizationPolicies in the reconciliation of an ExposureRule
pub struct AuthorizationPolicyProcessor {
    rule: Arc<ExposureRule>,
    /// Keep the delegated proxy trusted: the route still points at it
    passthrough: bool,
    /// Generate only for JWT-secured rules (delegated enforcement mode)
    jwt_only: bool,
}

impl AuthorizationPolicyProcessor {
    /// Processor for mesh enforcement: every rule gets policies
    pub fn new(rule: Arc<ExposureRule>) -> Self {
        Self {
            rule,
            passthrough: false,
            jwt_only: false,
        }
    }

    /// Processor for delegated enforcement: only JWT-secured rules get
    /// policies, everything else is enforced by the proxy
    pub fn new_jwt_only(rule: Arc<ExposureRule>) -> Self {
        Self {
            rule,
            passthrough: false,
            jwt_only: true,
        }
    }

    /// Processor for the migration window
    ///
    /// While the route still points at the delegated proxy, the proxy stays
    /// a trusted caller and host restrictions are relaxed so in-flight
    /// traffic survives the switch.
    pub fn new_migration(rule: Arc<ExposureRule>, passthrough: bool) -> Self {
        Self {
            rule,
            passthrough,
            jwt_only: false,
        }
    }

    fn owner(&self) -> (String, String) {
        crate::reconciliation::owner_of_hub(&self.rule)
    }

    async fn desired_state(&self, stores: &Stores) -> Result<Desired> {
        let mut desired = Desired::new();
        for rule in &self.rule.spec.rules {
            if self.jwt_only && rule.jwt.is_none() {
                continue;
            }
            for ap in self.generate_for_rule(stores, rule).await? {
                desired.add(ap)?;
            }
        }
        Ok(desired)
    }

    async fn actual_state(&self, stores: &Stores) -> Result<Actual> {
        let (name, namespace) = self.owner();
        let mut actual = Actual::new();
        for ap in list_owned(&*stores.authorization_policies, &name, &namespace).await? {
            actual.add(ap);
        }
        Ok(actual)
    }

    /// Generate the policies for one path rule, one per authorization entry.
    ///
    /// An entry with neither scopes nor audiences (and the no-auth case)
    /// yields a single pass-through policy at index 0.
    async fn generate_for_rule(
        &self,
        stores: &Stores,
        rule: &v2alpha1::Rule,
    ) -> Result<Vec<AuthorizationPolicy>> {
        let (rule_name, _) = self.owner();
        let service = v2alpha1::effective_service(&self.rule.spec, rule, &rule_name)?;
        let namespace = v2alpha1::effective_service_namespace(&self.rule, rule)?;
        let selector = stores
            .resolver
            .pod_selector(&rule_name, &namespace, service)
            .await?;

        let authorizations: Vec<JwtAuthorization> = rule
            .jwt
            .as_ref()
            .map(|jwt| jwt.authorizations.clone())
            .unwrap_or_default();

        let mut policies = Vec::new();
        if authorizations.is_empty() {
            let mut ap =
                self.generate(rule, &JwtAuthorization::default(), &namespace, &selector)?;
            // With no authorization list there is exactly one entry, at
            // index 0.
            hash_state::add_hash_labels(&mut ap, 0)?;
            policies.push(ap);
        } else {
            for (index, authorization) in authorizations.iter().enumerate() {
                let mut ap = self.generate(rule, authorization, &namespace, &selector)?;
                hash_state::add_hash_labels(&mut ap, index)?;
                policies.push(ap);
            }
        }

        Ok(policies)
    }

    fn generate(
        &self,
        rule: &v2alpha1::Rule,
        authorization: &JwtAuthorization,
        namespace: &str,
        selector: &std::collections::BTreeMap<String, String>,
    ) -> Result<AuthorizationPolicy> {
        let (owner_name, owner_namespace) = self.owner();
        let mut builder = AuthorizationPolicyBuilder::owned_by(
            &format!("{}-", owner_name),
            namespace,
            (&owner_name, &owner_namespace),
        )
        .selector(selector.clone());

        // During the migration window the policy must keep matching traffic
        // that still flows through the proxy, so hosts are not restricted.
        let hosts = if self.passthrough {
            vec![]
        } else {
            self.rule.spec.hosts.clone()
        };
        let path = if rule.path == "/*" {
            "/{**}".to_string()
        } else {
            rule.path.clone()
        };

        let froms = self.trust_boundary(rule);
        let base_rule = |mut builder: RuleBuilder| -> RuleBuilder {
            builder = builder.to(hosts.clone(), rule.methods.clone(), vec![path.clone()]);
            for from in &froms {
                builder = builder.from_source(from.clone());
            }
            builder
        };

        if !authorization.required_scopes.is_empty() {
            // The scope claim may live under any of the known claim keys:
            // one policy rule per key, all inside the same object.
            for claim_key in SCOPE_CLAIM_KEYS {
                let mut rule_builder = base_rule(RuleBuilder::new());
                for scope in &authorization.required_scopes {
                    rule_builder = rule_builder.when(claim_key, vec![scope.clone()]);
                }
                for audience in &authorization.audiences {
                    rule_builder = rule_builder.when(AUDIENCE_CLAIM_KEY, vec![audience.clone()]);
                }
                builder = builder.rule(rule_builder.build());
            }
        } else {
            let mut rule_builder = base_rule(RuleBuilder::new());
            for audience in &authorization.audiences {
                rule_builder = rule_builder.when(AUDIENCE_CLAIM_KEY, vec![audience.clone()]);
            }
            builder = builder.rule(rule_builder.build());
        }

        Ok(builder.build())
    }

    /// The sources allowed to reach the route.
    ///
    /// JWT-secured rules require an authenticated request principal from
    /// one of the configured issuers, combined with the ingress gateway
    /// identity outside the migration window. Everything else trusts the
    /// boundary the traffic enters through: the ingress gateway, plus the
    /// delegated proxy while it is still in the path.
    fn trust_boundary(&self, rule: &v2alpha1::Rule) -> Vec<Source> {
        if let Some(jwt) = &rule.jwt {
            let request_principals: Vec<String> = if jwt.authentications.is_empty() {
                vec!["*".to_string()]
            } else {
                jwt.authentications
                    .iter()
                    .map(|auth| format!("{}/*", auth.issuer))
                    .collect()
            };
            let principals = if self.passthrough {
                vec![]
            } else {
                vec![INGRESS_GATEWAY_PRINCIPAL.to_string()]
            };
            return vec![Source {
                principals,
                request_principals,
            }];
        }

        let mut sources = Vec::new();
        if self.passthrough {
            sources.push(Source {
                principals: vec![DELEGATED_PROXY_PRINCIPAL.to_string()],
                request_principals: vec![],
            });
        }
        sources.push(Source {
            principals: vec![INGRESS_GATEWAY_PRINCIPAL.to_string()],
            request_principals: vec![],
        });
        sources
    }
}

#[async_trait]
impl ReconciliationProcessor for AuthorizationPolicyProcessor {
    fn kind(&self) -> TargetKind {
        TargetKind::AuthorizationPolicy
    }

    async fn evaluate(&self, stores: &Stores) -> Result<Vec<ObjectChange>> {
        let desired = self.desired_state(stores).await?;
        let actual = self.actual_state(stores).await?;
        let changes = hash_state::get_changes(desired, actual);
        debug!(
            changes = changes.len(),
            "authorization policy changes evaluated"
        );
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Action;
    use crate::crd::jwt::{JwtAuthentication, JwtConfig};
    use crate::service::{service_namespace, MockServiceResolver};
    use crate::test_support::TestStores;
    use crate::Error;
    use trellis_common::{HASH_LABEL, INDEX_LABEL};

    fn exposure(rules: Vec<v2alpha1::Rule>) -> Arc<ExposureRule> {
        let mut rule = ExposureRule::new(
            "orders-api",
            v2alpha1::ExposureRuleSpec {
                hosts: vec!["orders.example.com".to_string()],
                service: Some(crate::service::ServiceRef {
                    name: "orders".to_string(),
                    namespace: None,
                    port: 8080,
                    is_external: None,
                }),
                gateway: Some("trellis-system/gateway".to_string()),
                rules,
                ..v2alpha1::ExposureRuleSpec::default()
            },
        );
        rule.metadata.namespace = Some("shop".to_string());
        Arc::new(rule)
    }

    fn jwt_rule(authorizations: Vec<JwtAuthorization>) -> v2alpha1::Rule {
        v2alpha1::Rule {
            path: "/orders".to_string(),
            methods: vec!["GET".to_string()],
            jwt: Some(JwtConfig {
                authentications: vec![JwtAuthentication {
                    issuer: "https://issuer.example.com".to_string(),
                    jwks_uri: "https://issuer.example.com/keys".to_string(),
                    from_headers: vec![],
                    from_params: vec![],
                }],
                authorizations,
            }),
            ..v2alpha1::Rule::default()
        }
    }

    fn no_auth_rule() -> v2alpha1::Rule {
        v2alpha1::Rule {
            path: "/*".to_string(),
            methods: vec!["GET".to_string()],
            no_auth: Some(true),
            ..v2alpha1::Rule::default()
        }
    }

    async fn evaluate(processor: AuthorizationPolicyProcessor) -> Vec<ObjectChange> {
        let stores = TestStores::new();
        processor.evaluate(&stores.stores()).await.unwrap()
    }

    fn created_policies(changes: &[ObjectChange]) -> Vec<AuthorizationPolicy> {
        changes
            .iter()
            .filter(|c| c.action == Action::Create)
            .map(|c| match &c.resource {
                crate::change::TargetResource::AuthorizationPolicy(ap) => ap.clone(),
                other => panic!("expected AuthorizationPolicy, got {:?}", other),
            })
            .collect()
    }

    #[tokio::test]
    async fn scoped_entry_produces_the_claim_key_cross_product() {
        let rule = exposure(vec![jwt_rule(vec![JwtAuthorization {
            required_scopes: vec!["read".to_string(), "write".to_string()],
            audiences: vec!["orders".to_string(), "payments".to_string()],
        }])]);
        let changes = evaluate(AuthorizationPolicyProcessor::new(rule)).await;

        let policies = created_policies(&changes);
        assert_eq!(policies.len(), 1);
        let spec = &policies[0].spec;
        // one Rule per default scope-claim key, inside the same object
        assert_eq!(spec.rules.len(), 3);
        for policy_rule in &spec.rules {
            // 2 scopes + 2 audiences, ANDed
            assert_eq!(policy_rule.when.len(), 4);
            assert!(policy_rule
                .when
                .iter()
                .filter(|w| w.key == AUDIENCE_CLAIM_KEY)
                .count()
                == 2);
        }
        let keys: Vec<&str> = spec
            .rules
            .iter()
            .map(|r| r.when[0].key.as_str())
            .collect();
        assert_eq!(keys, SCOPE_CLAIM_KEYS.to_vec());
    }

    #[tokio::test]
    async fn audience_only_entry_produces_a_single_rule() {
        let rule = exposure(vec![jwt_rule(vec![JwtAuthorization {
            required_scopes: vec![],
            audiences: vec!["orders".to_string(), "payments".to_string()],
        }])]);
        let changes = evaluate(AuthorizationPolicyProcessor::new(rule)).await;

        let policies = created_policies(&changes);
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].spec.rules.len(), 1);
        assert_eq!(policies[0].spec.rules[0].when.len(), 2);
    }

    #[tokio::test]
    async fn no_auth_rule_produces_one_passthrough_policy() {
        let rule = exposure(vec![no_auth_rule()]);
        let changes = evaluate(AuthorizationPolicyProcessor::new(rule)).await;

        let policies = created_policies(&changes);
        assert_eq!(policies.len(), 1);
        let spec = &policies[0].spec;
        assert_eq!(spec.rules.len(), 1);
        assert!(spec.rules[0].when.is_empty());
        assert_eq!(
            spec.rules[0].from[0].source.principals,
            vec![INGRESS_GATEWAY_PRINCIPAL.to_string()]
        );
        // the catch-all path is translated into the template grammar
        assert_eq!(spec.rules[0].to[0].operation.paths, vec!["/{**}"]);
        // identity labels are stamped at generation time
        let labels = &policies[0].metadata.labels;
        assert_eq!(labels.get(INDEX_LABEL).map(String::as_str), Some("0"));
        assert!(labels.contains_key(HASH_LABEL));
    }

    #[tokio::test]
    async fn each_authorization_entry_gets_its_own_indexed_policy() {
        let rule = exposure(vec![jwt_rule(vec![
            JwtAuthorization {
                required_scopes: vec![],
                audiences: vec!["orders".to_string()],
            },
            JwtAuthorization {
                required_scopes: vec![],
                audiences: vec!["payments".to_string()],
            },
        ])]);
        let changes = evaluate(AuthorizationPolicyProcessor::new(rule)).await;

        let mut indices: Vec<String> = created_policies(&changes)
            .iter()
            .map(|ap| ap.metadata.labels.get(INDEX_LABEL).unwrap().clone())
            .collect();
        indices.sort();
        assert_eq!(indices, vec!["0", "1"]);
    }

    #[tokio::test]
    async fn jwt_rules_require_issuer_request_principals() {
        let rule = exposure(vec![jwt_rule(vec![])]);
        let changes = evaluate(AuthorizationPolicyProcessor::new(rule)).await;

        let policies = created_policies(&changes);
        let source = &policies[0].spec.rules[0].from[0].source;
        assert_eq!(
            source.request_principals,
            vec!["https://issuer.example.com/*".to_string()]
        );
        assert_eq!(
            source.principals,
            vec![INGRESS_GATEWAY_PRINCIPAL.to_string()]
        );
    }

    #[tokio::test]
    async fn migration_passthrough_keeps_the_proxy_trusted() {
        let rule = exposure(vec![no_auth_rule()]);
        let changes = evaluate(AuthorizationPolicyProcessor::new_migration(rule, true)).await;

        let policies = created_policies(&changes);
        let spec = &policies[0].spec;
        // the proxy stays a trusted source and hosts are not restricted
        assert_eq!(spec.rules[0].from.len(), 2);
        assert_eq!(
            spec.rules[0].from[0].source.principals,
            vec![DELEGATED_PROXY_PRINCIPAL.to_string()]
        );
        assert!(spec.rules[0].to[0].operation.hosts.is_empty());
    }

    #[tokio::test]
    async fn jwt_only_mode_skips_unsecured_rules() {
        let rule = exposure(vec![no_auth_rule(), jwt_rule(vec![])]);
        let changes = evaluate(AuthorizationPolicyProcessor::new_jwt_only(rule)).await;
        assert_eq!(created_policies(&changes).len(), 1);
    }

    #[tokio::test]
    async fn selector_lookup_failure_aborts_the_rule() {
        let rule = exposure(vec![no_auth_rule()]);

        let mut resolver = MockServiceResolver::new();
        resolver.expect_pod_selector().returning(|rule_name, _, _| {
            Err(Error::lookup_for(rule_name, "backend service not found"))
        });

        let stores = TestStores::with_resolver(Arc::new(resolver));
        let processor = AuthorizationPolicyProcessor::new(rule);
        let result = processor.evaluate(&stores.stores()).await;
        assert!(matches!(result, Err(Error::Lookup { .. })));
    }

    #[tokio::test]
    async fn second_pass_is_idempotent() {
        let rule = exposure(vec![jwt_rule(vec![JwtAuthorization {
            required_scopes: vec!["read".to_string()],
            audiences: vec!["orders".to_string()],
        }])]);

        let stores = TestStores::new();
        let processor = AuthorizationPolicyProcessor::new(rule);

        let first = processor.evaluate(&stores.stores()).await.unwrap();
        crate::test_support::apply(&stores, first).await;

        let second = processor.evaluate(&stores.stores()).await.unwrap();
        assert!(second.iter().all(|c| !c.is_effective()));
    }

    #[test]
    fn selector_resolution_uses_the_effective_service() {
        // rule-level service overrides spec-level; the selector is resolved
        // in the service's namespace
        let spec = v2alpha1::ExposureRuleSpec {
            service: Some(crate::service::ServiceRef {
                name: "spec-level".to_string(),
                namespace: None,
                port: 80,
                is_external: None,
            }),
            ..v2alpha1::ExposureRuleSpec::default()
        };
        let rule = v2alpha1::Rule {
            path: "/".to_string(),
            service: Some(crate::service::ServiceRef {
                name: "rule-level".to_string(),
                namespace: Some("backends".to_string()),
                port: 80,
                is_external: None,
            }),
            ..v2alpha1::Rule::default()
        };
        let service = v2alpha1::effective_service(&spec, &rule, "orders-api").unwrap();
        assert_eq!(service.name, "rule-level");
        assert_eq!(service_namespace(service, Some("shop")), "backends");
    }
}
