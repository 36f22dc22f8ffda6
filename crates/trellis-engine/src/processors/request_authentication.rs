//! RequestAuthentication reconciliation
//!
//! One object per JWT-secured path rule, carrying the full ordered
//! authentication list. The natural key is the service namespace plus the
//! issuer/JWKS set: rules trusting the same issuers share one object.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::builders::RequestAuthenticationBuilder;
use crate::change::{ObjectChange, TargetKind};
use crate::crd::v2alpha1::{self, ExposureRule};
use crate::processors::{merge_by_key, NaturalKeyed, ReconciliationProcessor};
use crate::reconciliation::Stores;
use crate::targets::{JwtRule, JwtRuleHeader, RequestAuthentication};
use crate::Result;
use trellis_common::store::list_owned;

impl NaturalKeyed for RequestAuthentication {
    fn copy_spec_from(&mut self, desired: &Self) {
        self.spec = desired.spec.clone();
    }
    fn same_spec(&self, other: &Self) -> bool {
        self.spec == other.spec
    }
}

/// Deterministic key of a RequestAuthentication
fn request_authentication_key(ra: &RequestAuthentication) -> String {
    let issuers: Vec<String> = ra
        .spec
        .jwt_rules
        .iter()
        .map(|rule| {
            format!(
                "{}:{}",
                rule.issuer,
                rule.jwks_uri.as_deref().unwrap_or_default()
            )
        })
        .collect();
    format!("{}/{}", ra.metadata.namespace, issuers.join("|"))
}

/// Handles RequestAuthentications in the reconciliation of an ExposureRule
pub struct RequestAuthenticationProcessor {
    rule: Arc<ExposureRule>,
}

impl RequestAuthenticationProcessor {
    /// Processor for a hub-shape ExposureRule
    pub fn new(rule: Arc<ExposureRule>) -> Self {
        Self { rule }
    }

    async fn desired_state(
        &self,
        stores: &Stores,
    ) -> Result<BTreeMap<String, RequestAuthentication>> {
        let (owner_name, owner_namespace) = crate::reconciliation::owner_of_hub(&self.rule);
        let mut desired = BTreeMap::new();

        for rule in &self.rule.spec.rules {
            let Some(jwt) = &rule.jwt else { continue };

            let service = v2alpha1::effective_service(&self.rule.spec, rule, &owner_name)?;
            let namespace = v2alpha1::effective_service_namespace(&self.rule, rule)?;
            let selector = stores
                .resolver
                .pod_selector(&owner_name, &namespace, service)
                .await?;

            let mut builder = RequestAuthenticationBuilder::owned_by(
                &format!("{}-", owner_name),
                &namespace,
                (&owner_name, &owner_namespace),
            )
            .selector(selector);

            for authentication in &jwt.authentications {
                builder = builder.jwt_rule(JwtRule {
                    issuer: authentication.issuer.clone(),
                    jwks_uri: Some(authentication.jwks_uri.clone()),
                    from_headers: authentication
                        .from_headers
                        .iter()
                        .map(|header| JwtRuleHeader {
                            name: header.name.clone(),
                            prefix: header.prefix.clone(),
                        })
                        .collect(),
                    from_params: authentication.from_params.clone(),
                });
            }

            let ra = builder.build();
            // Rules trusting the same issuer set share one object.
            desired.insert(request_authentication_key(&ra), ra);
        }

        Ok(desired)
    }

    async fn actual_state(
        &self,
        stores: &Stores,
    ) -> Result<BTreeMap<String, RequestAuthentication>> {
        let (name, namespace) = crate::reconciliation::owner_of_hub(&self.rule);
        let existing = list_owned(&*stores.request_authentications, &name, &namespace).await?;
        Ok(existing
            .into_iter()
            .map(|ra| (request_authentication_key(&ra), ra))
            .collect())
    }
}

#[async_trait]
impl ReconciliationProcessor for RequestAuthenticationProcessor {
    fn kind(&self) -> TargetKind {
        TargetKind::RequestAuthentication
    }

    async fn evaluate(&self, stores: &Stores) -> Result<Vec<ObjectChange>> {
        let desired = self.desired_state(stores).await?;
        let actual = self.actual_state(stores).await?;
        Ok(merge_by_key(desired, actual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{Action, TargetResource};
    use crate::crd::jwt::{JwtAuthentication, JwtConfig, JwtHeader};
    use crate::test_support::{apply, TestStores};

    fn jwt_config(issuers: &[&str]) -> JwtConfig {
        JwtConfig {
            authentications: issuers
                .iter()
                .map(|issuer| JwtAuthentication {
                    issuer: issuer.to_string(),
                    jwks_uri: format!("{}/keys", issuer),
                    from_headers: vec![JwtHeader {
                        name: "x-jwt".to_string(),
                        prefix: Some("Bearer ".to_string()),
                    }],
                    from_params: vec![],
                })
                .collect(),
            authorizations: vec![],
        }
    }

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
                rules,
                ..v2alpha1::ExposureRuleSpec::default()
            },
        );
        rule.metadata.namespace = Some("shop".to_string());
        Arc::new(rule)
    }

    fn jwt_rule(path: &str, issuers: &[&str]) -> v2alpha1::Rule {
        v2alpha1::Rule {
            path: path.to_string(),
            jwt: Some(jwt_config(issuers)),
            ..v2alpha1::Rule::default()
        }
    }

    #[tokio::test]
    async fn carries_the_full_ordered_authentication_list() {
        let rule = exposure(vec![jwt_rule("/orders", &["https://a", "https://b"])]);
        let stores = TestStores::new();
        let processor = RequestAuthenticationProcessor::new(rule);

        let changes = processor.evaluate(&stores.stores()).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, Action::Create);
        match &changes[0].resource {
            TargetResource::RequestAuthentication(ra) => {
                let issuers: Vec<&str> =
                    ra.spec.jwt_rules.iter().map(|r| r.issuer.as_str()).collect();
                assert_eq!(issuers, vec!["https://a", "https://b"]);
                assert_eq!(
                    ra.spec.jwt_rules[0].from_headers[0].prefix.as_deref(),
                    Some("Bearer ")
                );
                assert_eq!(
                    ra.spec.selector.as_ref().unwrap().match_labels.get("app"),
                    Some(&"orders".to_string())
                );
            }
            other => panic!("expected RequestAuthentication, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rules_sharing_issuers_share_one_object() {
        let rule = exposure(vec![
            jwt_rule("/orders", &["https://a"]),
            jwt_rule("/payments", &["https://a"]),
        ]);
        let stores = TestStores::new();
        let processor = RequestAuthenticationProcessor::new(rule);

        let changes = processor.evaluate(&stores.stores()).await.unwrap();
        assert_eq!(changes.len(), 1);
    }

    #[tokio::test]
    async fn unsecured_rules_get_no_object() {
        let rule = exposure(vec![v2alpha1::Rule {
            path: "/public".to_string(),
            no_auth: Some(true),
            ..v2alpha1::Rule::default()
        }]);
        let stores = TestStores::new();
        let processor = RequestAuthenticationProcessor::new(rule);

        let changes = processor.evaluate(&stores.stores()).await.unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn issuer_change_replaces_the_object() {
        let stores = TestStores::new();

        let before = exposure(vec![jwt_rule("/orders", &["https://a"])]);
        let processor = RequestAuthenticationProcessor::new(before);
        let changes = processor.evaluate(&stores.stores()).await.unwrap();
        apply(&stores, changes).await;

        let after = exposure(vec![jwt_rule("/orders", &["https://b"])]);
        let processor = RequestAuthenticationProcessor::new(after);
        let changes = processor.evaluate(&stores.stores()).await.unwrap();

        let mut actions: Vec<Action> = changes.iter().map(|c| c.action).collect();
        actions.sort_by_key(|a| format!("{:?}", a));
        assert_eq!(actions, vec![Action::Create, Action::Delete]);
    }

    #[tokio::test]
    async fn second_pass_is_idempotent() {
        let stores = TestStores::new();
        let rule = exposure(vec![jwt_rule("/orders", &["https://a"])]);
        let processor = RequestAuthenticationProcessor::new(rule);

        let first = processor.evaluate(&stores.stores()).await.unwrap();
        apply(&stores, first).await;

        let second = processor.evaluate(&stores.stores()).await.unwrap();
        assert!(second.iter().all(|c| !c.is_effective()));
    }
}
