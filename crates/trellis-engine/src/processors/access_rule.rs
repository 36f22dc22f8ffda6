//! AccessRule reconciliation for the delegated authorization proxy
//!
//! Produced only for path rules whose strategies the mesh cannot enforce
//! natively. The natural key is the match URL, widened with the method set
//! when the rule list carries duplicate paths, so same-path rules merge
//! into one object.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::builders::AccessRuleBuilder;
use crate::change::{ObjectChange, TargetKind};
use crate::crd::v1beta1::{self, ExposureRule};
use crate::processors::{has_path_duplicates, merge_by_key, NaturalKeyed, ReconciliationProcessor};
use crate::reconciliation::{ReconciliationConfig, Stores};
use crate::service::{effective_service_v1beta1, service_hostname, service_namespace};
use crate::targets::{AccessRule, ProxyHandler};
use crate::{Error, Result};
use trellis_common::store::list_owned;

impl NaturalKeyed for AccessRule {
    fn copy_spec_from(&mut self, desired: &Self) {
        self.spec = desired.spec.clone();
    }
    fn same_spec(&self, other: &Self) -> bool {
        self.spec == other.spec
    }
}

/// Deterministic key of an AccessRule
fn access_rule_key(has_duplicates: bool, rule: &AccessRule) -> String {
    if has_duplicates {
        format!(
            "{}:{}",
            rule.spec.route_match.url,
            rule.spec.route_match.methods.join(",")
        )
    } else {
        rule.spec.route_match.url.clone()
    }
}

fn proxy_handler(handler: &v1beta1::Handler) -> ProxyHandler {
    ProxyHandler {
        handler: handler.name.clone(),
        config: handler.config.clone(),
    }
}

/// Handles delegated-proxy AccessRules in the reconciliation of an ExposureRule
pub struct AccessRuleProcessor {
    rule: Arc<ExposureRule>,
}

impl AccessRuleProcessor {
    /// Processor for a legacy-shape ExposureRule
    pub fn new(rule: Arc<ExposureRule>, _config: &ReconciliationConfig) -> Self {
        Self { rule }
    }

    fn owner(&self) -> (String, String) {
        crate::reconciliation::owner_of_legacy(&self.rule)
    }

    fn desired_state(&self) -> Result<BTreeMap<String, AccessRule>> {
        let (owner_name, owner_namespace) = self.owner();
        let spec = &self.rule.spec;
        let host = spec.host.as_deref().ok_or_else(|| {
            Error::validation_for(&owner_name, "exposure rule has no host")
        })?;
        let has_duplicates = has_path_duplicates(spec.rules.iter().map(|r| r.path.as_str()));

        let mut desired = BTreeMap::new();
        for rule in &spec.rules {
            // Validates every handler against the closed strategy union
            // before anything is generated.
            if !rule.requires_delegation()? {
                continue;
            }

            let service = effective_service_v1beta1(spec, rule, &owner_name)?;
            let namespace =
                service_namespace(service, self.rule.metadata.namespace.as_deref());

            let mut builder = AccessRuleBuilder::owned_by(
                &format!("{}-", owner_name),
                &namespace,
                (&owner_name, &owner_namespace),
            )
            .upstream(format!(
                "http://{}:{}",
                service_hostname(service, &namespace),
                service.port
            ))
            .matching(
                format!("<http|https>://{}<{}>", host, rule.path),
                rule.methods.clone(),
            )
            .authorizer("allow");

            for strategy in &rule.access_strategies {
                builder = builder.authenticator(proxy_handler(strategy));
            }
            for mutator in &rule.mutators {
                builder = builder.mutator(proxy_handler(mutator));
            }

            let access_rule = builder.build();
            desired.insert(access_rule_key(has_duplicates, &access_rule), access_rule);
        }

        Ok(desired)
    }

    async fn actual_state(&self, stores: &Stores) -> Result<BTreeMap<String, AccessRule>> {
        let (name, namespace) = self.owner();
        let has_duplicates =
            has_path_duplicates(self.rule.spec.rules.iter().map(|r| r.path.as_str()));
        let existing = list_owned(&*stores.access_rules, &name, &namespace).await?;
        Ok(existing
            .into_iter()
            .map(|ar| (access_rule_key(has_duplicates, &ar), ar))
            .collect())
    }
}

#[async_trait]
impl ReconciliationProcessor for AccessRuleProcessor {
    fn kind(&self) -> TargetKind {
        TargetKind::AccessRule
    }

    async fn evaluate(&self, stores: &Stores) -> Result<Vec<ObjectChange>> {
        let desired = self.desired_state()?;
        let actual = self.actual_state(stores).await?;
        Ok(merge_by_key(desired, actual))
    }
}
