//! Reconciliation façades and the apply step
//!
//! A façade composes the processors for one enforcement mode; `reconcile`
//! runs them serially on one worker, applies each kind's changes through
//! the store, and records a per-kind outcome for the status aggregator. A
//! failure stops the pass: remaining kinds stay `Skipped`, nothing is
//! retried internally, and the external work queue re-runs the whole pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::change::{Action, ObjectChange, TargetKind, TargetResource};
use crate::crd::{conversion, v1beta1, v2alpha1};
use crate::processors::{
    access_rule::AccessRuleProcessor,
    authorization_policy::AuthorizationPolicyProcessor,
    request_authentication::RequestAuthenticationProcessor,
    virtual_service::{
        DelegatedVirtualServiceCreator, MeshVirtualServiceCreator, VirtualServiceProcessor,
    },
    ReconciliationProcessor,
};
use crate::service::ServiceResolver;
use crate::targets::{
    AccessRule, AuthorizationPolicy, RequestAuthentication, StringMatch, VirtualService,
};
use crate::{Error, Result};
use trellis_common::store::ResourceStore;

/// Stores and lookups a reconciliation pass reads and writes
///
/// The engine depends on nothing beyond this CRUD+list bundle; tests wire
/// in-memory stores, production wires kube-backed ones.
pub struct Stores {
    /// VirtualService store
    pub virtual_services: Arc<dyn ResourceStore<VirtualService>>,
    /// AccessRule store
    pub access_rules: Arc<dyn ResourceStore<AccessRule>>,
    /// RequestAuthentication store
    pub request_authentications: Arc<dyn ResourceStore<RequestAuthentication>>,
    /// AuthorizationPolicy store
    pub authorization_policies: Arc<dyn ResourceStore<AuthorizationPolicy>>,
    /// Backend service selector resolution
    pub resolver: Arc<dyn ServiceResolver>,
}

/// Static configuration of the engine
#[derive(Clone, Debug)]
pub struct ReconciliationConfig {
    /// Cluster-local hostname of the delegated authorization proxy
    pub delegated_proxy_host: String,
    /// Port of the delegated authorization proxy
    pub delegated_proxy_port: u32,
    /// Gateway-level CORS defaults, passed through when a rule brings none
    pub default_cors: Option<CorsDefaults>,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            delegated_proxy_host: "trellis-authz-proxy.trellis-system.svc.cluster.local"
                .to_string(),
            delegated_proxy_port: 4455,
            default_cors: None,
        }
    }
}

/// Gateway-level CORS defaults
#[derive(Clone, Debug, Default)]
pub struct CorsDefaults {
    /// Allowed origins
    pub allow_origins: Vec<StringMatch>,
    /// Allowed methods
    pub allow_methods: Vec<String>,
    /// Allowed headers
    pub allow_headers: Vec<String>,
}

/// Outcome of one kind within a pass
#[derive(Debug)]
pub enum KindOutcome {
    /// Not reached because an earlier kind failed
    Skipped,
    /// All changes applied
    Applied(ApplyCounts),
    /// Evaluation or application failed
    Failed(Error),
}

/// Effective writes performed for one kind
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyCounts {
    /// Objects created
    pub created: usize,
    /// Objects updated
    pub updated: usize,
    /// Objects deleted
    pub deleted: usize,
}

impl ApplyCounts {
    /// Total effective writes
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

impl std::ops::AddAssign for ApplyCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.created += rhs.created;
        self.updated += rhs.updated;
        self.deleted += rhs.deleted;
    }
}

/// Per-kind outcomes of one reconciliation pass
///
/// Consumed by the (out-of-scope) status aggregator to produce the rule's
/// readiness condition.
#[derive(Debug, Default)]
pub struct ReconciliationOutcome {
    /// Outcome per target kind touched by the pass
    pub kinds: BTreeMap<TargetKind, KindOutcome>,
}

impl ReconciliationOutcome {
    /// Whether every kind applied cleanly
    pub fn is_ready(&self) -> bool {
        self.kinds
            .values()
            .all(|outcome| matches!(outcome, KindOutcome::Applied(_)))
    }

    /// The failure that stopped the pass, if any
    pub fn error(&self) -> Option<&Error> {
        self.kinds.values().find_map(|outcome| match outcome {
            KindOutcome::Failed(e) => Some(e),
            _ => None,
        })
    }

    /// Consume the outcome, extracting the failure that stopped the pass
    pub fn into_error(self) -> Option<Error> {
        self.kinds.into_values().find_map(|outcome| match outcome {
            KindOutcome::Failed(e) => Some(e),
            _ => None,
        })
    }
}

/// Run one reconciliation pass: evaluate and apply each processor in order.
pub async fn reconcile(
    processors: &[Box<dyn ReconciliationProcessor>],
    stores: &Stores,
) -> ReconciliationOutcome {
    let mut outcome = ReconciliationOutcome::default();
    for processor in processors {
        outcome
            .kinds
            .entry(processor.kind())
            .or_insert(KindOutcome::Skipped);
    }

    for processor in processors {
        let kind = processor.kind();

        let changes = match processor.evaluate(stores).await {
            Ok(changes) => changes,
            Err(e) => {
                outcome.kinds.insert(kind, KindOutcome::Failed(e));
                return outcome;
            }
        };

        match apply_changes(stores, changes).await {
            Ok(counts) => {
                if counts.total() > 0 {
                    info!(kind = %kind, created = counts.created, updated = counts.updated,
                        deleted = counts.deleted, "applied changes");
                }
                match outcome.kinds.entry(kind).or_insert(KindOutcome::Skipped) {
                    KindOutcome::Applied(existing) => *existing += counts,
                    slot => *slot = KindOutcome::Applied(counts),
                }
            }
            Err(e) => {
                outcome.kinds.insert(kind, KindOutcome::Failed(e));
                return outcome;
            }
        }
    }

    outcome
}

/// Apply the given changes through the matching stores.
///
/// Cluster errors propagate verbatim; partial application within a kind is
/// possible and left for the re-queued pass to complete.
async fn apply_changes(stores: &Stores, changes: Vec<ObjectChange>) -> Result<ApplyCounts> {
    let mut counts = ApplyCounts::default();

    for change in changes {
        if !change.is_effective() {
            continue;
        }
        debug!(
            action = ?change.action,
            kind = %change.resource.kind(),
            name = %change.resource.name(),
            namespace = %change.resource.namespace(),
            "applying change"
        );

        match change.action {
            Action::Create => {
                apply_write(stores, &change.resource, WriteOp::Create).await?;
                counts.created += 1;
            }
            Action::Update => {
                apply_write(stores, &change.resource, WriteOp::Update).await?;
                counts.updated += 1;
            }
            Action::Delete => {
                apply_write(stores, &change.resource, WriteOp::Delete).await?;
                counts.deleted += 1;
            }
            Action::None => {}
        }
    }

    Ok(counts)
}

enum WriteOp {
    Create,
    Update,
    Delete,
}

async fn apply_write(stores: &Stores, resource: &TargetResource, op: WriteOp) -> Result<()> {
    match resource {
        TargetResource::VirtualService(obj) => write(&*stores.virtual_services, obj, op).await,
        TargetResource::AccessRule(obj) => write(&*stores.access_rules, obj, op).await,
        TargetResource::RequestAuthentication(obj) => {
            write(&*stores.request_authentications, obj, op).await
        }
        TargetResource::AuthorizationPolicy(obj) => {
            write(&*stores.authorization_policies, obj, op).await
        }
    }
}

async fn write<T: trellis_common::store::StoredObject + Sync>(
    store: &dyn ResourceStore<T>,
    obj: &T,
    op: WriteOp,
) -> Result<()> {
    match op {
        WriteOp::Create => store.create(obj).await,
        WriteOp::Update => store.update(obj).await,
        WriteOp::Delete => store.delete(obj.namespace(), obj.name()).await,
    }
}

// =============================================================================
// Enforcement-mode façades
// =============================================================================

/// Mesh enforcement: routes go straight to the backend service, access
/// control is enforced by RequestAuthentication and AuthorizationPolicy.
pub struct MeshReconciliation {
    processors: Vec<Box<dyn ReconciliationProcessor>>,
}

impl MeshReconciliation {
    /// Compose the processors for a hub-shape ExposureRule
    pub fn new(rule: Arc<v2alpha1::ExposureRule>, config: &ReconciliationConfig) -> Self {
        let processors: Vec<Box<dyn ReconciliationProcessor>> = vec![
            Box::new(VirtualServiceProcessor::new(
                Box::new(MeshVirtualServiceCreator::new(rule.clone(), config)),
                owner_of_hub(&rule),
            )),
            Box::new(RequestAuthenticationProcessor::new(rule.clone())),
            Box::new(AuthorizationPolicyProcessor::new(rule)),
        ];
        Self { processors }
    }

    /// The composed processors, in apply order
    pub fn processors(&self) -> &[Box<dyn ReconciliationProcessor>] {
        &self.processors
    }
}

/// Delegated enforcement: secured routes go through the authorization
/// proxy, which matches them against generated AccessRules. JWT-secured
/// rules are still enforced by the mesh.
pub struct DelegatedReconciliation {
    processors: Vec<Box<dyn ReconciliationProcessor>>,
}

impl DelegatedReconciliation {
    /// Compose the processors for a legacy-shape ExposureRule.
    ///
    /// The mesh-enforced kinds work on the hub shape, so the rule is
    /// converted once up front; a conversion failure fails the pass before
    /// anything is written.
    pub fn new(
        rule: Arc<v1beta1::ExposureRule>,
        config: &ReconciliationConfig,
    ) -> Result<Self> {
        let hub = Arc::new(conversion::v1beta1_to_hub(&rule)?);
        let processors: Vec<Box<dyn ReconciliationProcessor>> = vec![
            Box::new(VirtualServiceProcessor::new(
                Box::new(DelegatedVirtualServiceCreator::new(rule.clone(), config)),
                owner_of_legacy(&rule),
            )),
            Box::new(AccessRuleProcessor::new(rule, config)),
            Box::new(RequestAuthenticationProcessor::new(hub.clone())),
            Box::new(AuthorizationPolicyProcessor::new_jwt_only(hub)),
        ];
        Ok(Self { processors })
    }

    /// The composed processors, in apply order
    pub fn processors(&self) -> &[Box<dyn ReconciliationProcessor>] {
        &self.processors
    }
}

pub(crate) fn owner_of_hub(rule: &v2alpha1::ExposureRule) -> (String, String) {
    (
        rule.metadata.name.clone().unwrap_or_default(),
        rule.metadata.namespace.clone().unwrap_or_default(),
    )
}

pub(crate) fn owner_of_legacy(rule: &v1beta1::ExposureRule) -> (String, String) {
    (
        rule.metadata.name.clone().unwrap_or_default(),
        rule.metadata.namespace.clone().unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestStores;

    fn hub_exposure(rules: Vec<v2alpha1::Rule>) -> Arc<v2alpha1::ExposureRule> {
        let mut rule = v2alpha1::ExposureRule::new(
            "orders-api",
            v2alpha1::ExposureRuleSpec {
                hosts: vec!["orders.example.com".to_string()],
                gateway: Some("trellis-system/gateway".to_string()),
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

    fn no_auth_rule() -> v2alpha1::Rule {
        v2alpha1::Rule {
            path: "/*".to_string(),
            methods: vec!["GET".to_string()],
            no_auth: Some(true),
            ..v2alpha1::Rule::default()
        }
    }

    fn applied(outcome: &ReconciliationOutcome, kind: TargetKind) -> ApplyCounts {
        match outcome.kinds.get(&kind) {
            Some(KindOutcome::Applied(counts)) => *counts,
            other => panic!("expected Applied for {}, got {:?}", kind, other),
        }
    }

    /// A no-auth path rule against an empty cluster produces exactly one
    /// VirtualService create, no AccessRules, no RequestAuthentications,
    /// and one AuthorizationPolicy create with empty `when`.
    #[tokio::test]
    async fn no_auth_rule_against_an_empty_cluster() {
        let stores = TestStores::new();
        let facade = MeshReconciliation::new(
            hub_exposure(vec![no_auth_rule()]),
            &ReconciliationConfig::default(),
        );

        let outcome = reconcile(facade.processors(), &stores.stores()).await;
        assert!(outcome.is_ready());

        assert_eq!(applied(&outcome, TargetKind::VirtualService).created, 1);
        assert_eq!(
            applied(&outcome, TargetKind::RequestAuthentication).total(),
            0
        );
        assert_eq!(applied(&outcome, TargetKind::AuthorizationPolicy).created, 1);
        assert!(stores.access_rules.snapshot().is_empty());

        let policies = stores.authorization_policies.snapshot();
        assert_eq!(policies.len(), 1);
        assert!(policies[0].spec.rules[0].when.is_empty());
    }

    #[tokio::test]
    async fn a_second_pass_over_reconciled_state_writes_nothing() {
        let stores = TestStores::new();
        let rule = hub_exposure(vec![no_auth_rule()]);
        let facade = MeshReconciliation::new(rule, &ReconciliationConfig::default());

        let first = reconcile(facade.processors(), &stores.stores()).await;
        assert!(first.is_ready());

        let second = reconcile(facade.processors(), &stores.stores()).await;
        assert!(second.is_ready());
        for kind in [
            TargetKind::VirtualService,
            TargetKind::RequestAuthentication,
            TargetKind::AuthorizationPolicy,
        ] {
            assert_eq!(applied(&second, kind).total(), 0, "{} wrote on pass 2", kind);
        }
    }

    #[tokio::test]
    async fn a_failed_kind_stops_the_pass_and_skips_the_rest() {
        let stores = TestStores::new();
        // no hosts: the VirtualService creator fails validation before
        // anything is written
        let mut rule = (*hub_exposure(vec![no_auth_rule()])).clone();
        rule.spec.hosts.clear();
        let facade = MeshReconciliation::new(Arc::new(rule), &ReconciliationConfig::default());

        let outcome = reconcile(facade.processors(), &stores.stores()).await;
        assert!(!outcome.is_ready());
        assert!(matches!(
            outcome.kinds.get(&TargetKind::VirtualService),
            Some(KindOutcome::Failed(Error::Validation { .. }))
        ));
        assert!(matches!(
            outcome.kinds.get(&TargetKind::AuthorizationPolicy),
            Some(KindOutcome::Skipped)
        ));
        assert!(stores.virtual_services.snapshot().is_empty());
    }

    #[tokio::test]
    async fn delegated_mode_routes_through_the_proxy() {
        let mut exposure = v1beta1::ExposureRule::new(
            "orders-api",
            v1beta1::ExposureRuleSpec {
                host: Some("orders.example.com".to_string()),
                service: Some(crate::service::ServiceRef {
                    name: "orders".to_string(),
                    namespace: None,
                    port: 8080,
                    is_external: None,
                }),
                rules: vec![v1beta1::Rule {
                    path: "/orders".to_string(),
                    methods: vec!["GET".to_string()],
                    access_strategies: vec![v1beta1::Handler::named("oauth2_introspection")],
                    ..v1beta1::Rule::default()
                }],
                ..v1beta1::ExposureRuleSpec::default()
            },
        );
        exposure.metadata.namespace = Some("shop".to_string());

        let stores = TestStores::new();
        let facade =
            DelegatedReconciliation::new(Arc::new(exposure), &ReconciliationConfig::default())
                .unwrap();
        let outcome = reconcile(facade.processors(), &stores.stores()).await;
        assert!(outcome.is_ready());

        // the proxy enforces: one AccessRule, and the route targets the proxy
        assert_eq!(stores.access_rules.snapshot().len(), 1);
        let vs = &stores.virtual_services.snapshot()[0];
        assert_eq!(
            vs.spec.http[0].route[0].destination.host,
            ReconciliationConfig::default().delegated_proxy_host
        );
        // no JWT anywhere: the mesh-enforced kinds stay empty
        assert!(stores.request_authentications.snapshot().is_empty());
        assert!(stores.authorization_policies.snapshot().is_empty());
    }
}
