//! Delegated-to-mesh migration state machine
//!
//! Migrating an ExposureRule's backing objects from delegated-proxy
//! enforcement to mesh enforcement takes multiple passes: authorization
//! objects must exist before the route switches, and the proxy's rules can
//! only go once nothing routes through them. Progress is encoded in a
//! single annotation on the rule, advanced only after a successful pass.
//!
//! The processor set per step is cumulative: a later step re-runs
//! everything the earlier steps did. A crash between passes therefore
//! re-executes a safe superset next time — at-least-once, idempotent by
//! construction.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use crate::change::{ObjectChange, TargetKind};
use crate::crd::{v1beta1, v2alpha1};
use crate::processors::{
    authorization_policy::AuthorizationPolicyProcessor,
    request_authentication::RequestAuthenticationProcessor,
    virtual_service::{MeshVirtualServiceCreator, VirtualServiceProcessor},
    ReconciliationProcessor,
};
use crate::reconciliation::{reconcile, ReconciliationConfig, Stores};
use crate::Result;
use trellis_common::store::list_owned;
use trellis_common::MIGRATION_STEP_ANNOTATION;

/// One step of the migration, in strict forward order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MigrationStep {
    /// S1: apply mesh authorization objects while the proxy still enforces
    ApplyAuthorization,
    /// S2: point the route at the backend service instead of the proxy
    SwitchRouteToService,
    /// S3: remove the now-unused delegated proxy rules
    RemoveDelegatedRule,
}

impl MigrationStep {
    /// Annotation value of this step
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStep::ApplyAuthorization => "apply-authorization",
            MigrationStep::SwitchRouteToService => "switch-route-to-service",
            MigrationStep::RemoveDelegatedRule => "remove-delegated-rule",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "apply-authorization" => Some(MigrationStep::ApplyAuthorization),
            "switch-route-to-service" => Some(MigrationStep::SwitchRouteToService),
            "remove-delegated-rule" => Some(MigrationStep::RemoveDelegatedRule),
            _ => None,
        }
    }
}

impl std::fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The step to execute given the recorded annotation value.
///
/// The annotation holds the last completed step; its successor runs next.
/// No annotation means the migration is starting (S1). An unrecognized
/// value also resolves to S1: re-running the first step is always safe, and
/// the annotation is corrected after the pass.
pub fn next_step(recorded: Option<&str>) -> MigrationStep {
    match recorded.and_then(MigrationStep::parse) {
        None => MigrationStep::ApplyAuthorization,
        Some(MigrationStep::ApplyAuthorization) => MigrationStep::SwitchRouteToService,
        Some(MigrationStep::SwitchRouteToService) => MigrationStep::RemoveDelegatedRule,
        // A recorded terminal step should have removed the annotation;
        // start over rather than guess.
        Some(MigrationStep::RemoveDelegatedRule) => MigrationStep::ApplyAuthorization,
    }
}

/// Records migration progress on the ExposureRule
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MigrationAnnotator: Send + Sync {
    /// Persist the last completed step; `None` removes the annotation
    /// (terminal state)
    async fn record_step(
        &self,
        name: &str,
        namespace: &str,
        step: Option<MigrationStep>,
    ) -> Result<()>;
}

/// Kube-backed annotator patching the v1beta1 ExposureRule
pub struct KubeMigrationAnnotator {
    client: Client,
}

impl KubeMigrationAnnotator {
    /// Create an annotator using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MigrationAnnotator for KubeMigrationAnnotator {
    async fn record_step(
        &self,
        name: &str,
        namespace: &str,
        step: Option<MigrationStep>,
    ) -> Result<()> {
        let api: Api<v1beta1::ExposureRule> = Api::namespaced(self.client.clone(), namespace);
        let value = match step {
            Some(step) => serde_json::Value::String(step.as_str().to_string()),
            None => serde_json::Value::Null,
        };
        let patch = serde_json::json!({
            "metadata": { "annotations": { MIGRATION_STEP_ANNOTATION: value } }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Deletes every delegated proxy rule still owned by the ExposureRule (S3)
pub struct AccessRuleDeletionProcessor {
    owner: (String, String),
}

impl AccessRuleDeletionProcessor {
    /// Processor deleting the rules owned by the given ExposureRule
    pub fn new(rule: &v1beta1::ExposureRule) -> Self {
        Self {
            owner: crate::reconciliation::owner_of_legacy(rule),
        }
    }
}

#[async_trait]
impl ReconciliationProcessor for AccessRuleDeletionProcessor {
    fn kind(&self) -> TargetKind {
        TargetKind::AccessRule
    }

    async fn evaluate(&self, stores: &Stores) -> Result<Vec<ObjectChange>> {
        let existing = list_owned(&*stores.access_rules, &self.owner.0, &self.owner.1).await?;
        Ok(existing.into_iter().map(ObjectChange::delete).collect())
    }
}

/// Orchestrates one migration pass
pub struct MigrationReconciliation {
    legacy: Arc<v1beta1::ExposureRule>,
    hub: Arc<v2alpha1::ExposureRule>,
    config: ReconciliationConfig,
}

impl MigrationReconciliation {
    /// Orchestrator for the given rule, in both its shapes
    pub fn new(
        legacy: Arc<v1beta1::ExposureRule>,
        hub: Arc<v2alpha1::ExposureRule>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            legacy,
            hub,
            config,
        }
    }

    /// The step the next pass will execute
    pub fn current_step(&self) -> MigrationStep {
        let recorded = self
            .legacy
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(MIGRATION_STEP_ANNOTATION))
            .map(String::as_str);
        next_step(recorded)
    }

    /// The cumulative processor set for a step.
    ///
    /// Selecting S3 implies running S3's own processor plus S2's plus both
    /// of S1's, so re-running after a crash always covers everything an
    /// earlier pass might have left undone.
    pub fn processors_for(&self, step: MigrationStep) -> Vec<Box<dyn ReconciliationProcessor>> {
        let mut processors: Vec<Box<dyn ReconciliationProcessor>> = Vec::new();

        if step >= MigrationStep::RemoveDelegatedRule {
            processors.push(Box::new(AccessRuleDeletionProcessor::new(&self.legacy)));
        }
        if step >= MigrationStep::SwitchRouteToService {
            let owner = crate::reconciliation::owner_of_hub(&self.hub);
            processors.push(Box::new(VirtualServiceProcessor::new(
                Box::new(MeshVirtualServiceCreator::new(
                    self.hub.clone(),
                    &self.config,
                )),
                owner,
            )));
        }

        // The proxy stays a trusted caller until its rules are gone.
        let passthrough = step < MigrationStep::RemoveDelegatedRule;
        processors.push(Box::new(AuthorizationPolicyProcessor::new_migration(
            self.hub.clone(),
            passthrough,
        )));
        processors.push(Box::new(RequestAuthenticationProcessor::new(
            self.hub.clone(),
        )));

        processors
    }

    /// Run one pass and, only on success, advance the annotation.
    ///
    /// After S3's work completes the annotation is removed entirely: the
    /// rule is fully mesh-enforced.
    pub async fn run(
        &self,
        stores: &Stores,
        annotator: &dyn MigrationAnnotator,
    ) -> Result<MigrationStep> {
        let step = self.current_step();
        let (name, namespace) = crate::reconciliation::owner_of_legacy(&self.legacy);
        info!(rule = %name, namespace = %namespace, step = %step, "running migration pass");

        let processors = self.processors_for(step);
        let outcome = reconcile(&processors, stores).await;
        if let Some(error) = outcome.into_error() {
            return Err(error);
        }

        match step {
            MigrationStep::RemoveDelegatedRule => {
                annotator.record_step(&name, &namespace, None).await?;
            }
            completed => {
                annotator
                    .record_step(&name, &namespace, Some(completed))
                    .await?;
            }
        }

        Ok(step)
    }
}
