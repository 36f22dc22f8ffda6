//! Reconciliation processors
//!
//! A processor owns one target kind: it computes the desired objects from
//! the intent, reads the actual owned objects from the cluster, and merges
//! the two into an ordered action set. Natural-key kinds share the merge in
//! [`merge_by_key`]; AuthorizationPolicies use [`crate::hash_state`].

pub mod access_rule;
pub mod authorization_policy;
pub mod request_authentication;
pub mod virtual_service;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::change::{ObjectChange, TargetKind, TargetResource};
use crate::reconciliation::Stores;
use crate::Result;

/// Evaluates the changes for one target kind during a reconciliation pass
#[async_trait]
pub trait ReconciliationProcessor: Send + Sync {
    /// The kind this processor manages
    fn kind(&self) -> TargetKind;

    /// Compare desired against actual state and return the changes to apply
    async fn evaluate(&self, stores: &Stores) -> Result<Vec<ObjectChange>>;
}

/// Spec transfer and comparison for natural-key merged kinds
pub(crate) trait NaturalKeyed: Into<TargetResource> + Clone {
    /// Copy the desired spec onto this (existing) object, preserving its
    /// identity and resource version for the write
    fn copy_spec_from(&mut self, desired: &Self);
    /// Whether two objects already carry the same spec
    fn same_spec(&self, other: &Self) -> bool;
}

/// Merge desired against existing objects sharing a deterministic key.
///
/// Key in both maps updates the existing object (or degrades to a no-op
/// when the spec already matches); key only in existing deletes; key only
/// in desired creates. The action multiset is exactly (D∖E)=create,
/// (E∖D)=delete, (D∩E)=update-or-none.
pub(crate) fn merge_by_key<T: NaturalKeyed>(
    desired: BTreeMap<String, T>,
    mut actual: BTreeMap<String, T>,
) -> Vec<ObjectChange> {
    let mut changes = Vec::new();

    for (key, want) in desired {
        match actual.remove(&key) {
            Some(existing) => {
                if existing.same_spec(&want) {
                    changes.push(ObjectChange::unchanged(existing));
                } else {
                    let mut updated = existing;
                    updated.copy_spec_from(&want);
                    changes.push(ObjectChange::update(updated));
                }
            }
            None => changes.push(ObjectChange::create(want)),
        }
    }

    for (_, existing) in actual {
        changes.push(ObjectChange::delete(existing));
    }

    changes
}

/// Whether any path occurs on more than one rule
///
/// Decides whether methods must be part of the AccessRule key.
pub(crate) fn has_path_duplicates<'a>(paths: impl Iterator<Item = &'a str>) -> bool {
    let mut seen = std::collections::BTreeSet::new();
    for path in paths {
        if !seen.insert(path) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Action;
    use crate::targets::{AccessRule, ObjectMeta};

    fn rule(name: &str, url: &str) -> AccessRule {
        let mut ar = AccessRule::new(
            ObjectMeta::named(name, "shop"),
            crate::targets::AccessRuleSpec::default(),
        );
        ar.spec.route_match.url = url.to_string();
        ar
    }

    fn keyed(rules: Vec<AccessRule>) -> BTreeMap<String, AccessRule> {
        rules
            .into_iter()
            .map(|r| (r.spec.route_match.url.clone(), r))
            .collect()
    }

    #[test]
    fn merge_covers_create_update_delete_exactly() {
        let desired = keyed(vec![rule("", "http://a"), rule("", "http://b")]);
        let actual = keyed(vec![rule("existing-b", "http://b"), rule("existing-c", "http://c")]);

        let changes = merge_by_key(desired, actual);

        // a: only desired -> create; b: both (same spec) -> none; c: only existing -> delete
        assert_eq!(changes.len(), 3);
        assert!(changes
            .iter()
            .any(|c| c.action == Action::Create && c.resource.name().is_empty()));
        assert!(changes
            .iter()
            .any(|c| c.action == Action::None && c.resource.name() == "existing-b"));
        assert!(changes
            .iter()
            .any(|c| c.action == Action::Delete && c.resource.name() == "existing-c"));
    }

    #[test]
    fn merge_updates_preserve_existing_identity() {
        let mut want = rule("", "http://a");
        want.spec.upstream.url = "http://orders.shop.svc.cluster.local:8080".to_string();
        let mut existing = rule("orders-api-xyz", "http://a");
        existing.metadata.resource_version = Some("41".to_string());

        let changes = merge_by_key(keyed(vec![want]), keyed(vec![existing]));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, Action::Update);
        match &changes[0].resource {
            TargetResource::AccessRule(updated) => {
                assert_eq!(updated.metadata.name, "orders-api-xyz");
                assert_eq!(updated.metadata.resource_version.as_deref(), Some("41"));
                assert_eq!(
                    updated.spec.upstream.url,
                    "http://orders.shop.svc.cluster.local:8080"
                );
            }
            other => panic!("expected AccessRule, got {:?}", other),
        }
    }

    #[test]
    fn path_duplicate_detection() {
        assert!(!has_path_duplicates(["/a", "/b"].into_iter()));
        assert!(has_path_duplicates(["/a", "/b", "/a"].into_iter()));
    }
}
