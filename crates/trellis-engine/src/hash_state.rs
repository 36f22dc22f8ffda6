//! Hash-based identity and diff for AuthorizationPolicies
//!
//! Generated AuthorizationPolicies have no natural key: their names are
//! server-generated and nothing in the spec uniquely survives an edit.
//! Identity across passes is instead a label pair written at generation
//! time: `index` is the position of the originating authorization entry in
//! its (ordered) list, `hash` a digest of the semantically relevant spec
//! fields. Desired and actual objects matching on both labels are the same
//! logical object; everything else is created or deleted.
//!
//! Because identity is positional, inserting an entry before existing ones
//! shifts every following index and replaces those objects. That is the
//! accepted cost of having no natural key.

use std::collections::BTreeMap;

use serde_json::json;
use tracing::debug;

use crate::change::ObjectChange;
use crate::targets::AuthorizationPolicy;
use crate::{Error, Result};
use trellis_common::hash::hash_canonical;
use trellis_common::{HASH_LABEL, INDEX_LABEL};

/// Digest of an AuthorizationPolicy's identity fields.
///
/// The input is the explicitly enumerated subset {selector, rules[].from,
/// rules[].to}. `when` is deliberately excluded: an audience- or scope-value
/// edit only touches `when`, and must update the object in place instead of
/// replacing it. Future spec fields do not change existing hashes unless
/// added here.
pub fn authorization_policy_hash(ap: &AuthorizationPolicy) -> Result<String> {
    let from: Vec<_> = ap.spec.rules.iter().map(|r| &r.from).collect();
    let to: Vec<_> = ap.spec.rules.iter().map(|r| &r.to).collect();
    hash_canonical(&json!({
        "selector": ap.spec.selector,
        "from": from,
        "to": to,
    }))
}

/// Stamp the identity labels onto a freshly generated policy.
///
/// `index` is the position of the originating authorization entry in its
/// list; the order of a YAML sequence is stable, so an unchanged entry keeps
/// its index across passes.
pub fn add_hash_labels(ap: &mut AuthorizationPolicy, index: usize) -> Result<()> {
    ap.metadata
        .labels
        .insert(INDEX_LABEL.to_string(), index.to_string());
    let hash = authorization_policy_hash(ap)?;
    ap.metadata.labels.insert(HASH_LABEL.to_string(), hash);
    Ok(())
}

/// `"hash:index"` identity key; `None` when either label is missing
fn hash_key(ap: &AuthorizationPolicy) -> Option<String> {
    let hash = ap.metadata.labels.get(HASH_LABEL)?;
    let index = ap.metadata.labels.get(INDEX_LABEL)?;
    Some(format!("{}:{}", hash, index))
}

/// Desired policies keyed by their identity labels
#[derive(Default)]
pub struct Desired {
    policies: BTreeMap<String, AuthorizationPolicy>,
}

impl Desired {
    /// An empty desired state
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a generated policy; it must already carry both identity labels
    pub fn add(&mut self, ap: AuthorizationPolicy) -> Result<()> {
        let key = hash_key(&ap).ok_or_else(|| {
            Error::internal_with_context(
                "hash-state",
                "desired AuthorizationPolicy is missing its identity labels",
            )
        })?;
        if self.policies.insert(key.clone(), ap).is_some() {
            return Err(Error::internal_with_context(
                "hash-state",
                format!("duplicate desired AuthorizationPolicy identity {}", key),
            ));
        }
        Ok(())
    }

    /// Number of desired policies
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether no policies are desired
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Existing owned policies, keyed where possible
#[derive(Default)]
pub struct Actual {
    policies: BTreeMap<String, AuthorizationPolicy>,
    unmatched: Vec<AuthorizationPolicy>,
}

impl Actual {
    /// An empty actual state
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an existing policy.
    ///
    /// Policies missing either identity label (created before the labels
    /// were introduced) can never match and go straight to the unmatched
    /// list; the diff replaces them. This is expected, observable churn on
    /// upgrade, not a bug. Duplicate keys keep the first object and mark the
    /// rest unmatched.
    pub fn add(&mut self, ap: AuthorizationPolicy) {
        match hash_key(&ap) {
            Some(key) => {
                if let Some(duplicate) = self.policies.insert(key.clone(), ap) {
                    debug!(key = %key, "duplicate AuthorizationPolicy identity in cluster");
                    let kept = self
                        .policies
                        .insert(key, duplicate)
                        .expect("entry just inserted");
                    self.unmatched.push(kept);
                }
            }
            None => self.unmatched.push(ap),
        }
    }
}

/// Compute the changes needed to reach the desired state.
///
/// Matched identities update in place, carrying only the fields the hash
/// excludes (the `when` conditions) onto the existing object; an exact
/// match degrades to a no-op so a second pass over reconciled state yields
/// zero effective actions.
pub fn get_changes(desired: Desired, actual: Actual) -> Vec<ObjectChange> {
    let mut desired_policies = desired.policies;
    let mut changes = Vec::new();

    for (key, existing) in actual.policies {
        match desired_policies.remove(&key) {
            Some(want) => {
                if existing.spec == want.spec {
                    changes.push(ObjectChange::unchanged(existing));
                } else {
                    let mut updated = existing;
                    updated.spec = want.spec;
                    changes.push(ObjectChange::update(updated));
                }
            }
            None => changes.push(ObjectChange::delete(existing)),
        }
    }

    for orphan in actual.unmatched {
        changes.push(ObjectChange::delete(orphan));
    }

    for (_, want) in desired_policies {
        changes.push(ObjectChange::create(want));
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::{AuthorizationPolicyBuilder, RuleBuilder};
    use crate::change::Action;

    fn policy(scopes: &[&str], audiences: &[&str]) -> AuthorizationPolicy {
        let mut builder =
            AuthorizationPolicyBuilder::owned_by("orders-api-", "shop", ("orders-api", "shop"))
                .selector(std::collections::BTreeMap::from([(
                    "app".to_string(),
                    "orders".to_string(),
                )]));

        if scopes.is_empty() {
            let mut rule = RuleBuilder::new()
                .from_principals(vec![crate::INGRESS_GATEWAY_PRINCIPAL.to_string()])
                .to(
                    vec!["orders.example.com".to_string()],
                    vec!["GET".to_string()],
                    vec!["/orders".to_string()],
                );
            for audience in audiences {
                rule = rule.when(
                    "request.auth.claims[aud]",
                    vec![audience.to_string()],
                );
            }
            builder = builder.rule(rule.build());
        } else {
            for claim_key in ["scp", "scope", "scopes"] {
                let mut rule = RuleBuilder::new()
                    .from_principals(vec![crate::INGRESS_GATEWAY_PRINCIPAL.to_string()])
                    .to(
                        vec!["orders.example.com".to_string()],
                        vec!["GET".to_string()],
                        vec!["/orders".to_string()],
                    );
                for scope in scopes {
                    rule = rule.when(
                        format!("request.auth.claims[{}]", claim_key),
                        vec![scope.to_string()],
                    );
                }
                for audience in audiences {
                    rule = rule.when(
                        "request.auth.claims[aud]",
                        vec![audience.to_string()],
                    );
                }
                builder = builder.rule(rule.build());
            }
        }
        builder.build()
    }

    #[test]
    fn audience_only_edits_keep_the_hash() {
        let a = authorization_policy_hash(&policy(&["read"], &["orders"])).unwrap();
        let b = authorization_policy_hash(&policy(&["read"], &["payments"])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn scope_presence_changes_the_hash() {
        // No scopes: one rule. Scopes: one rule per claim key. The from/to
        // multiplicity differs, so the hash does too.
        let without = authorization_policy_hash(&policy(&[], &["orders"])).unwrap();
        let with = authorization_policy_hash(&policy(&["read"], &["orders"])).unwrap();
        assert_ne!(without, with);
    }

    #[test]
    fn selector_changes_the_hash() {
        let a = policy(&[], &[]);
        let mut b = policy(&[], &[]);
        b.spec
            .selector
            .as_mut()
            .unwrap()
            .match_labels
            .insert("app".to_string(), "payments".to_string());
        assert_ne!(
            authorization_policy_hash(&a).unwrap(),
            authorization_policy_hash(&b).unwrap()
        );
    }

    #[test]
    fn matched_identity_with_changed_when_updates_in_place() {
        let mut existing = policy(&["read"], &["orders"]);
        add_hash_labels(&mut existing, 0).unwrap();
        existing.metadata.name = "orders-api-abc12".to_string();

        let mut want = policy(&["read"], &["payments"]);
        add_hash_labels(&mut want, 0).unwrap();

        let mut desired = Desired::new();
        desired.add(want).unwrap();
        let mut actual = Actual::new();
        actual.add(existing);

        let changes = get_changes(desired, actual);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, Action::Update);
        // identity of the existing object is preserved for the write
        assert_eq!(changes[0].resource.name(), "orders-api-abc12");
    }

    #[test]
    fn identical_state_yields_no_effective_actions() {
        let mut ap = policy(&["read"], &["orders"]);
        add_hash_labels(&mut ap, 0).unwrap();

        let mut existing = ap.clone();
        existing.metadata.name = "orders-api-abc12".to_string();

        let mut desired = Desired::new();
        desired.add(ap).unwrap();
        let mut actual = Actual::new();
        actual.add(existing);

        let changes = get_changes(desired, actual);
        assert!(changes.iter().all(|c| !c.is_effective()));
    }

    #[test]
    fn unlabeled_existing_objects_are_replaced() {
        // Objects created before the identity labels existed can never
        // match: one-time delete+create churn on upgrade.
        let mut unlabeled = policy(&[], &[]);
        unlabeled.metadata.name = "orders-api-old00".to_string();

        let mut want = policy(&[], &[]);
        add_hash_labels(&mut want, 0).unwrap();

        let mut desired = Desired::new();
        desired.add(want).unwrap();
        let mut actual = Actual::new();
        actual.add(unlabeled);

        let mut actions: Vec<Action> = get_changes(desired, actual)
            .iter()
            .map(|c| c.action)
            .collect();
        actions.sort_by_key(|a| format!("{:?}", a));
        assert_eq!(actions, vec![Action::Create, Action::Delete]);
    }

    #[test]
    fn index_is_part_of_identity() {
        let mut at_zero = policy(&[], &[]);
        add_hash_labels(&mut at_zero, 0).unwrap();
        let mut at_one = policy(&[], &[]);
        add_hash_labels(&mut at_one, 1).unwrap();

        let mut desired = Desired::new();
        desired.add(at_one).unwrap();
        let mut actual = Actual::new();
        actual.add(at_zero);

        let actions: Vec<Action> = get_changes(desired, actual)
            .iter()
            .map(|c| c.action)
            .collect();
        assert!(actions.contains(&Action::Create));
        assert!(actions.contains(&Action::Delete));
    }

    #[test]
    fn duplicate_desired_identity_is_an_error() {
        let mut a = policy(&[], &[]);
        add_hash_labels(&mut a, 0).unwrap();
        let b = a.clone();

        let mut desired = Desired::new();
        desired.add(a).unwrap();
        assert!(desired.add(b).is_err());
    }
}
