//! Ownership labels linking generated objects back to their ExposureRule
//!
//! Every object the engine produces carries an ownership label whose value is
//! `"<name>.<namespace>"` of the owning ExposureRule. Two keys exist: the
//! current one and a legacy one written by old releases. Writers stamp only
//! the current key; readers match either key so objects created before the
//! key change are still found. All key handling lives in this module so
//! readers and writers can never drift apart.

use std::collections::BTreeMap;

/// Current ownership label key, written on every generated object
pub const OWNER_LABEL: &str = "exposurerule.gateway.trellis.dev/v1beta1";

/// Legacy ownership label key, recognized on read but never written
pub const LEGACY_OWNER_LABEL: &str = "owner";

/// Kubernetes limit on label values
const MAX_LABEL_VALUE_LEN: usize = 63;

/// Ownership label value for an ExposureRule: `"<name>.<namespace>"`
pub fn owner_value(name: &str, namespace: &str) -> String {
    format!("{}.{}", name, namespace)
}

/// Labels stamped on generated objects (current key only)
pub fn owner_labels(name: &str, namespace: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(OWNER_LABEL.to_string(), owner_value(name, namespace))])
}

/// Legacy-key selector used to find objects created by old releases
pub fn legacy_owner_labels(name: &str, namespace: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LEGACY_OWNER_LABEL.to_string(), owner_value(name, namespace))])
}

/// Whether the legacy-key query is usable for this rule
///
/// Label values are capped at 63 characters. Rules whose `name.namespace`
/// exceeds that could never have carried the legacy label, so the extra
/// list call is skipped.
pub fn legacy_selector_usable(name: &str, namespace: &str) -> bool {
    owner_value(name, namespace).len() <= MAX_LABEL_VALUE_LEN
}

/// Read-side ownership predicate: matches the current or the legacy key
pub fn is_owned_by(labels: &BTreeMap<String, String>, name: &str, namespace: &str) -> bool {
    let value = owner_value(name, namespace);
    labels.get(OWNER_LABEL) == Some(&value) || labels.get(LEGACY_OWNER_LABEL) == Some(&value)
}
