//! Generic typed object store
//!
//! The engine depends on nothing beyond this CRUD+list contract: listing
//! owned objects by label, getting the backend Service, and applying the
//! computed changes. [`DynamicStore`] is the production implementation on
//! top of kube-rs; [`MemoryStore`] backs tests without a cluster.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::labels::{legacy_owner_labels, legacy_selector_usable, owner_labels};
use crate::{Error, Result};

/// Metadata access required from everything kept in a store
pub trait StoredObject {
    /// Object name (empty until the cluster fills in a generated name)
    fn name(&self) -> &str;
    /// Prefix for server-side name generation, if any
    fn generate_name(&self) -> Option<&str>;
    /// Object namespace
    fn namespace(&self) -> &str;
    /// Object labels
    fn labels(&self) -> &BTreeMap<String, String>;
    /// Replace the object name (used by stores emulating name generation)
    fn set_name(&mut self, name: String);
}

/// CRUD+list over one resource kind
///
/// `list` spans all namespaces: generated objects follow the backend
/// service's namespace, which may differ from the ExposureRule's.
#[async_trait]
pub trait ResourceStore<T>: Send + Sync {
    /// List objects matching all given labels, across namespaces
    async fn list(&self, labels: &BTreeMap<String, String>) -> Result<Vec<T>>;
    /// Get one object by namespace and name
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<T>>;
    /// Create an object
    async fn create(&self, obj: &T) -> Result<()>;
    /// Update an object in place
    async fn update(&self, obj: &T) -> Result<()>;
    /// Delete an object by namespace and name
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// List every object owned by an ExposureRule.
///
/// Queries the current ownership key and, when its value fits in a label,
/// the legacy key too; results are merged and deduplicated by
/// namespace/name. This is the single read path for owned objects — do not
/// hand-roll label selectors elsewhere.
pub async fn list_owned<T: StoredObject>(
    store: &dyn ResourceStore<T>,
    rule_name: &str,
    rule_namespace: &str,
) -> Result<Vec<T>> {
    let mut objects = store
        .list(&owner_labels(rule_name, rule_namespace))
        .await?;

    if legacy_selector_usable(rule_name, rule_namespace) {
        let legacy = store
            .list(&legacy_owner_labels(rule_name, rule_namespace))
            .await?;
        for candidate in legacy {
            let duplicate = objects.iter().any(|existing| {
                existing.namespace() == candidate.namespace()
                    && existing.name() == candidate.name()
            });
            if !duplicate {
                objects.push(candidate);
            }
        }
    }

    Ok(objects)
}

// =============================================================================
// DynamicStore — kube-backed implementation
// =============================================================================

/// Kube-backed store for one resource kind
///
/// Typed objects are converted through `DynamicObject` with an explicit
/// `ApiResource`, so CRD-backed kinds (Istio, the delegated proxy) need no
/// compile-time client types.
pub struct DynamicStore<T> {
    client: Client,
    api_resource: ApiResource,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DynamicStore<T> {
    /// Create a store for the kind described by `api_resource`
    pub fn new(client: Client, api_resource: ApiResource) -> Self {
        Self {
            client,
            api_resource,
            _marker: PhantomData,
        }
    }

    fn all(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &self.api_resource)
    }

    fn namespaced(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.api_resource)
    }
}

fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn to_dynamic<T: Serialize>(obj: &T, kind: &str) -> Result<DynamicObject> {
    let value = serde_json::to_value(obj)
        .map_err(|e| Error::internal_with_context("store", format!("{}: {}", kind, e)))?;
    serde_json::from_value(value)
        .map_err(|e| Error::internal_with_context("store", format!("{}: {}", kind, e)))
}

fn from_dynamic<T: DeserializeOwned>(obj: DynamicObject, kind: &str) -> Result<T> {
    let value = serde_json::to_value(obj)
        .map_err(|e| Error::decode_of(kind.to_string(), e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::decode_of(kind.to_string(), e.to_string()))
}

#[async_trait]
impl<T> ResourceStore<T> for DynamicStore<T>
where
    T: StoredObject + Serialize + DeserializeOwned + Send + Sync,
{
    async fn list(&self, labels: &BTreeMap<String, String>) -> Result<Vec<T>> {
        let params = ListParams::default().labels(&selector_string(labels));
        let list = self.all().list(&params).await?;
        list.items
            .into_iter()
            .map(|obj| from_dynamic(obj, &self.api_resource.kind))
            .collect()
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<T>> {
        match self.namespaced(namespace).get(name).await {
            Ok(obj) => Ok(Some(from_dynamic(obj, &self.api_resource.kind)?)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, obj: &T) -> Result<()> {
        debug!(kind = %self.api_resource.kind, namespace = %obj.namespace(), "creating object");
        let dynamic = to_dynamic(obj, &self.api_resource.kind)?;
        self.namespaced(obj.namespace())
            .create(&PostParams::default(), &dynamic)
            .await?;
        Ok(())
    }

    async fn update(&self, obj: &T) -> Result<()> {
        debug!(kind = %self.api_resource.kind, namespace = %obj.namespace(),
            name = %obj.name(), "updating object");
        let dynamic = to_dynamic(obj, &self.api_resource.kind)?;
        self.namespaced(obj.namespace())
            .replace(obj.name(), &PostParams::default(), &dynamic)
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        debug!(kind = %self.api_resource.kind, namespace = %namespace,
            name = %name, "deleting object");
        self.namespaced(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}

// =============================================================================
// MemoryStore — in-memory implementation for tests
// =============================================================================

/// In-memory store used by engine tests
///
/// Emulates server-side name generation so creators using `generateName`
/// behave as they do against a real API server.
#[derive(Default)]
pub struct MemoryStore<T> {
    objects: Mutex<Vec<T>>,
    name_counter: AtomicU64,
}

impl<T: StoredObject + Clone> MemoryStore<T> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(Vec::new()),
            name_counter: AtomicU64::new(0),
        }
    }

    /// Create a store pre-populated with existing cluster state
    pub fn with_objects(objects: Vec<T>) -> Self {
        Self {
            objects: Mutex::new(objects),
            name_counter: AtomicU64::new(0),
        }
    }

    /// Snapshot of everything currently stored
    pub fn snapshot(&self) -> Vec<T> {
        self.objects.lock().expect("store poisoned").clone()
    }
}

fn matches_selector<T: StoredObject>(obj: &T, selector: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| obj.labels().get(k) == Some(v))
}

#[async_trait]
impl<T> ResourceStore<T> for MemoryStore<T>
where
    T: StoredObject + Clone + Send + Sync,
{
    async fn list(&self, labels: &BTreeMap<String, String>) -> Result<Vec<T>> {
        let objects = self.objects.lock().expect("store poisoned");
        Ok(objects
            .iter()
            .filter(|obj| matches_selector(*obj, labels))
            .cloned()
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<T>> {
        let objects = self.objects.lock().expect("store poisoned");
        Ok(objects
            .iter()
            .find(|obj| obj.namespace() == namespace && obj.name() == name)
            .cloned())
    }

    async fn create(&self, obj: &T) -> Result<()> {
        let mut created = obj.clone();
        if created.name().is_empty() {
            let prefix = created.generate_name().unwrap_or("generated-").to_string();
            let n = self.name_counter.fetch_add(1, Ordering::Relaxed);
            created.set_name(format!("{}{:05}", prefix, n));
        }
        let mut objects = self.objects.lock().expect("store poisoned");
        if objects
            .iter()
            .any(|o| o.namespace() == created.namespace() && o.name() == created.name())
        {
            return Err(Error::internal_with_context(
                "memory-store",
                format!("{}/{} already exists", created.namespace(), created.name()),
            ));
        }
        objects.push(created);
        Ok(())
    }

    async fn update(&self, obj: &T) -> Result<()> {
        let mut objects = self.objects.lock().expect("store poisoned");
        let slot = objects
            .iter_mut()
            .find(|o| o.namespace() == obj.namespace() && o.name() == obj.name())
            .ok_or_else(|| {
                Error::internal_with_context(
                    "memory-store",
                    format!("{}/{} not found", obj.namespace(), obj.name()),
                )
            })?;
        *slot = obj.clone();
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let mut objects = self.objects.lock().expect("store poisoned");
        let before = objects.len();
        objects.retain(|o| !(o.namespace() == namespace && o.name() == name));
        if objects.len() == before {
            return Err(Error::internal_with_context(
                "memory-store",
                format!("{}/{} not found", namespace, name),
            ));
        }
        Ok(())
    }
}
