//! Shared fixtures for engine tests

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::change::{Action, ObjectChange, TargetResource};
use crate::reconciliation::Stores;
use crate::service::{ServiceRef, ServiceResolver};
use crate::targets::{
    AccessRule, AuthorizationPolicy, RequestAuthentication, VirtualService,
};
use crate::Result;
use trellis_common::store::{MemoryStore, ResourceStore, StoredObject};

/// Resolver returning a fixed `app=<service name>` selector for any service
pub(crate) struct FixedResolver;

#[async_trait]
impl ServiceResolver for FixedResolver {
    async fn pod_selector(
        &self,
        _rule_name: &str,
        _namespace: &str,
        service: &ServiceRef,
    ) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::from([(
            "app".to_string(),
            service.name.clone(),
        )]))
    }
}

/// In-memory stores with handles kept for inspection
pub(crate) struct TestStores {
    pub virtual_services: Arc<MemoryStore<VirtualService>>,
    pub access_rules: Arc<MemoryStore<AccessRule>>,
    pub request_authentications: Arc<MemoryStore<RequestAuthentication>>,
    pub authorization_policies: Arc<MemoryStore<AuthorizationPolicy>>,
    pub resolver: Arc<dyn ServiceResolver>,
}

impl TestStores {
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(FixedResolver))
    }

    pub fn with_resolver(resolver: Arc<dyn ServiceResolver>) -> Self {
        Self {
            virtual_services: Arc::new(MemoryStore::new()),
            access_rules: Arc::new(MemoryStore::new()),
            request_authentications: Arc::new(MemoryStore::new()),
            authorization_policies: Arc::new(MemoryStore::new()),
            resolver,
        }
    }

    pub fn stores(&self) -> Stores {
        Stores {
            virtual_services: self.virtual_services.clone(),
            access_rules: self.access_rules.clone(),
            request_authentications: self.request_authentications.clone(),
            authorization_policies: self.authorization_policies.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

/// Apply changes straight to the in-memory stores, bypassing the façade
pub(crate) async fn apply(stores: &TestStores, changes: Vec<ObjectChange>) {
    for change in changes {
        match change.resource {
            TargetResource::VirtualService(obj) => {
                apply_one(&*stores.virtual_services, change.action, obj).await
            }
            TargetResource::AccessRule(obj) => {
                apply_one(&*stores.access_rules, change.action, obj).await
            }
            TargetResource::RequestAuthentication(obj) => {
                apply_one(&*stores.request_authentications, change.action, obj).await
            }
            TargetResource::AuthorizationPolicy(obj) => {
                apply_one(&*stores.authorization_policies, change.action, obj).await
            }
        }
    }
}

async fn apply_one<T: StoredObject + Sync>(
    store: &dyn ResourceStore<T>,
    action: Action,
    obj: T,
) {
    match action {
        Action::Create => store.create(&obj).await.expect("create"),
        Action::Update => store.update(&obj).await.expect("update"),
        Action::Delete => store
            .delete(obj.namespace(), obj.name())
            .await
            .expect("delete"),
        Action::None => {}
    }
}
