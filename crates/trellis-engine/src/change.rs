//! Object changes computed by the diff engines
//!
//! A change pairs an in-memory target object with the action needed to
//! reach the desired state. Changes are built fresh on every pass, never
//! persisted, and consumed immediately by the apply step.

use std::fmt;

use crate::targets::{
    AccessRule, AuthorizationPolicy, RequestAuthentication, VirtualService,
};
use trellis_common::store::StoredObject;

/// Action to take on a target object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// The object does not exist yet
    Create,
    /// The object exists and its spec differs from the desired one
    Update,
    /// The object exists but is no longer desired
    Delete,
    /// The object exists and already matches the desired state
    ///
    /// Emitted instead of an unconditional update so a second pass against
    /// reconciled cluster state produces zero effective actions.
    None,
}

/// Target object kinds the engine manages
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TargetKind {
    /// Istio VirtualService
    VirtualService,
    /// Delegated proxy AccessRule
    AccessRule,
    /// Istio RequestAuthentication
    RequestAuthentication,
    /// Istio AuthorizationPolicy
    AuthorizationPolicy,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetKind::VirtualService => "VirtualService",
            TargetKind::AccessRule => "AccessRule",
            TargetKind::RequestAuthentication => "RequestAuthentication",
            TargetKind::AuthorizationPolicy => "AuthorizationPolicy",
        };
        f.write_str(name)
    }
}

/// Closed union over the managed target kinds
#[derive(Clone, Debug, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum TargetResource {
    /// A VirtualService
    VirtualService(VirtualService),
    /// An AccessRule
    AccessRule(AccessRule),
    /// A RequestAuthentication
    RequestAuthentication(RequestAuthentication),
    /// An AuthorizationPolicy
    AuthorizationPolicy(AuthorizationPolicy),
}

impl TargetResource {
    /// The kind of the wrapped object
    pub fn kind(&self) -> TargetKind {
        match self {
            TargetResource::VirtualService(_) => TargetKind::VirtualService,
            TargetResource::AccessRule(_) => TargetKind::AccessRule,
            TargetResource::RequestAuthentication(_) => TargetKind::RequestAuthentication,
            TargetResource::AuthorizationPolicy(_) => TargetKind::AuthorizationPolicy,
        }
    }

    /// Name of the wrapped object (may be empty before creation)
    pub fn name(&self) -> &str {
        match self {
            TargetResource::VirtualService(o) => o.name(),
            TargetResource::AccessRule(o) => o.name(),
            TargetResource::RequestAuthentication(o) => o.name(),
            TargetResource::AuthorizationPolicy(o) => o.name(),
        }
    }

    /// Namespace of the wrapped object
    pub fn namespace(&self) -> &str {
        match self {
            TargetResource::VirtualService(o) => o.namespace(),
            TargetResource::AccessRule(o) => o.namespace(),
            TargetResource::RequestAuthentication(o) => o.namespace(),
            TargetResource::AuthorizationPolicy(o) => o.namespace(),
        }
    }
}

impl From<VirtualService> for TargetResource {
    fn from(value: VirtualService) -> Self {
        TargetResource::VirtualService(value)
    }
}
impl From<AccessRule> for TargetResource {
    fn from(value: AccessRule) -> Self {
        TargetResource::AccessRule(value)
    }
}
impl From<RequestAuthentication> for TargetResource {
    fn from(value: RequestAuthentication) -> Self {
        TargetResource::RequestAuthentication(value)
    }
}
impl From<AuthorizationPolicy> for TargetResource {
    fn from(value: AuthorizationPolicy) -> Self {
        TargetResource::AuthorizationPolicy(value)
    }
}

/// A desired object paired with the action to take
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectChange {
    /// Action to take
    pub action: Action,
    /// The object the action applies to
    pub resource: TargetResource,
}

impl ObjectChange {
    /// A create change
    pub fn create(resource: impl Into<TargetResource>) -> Self {
        Self {
            action: Action::Create,
            resource: resource.into(),
        }
    }

    /// An update change
    pub fn update(resource: impl Into<TargetResource>) -> Self {
        Self {
            action: Action::Update,
            resource: resource.into(),
        }
    }

    /// A delete change
    pub fn delete(resource: impl Into<TargetResource>) -> Self {
        Self {
            action: Action::Delete,
            resource: resource.into(),
        }
    }

    /// A no-op change for an already-reconciled object
    pub fn unchanged(resource: impl Into<TargetResource>) -> Self {
        Self {
            action: Action::None,
            resource: resource.into(),
        }
    }

    /// Whether the change performs a cluster write
    pub fn is_effective(&self) -> bool {
        self.action != Action::None
    }
}
