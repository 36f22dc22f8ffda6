//! ExposureRule v1beta1 — the legacy shape
//!
//! One host per rule, and access control expressed as a list of string-keyed
//! strategy handlers with opaque JSON config. The wire shape is kept as
//! authored (`{"handler": "...", "config": {...}}`), but all consumers go
//! through [`Handler::strategy`] which parses it into the closed [`Strategy`]
//! union — there is no string comparison on handler names outside this
//! module.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::jwt::{JwtConfig, LegacyJwtConfig};
use crate::{Error, Result};

/// Handler name for the `allow` strategy
pub const STRATEGY_ALLOW: &str = "allow";
/// Handler name for the `no_auth` strategy
pub const STRATEGY_NO_AUTH: &str = "no_auth";
/// Handler name for the `jwt` strategy
pub const STRATEGY_JWT: &str = "jwt";
/// Handler name for the `noop` strategy
pub const STRATEGY_NOOP: &str = "noop";
/// Handler name for the `oauth2_introspection` strategy
pub const STRATEGY_OAUTH2_INTROSPECTION: &str = "oauth2_introspection";
/// Handler name for the `oauth2_client_credentials` strategy
pub const STRATEGY_OAUTH2_CLIENT_CREDENTIALS: &str = "oauth2_client_credentials";
/// Handler name for the `anonymous` strategy
pub const STRATEGY_ANONYMOUS: &str = "anonymous";
/// Handler name for the `cookie_session` strategy
pub const STRATEGY_COOKIE_SESSION: &str = "cookie_session";
/// Handler name for the `unauthorized` strategy
pub const STRATEGY_UNAUTHORIZED: &str = "unauthorized";

/// Handler name for the header mutator
pub const MUTATOR_HEADER: &str = "header";
/// Handler name for the cookie mutator
pub const MUTATOR_COOKIE: &str = "cookie";

/// The v1beta1 ExposureRule spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gateway.trellis.dev",
    version = "v1beta1",
    kind = "ExposureRule",
    plural = "exposurerules",
    namespaced,
    status = "ExposureRuleStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ExposureRuleSpec {
    /// Host the rules are exposed on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Backend service, overridable per rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,
    /// Gateway reference (`namespace/name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Path rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
    /// Route timeout in seconds, overridable per rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    /// CORS policy replacing the gateway defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_policy: Option<CorsPolicy>,
}

/// Backend service reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Service name
    pub name: String,
    /// Service namespace; defaults to the ExposureRule's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Service port
    pub port: u32,
    /// Whether the service lives outside the cluster
    ///
    /// External services are addressed by `name` as a hostname and have no
    /// pod selector to resolve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_external: Option<bool>,
}

/// One path rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Path pattern
    pub path: String,
    /// HTTP methods the rule applies to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    /// Access strategies applied to the path
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_strategies: Vec<Handler>,
    /// Request mutators applied before forwarding
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mutators: Vec<Handler>,
    /// Backend service override for this rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,
    /// Route timeout override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

/// A named strategy or mutator handler with opaque config
///
/// The wire shape of both access strategies and mutators. Consumers parse
/// access strategies into [`Strategy`] via [`Handler::strategy`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct Handler {
    /// Handler name
    #[serde(rename = "handler")]
    pub name: String,
    /// Handler-specific configuration; schema depends on the name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl Handler {
    /// A bare handler with no config
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: None,
        }
    }

    /// A `jwt` handler carrying a typed config
    pub fn jwt(config: &JwtConfig) -> Result<Self> {
        Ok(Self {
            name: STRATEGY_JWT.to_string(),
            config: Some(
                serde_json::to_value(config)
                    .map_err(|e| Error::internal_with_context("handler", e.to_string()))?,
            ),
        })
    }

    /// Parse the handler into the closed strategy union
    ///
    /// Unknown names are validation errors, malformed configs decode errors;
    /// neither is ever defaulted.
    pub fn strategy(&self) -> Result<Strategy> {
        fn parse<T: serde::de::DeserializeOwned + Default>(
            name: &str,
            config: &Option<serde_json::Value>,
        ) -> Result<T> {
            match config {
                Some(value) => serde_json::from_value(value.clone())
                    .map_err(|e| Error::decode_of(format!("{} config", name), e.to_string())),
                None => Ok(T::default()),
            }
        }

        match self.name.as_str() {
            STRATEGY_ALLOW => Ok(Strategy::Allow),
            STRATEGY_NO_AUTH => Ok(Strategy::NoAuth),
            STRATEGY_NOOP => Ok(Strategy::Noop),
            STRATEGY_ANONYMOUS => Ok(Strategy::Anonymous),
            STRATEGY_UNAUTHORIZED => Ok(Strategy::Unauthorized),
            STRATEGY_JWT => Ok(Strategy::Jwt(self.jwt_config()?)),
            STRATEGY_COOKIE_SESSION => {
                Ok(Strategy::CookieSession(parse(&self.name, &self.config)?))
            }
            STRATEGY_OAUTH2_INTROSPECTION => Ok(Strategy::Oauth2Introspection(parse(
                &self.name,
                &self.config,
            )?)),
            STRATEGY_OAUTH2_CLIENT_CREDENTIALS => Ok(Strategy::Oauth2ClientCredentials(parse(
                &self.name,
                &self.config,
            )?)),
            other => Err(Error::validation(format!(
                "unknown access strategy handler {:?}",
                other
            ))),
        }
    }

    /// Parse a `jwt` handler's config into the typed shape
    ///
    /// Accepts the typed shape directly, or the legacy delegated-proxy shape
    /// when it names exactly one issuer and JWKS URL.
    pub fn jwt_config(&self) -> Result<JwtConfig> {
        let Some(raw) = &self.config else {
            return Err(Error::decode_of("jwt config", "handler has no config"));
        };

        let typed: JwtConfig = serde_json::from_value(raw.clone())
            .map_err(|e| Error::decode_of("jwt config", e.to_string()))?;
        if !typed.authentications.is_empty() || !typed.authorizations.is_empty() {
            return Ok(typed);
        }

        let legacy: LegacyJwtConfig = serde_json::from_value(raw.clone())
            .map_err(|e| Error::decode_of("jwt config", e.to_string()))?;
        legacy.to_jwt_config().ok_or_else(|| {
            Error::decode_of(
                "jwt config",
                "legacy config needs exactly one trusted issuer and JWKS URL",
            )
        })
    }
}

/// Closed union of access strategies
///
/// One variant per handler name, each with its own typed config.
#[derive(Clone, Debug, PartialEq)]
pub enum Strategy {
    /// Pass every request through without authentication
    Allow,
    /// Like `allow`, but the route bypasses the delegated proxy entirely
    NoAuth,
    /// Delegate with no authentication performed
    Noop,
    /// Treat every request as an anonymous subject
    Anonymous,
    /// Reject every request
    Unauthorized,
    /// Authenticate against a browser session cookie
    CookieSession(CookieSessionConfig),
    /// Validate opaque tokens via OAuth2 token introspection
    Oauth2Introspection(IntrospectionConfig),
    /// OAuth2 client-credentials flow
    Oauth2ClientCredentials(ClientCredentialsConfig),
    /// Validate JWTs in the mesh
    Jwt(JwtConfig),
}

impl Strategy {
    /// The wire-level handler name of this strategy
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Allow => STRATEGY_ALLOW,
            Strategy::NoAuth => STRATEGY_NO_AUTH,
            Strategy::Noop => STRATEGY_NOOP,
            Strategy::Anonymous => STRATEGY_ANONYMOUS,
            Strategy::Unauthorized => STRATEGY_UNAUTHORIZED,
            Strategy::CookieSession(_) => STRATEGY_COOKIE_SESSION,
            Strategy::Oauth2Introspection(_) => STRATEGY_OAUTH2_INTROSPECTION,
            Strategy::Oauth2ClientCredentials(_) => STRATEGY_OAUTH2_CLIENT_CREDENTIALS,
            Strategy::Jwt(_) => STRATEGY_JWT,
        }
    }

    /// Whether enforcing this strategy requires the delegated proxy
    ///
    /// `allow`, `no_auth` and `jwt` are enforced by the mesh; everything
    /// else is delegated.
    pub fn requires_delegation(&self) -> bool {
        !matches!(self, Strategy::Allow | Strategy::NoAuth | Strategy::Jwt(_))
    }
}

/// Config for the `cookie_session` strategy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct CookieSessionConfig {
    /// Session-check endpoint of the session store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_session_url: Option<String>,
    /// Forward the original request path to the session check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_path: Option<bool>,
}

/// Config for the `oauth2_introspection` strategy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct IntrospectionConfig {
    /// Token introspection endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_url: Option<String>,
    /// Scope matching strategy (`exact`, `hierarchic`, `wildcard`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_strategy: Option<String>,
    /// Scopes the token must carry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_scope: Vec<String>,
}

/// Config for the `oauth2_client_credentials` strategy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ClientCredentialsConfig {
    /// Scopes requested from the token endpoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_scope: Vec<String>,
}

impl Rule {
    /// Parse all access strategies into the closed union
    pub fn strategies(&self) -> Result<Vec<Strategy>> {
        self.access_strategies.iter().map(Handler::strategy).collect()
    }

    /// The rule's JWT config, if it carries a `jwt` strategy
    pub fn jwt_config(&self) -> Result<Option<JwtConfig>> {
        for handler in &self.access_strategies {
            if handler.name == STRATEGY_JWT {
                return Ok(Some(handler.jwt_config()?));
            }
        }
        Ok(None)
    }

    /// Whether any strategy on this rule requires the delegated proxy
    pub fn requires_delegation(&self) -> Result<bool> {
        for strategy in self.strategies()? {
            if strategy.requires_delegation() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// CORS policy of the legacy shape
///
/// Max-age is a duration string here; the newer shapes store plain seconds.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorsPolicy {
    /// Allowed origins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_origins: Vec<OriginMatch>,
    /// Allowed methods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_methods: Vec<String>,
    /// Allowed headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_headers: Vec<String>,
    /// Whether credentials are allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_credentials: Option<bool>,
    /// Headers exposed to the browser
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expose_headers: Vec<String>,
    /// Preflight max age as a duration string (e.g. "300s", "5m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
}

/// Origin match of a CORS policy
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OriginMatch {
    /// Exact origin match
    Exact(String),
    /// Origin prefix match
    Prefix(String),
    /// Origin regex match
    Regex(String),
}

/// Status code of a reconciled subresource
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum StatusCode {
    /// Reconciled successfully
    #[serde(rename = "OK")]
    Ok,
    /// Skipped because another subresource failed
    #[default]
    #[serde(rename = "SKIPPED")]
    Skipped,
    /// Reconciliation failed
    #[serde(rename = "ERROR")]
    Error,
    /// Reconciled with warnings
    #[serde(rename = "WARNING")]
    Warning,
}

/// Status of one reconciled subresource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// Status code
    pub code: StatusCode,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Status of a v1beta1 ExposureRule, one entry per produced kind
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExposureRuleStatus {
    /// Overall rule status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure_rule_status: Option<ResourceStatus>,
    /// VirtualService reconciliation outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_service_status: Option<ResourceStatus>,
    /// AccessRule reconciliation outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_rule_status: Option<ResourceStatus>,
    /// RequestAuthentication reconciliation outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_authentication_status: Option<ResourceStatus>,
    /// AuthorizationPolicy reconciliation outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_policy_status: Option<ResourceStatus>,
    /// When the rule was last processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_time: Option<DateTime<Utc>>,
}
