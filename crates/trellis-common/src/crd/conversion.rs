//! Cross-version conversion of ExposureRules
//!
//! Hub-and-spoke: v1beta1 and v2 each convert to and from the hub shape
//! (v2alpha1), which acts as the canonical intermediate representation.
//! Every field is moved explicitly — no shape is ever produced by
//! marshalling one struct and unmarshalling another, so renaming a field in
//! one version cannot silently change what survives conversion.
//!
//! Losslessness: the first time a document is converted away from its
//! authored shape, the authored shape is recorded in the original-version
//! annotation and the parts the destination cannot represent are serialized
//! into a stored-spec annotation. The reverse conversion consults these
//! annotations and restores the authored document exactly. Without them the
//! reverse mapping is best-effort: host lists collapse to the first entry
//! and per-rule data the narrow shape cannot express is dropped.

use std::collections::BTreeMap;

use crate::crd::v1beta1::{
    self, Strategy, MUTATOR_COOKIE, MUTATOR_HEADER,
};
use crate::crd::{v2, v2alpha1};
use crate::{
    Error, Result, HUB_RULES_ANNOTATION, ORIGINAL_VERSION_ANNOTATION, V1BETA1_SPEC_ANNOTATION,
};

/// Original-version annotation value for v1beta1-authored documents
pub const AUTHORED_V1BETA1: &str = "v1beta1";
/// Original-version annotation value for v2alpha1-authored documents
pub const AUTHORED_V2ALPHA1: &str = "v2alpha1";
/// Original-version annotation value for v2-authored documents
pub const AUTHORED_V2: &str = "v2";

// =============================================================================
// v1beta1 <-> hub
// =============================================================================

/// Convert a v1beta1 ExposureRule to the hub shape.
///
/// For documents authored in v1beta1 this stamps the original-version
/// annotation and stores the complete authored spec; documents that cannot
/// be fully expressed in the hub convert to an empty hub spec, leaving the
/// stored annotation as the only source of truth.
pub fn v1beta1_to_hub(src: &v1beta1::ExposureRule) -> Result<v2alpha1::ExposureRule> {
    let mut dst = v2alpha1::ExposureRule {
        metadata: src.metadata.clone(),
        spec: v2alpha1::ExposureRuleSpec::default(),
        status: src.status.as_ref().map(status_v1beta1_to_hub),
    };

    let annotations = src.metadata.annotations.clone().unwrap_or_default();
    let authored_wide = matches!(
        annotations.get(ORIGINAL_VERSION_ANNOTATION).map(String::as_str),
        Some(AUTHORED_V2) | Some(AUTHORED_V2ALPHA1)
    );

    if !authored_wide {
        // First conversion away from the authored shape: record it and keep
        // the full spec so the way back is lossless.
        let stored = serde_json::to_string(&src.spec)
            .map_err(|e| Error::internal_with_context("conversion", e.to_string()))?;
        let dst_annotations = dst
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new);
        dst_annotations.insert(
            ORIGINAL_VERSION_ANNOTATION.to_string(),
            AUTHORED_V1BETA1.to_string(),
        );
        dst_annotations.insert(V1BETA1_SPEC_ANNOTATION.to_string(), stored);

        if !is_fully_convertible(src)? {
            return Ok(dst);
        }
    }

    dst.spec.gateway = src.spec.gateway.clone();
    dst.spec.service = src.spec.service.clone();
    dst.spec.timeout = src.spec.timeout;
    dst.spec.hosts = src.spec.host.iter().cloned().collect();
    dst.spec.cors_policy = src
        .spec
        .cors_policy
        .as_ref()
        .map(cors_v1beta1_to_hub)
        .transpose()?;

    if authored_wide {
        if let Some(raw) = annotations.get(HUB_RULES_ANNOTATION) {
            // The document was narrowed earlier; the stored rules carry the
            // typed data the narrow shape could not.
            dst.spec.rules = serde_json::from_str(raw)
                .map_err(|e| Error::decode_of("stored hub rules", e.to_string()))?;
            return Ok(dst);
        }
    }

    dst.spec.rules = src
        .spec
        .rules
        .iter()
        .map(rule_v1beta1_to_hub)
        .collect::<Result<_>>()?;

    Ok(dst)
}

/// Convert a hub ExposureRule to the v1beta1 shape.
///
/// Documents authored in v1beta1 are restored exactly from the stored-spec
/// annotation. Everything else narrows best-effort: the first host wins and
/// the complete hub rules are kept in an annotation for the way back.
pub fn hub_to_v1beta1(src: &v2alpha1::ExposureRule) -> Result<v1beta1::ExposureRule> {
    let mut dst = v1beta1::ExposureRule {
        metadata: src.metadata.clone(),
        spec: v1beta1::ExposureRuleSpec::default(),
        status: src.status.as_ref().map(status_hub_to_v1beta1),
    };

    let annotations = src.metadata.annotations.clone().unwrap_or_default();
    if annotations.get(ORIGINAL_VERSION_ANNOTATION).map(String::as_str)
        == Some(AUTHORED_V1BETA1)
    {
        let raw = annotations.get(V1BETA1_SPEC_ANNOTATION).ok_or_else(|| {
            Error::conversion_to(
                "v1beta1",
                "original-version is v1beta1 but the stored spec annotation is missing",
            )
        })?;
        dst.spec = serde_json::from_str(raw)
            .map_err(|e| Error::decode_of("stored v1beta1 spec", e.to_string()))?;
        return Ok(dst);
    }

    let dst_annotations = dst
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new);
    dst_annotations
        .entry(ORIGINAL_VERSION_ANNOTATION.to_string())
        .or_insert_with(|| AUTHORED_V2ALPHA1.to_string());
    if !src.spec.rules.is_empty() {
        let stored = serde_json::to_string(&src.spec.rules)
            .map_err(|e| Error::internal_with_context("conversion", e.to_string()))?;
        dst_annotations.insert(HUB_RULES_ANNOTATION.to_string(), stored);
    }

    dst.spec.gateway = src.spec.gateway.clone();
    dst.spec.service = src.spec.service.clone();
    dst.spec.timeout = src.spec.timeout;
    // Only one host is supported in v1beta1, so the first one wins
    dst.spec.host = src.spec.hosts.first().cloned();
    dst.spec.cors_policy = src.spec.cors_policy.as_ref().map(cors_hub_to_v1beta1);
    dst.spec.rules = src
        .spec
        .rules
        .iter()
        .map(rule_hub_to_v1beta1)
        .collect::<Result<_>>()?;

    Ok(dst)
}

/// Whether a v1beta1 document can be fully expressed in the hub shape
///
/// Only `no_auth` and well-formed `jwt` strategies have hub counterparts,
/// and only template-free paths (or the catch-all `/*`) survive the path
/// grammar change.
pub fn is_fully_convertible(src: &v1beta1::ExposureRule) -> Result<bool> {
    for rule in &src.spec.rules {
        if !is_convertible_path(&rule.path) {
            return Ok(false);
        }
        for handler in &rule.access_strategies {
            match handler.strategy() {
                Ok(Strategy::NoAuth) => continue,
                Ok(Strategy::Jwt(_)) => continue,
                Ok(_) => return Ok(false),
                // A malformed jwt config makes the document non-convertible
                // rather than failing the whole conversion; the stored spec
                // remains authoritative.
                Err(Error::Decode { .. }) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }
    Ok(true)
}

fn is_convertible_path(path: &str) -> bool {
    if path == "/*" {
        return true;
    }
    !path.contains(|c| {
        matches!(
            c,
            '*' | '^' | '$' | '+' | '?' | '(' | ')' | '[' | ']' | '|' | '\\'
        )
    })
}

fn rule_v1beta1_to_hub(rule: &v1beta1::Rule) -> Result<v2alpha1::Rule> {
    let mut dst = v2alpha1::Rule {
        path: rule.path.clone(),
        methods: rule.methods.clone(),
        service: rule.service.clone(),
        timeout: rule.timeout,
        ..v2alpha1::Rule::default()
    };

    for strategy in rule.strategies()? {
        match strategy {
            Strategy::NoAuth => dst.no_auth = Some(true),
            Strategy::Jwt(config) => dst.jwt = Some(config),
            // Delegated strategies have no hub counterpart; such documents
            // are routed to the stored-spec annotation by the
            // full-conversion check before this mapping runs.
            _ => {}
        }
    }

    if !rule.mutators.is_empty() {
        let mut request = v2alpha1::RequestMutation::default();
        for mutator in &rule.mutators {
            match mutator.name.as_str() {
                MUTATOR_HEADER => {
                    request.headers = decode_mutator_map(mutator, "headers")?;
                }
                MUTATOR_COOKIE => {
                    request.cookies = decode_mutator_map(mutator, "cookies")?;
                }
                other => {
                    return Err(Error::validation(format!(
                        "unknown mutator handler {:?}",
                        other
                    )))
                }
            }
        }
        dst.request = Some(request);
    }

    Ok(dst)
}

fn decode_mutator_map(
    mutator: &v1beta1::Handler,
    key: &str,
) -> Result<BTreeMap<String, String>> {
    let Some(config) = &mutator.config else {
        return Ok(BTreeMap::new());
    };
    let map = config
        .get(key)
        .cloned()
        .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
    serde_json::from_value(map)
        .map_err(|e| Error::decode_of(format!("{} mutator config", mutator.name), e.to_string()))
}

fn rule_hub_to_v1beta1(rule: &v2alpha1::Rule) -> Result<v1beta1::Rule> {
    let mut dst = v1beta1::Rule {
        path: rule.path.clone(),
        methods: rule.methods.clone(),
        service: rule.service.clone(),
        timeout: rule.timeout,
        ..v1beta1::Rule::default()
    };

    if rule.is_no_auth() {
        dst.access_strategies
            .push(v1beta1::Handler::named(v1beta1::STRATEGY_NO_AUTH));
    }
    if let Some(jwt) = &rule.jwt {
        dst.access_strategies.push(v1beta1::Handler::jwt(jwt)?);
    }

    if let Some(request) = &rule.request {
        if !request.headers.is_empty() {
            dst.mutators.push(v1beta1::Handler {
                name: MUTATOR_HEADER.to_string(),
                config: Some(serde_json::json!({ "headers": request.headers })),
            });
        }
        if !request.cookies.is_empty() {
            dst.mutators.push(v1beta1::Handler {
                name: MUTATOR_COOKIE.to_string(),
                config: Some(serde_json::json!({ "cookies": request.cookies })),
            });
        }
    }

    Ok(dst)
}

fn cors_v1beta1_to_hub(cors: &v1beta1::CorsPolicy) -> Result<v2alpha1::CorsPolicy> {
    Ok(v2alpha1::CorsPolicy {
        allow_origins: cors.allow_origins.clone(),
        allow_methods: cors.allow_methods.clone(),
        allow_headers: cors.allow_headers.clone(),
        allow_credentials: cors.allow_credentials,
        expose_headers: cors.expose_headers.clone(),
        max_age: cors
            .max_age
            .as_deref()
            .map(parse_duration_seconds)
            .transpose()?,
    })
}

fn cors_hub_to_v1beta1(cors: &v2alpha1::CorsPolicy) -> v1beta1::CorsPolicy {
    v1beta1::CorsPolicy {
        allow_origins: cors.allow_origins.clone(),
        allow_methods: cors.allow_methods.clone(),
        allow_headers: cors.allow_headers.clone(),
        allow_credentials: cors.allow_credentials,
        expose_headers: cors.expose_headers.clone(),
        max_age: cors.max_age.map(|secs| format!("{}s", secs)),
    }
}

fn status_v1beta1_to_hub(status: &v1beta1::ExposureRuleStatus) -> v2alpha1::ExposureRuleStatus {
    let (state, description) = match &status.exposure_rule_status {
        Some(res) => (
            match res.code {
                v1beta1::StatusCode::Ok => v2alpha1::State::Ready,
                v1beta1::StatusCode::Error => v2alpha1::State::Error,
                v1beta1::StatusCode::Warning => v2alpha1::State::Warning,
                // Skipped only happens when another subresource failed, so
                // it surfaces as a warning in the newer shapes
                v1beta1::StatusCode::Skipped => v2alpha1::State::Warning,
            },
            res.description.clone(),
        ),
        None => (v2alpha1::State::Processing, None),
    };

    v2alpha1::ExposureRuleStatus {
        state,
        description,
        last_processed_time: status.last_processed_time,
    }
}

fn status_hub_to_v1beta1(status: &v2alpha1::ExposureRuleStatus) -> v1beta1::ExposureRuleStatus {
    let code = match status.state {
        v2alpha1::State::Ready => v1beta1::StatusCode::Ok,
        v2alpha1::State::Error => v1beta1::StatusCode::Error,
        v2alpha1::State::Warning => v1beta1::StatusCode::Warning,
        v2alpha1::State::Processing => v1beta1::StatusCode::Skipped,
        v2alpha1::State::Deleting => v1beta1::StatusCode::Ok,
    };

    v1beta1::ExposureRuleStatus {
        exposure_rule_status: Some(v1beta1::ResourceStatus {
            code,
            description: status.description.clone(),
        }),
        last_processed_time: status.last_processed_time,
        ..v1beta1::ExposureRuleStatus::default()
    }
}

// =============================================================================
// v2 <-> hub
// =============================================================================

/// Convert a v2 ExposureRule to the hub shape.
pub fn v2_to_hub(src: &v2::ExposureRule) -> Result<v2alpha1::ExposureRule> {
    let mut dst = v2alpha1::ExposureRule {
        metadata: src.metadata.clone(),
        spec: v2alpha1::ExposureRuleSpec {
            hosts: src.spec.hosts.clone(),
            service: src.spec.service.clone(),
            gateway: src.spec.gateway.clone(),
            timeout: src.spec.timeout,
            cors_policy: src.spec.cors_policy.as_ref().map(cors_v2_to_hub),
            rules: src.spec.rules.iter().map(rule_v2_to_hub).collect(),
        },
        status: src.status.as_ref().map(|s| v2alpha1::ExposureRuleStatus {
            state: state_v2_to_hub(s.state),
            description: s.description.clone(),
            last_processed_time: s.last_processed_time,
        }),
    };

    let annotations = dst
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new);
    annotations
        .entry(ORIGINAL_VERSION_ANNOTATION.to_string())
        .or_insert_with(|| AUTHORED_V2.to_string());

    Ok(dst)
}

/// Convert a hub ExposureRule to the v2 shape. The shapes are structurally
/// equal, so this direction is lossless without annotation support.
pub fn hub_to_v2(src: &v2alpha1::ExposureRule) -> Result<v2::ExposureRule> {
    Ok(v2::ExposureRule {
        metadata: src.metadata.clone(),
        spec: v2::ExposureRuleSpec {
            hosts: src.spec.hosts.clone(),
            service: src.spec.service.clone(),
            gateway: src.spec.gateway.clone(),
            timeout: src.spec.timeout,
            cors_policy: src.spec.cors_policy.as_ref().map(cors_hub_to_v2),
            rules: src.spec.rules.iter().map(rule_hub_to_v2).collect(),
        },
        status: src.status.as_ref().map(|s| v2::ExposureRuleStatus {
            state: state_hub_to_v2(s.state),
            description: s.description.clone(),
            last_processed_time: s.last_processed_time,
        }),
    })
}

fn rule_v2_to_hub(rule: &v2::Rule) -> v2alpha1::Rule {
    v2alpha1::Rule {
        path: rule.path.clone(),
        methods: rule.methods.clone(),
        no_auth: rule.no_auth,
        jwt: rule.jwt.clone(),
        request: rule.request.clone(),
        service: rule.service.clone(),
        timeout: rule.timeout,
    }
}

fn rule_hub_to_v2(rule: &v2alpha1::Rule) -> v2::Rule {
    v2::Rule {
        path: rule.path.clone(),
        methods: rule.methods.clone(),
        no_auth: rule.no_auth,
        jwt: rule.jwt.clone(),
        request: rule.request.clone(),
        service: rule.service.clone(),
        timeout: rule.timeout,
    }
}

fn cors_v2_to_hub(cors: &v2::CorsPolicy) -> v2alpha1::CorsPolicy {
    v2alpha1::CorsPolicy {
        allow_origins: cors.allow_origins.clone(),
        allow_methods: cors.allow_methods.clone(),
        allow_headers: cors.allow_headers.clone(),
        allow_credentials: cors.allow_credentials,
        expose_headers: cors.expose_headers.clone(),
        max_age: cors.max_age,
    }
}

fn cors_hub_to_v2(cors: &v2alpha1::CorsPolicy) -> v2::CorsPolicy {
    v2::CorsPolicy {
        allow_origins: cors.allow_origins.clone(),
        allow_methods: cors.allow_methods.clone(),
        allow_headers: cors.allow_headers.clone(),
        allow_credentials: cors.allow_credentials,
        expose_headers: cors.expose_headers.clone(),
        max_age: cors.max_age,
    }
}

fn state_v2_to_hub(state: v2::State) -> v2alpha1::State {
    match state {
        v2::State::Ready => v2alpha1::State::Ready,
        v2::State::Processing => v2alpha1::State::Processing,
        v2::State::Error => v2alpha1::State::Error,
        v2::State::Deleting => v2alpha1::State::Deleting,
        v2::State::Warning => v2alpha1::State::Warning,
    }
}

fn state_hub_to_v2(state: v2alpha1::State) -> v2::State {
    match state {
        v2alpha1::State::Ready => v2::State::Ready,
        v2alpha1::State::Processing => v2::State::Processing,
        v2alpha1::State::Error => v2::State::Error,
        v2alpha1::State::Deleting => v2::State::Deleting,
        v2alpha1::State::Warning => v2::State::Warning,
    }
}

// =============================================================================
// Duration handling
// =============================================================================

/// Parse a duration string ("300s", "5m", "1h30m") into whole seconds.
///
/// The preflight max-age header is specified in seconds without decimals,
/// so sub-second components are dropped.
fn parse_duration_seconds(input: &str) -> Result<u64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::decode_of("max-age duration", "empty duration"));
    }
    // A bare number is taken as seconds
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(secs);
    }

    let mut total: u64 = 0;
    let mut number = String::new();
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let value: u64 = number
            .parse()
            .map_err(|_| Error::decode_of("max-age duration", format!("bad duration {:?}", input)))?;
        number.clear();
        let unit = match c {
            'h' => 3600,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                0 // milliseconds drop: the header has no sub-second precision
            }
            'm' => 60,
            's' => 1,
            _ => {
                return Err(Error::decode_of(
                    "max-age duration",
                    format!("unknown unit in duration {:?}", input),
                ))
            }
        };
        total += value * unit;
    }
    if !number.is_empty() {
        return Err(Error::decode_of(
            "max-age duration",
            format!("trailing number in duration {:?}", input),
        ));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v1beta1_rule_with(handlers: Vec<v1beta1::Handler>) -> v1beta1::Rule {
        v1beta1::Rule {
            path: "/orders".to_string(),
            methods: vec!["GET".to_string()],
            access_strategies: handlers,
            ..v1beta1::Rule::default()
        }
    }

    fn v1beta1_exposure(rules: Vec<v1beta1::Rule>) -> v1beta1::ExposureRule {
        let mut exposure = v1beta1::ExposureRule::new(
            "orders-api",
            v1beta1::ExposureRuleSpec {
                host: Some("orders.example.com".to_string()),
                gateway: Some("trellis-system/gateway".to_string()),
                service: Some(v1beta1::Service {
                    name: "orders".to_string(),
                    namespace: None,
                    port: 8080,
                    is_external: None,
                }),
                rules,
                ..v1beta1::ExposureRuleSpec::default()
            },
        );
        exposure.metadata.namespace = Some("shop".to_string());
        exposure
    }

    #[test]
    fn convertible_v1beta1_maps_into_the_hub() {
        let src = v1beta1_exposure(vec![v1beta1_rule_with(vec![v1beta1::Handler::named(
            v1beta1::STRATEGY_NO_AUTH,
        )])]);

        let hub = v1beta1_to_hub(&src).unwrap();
        assert_eq!(hub.spec.hosts, vec!["orders.example.com"]);
        assert_eq!(hub.spec.rules.len(), 1);
        assert_eq!(hub.spec.rules[0].no_auth, Some(true));
        assert!(hub.spec.rules[0].jwt.is_none());

        let annotations = hub.metadata.annotations.as_ref().unwrap();
        assert_eq!(
            annotations.get(ORIGINAL_VERSION_ANNOTATION).unwrap(),
            AUTHORED_V1BETA1
        );
        assert!(annotations.contains_key(V1BETA1_SPEC_ANNOTATION));
    }

    #[test]
    fn non_convertible_v1beta1_converts_to_an_empty_spec() {
        let src = v1beta1_exposure(vec![v1beta1_rule_with(vec![v1beta1::Handler::named(
            v1beta1::STRATEGY_OAUTH2_INTROSPECTION,
        )])]);

        let hub = v1beta1_to_hub(&src).unwrap();
        assert!(hub.spec.rules.is_empty());
        assert!(hub.spec.hosts.is_empty());
        // ...but the stored annotation keeps the whole authored spec
        let annotations = hub.metadata.annotations.as_ref().unwrap();
        assert!(annotations.contains_key(V1BETA1_SPEC_ANNOTATION));
    }

    #[test]
    fn round_trip_restores_v1beta1_exactly() {
        let src = v1beta1_exposure(vec![v1beta1_rule_with(vec![v1beta1::Handler::named(
            v1beta1::STRATEGY_COOKIE_SESSION,
        )])]);

        let hub = v1beta1_to_hub(&src).unwrap();
        let back = hub_to_v1beta1(&hub).unwrap();

        assert_eq!(
            serde_json::to_value(&back.spec).unwrap(),
            serde_json::to_value(&src.spec).unwrap()
        );
    }

    #[test]
    fn narrowing_without_stored_spec_is_lossy() {
        let mut hub = v2alpha1::ExposureRule::new(
            "orders-api",
            v2alpha1::ExposureRuleSpec {
                hosts: vec![
                    "orders.example.com".to_string(),
                    "orders.internal.example.com".to_string(),
                ],
                rules: vec![v2alpha1::Rule {
                    path: "/orders".to_string(),
                    no_auth: Some(true),
                    ..v2alpha1::Rule::default()
                }],
                ..v2alpha1::ExposureRuleSpec::default()
            },
        );
        hub.metadata.namespace = Some("shop".to_string());

        let narrow = hub_to_v1beta1(&hub).unwrap();
        // first host wins, the second is gone
        assert_eq!(narrow.spec.host.as_deref(), Some("orders.example.com"));
        assert_eq!(narrow.spec.rules[0].access_strategies[0].name, "no_auth");

        // the hub rules annotation keeps the typed rules for the way back
        let annotations = narrow.metadata.annotations.as_ref().unwrap();
        assert_eq!(
            annotations.get(ORIGINAL_VERSION_ANNOTATION).unwrap(),
            AUTHORED_V2ALPHA1
        );
        let restored = v1beta1_to_hub(&narrow).unwrap();
        assert_eq!(restored.spec.rules[0].no_auth, Some(true));
        // hosts stay collapsed: only the rules annotation is stored
        assert_eq!(restored.spec.hosts, vec!["orders.example.com"]);
    }

    #[test]
    fn jwt_handler_becomes_typed_jwt() {
        let handler: v1beta1::Handler = serde_json::from_value(json!({
            "handler": "jwt",
            "config": {
                "authentications": [{"issuer": "https://a", "jwksUri": "https://a/keys"}],
                "authorizations": [{"requiredScopes": ["read"], "audiences": ["orders"]}]
            }
        }))
        .unwrap();
        let src = v1beta1_exposure(vec![v1beta1_rule_with(vec![handler])]);

        let hub = v1beta1_to_hub(&src).unwrap();
        let jwt = hub.spec.rules[0].jwt.as_ref().unwrap();
        assert_eq!(jwt.authentications[0].issuer, "https://a");
        assert_eq!(jwt.authorizations[0].audiences, vec!["orders"]);
    }

    #[test]
    fn mutators_become_request_mutation() {
        let mut rule = v1beta1_rule_with(vec![v1beta1::Handler::named(v1beta1::STRATEGY_JWT)]);
        rule.access_strategies = vec![];
        rule.mutators = vec![
            v1beta1::Handler {
                name: MUTATOR_HEADER.to_string(),
                config: Some(json!({"headers": {"x-tenant": "shop"}})),
            },
            v1beta1::Handler {
                name: MUTATOR_COOKIE.to_string(),
                config: Some(json!({"cookies": {"session": "legacy"}})),
            },
        ];
        let hub_rule = rule_v1beta1_to_hub(&rule).unwrap();
        let request = hub_rule.request.unwrap();
        assert_eq!(request.headers.get("x-tenant").unwrap(), "shop");
        assert_eq!(request.cookies.get("session").unwrap(), "legacy");
    }

    #[test]
    fn v2_round_trips_through_the_hub() {
        let mut src = v2::ExposureRule::new(
            "orders-api",
            v2::ExposureRuleSpec {
                hosts: vec!["orders.example.com".to_string()],
                rules: vec![v2::Rule {
                    path: "/orders/{**}".to_string(),
                    methods: vec!["GET".to_string()],
                    jwt: Some(v2::JwtConfig::default()),
                    ..v2::Rule::default()
                }],
                timeout: Some(30),
                ..v2::ExposureRuleSpec::default()
            },
        );
        src.metadata.namespace = Some("shop".to_string());

        let hub = v2_to_hub(&src).unwrap();
        assert_eq!(
            hub.metadata
                .annotations
                .as_ref()
                .unwrap()
                .get(ORIGINAL_VERSION_ANNOTATION)
                .unwrap(),
            AUTHORED_V2
        );

        let back = hub_to_v2(&hub).unwrap();
        assert_eq!(
            serde_json::to_value(&back.spec).unwrap(),
            serde_json::to_value(&src.spec).unwrap()
        );
    }

    #[test]
    fn max_age_duration_to_seconds() {
        assert_eq!(parse_duration_seconds("300s").unwrap(), 300);
        assert_eq!(parse_duration_seconds("5m").unwrap(), 300);
        assert_eq!(parse_duration_seconds("1h30m").unwrap(), 5400);
        assert_eq!(parse_duration_seconds("300").unwrap(), 300);
        // sub-second values drop, per the preflight header spec
        assert_eq!(parse_duration_seconds("500ms").unwrap(), 0);
        assert!(parse_duration_seconds("soon").is_err());
    }

    #[test]
    fn cors_max_age_converts_both_ways() {
        let cors = v1beta1::CorsPolicy {
            max_age: Some("5m".to_string()),
            ..v1beta1::CorsPolicy::default()
        };
        let hub = cors_v1beta1_to_hub(&cors).unwrap();
        assert_eq!(hub.max_age, Some(300));

        let back = cors_hub_to_v1beta1(&hub);
        assert_eq!(back.max_age.as_deref(), Some("300s"));
    }

    #[test]
    fn status_codes_map_across_shapes() {
        let status = v1beta1::ExposureRuleStatus {
            exposure_rule_status: Some(v1beta1::ResourceStatus {
                code: v1beta1::StatusCode::Skipped,
                description: Some("blocked by AP failure".to_string()),
            }),
            ..v1beta1::ExposureRuleStatus::default()
        };
        let hub = status_v1beta1_to_hub(&status);
        assert_eq!(hub.state, v2alpha1::State::Warning);

        let back = status_hub_to_v1beta1(&hub);
        assert_eq!(
            back.exposure_rule_status.unwrap().code,
            v1beta1::StatusCode::Warning
        );
    }
}
