//! Common types for Trellis: ExposureRule CRD shapes, conversion, labels, and errors

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod hash;
pub mod labels;
pub mod store;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of the ExposureRule CRD
pub const GROUP: &str = "gateway.trellis.dev";

/// Annotation recording the API version an ExposureRule was originally authored in
pub const ORIGINAL_VERSION_ANNOTATION: &str = "gateway.trellis.dev/original-version";

/// Annotation holding the JSON-encoded v1beta1 spec of a converted ExposureRule
pub const V1BETA1_SPEC_ANNOTATION: &str = "gateway.trellis.dev/v1beta1-spec";

/// Annotation holding the JSON-encoded hub-shape rules of a narrowed ExposureRule
pub const HUB_RULES_ANNOTATION: &str = "gateway.trellis.dev/v2-rules";

/// Annotation driving the delegated-to-mesh migration state machine
pub const MIGRATION_STEP_ANNOTATION: &str = "gateway.trellis.dev/migration-step";

/// Label holding the content hash of a generated AuthorizationPolicy
pub const HASH_LABEL: &str = "gateway.trellis.dev/hash";

/// Label holding the authorization-entry index of a generated AuthorizationPolicy
pub const INDEX_LABEL: &str = "gateway.trellis.dev/index";
