//! ExposureRule CRD shapes and cross-version conversion
//!
//! The same exposure intent exists in three incompatible on-disk shapes:
//!
//! - [`v1beta1`] — legacy shape: single host, string-keyed access strategy
//!   handlers with opaque config, mutator list.
//! - [`v2alpha1`] — the hub shape: host list, typed `noAuth`/`jwt` access,
//!   request-mutation struct.
//! - [`v2`] — the current shape, structurally hub-like but with its own
//!   types so conversion stays an explicit mapping.
//!
//! [`conversion`] maps each spoke to and from the hub.

pub mod conversion;
pub mod jwt;
pub mod v1beta1;
pub mod v2;
pub mod v2alpha1;
