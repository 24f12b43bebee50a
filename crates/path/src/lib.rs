//! Path validation and mapping for catalog-reported media paths.
//!
//! Three pieces, all pure (no filesystem access):
//! - [`validate`] rejects traversal, injection and reserved names, and
//!   normalizes separators.
//! - [`PathMapper`] rewrites catalog paths onto local mounts using the
//!   longest matching [`MappingRule`].
//! - [`TierMap`] translates between an array path and its cache location.

pub mod error;
mod mapper;
mod tier;
mod validate;

pub use crate::mapper::{MappingRule, PathMapper, ResolvedPath};
pub use crate::tier::{TierMap, TierRule};
pub use crate::validate::{DEFAULT_MAX_LENGTH, validate};
