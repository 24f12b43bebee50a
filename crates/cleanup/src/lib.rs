//! Eviction and cleanup of cached media.
//!
//! A [`Cleaner`] pass walks the registry state machine:
//!
//! ```text
//! Active --(expired, over quota)--> PendingRemoval --(evicted)--> Removed --(retention)--> purged
//!    \--(file missing)--> Orphaned --(retired)----------------------^
//! ```
//!
//! Eviction never destroys the last copy of a file. If the array still has
//! an identical copy the cached one is deleted, otherwise it is moved back.

mod cleaner;
pub mod error;
mod policy;
mod result;

pub use crate::cleaner::Cleaner;
pub use crate::policy::CleanupPolicy;
pub use crate::result::{CleanupFailure, CleanupPlan, CleanupResult};
