//! Atomic transfer of media files between storage tiers.
//!
//! A transfer is observable only fully done or not at all. Every
//! [`TransferRequest`] goes through the same protocol:
//!
//! 1. Validate the request (absolute paths, source exists, destination free).
//! 2. Preflight free space on the destination volume, unless the transfer
//!    only touches metadata.
//! 3. Stage into a temporary sibling of the destination.
//! 4. Publish the staged file under the final name without clobbering.
//! 5. For moves, remove the source. Failure here leaves a duplicate and a
//!    warning, never data loss.
//! 6. Transfer companion files the same way, independently.
//!
//! Failures before publishing remove every staging artifact. The
//! [`TransferPool`] runs batches with bounded concurrency and cooperative
//! cancellation between files.

mod companion;
mod engine;
pub mod error;
mod pool;
mod request;
mod result;
mod space;
mod stage;

pub use crate::companion::{destination_for as companion_destination, discover as discover_companions};
pub use crate::engine::{DEFAULT_COMPANION_EXTENSIONS, TransferConfig, TransferEngine};
pub use crate::pool::{Direction, PoolLimits, PoolRun, TransferPool};
pub use crate::request::{TransferMode, TransferRequest};
pub use crate::result::{TransferResult, TransferWarning};
#[cfg(any(test, feature = "mock"))]
pub use crate::space::FixedSpaceProbe;
pub use crate::space::{Locality, SpaceProbe, StatvfsProbe, locality, locality_of};
pub use crate::stage::{is_temp_name, sweep_stale_temp_files};
