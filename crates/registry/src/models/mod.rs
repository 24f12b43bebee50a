mod entry;
mod filter;
mod kinds;
mod operation;
mod statistics;

pub use self::entry::{Attribution, CachedFileEntry, NewEntry, UserId};
pub(crate) use self::entry::{AttributionRow, EntryRow};
pub use self::filter::{OperationFilter, QueryFilter};
pub use self::kinds::{CacheMethod, CacheReason, EntryStatus};
pub use self::operation::{NewOperation, OperationLogEntry, OperationType};
pub(crate) use self::operation::OperationRow;
pub use self::statistics::{ReasonStatistics, Statistics, UserStatistics};
pub(crate) use self::statistics::{ReasonRow, TotalsRow, UserRow};

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use std::path::Path;
use time::UtcDateTime;

// Timestamps are stored as Unix nanoseconds so values read back compare
// equal to what was written.
pub(crate) fn to_nanos(timestamp: UtcDateTime) -> Result<i64> {
    i64::try_from(timestamp.unix_timestamp_nanos()).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

pub(crate) fn from_nanos(nanos: i64) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp_nanos(i128::from(nanos)).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

pub(crate) fn path_to_string(path: &Path) -> Result<String> {
    Ok(path.to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string())
}
