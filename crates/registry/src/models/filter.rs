use crate::models::{CacheReason, EntryStatus, OperationType, UserId};
use std::path::PathBuf;
use time::UtcDateTime;

const DEFAULT_PAGE_SIZE: u32 = 100;

/// Criteria for [`Registry::query`](crate::Registry::query). Every criterion
/// is optional; set ones are combined with AND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFilter {
    pub status: Option<EntryStatus>,
    /// Entries this user is attributed to.
    pub user: Option<UserId>,
    pub reason: Option<CacheReason>,
    /// Inclusive.
    pub min_size: Option<u64>,
    /// Inclusive.
    pub max_size: Option<u64>,
    pub cached_since: Option<UtcDateTime>,
    pub limit: u32,
    pub offset: u32,
}
impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            status: None,
            user: None,
            reason: None,
            min_size: None,
            max_size: None,
            cached_since: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}
impl QueryFilter {
    pub fn with_status(mut self, status: EntryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_user(mut self, user: UserId) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_reason(mut self, reason: CacheReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_size_range(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.min_size = min;
        self.max_size = max;
        self
    }

    pub fn cached_since(mut self, since: UtcDateTime) -> Self {
        self.cached_since = Some(since);
        self
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

/// Criteria for [`Registry::list_operations`](crate::Registry::list_operations).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFilter {
    pub operation_type: Option<OperationType>,
    pub file_path: Option<PathBuf>,
    pub success: Option<bool>,
    pub limit: u32,
    pub offset: u32,
}
impl Default for OperationFilter {
    fn default() -> Self {
        Self { operation_type: None, file_path: None, success: None, limit: DEFAULT_PAGE_SIZE, offset: 0 }
    }
}
impl OperationFilter {
    pub fn with_type(mut self, operation_type: OperationType) -> Self {
        self.operation_type = Some(operation_type);
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn failures_only(mut self) -> Self {
        self.success = Some(false);
        self
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}
