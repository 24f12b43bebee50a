use crate::error::{Error, ErrorKind, Result};
use crate::models::from_nanos;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;
use time::UtcDateTime;

/// Kinds of audited operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// A file was transferred into the cache.
    Cache,
    /// A cached file was moved back to the array.
    Restore,
    /// A cached file was dropped because the array copy is intact.
    Release,
    /// An entry was selected for eviction.
    Expire,
    /// A pending-removal entry was requested again and kept.
    Reactivate,
    /// The registry lost track of a file.
    Orphan,
    /// Removed from the registry through the dashboard.
    Delete,
    /// A move published but left its source behind.
    Duplicate,
}
impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Restore => "restore",
            Self::Release => "release",
            Self::Expire => "expire",
            Self::Reactivate => "reactivate",
            Self::Orphan => "orphan",
            Self::Delete => "delete",
            Self::Duplicate => "duplicate",
        }
    }
}
impl FromStr for OperationType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "cache" => Self::Cache,
            "restore" => Self::Restore,
            "release" => Self::Release,
            "expire" => Self::Expire,
            "reactivate" => Self::Reactivate,
            "orphan" => Self::Orphan,
            "delete" => Self::Delete,
            "duplicate" => Self::Duplicate,
            _ => exn::bail!(ErrorKind::ParseError { field: "operation type", value: s.to_string() }),
        })
    }
}
impl Display for OperationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// An audit record to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOperation {
    pub operation_type: OperationType,
    pub file_path: PathBuf,
    /// User or subsystem that caused the operation.
    pub triggered_by: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}
impl NewOperation {
    pub fn succeeded(operation_type: OperationType, file_path: impl Into<PathBuf>) -> Self {
        Self { operation_type, file_path: file_path.into(), triggered_by: None, success: true, error_message: None }
    }

    pub fn failed(operation_type: OperationType, file_path: impl Into<PathBuf>, error: impl ToString) -> Self {
        Self {
            operation_type,
            file_path: file_path.into(),
            triggered_by: None,
            success: false,
            error_message: Some(error.to_string()),
        }
    }

    pub fn triggered_by(mut self, who: impl Into<String>) -> Self {
        self.triggered_by = Some(who.into());
        self
    }
}

/// A write-once audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationLogEntry {
    pub id: i64,
    pub operation_type: OperationType,
    pub file_path: PathBuf,
    pub triggered_by: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: UtcDateTime,
}

#[derive(sqlx::FromRow)]
pub(crate) struct OperationRow {
    id: i64,
    operation_type: String,
    file_path: String,
    triggered_by: Option<String>,
    success: bool,
    error_message: Option<String>,
    timestamp: i64,
}
impl TryFrom<OperationRow> for OperationLogEntry {
    type Error = Error;
    fn try_from(row: OperationRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            operation_type: row.operation_type.parse()?,
            file_path: PathBuf::from(row.file_path),
            triggered_by: row.triggered_by,
            success: row.success,
            error_message: row.error_message,
            timestamp: from_nanos(row.timestamp)?,
        })
    }
}
