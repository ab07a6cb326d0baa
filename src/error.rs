use sea_orm::{DbErr, SqlErr};
use std::fmt;
use thiserror::Error;

/// What is known about the store after a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The transaction was rolled back (or never started); nothing was written.
    RolledBack,
    /// `COMMIT` itself failed. The writes may or may not be durable.
    Unknown,
}

impl fmt::Display for CommitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitOutcome::RolledBack => write!(f, "rolled back"),
            CommitOutcome::Unknown => write!(f, "commit outcome unknown"),
        }
    }
}

/// Coarse classification of a [`PcrfError`], handy for callers mapping to
/// their own transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Storage,
}

#[derive(Error, Debug)]
pub enum PcrfError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Storage failure ({outcome}): {source}")]
    Storage {
        #[source]
        source: DbErr,
        outcome: CommitOutcome,
    },
}

impl PcrfError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        PcrfError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PcrfError::NotFound { .. } => ErrorKind::NotFound,
            PcrfError::Conflict(_) => ErrorKind::Conflict,
            PcrfError::Validation(_) => ErrorKind::Validation,
            PcrfError::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// True when the caller must re-query the store before retrying, because
    /// a commit was attempted and its result is not known.
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            PcrfError::Storage {
                outcome: CommitOutcome::Unknown,
                ..
            }
        )
    }

    pub(crate) fn commit_failed(source: DbErr) -> Self {
        PcrfError::Storage {
            source,
            outcome: CommitOutcome::Unknown,
        }
    }

    /// Turns a unique-key violation into `Conflict(conflict())`. Only call
    /// sites whose unique key encodes a caller-visible rule use this; every
    /// other violation stays a storage failure.
    pub(crate) fn conflict_on_duplicate(err: DbErr, conflict: impl FnOnce() -> String) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => PcrfError::Conflict(conflict()),
            _ => err.into(),
        }
    }
}

impl From<DbErr> for PcrfError {
    fn from(err: DbErr) -> Self {
        match err {
            DbErr::RecordNotFound(key) => PcrfError::NotFound {
                entity: "record",
                key,
            },
            other => PcrfError::Storage {
                source: other,
                outcome: CommitOutcome::RolledBack,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_not_found_maps_to_not_found() {
        let err: PcrfError = DbErr::RecordNotFound("session 9".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.is_indeterminate());
    }

    #[test]
    fn generic_db_error_is_rolled_back_storage_failure() {
        let err: PcrfError = DbErr::Custom("disk full".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(!err.is_indeterminate());
        assert!(err.to_string().contains("rolled back"));
    }

    #[test]
    fn duplicate_mapping_leaves_other_errors_alone() {
        let err = PcrfError::conflict_on_duplicate(DbErr::Custom("disk full".to_string()), || {
            "subscriber exists".to_string()
        });
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn commit_failure_is_indeterminate() {
        let err = PcrfError::commit_failed(DbErr::Custom("connection reset".to_string()));
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.is_indeterminate());
    }
}
