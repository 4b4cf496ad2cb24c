//! Error types for ledger operations.

/// Result alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors returned by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The partition token did not resolve to a known partition.
    #[error("invalid partition: {token:?}")]
    InvalidPartition {
        /// The token as supplied by the caller.
        token: String,
    },

    /// The referenced record or index entry does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of thing that was looked up.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The folder was already linked and the association changed nothing.
    #[error("folder {folder_id} is already associated with case {case_id}")]
    DuplicateAssociation {
        /// The folder that was already linked.
        folder_id: String,
        /// The record it is linked to.
        case_id: String,
        /// Current sync flag on the record.
        needs_sync: bool,
    },

    /// Input failed validation before storage was touched.
    #[error("validation error: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// The underlying store failed, or a conditional update kept losing races.
    #[error("store error during {operation}: {source}")]
    Store {
        /// Ledger operation that was running.
        operation: &'static str,
        /// Underlying storage error.
        #[source]
        source: causa_core::Error,
    },
}

impl LedgerError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Wraps a storage error with the operation that hit it.
    #[must_use]
    pub fn store(operation: &'static str, source: causa_core::Error) -> Self {
        Self::Store { operation, source }
    }

    /// Short, stable label used for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPartition { .. } => "invalid_partition",
            Self::NotFound { .. } => "not_found",
            Self::DuplicateAssociation { .. } => "duplicate",
            Self::Validation { .. } => "validation",
            Self::Store { .. } => "store_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_exposes_source() {
        let err = LedgerError::store("associate_folder", causa_core::Error::storage("timeout"));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(
            err.to_string(),
            "store error during associate_folder: storage error: timeout"
        );
        assert_eq!(err.kind(), "store_error");
    }

    #[test]
    fn duplicate_message_names_both_sides() {
        let err = LedgerError::DuplicateAssociation {
            folder_id: "f1".into(),
            case_id: "c1".into(),
            needs_sync: true,
        };
        assert_eq!(
            err.to_string(),
            "folder f1 is already associated with case c1"
        );
    }
}
