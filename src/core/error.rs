use thiserror::Error;

/// Errors raised by the engine and carried unchanged through the wrapping layer.
///
/// The same value may be delivered to a request, to its transaction and to
/// every listener attached to either, so the type is `Clone`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Transaction inactive: {0}")]
    TransactionInactive(String),

    #[error("Read-only transaction: {0}")]
    ReadOnly(String),

    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("Version error: {0}")]
    VersionError(String),

    #[error("Invalid access: {0}")]
    InvalidAccess(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Event loop stalled: {0}")]
    Stalled(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Engine-style error name, stable across messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConstraintViolation(_) => "ConstraintError",
            Self::DataError(_) => "DataError",
            Self::NotFound(_) => "NotFoundError",
            Self::InvalidState(_) => "InvalidStateError",
            Self::TransactionInactive(_) => "TransactionInactiveError",
            Self::ReadOnly(_) => "ReadOnlyError",
            Self::Aborted(_) => "AbortError",
            Self::VersionError(_) => "VersionError",
            Self::InvalidAccess(_) => "InvalidAccessError",
            Self::TypeMismatch(_) => "TypeError",
            Self::UnsupportedOperation(_) => "NotSupportedError",
            Self::Stalled(_) => "StalledError",
        }
    }

    /// Misuse errors are thrown at the call site; everything else arrives
    /// through a rejected future or an aborted transaction.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::InvalidState(_)
                | Self::TransactionInactive(_)
                | Self::ReadOnly(_)
                | Self::InvalidAccess(_)
                | Self::TypeMismatch(_)
                | Self::UnsupportedOperation(_)
        )
    }

    pub(crate) fn aborted() -> Self {
        Self::Aborted("transaction was aborted".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names() {
        assert_eq!(DbError::ConstraintViolation("x".into()).name(), "ConstraintError");
        assert_eq!(DbError::aborted().name(), "AbortError");
    }

    #[test]
    fn test_misuse_classification() {
        assert!(DbError::TransactionInactive("t".into()).is_misuse());
        assert!(DbError::InvalidState("cursor".into()).is_misuse());
        assert!(!DbError::ConstraintViolation("dup".into()).is_misuse());
        assert!(!DbError::aborted().is_misuse());
    }
}
