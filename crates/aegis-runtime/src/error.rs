//! Broker error type.
//!
//! [`BrokerError`] is what every facade operation returns. It separates
//! the failure kinds clients must treat differently:
//!
//! | Kind | Variants | Caller sees |
//! |------|----------|-------------|
//! | Security rejection | `AccessDenied` | a denial, never retried |
//! | Caller-programming error | `NotAttached`, `InvalidArgument`, `PackageNotFound` | a distinct failure |
//! | Platform / storage | `Platform`, `Storage` | a failure of the underlying service |
//! | Fatal | `ManagerNotInstalled` | startup aborted with [`EXIT_MANAGER_NOT_INSTALLED`] |
//!
//! Peer failures of managed services never surface here; they show up as
//! a later "dead" notification to subscribers.

use crate::platform::PlatformError;
use aegis_auth::{AccessDenied, NotAttached, StoreError};
use aegis_types::{ErrorCode, UserId};
use thiserror::Error;

/// Process exit code used when the manager application is missing.
pub const EXIT_MANAGER_NOT_INSTALLED: i32 = 50;

/// Error returned by broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The caller may not perform the operation.
    #[error(transparent)]
    AccessDenied(#[from] AccessDenied),

    /// The caller has not attached.
    #[error(transparent)]
    NotAttached(#[from] NotAttached),

    /// A named package does not exist for the caller's user.
    #[error("package '{package}' not found for user {user}")]
    PackageNotFound { package: String, user: UserId },

    /// The request is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A platform collaborator failed.
    #[error("{operation} failed: {source}")]
    Platform {
        operation: &'static str,
        #[source]
        source: PlatformError,
    },

    /// The permission store failed.
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// The manager application is not installed.
    #[error("manager application '{0}' is not installed")]
    ManagerNotInstalled(String),
}

impl BrokerError {
    /// Creates a PackageNotFound error.
    pub fn package_not_found(package: impl Into<String>, user: UserId) -> Self {
        Self::PackageNotFound {
            package: package.into(),
            user,
        }
    }

    /// Creates an InvalidArgument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates a Platform error.
    pub fn platform(operation: &'static str, source: impl Into<PlatformError>) -> Self {
        Self::Platform {
            operation,
            source: source.into(),
        }
    }

    /// Returns `true` for security rejections.
    #[must_use]
    pub fn is_security(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }

    /// Process exit code for fatal errors.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ManagerNotInstalled(_) => Some(EXIT_MANAGER_NOT_INSTALLED),
            _ => None,
        }
    }
}

impl ErrorCode for BrokerError {
    fn code(&self) -> &'static str {
        match self {
            Self::AccessDenied(_) => "BROKER_ACCESS_DENIED",
            Self::NotAttached(_) => "BROKER_NOT_ATTACHED",
            Self::PackageNotFound { .. } => "BROKER_PACKAGE_NOT_FOUND",
            Self::InvalidArgument(_) => "BROKER_INVALID_ARGUMENT",
            Self::Platform { .. } => "BROKER_PLATFORM",
            Self::Storage(_) => "BROKER_STORAGE",
            Self::ManagerNotInstalled(_) => "BROKER_MANAGER_NOT_INSTALLED",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::AccessDenied(e) => e.is_recoverable(),
            Self::NotAttached(e) => e.is_recoverable(),
            Self::Platform { source, .. } => source.is_recoverable(),
            Self::Storage(e) => e.is_recoverable(),
            Self::PackageNotFound { .. }
            | Self::InvalidArgument(_)
            | Self::ManagerNotInstalled(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_types::{assert_error_codes, CallerIdentity, Pid, TransportError, Uid};

    fn caller() -> CallerIdentity {
        CallerIdentity::new(Uid::new(10123), Pid::new(9))
    }

    #[test]
    fn error_codes() {
        assert_error_codes(
            &[
                BrokerError::from(AccessDenied::not_permitted("op", caller())),
                BrokerError::from(NotAttached(caller())),
                BrokerError::package_not_found("com.example", UserId::SYSTEM),
                BrokerError::invalid_argument("token is empty"),
                BrokerError::platform("set_property", PlatformError::unavailable("ro")),
                BrokerError::ManagerNotInstalled("dev.aegis.manager".into()),
            ],
            "BROKER_",
        );
    }

    #[test]
    fn only_access_denied_is_security() {
        assert!(BrokerError::from(AccessDenied::not_manager("exit", caller())).is_security());
        assert!(!BrokerError::from(NotAttached(caller())).is_security());
        assert!(!BrokerError::invalid_argument("x").is_security());
    }

    #[test]
    fn manager_missing_is_fatal() {
        let err = BrokerError::ManagerNotInstalled("dev.aegis.manager".into());
        assert_eq!(err.exit_code(), Some(EXIT_MANAGER_NOT_INSTALLED));
        assert_eq!(BrokerError::invalid_argument("x").exit_code(), None);
    }

    #[test]
    fn platform_error_keeps_operation() {
        let err = BrokerError::platform("security_context", TransportError::DeadObject);
        assert!(err.to_string().starts_with("security_context failed"));
        assert!(!err.is_recoverable());
    }
}
