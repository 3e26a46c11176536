//! Authorization and storage errors.
//!
//! | Type | Kind | Meaning |
//! |------|------|---------|
//! | [`AccessDenied`] | security | The caller may not do this; always logged at `warn` |
//! | [`NotAttached`] | programming | The caller skipped `attach` before an operation needing it |
//! | [`StoreError`] | storage | A [`PermissionStore`](crate::PermissionStore) backend failed |
//!
//! ```text
//! caller ──► allowed? ──► manager-only? ──► owns package?
//!              │               │                 │
//!         NotPermitted     NotManager     PackageNotOwned
//! ```

use aegis_types::{CallerIdentity, ErrorCode};
use std::path::PathBuf;
use thiserror::Error;

/// A caller was refused.
///
/// # Example
///
/// ```
/// use aegis_auth::AccessDenied;
/// use aegis_types::{CallerIdentity, ErrorCode, Pid, Uid};
///
/// let caller = CallerIdentity::new(Uid::new(10123), Pid::new(4242));
/// let err = AccessDenied::not_permitted("new_process", caller);
///
/// assert_eq!(err.code(), "AUTH_NOT_PERMITTED");
/// assert!(err.to_string().contains("new_process"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessDenied {
    /// Caller is attached but the user has not allowed it.
    #[error("'{operation}' denied: {identity} is not allowed")]
    NotPermitted {
        /// Operation that was attempted.
        operation: String,
        /// The refused caller.
        identity: CallerIdentity,
    },

    /// Operation is reserved for the manager application.
    #[error("'{operation}' is reserved for the manager, called by {identity}")]
    NotManager {
        /// Operation that was attempted.
        operation: String,
        /// The refused caller.
        identity: CallerIdentity,
    },

    /// Caller named a package that does not belong to it.
    #[error("package '{package}' does not belong to {identity}")]
    PackageNotOwned {
        /// Package named in the request.
        package: String,
        /// The refused caller.
        identity: CallerIdentity,
    },
}

impl AccessDenied {
    /// Creates a NotPermitted error.
    pub fn not_permitted(operation: impl Into<String>, identity: CallerIdentity) -> Self {
        Self::NotPermitted {
            operation: operation.into(),
            identity,
        }
    }

    /// Creates a NotManager error.
    pub fn not_manager(operation: impl Into<String>, identity: CallerIdentity) -> Self {
        Self::NotManager {
            operation: operation.into(),
            identity,
        }
    }

    /// Creates a PackageNotOwned error.
    pub fn package_not_owned(package: impl Into<String>, identity: CallerIdentity) -> Self {
        Self::PackageNotOwned {
            package: package.into(),
            identity,
        }
    }

    /// Returns the refused caller.
    #[must_use]
    pub fn identity(&self) -> CallerIdentity {
        match self {
            Self::NotPermitted { identity, .. }
            | Self::NotManager { identity, .. }
            | Self::PackageNotOwned { identity, .. } => *identity,
        }
    }
}

impl ErrorCode for AccessDenied {
    fn code(&self) -> &'static str {
        match self {
            Self::NotPermitted { .. } => "AUTH_NOT_PERMITTED",
            Self::NotManager { .. } => "AUTH_NOT_MANAGER",
            Self::PackageNotOwned { .. } => "AUTH_PACKAGE_NOT_OWNED",
        }
    }

    fn is_recoverable(&self) -> bool {
        // The user can still allow an attached client.
        matches!(self, Self::NotPermitted { .. })
    }
}

/// The caller has no client record.
///
/// Raised by operations that read per-client state. Calling them before
/// `attach` is a bug in the client, so this is kept apart from
/// [`AccessDenied`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{0} is not an attached client")]
pub struct NotAttached(pub CallerIdentity);

impl ErrorCode for NotAttached {
    fn code(&self) -> &'static str {
        "AUTH_NOT_ATTACHED"
    }

    fn is_recoverable(&self) -> bool {
        true
    }
}

/// Errors from persistent permission storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage directory creation failed.
    #[error("failed to create storage directory: {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File written by an incompatible version.
    #[error("version incompatible: file version {file_version}, supported {supported_version}")]
    VersionIncompatible {
        file_version: u32,
        supported_version: u32,
    },
}

impl StoreError {
    /// Creates a DirectoryCreation error.
    pub fn directory_creation(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryCreation {
            path: path.into(),
            source,
        }
    }
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "STORE_IO",
            Self::Serialization(_) => "STORE_SERIALIZATION",
            Self::DirectoryCreation { .. } => "STORE_DIRECTORY_CREATION",
            Self::VersionIncompatible { .. } => "STORE_VERSION_INCOMPATIBLE",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_types::{assert_error_codes, Pid, Uid};

    fn caller() -> CallerIdentity {
        CallerIdentity::new(Uid::new(10123), Pid::new(99))
    }

    #[test]
    fn access_denied_codes() {
        assert_error_codes(
            &[
                AccessDenied::not_permitted("op", caller()),
                AccessDenied::not_manager("op", caller()),
                AccessDenied::package_not_owned("com.example", caller()),
            ],
            "AUTH_",
        );
    }

    #[test]
    fn access_denied_carries_identity() {
        let err = AccessDenied::not_manager("exit", caller());
        assert_eq!(err.identity(), caller());
        let msg = err.to_string();
        assert!(msg.contains("exit"), "got: {msg}");
        assert!(msg.contains("uid=10123"), "got: {msg}");
    }

    #[test]
    fn only_not_permitted_is_recoverable() {
        assert!(AccessDenied::not_permitted("op", caller()).is_recoverable());
        assert!(!AccessDenied::not_manager("op", caller()).is_recoverable());
        assert!(!AccessDenied::package_not_owned("p", caller()).is_recoverable());
    }

    #[test]
    fn not_attached_is_not_a_security_code() {
        let err = NotAttached(caller());
        assert_error_codes(&[err], "AUTH_");
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "uid=10123 pid=99 is not an attached client");
    }

    #[test]
    fn store_error_codes() {
        assert_error_codes(
            &[
                StoreError::Io(std::io::Error::other("disk")),
                StoreError::directory_creation("/x", std::io::Error::other("ro")),
                StoreError::VersionIncompatible {
                    file_version: 9,
                    supported_version: 1,
                },
            ],
            "STORE_",
        );
    }
}
