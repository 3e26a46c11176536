//! Unified error interface for the broker crates.
//!
//! Every error enum in the workspace implements [`ErrorCode`] so the facade
//! can log and report failures uniformly, whether they come from the
//! authorization layer, the permission store or the transport.
//!
//! # Example
//!
//! ```
//! use aegis_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum SpawnError {
//!     ShellExited(i32),
//!     Timeout,
//! }
//!
//! impl ErrorCode for SpawnError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::ShellExited(_) => "SPAWN_SHELL_EXITED",
//!             Self::Timeout => "SPAWN_TIMEOUT",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::Timeout)
//!     }
//! }
//!
//! let err = SpawnError::Timeout;
//! assert_eq!(err.code(), "SPAWN_TIMEOUT");
//! assert!(err.is_recoverable());
//! ```

/// Machine-readable error classification.
///
/// # Code Format
///
/// - **UPPER_SNAKE_CASE**, e.g. `"AUTH_ACCESS_DENIED"`
/// - **Layer-prefixed**: `AUTH_`, `STORE_`, `BROKER_`, `TRANSPORT_`, `CONFIG_`
/// - **Stable**: codes are part of the reply contract with clients
///
/// # Recoverability
///
/// Security rejections are never recoverable: retrying the same call with
/// the same identity yields the same decision. Transport failures towards a
/// peer that is still alive usually are.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;

    /// Returns whether retrying (or a corrective action by the caller) may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Asserts that an error code follows the workspace conventions.
///
/// Intended for tests that enumerate every variant of an error enum.
///
/// # Panics
///
/// Panics if the code is empty, lacks `expected_prefix`, or is not
/// UPPER_SNAKE_CASE.
///
/// # Example
///
/// ```
/// use aegis_types::{assert_error_code, ErrorCode};
///
/// enum MyError { Gone }
///
/// impl ErrorCode for MyError {
///     fn code(&self) -> &'static str { "MY_GONE" }
///     fn is_recoverable(&self) -> bool { false }
/// }
///
/// assert_error_code(&MyError::Gone, "MY_");
/// ```
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "Error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "Error code '{}' must start with prefix '{}'",
        code,
        expected_prefix
    );
    assert!(
        is_upper_snake_case(code),
        "Error code '{}' must be UPPER_SNAKE_CASE",
        code
    );
}

/// Validates every error in `errors` with [`assert_error_code`].
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }

    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
