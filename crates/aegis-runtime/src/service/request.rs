//! User service requests.

use serde::{Deserialize, Serialize};

/// Version assumed when a request does not name one.
pub const DEFAULT_VERSION_CODE: u32 = 1;

/// A client's description of the user service it wants.
///
/// # Example
///
/// ```
/// use aegis_runtime::service::ServiceRequest;
///
/// let request = ServiceRequest::new("com.example", "com.example.FileService")
///     .with_tag("files")
///     .with_version(3)
///     .standalone("files");
///
/// assert_eq!(request.key(), "com.example:files");
/// assert!(request.is_standalone());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// Package owning the service code.
    pub package: String,
    /// Fully qualified service class.
    pub class_name: String,
    /// Optional coalescing tag, used instead of the class in the key.
    pub tag: Option<String>,
    /// Client-declared service version.
    pub version_code: u32,
    /// Process name suffix. `Some` launches the service in its own process.
    pub process_name_suffix: Option<String>,
    /// Launch the separate process debuggable.
    pub debuggable: bool,
}

impl ServiceRequest {
    /// Creates an in-process request for `class_name` in `package`.
    pub fn new(package: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class_name: class_name.into(),
            tag: None,
            version_code: DEFAULT_VERSION_CODE,
            process_name_suffix: None,
            debuggable: false,
        }
    }

    /// Sets the coalescing tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Sets the service version.
    #[must_use]
    pub fn with_version(mut self, version_code: u32) -> Self {
        self.version_code = version_code;
        self
    }

    /// Runs the service in a separate process named `<package>:<suffix>`.
    #[must_use]
    pub fn standalone(mut self, suffix: impl Into<String>) -> Self {
        self.process_name_suffix = Some(suffix.into());
        self
    }

    /// Launches the separate process debuggable.
    #[must_use]
    pub fn debuggable(mut self) -> Self {
        self.debuggable = true;
        self
    }

    /// Registry key: `package:tag`, or `package:class` without a tag.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}:{}",
            self.package,
            self.tag.as_deref().unwrap_or(&self.class_name)
        )
    }

    /// Returns `true` if the service runs in its own process.
    #[must_use]
    pub fn is_standalone(&self) -> bool {
        self.process_name_suffix.is_some()
    }

    /// Checks the fields a spawn cannot do without.
    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if !is_name(&self.package, |_| false) {
            return Err("package must be non-empty [A-Za-z0-9_.]");
        }
        if !is_name(&self.class_name, |c| c == '$') {
            return Err("class must be non-empty [A-Za-z0-9_$.]");
        }
        if self
            .process_name_suffix
            .as_deref()
            .is_some_and(|s| !is_name(s, |c| c == '-'))
        {
            return Err("process name suffix must be non-empty [A-Za-z0-9_.-]");
        }
        Ok(())
    }
}

/// Non-empty, ASCII alphanumerics, `_`, `.` and whatever `extra` admits.
fn is_name(value: &str, extra: impl Fn(char) -> bool) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || extra(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_falls_back_to_class() {
        let request = ServiceRequest::new("com.example", "com.example.Svc");
        assert_eq!(request.key(), "com.example:com.example.Svc");
        assert!(!request.is_standalone());
        assert_eq!(request.version_code, DEFAULT_VERSION_CODE);
    }

    #[test]
    fn tag_wins_over_class() {
        let a = ServiceRequest::new("com.example", "com.example.A").with_tag("shared");
        let b = ServiceRequest::new("com.example", "com.example.B").with_tag("shared");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn validation() {
        assert!(ServiceRequest::new("p", "c").validate().is_ok());
        assert!(ServiceRequest::new("", "c").validate().is_err());
        assert!(ServiceRequest::new("p", "").validate().is_err());
        assert!(ServiceRequest::new("p", "c").standalone("").validate().is_err());
        assert!(ServiceRequest::new("p", "c")
            .standalone("a b")
            .validate()
            .is_err());
    }

    #[test]
    fn names_reject_shell_metacharacters() {
        assert!(ServiceRequest::new("com.example", "com.example.Outer$Inner_2")
            .standalone("svc-1")
            .validate()
            .is_ok());

        for class in ["x;touch /tmp/injected;", "a b", "$(id)", "a`id`", "a'b", "a|b", "a&b"] {
            assert!(ServiceRequest::new("p", class).validate().is_err(), "{class}");
        }
        assert!(ServiceRequest::new("p;id", "c").validate().is_err());
        assert!(ServiceRequest::new("p$x", "c").validate().is_err());
        assert!(ServiceRequest::new("p", "c").standalone("a;b").validate().is_err());
        assert!(ServiceRequest::new("p", "c").standalone("a:b").validate().is_err());
    }
}
