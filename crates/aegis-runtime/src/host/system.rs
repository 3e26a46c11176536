//! Facilities of the broker's own process.

use crate::platform::{PlatformError, SystemFacility};
use aegis_types::{CallerIdentity, Pid, Uid};
use std::path::PathBuf;
use std::process::{Command, Stdio};

const SECURITY_CONTEXT_PATH: &str = "/proc/self/attr/current";

/// [`SystemFacility`] of the running host.
///
/// Properties go through the `getprop` / `setprop` tools.
#[derive(Debug, Clone)]
pub struct HostSystem {
    getprop: PathBuf,
    setprop: PathBuf,
    security_context_path: PathBuf,
}

impl Default for HostSystem {
    fn default() -> Self {
        Self {
            getprop: PathBuf::from("getprop"),
            setprop: PathBuf::from("setprop"),
            security_context_path: PathBuf::from(SECURITY_CONTEXT_PATH),
        }
    }
}

impl HostSystem {
    /// Creates a facility using the tools from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses explicit property tools.
    #[must_use]
    pub fn with_property_tools(mut self, getprop: impl Into<PathBuf>, setprop: impl Into<PathBuf>) -> Self {
        self.getprop = getprop.into();
        self.setprop = setprop.into();
        self
    }

    /// Reads the security context from `path` instead of procfs.
    #[must_use]
    pub fn with_security_context_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.security_context_path = path.into();
        self
    }
}

fn parse_security_context(raw: &str) -> Option<String> {
    let context = raw.trim_end_matches(['\0', '\n']).trim();
    (!context.is_empty()).then(|| context.to_string())
}

impl SystemFacility for HostSystem {
    fn identity(&self) -> CallerIdentity {
        // SAFETY: getuid() is a standard POSIX call with no safety requirements.
        #[allow(unsafe_code)]
        let uid = unsafe { libc::getuid() };
        CallerIdentity::new(Uid::new(uid), Pid::new(std::process::id()))
    }

    fn property(&self, name: &str) -> Result<Option<String>, PlatformError> {
        let output = Command::new(&self.getprop)
            .arg(name)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()?;
        if !output.status.success() {
            return Err(PlatformError::unavailable(format!(
                "getprop {name} exited with {}",
                output.status
            )));
        }
        let value = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        Ok((!value.is_empty()).then_some(value))
    }

    fn set_property(&self, name: &str, value: &str) -> Result<(), PlatformError> {
        let status = Command::new(&self.setprop)
            .args([name, value])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if !status.success() {
            return Err(PlatformError::unavailable(format!(
                "setprop {name} exited with {status}"
            )));
        }
        Ok(())
    }

    fn security_context(&self) -> Result<String, PlatformError> {
        let raw = std::fs::read_to_string(&self.security_context_path)?;
        parse_security_context(&raw)
            .ok_or_else(|| PlatformError::unavailable("empty security context"))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn identity_is_own_process() {
        let identity = HostSystem::new().identity();
        assert_eq!(identity.pid.raw(), std::process::id());
        #[allow(unsafe_code)]
        let uid = unsafe { libc::getuid() };
        assert_eq!(identity.uid.raw(), uid);
    }

    #[test]
    fn security_context_is_trimmed() {
        assert_eq!(
            parse_security_context("u:r:shell:s0\0").as_deref(),
            Some("u:r:shell:s0")
        );
        assert_eq!(parse_security_context("\n"), None);
    }

    #[test]
    fn security_context_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("current");
        std::fs::write(&path, b"u:r:su:s0\0").expect("write");

        let system = HostSystem::new().with_security_context_path(&path);
        assert_eq!(system.security_context().expect("context"), "u:r:su:s0");
    }

    #[test]
    fn property_reads_tool_output() {
        // `echo` prints the property name back as its value.
        let system = HostSystem::new().with_property_tools("echo", "true");
        assert_eq!(
            system.property("ro.build.type").expect("read").as_deref(),
            Some("ro.build.type")
        );
        assert!(system.set_property("debug.aegis", "1").is_ok());
    }

    #[test]
    fn failing_tools_are_unavailable() {
        let system = HostSystem::new().with_property_tools("false", "false");
        assert!(matches!(system.property("x"), Err(PlatformError::Unavailable(_))));
        assert!(matches!(
            system.set_property("ro.secure", "0"),
            Err(PlatformError::Unavailable(_))
        ));
    }

    #[test]
    fn missing_tool_is_io_error() {
        let system = HostSystem::new().with_property_tools("/nonexistent/getprop", "/nonexistent/setprop");
        assert!(matches!(system.property("x"), Err(PlatformError::Io(_))));
    }
}
