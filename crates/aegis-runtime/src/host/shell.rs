//! Process host backed by the OS shell.

use crate::platform::{HostedProcess, PlatformError, ProcessHost, ProcessSpec};
use aegis_types::{Handle, Pid};
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

const DEFAULT_SHELL: &str = "sh";

/// [`ProcessHost`] running commands through `sh`.
///
/// In-process loading needs a managed runtime and is reported as
/// unavailable.
#[derive(Debug, Clone)]
pub struct ShellProcessHost {
    shell: PathBuf,
}

impl Default for ShellProcessHost {
    fn default() -> Self {
        Self {
            shell: PathBuf::from(DEFAULT_SHELL),
        }
    }
}

impl ShellProcessHost {
    /// Creates a host using `sh` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `shell` instead of `sh`.
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }
}

impl ProcessHost for ShellProcessHost {
    fn spawn_shell(&self, command: &str) -> Result<i32, PlatformError> {
        let mut child = Command::new(&self.shell)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        // Dropping stdin closes it, so the shell exits after the command.
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(command.as_bytes())?;
            stdin.write_all(b"\n")?;
        }

        let status = child.wait()?;
        tracing::debug!(shell = %self.shell.display(), ?status, "shell exited");
        Ok(status.code().unwrap_or(-1))
    }

    fn new_process(&self, spec: &ProcessSpec) -> Result<Box<dyn HostedProcess>, PlatformError> {
        let (program, args) = spec
            .argv
            .split_first()
            .ok_or_else(|| PlatformError::unavailable("empty command"))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(env) = &spec.env {
            command.env_clear();
            for entry in env {
                match entry.split_once('=') {
                    Some((key, value)) => {
                        command.env(key, value);
                    }
                    None => tracing::debug!(entry = %entry, "ignoring malformed environment entry"),
                }
            }
        }
        if let Some(dir) = &spec.dir {
            command.current_dir(dir);
        }

        let child = command.spawn()?;
        let pid = Pid::new(child.id());
        tracing::debug!(%pid, program = %program, "process started");
        Ok(Box::new(ChildProcess {
            pid,
            child: Mutex::new(child),
            exited: AtomicBool::new(false),
        }))
    }

    fn load_and_instantiate(&self, artifact: &Path, class_name: &str) -> Result<Handle, PlatformError> {
        Err(PlatformError::unavailable(format!(
            "cannot load {class_name} from {}: in-process loading is not supported by the shell host",
            artifact.display()
        )))
    }
}

/// A child started by [`ShellProcessHost`].
#[derive(Debug)]
struct ChildProcess {
    pid: Pid,
    child: Mutex<Child>,
    exited: AtomicBool,
}

impl HostedProcess for ChildProcess {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn try_exit_code(&self) -> Result<Option<i32>, PlatformError> {
        let status = self.child.lock().try_wait()?;
        Ok(status.map(|s| {
            self.exited.store(true, Ordering::SeqCst);
            s.code().unwrap_or(-1)
        }))
    }

    fn wait(&self) -> Result<i32, PlatformError> {
        let status = self.child.lock().wait()?;
        self.exited.store(true, Ordering::SeqCst);
        Ok(status.code().unwrap_or(-1))
    }

    fn destroy(&self) {
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        // Signal by pid: `wait` may be holding the child lock.
        let Ok(raw) = i32::try_from(self.pid.raw()) else {
            return;
        };
        // SAFETY: kill(2) takes plain integers and has no memory effects.
        #[allow(unsafe_code)]
        let result = unsafe { libc::kill(raw, libc::SIGKILL) };
        if result != 0 {
            let e = std::io::Error::last_os_error();
            tracing::debug!(pid = %self.pid, "failed to kill process: {e}");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn shell_reports_exit_code() {
        let host = ShellProcessHost::new();
        assert_eq!(host.spawn_shell("true").expect("spawn"), 0);
        assert_eq!(host.spawn_shell("exit 3").expect("spawn"), 3);
    }

    #[test]
    fn missing_shell_is_io_error() {
        let host = ShellProcessHost::new().with_shell("/nonexistent/sh");
        assert!(matches!(host.spawn_shell("true"), Err(PlatformError::Io(_))));
    }

    #[test]
    fn process_uses_env_and_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("marker"), b"x").expect("write marker");

        let mut spec = ProcessSpec::new(["sh", "-c", "test \"$GREETING\" = hello && test -f marker"]);
        spec.env = Some(vec!["GREETING=hello".into(), "PATH=/usr/bin:/bin".into()]);
        spec.dir = Some(dir.path().to_path_buf());

        let process = ShellProcessHost::new().new_process(&spec).expect("start");
        assert_eq!(process.wait().expect("wait"), 0);
        assert_eq!(process.try_exit_code().expect("status"), Some(0));
    }

    #[test]
    fn destroy_kills_running_process() {
        let process = ShellProcessHost::new()
            .new_process(&ProcessSpec::new(["sleep", "30"]))
            .expect("start");
        assert_eq!(process.try_exit_code().expect("status"), None);

        process.destroy();
        assert_eq!(process.wait().expect("wait"), -1);
    }

    #[test]
    fn empty_command_is_rejected() {
        let host = ShellProcessHost::new();
        assert!(host.new_process(&ProcessSpec::default()).is_err());
    }

    #[test]
    fn in_process_loading_is_unavailable() {
        let host = ShellProcessHost::new();
        let err = host
            .load_and_instantiate(Path::new("/data/app/base.apk"), "com.example.Svc")
            .expect_err("unsupported");
        assert!(matches!(err, PlatformError::Unavailable(_)));
    }
}
