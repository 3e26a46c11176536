//! Shell command that launches a standalone user service.
//!
//! ```text
//! (CLASSPATH=<starter> <runtime>[ <debug flags>] /system/bin
//!    --nice-name=<package>:<suffix> <starter class>
//!    --token=<token> --package=<package> --class=<class> --uid=<uid>
//!    [ --debug-name=<package>:<suffix>])&
//! ```
//!
//! The trailing `&` detaches the service from the shell, so the shell
//! exits as soon as the process is forked.
//!
//! Every embedded value is shell-quoted; only the configured debug flags
//! are inserted verbatim, as a list of separate arguments.

use crate::config::BrokerConfig;
use aegis_types::{ServiceToken, Uid};
use shell_escape::escape;
use std::borrow::Cow;

fn quote(value: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(value))
}

/// Everything a launch command embeds.
#[derive(Debug, Clone)]
pub struct LaunchCommand<'a> {
    /// Rendezvous token.
    pub token: &'a ServiceToken,
    /// Package owning the service.
    pub package: &'a str,
    /// Service class.
    pub class_name: &'a str,
    /// Process name suffix.
    pub suffix: &'a str,
    /// Uid of the requesting client.
    pub caller_uid: Uid,
    /// Launch debuggable.
    pub debuggable: bool,
}

impl LaunchCommand<'_> {
    /// Process name of the launched service.
    #[must_use]
    pub fn process_name(&self) -> String {
        format!("{}:{}", self.package, self.suffix)
    }

    /// Renders the shell command.
    #[must_use]
    pub fn render(&self, config: &BrokerConfig) -> String {
        let process_name = self.process_name();
        let process_name = quote(&process_name);
        let (debug_flags, debug_name) = if self.debuggable {
            (
                format!(" {}", config.services.debug_flags),
                format!(" --debug-name={process_name}"),
            )
        } else {
            (String::new(), String::new())
        };

        format!(
            "(CLASSPATH={starter} {runtime}{debug_flags} /system/bin \
             --nice-name={process_name} {starter_class} \
             --token={token} --package={package} --class={class} --uid={uid}{debug_name})&",
            starter = quote(&config.starter_path()),
            runtime = quote(&config.services.runtime_path),
            starter_class = quote(&config.services.starter_class),
            token = quote(self.token.as_str()),
            package = quote(self.package),
            class = quote(self.class_name),
            uid = self.caller_uid,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(token: &ServiceToken, debuggable: bool) -> LaunchCommand<'_> {
        LaunchCommand {
            token,
            package: "com.example",
            class_name: "com.example.Svc",
            suffix: "svc",
            caller_uid: Uid::new(10123),
            debuggable,
        }
    }

    #[test]
    fn renders_release_command() {
        let token = ServiceToken::from("tok-1");
        let rendered = command(&token, false).render(&BrokerConfig::default());
        assert_eq!(
            rendered,
            "(CLASSPATH=/data/local/tmp/aegis/starter-v13.dex /system/bin/app_process /system/bin \
             --nice-name='com.example:svc' dev.aegis.starter.ServiceStarter \
             --token=tok-1 --package=com.example --class=com.example.Svc --uid=10123)&"
        );
    }

    #[test]
    fn debuggable_adds_flags_and_name() {
        let token = ServiceToken::from("tok-2");
        let mut config = BrokerConfig::default();
        config.services.debug_flags = "-Xdebug".into();

        let rendered = command(&token, true).render(&config);
        assert!(rendered.contains("/system/bin/app_process -Xdebug /system/bin"), "{rendered}");
        assert!(rendered.ends_with(" --debug-name='com.example:svc')&"), "{rendered}");
    }

    #[test]
    fn metacharacters_are_quoted() {
        let token = ServiceToken::from("tok-3");
        let mut launch = command(&token, false);
        launch.class_name = "x; id";
        launch.package = "a$b";

        let rendered = launch.render(&BrokerConfig::default());
        assert!(rendered.contains(" --package='a$b' --class='x; id' "), "{rendered}");
    }

    #[cfg(unix)]
    #[test]
    fn hostile_class_does_not_run_under_the_shell() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("injected");
        let class = format!("x;touch {};", marker.display());
        let token = ServiceToken::from("tok-4");
        let mut launch = command(&token, false);
        launch.class_name = &class;

        // Without the trailing `&` the shell waits for the subshell.
        let rendered = launch.render(&BrokerConfig::default());
        let foreground = rendered.trim_end_matches('&');
        std::process::Command::new("sh")
            .arg("-c")
            .arg(foreground)
            .stderr(std::process::Stdio::null())
            .status()
            .expect("run sh");

        assert!(!marker.exists());
    }
}
